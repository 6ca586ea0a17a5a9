//! Digest primitives consumed by the pipeline stages.
//!
//! The stages only depend on the [`Signer`] trait. [`DataSigner`] is the
//! production implementation (MD5 for the slow digest, CRC-32 for the fast
//! checksum); [`SimulatedLatency`] wraps any signer to make its calls
//! artificially expensive.

use crate::config::SignerConfig;
use md5::{Digest, Md5};
use rand::Rng;
use std::time::Duration;

/// A pair of deterministic, side-effect-free text digests.
///
/// Both methods are blocking and may be expensive; callers run them on the
/// blocking pool.
pub trait Signer: Send + Sync + 'static {
    /// Expensive, collision-resistant digest.
    fn slow_digest(&self, data: &str) -> String;

    /// Cheap checksum.
    fn fast_checksum(&self, data: &str) -> String;
}

/// MD5 / CRC-32 signer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataSigner;

impl Signer for DataSigner {
    fn slow_digest(&self, data: &str) -> String {
        hex::encode(Md5::digest(data.as_bytes()))
    }

    fn fast_checksum(&self, data: &str) -> String {
        crc32fast::hash(data.as_bytes()).to_string()
    }
}

/// Adds a fixed delay plus uniform random jitter in front of every call.
#[derive(Debug, Clone)]
pub struct SimulatedLatency<S> {
    inner: S,
    slow_delay: Duration,
    fast_delay: Duration,
    jitter_ms: u64,
}

impl<S: Signer> SimulatedLatency<S> {
    pub fn new(inner: S, slow_delay: Duration, fast_delay: Duration, jitter_ms: u64) -> Self {
        Self {
            inner,
            slow_delay,
            fast_delay,
            jitter_ms,
        }
    }

    /// Build from the `signer` section of the config.
    pub fn from_config(inner: S, config: &SignerConfig) -> Self {
        Self::new(
            inner,
            Duration::from_millis(config.slow_delay_ms),
            Duration::from_millis(config.fast_delay_ms),
            config.jitter_ms,
        )
    }

    fn pause(&self, base: Duration) {
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };
        let total = base + jitter;
        if !total.is_zero() {
            std::thread::sleep(total);
        }
    }
}

impl<S: Signer> Signer for SimulatedLatency<S> {
    fn slow_digest(&self, data: &str) -> String {
        self.pause(self.slow_delay);
        self.inner.slow_digest(data)
    }

    fn fast_checksum(&self, data: &str) -> String {
        self.pause(self.fast_delay);
        self.inner.fast_checksum(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_slow_digest_is_md5_hex() {
        let signer = DataSigner;
        assert_eq!(signer.slow_digest(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(signer.slow_digest("0"), "cfcd208495d565ef66e7dff9f98764da");
    }

    #[test]
    fn test_fast_checksum_is_crc32_decimal() {
        let signer = DataSigner;
        // CRC-32/IEEE check value
        assert_eq!(signer.fast_checksum("123456789"), "3421780262");
        assert_eq!(signer.fast_checksum(""), "0");
    }

    #[test]
    fn test_primitives_are_deterministic() {
        let signer = DataSigner;
        assert_eq!(signer.slow_digest("abc"), signer.slow_digest("abc"));
        assert_eq!(signer.fast_checksum("abc"), signer.fast_checksum("abc"));
    }

    #[test]
    fn test_simulated_latency_delegates() {
        let signer = SimulatedLatency::new(DataSigner, Duration::ZERO, Duration::ZERO, 2);
        assert_eq!(signer.slow_digest("7"), DataSigner.slow_digest("7"));
        assert_eq!(signer.fast_checksum("7"), DataSigner.fast_checksum("7"));
    }

    #[test]
    fn test_simulated_latency_sleeps() {
        let signer = SimulatedLatency::new(
            DataSigner,
            Duration::from_millis(20),
            Duration::from_millis(5),
            0,
        );

        let start = Instant::now();
        signer.slow_digest("x");
        assert!(start.elapsed() >= Duration::from_millis(20));

        let start = Instant::now();
        signer.fast_checksum("x");
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}

/// Instrumented signers for stage and pipeline tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::Signer;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Produces readable outputs (`slow(x)`, `fast(x)`), counts calls, and
    /// tracks how many slow digests ever ran at the same time.
    #[derive(Debug, Default)]
    pub struct MockSigner {
        jitter_ms: u64,
        slow_calls: AtomicUsize,
        fast_calls: AtomicUsize,
        slow_active: AtomicUsize,
        max_slow_overlap: AtomicUsize,
    }

    impl MockSigner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sleep a random 0..=`jitter_ms` before every call.
        pub fn with_jitter(jitter_ms: u64) -> Self {
            Self {
                jitter_ms,
                ..Default::default()
            }
        }

        fn jitter(&self) {
            if self.jitter_ms > 0 {
                let ms = rand::thread_rng().gen_range(0..=self.jitter_ms);
                std::thread::sleep(Duration::from_millis(ms));
            }
        }

        pub fn slow_calls(&self) -> usize {
            self.slow_calls.load(Ordering::SeqCst)
        }

        pub fn fast_calls(&self) -> usize {
            self.fast_calls.load(Ordering::SeqCst)
        }

        pub fn max_slow_overlap(&self) -> usize {
            self.max_slow_overlap.load(Ordering::SeqCst)
        }
    }

    impl Signer for MockSigner {
        fn slow_digest(&self, data: &str) -> String {
            let active = self.slow_active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_slow_overlap.fetch_max(active, Ordering::SeqCst);
            self.slow_calls.fetch_add(1, Ordering::SeqCst);
            self.jitter();
            self.slow_active.fetch_sub(1, Ordering::SeqCst);
            format!("slow({})", data)
        }

        fn fast_checksum(&self, data: &str) -> String {
            self.fast_calls.fetch_add(1, Ordering::SeqCst);
            self.jitter();
            format!("fast({})", data)
        }
    }
}
