//! # cpujitter-core
//!
//! **Your CPU never executes the same instruction sequence in the same time
//! twice.** Pipeline state, cache and TLB occupancy, prefetcher and branch
//! predictor history, and asynchronous micro-architectural events all leave
//! their mark on the wall-clock duration of a fixed computation.
//! `cpujitter-core` measures those variations with the platform's
//! high-resolution monotonic clock and turns them into entropy: a
//! non-physical true random number generator with no hardware requirements
//! beyond a fine-grained timer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cpujitter_core::{Collector, CollectorConfig, qualify_timer};
//!
//! // Once per boot: verify the host timer is fine-grained, monotonic and
//! // jittery enough to carry the entropy claim.
//! qualify_timer().expect("host timer unfit for jitter collection");
//!
//! let mut collector = Collector::new(CollectorConfig::default()).unwrap();
//! let mut buf = [0u8; 32];
//! collector.read(&mut buf).unwrap();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! noise-buffer walk → timer delta → XOR fold → Von Neumann debias
//!         → XOR into 64-bit pool, rotate → stir → continuous self-test
//! ```
//!
//! Each output block is 64 bits of pool after `22 × osr` debiased
//! measurements have been folded in. A FIPS 140-2 style continuous test
//! rejects repeated blocks and permanently poisons the collector when it
//! trips. After every read one extra block is collected and thrown away, so
//! the pool never retains a value that was handed to a caller.
//!
//! The output is **not whitened**: no hash, no DRBG. What you read is the
//! folded, debiased, stirred measurement stream itself. Feed it to a
//! conditioner if you need guaranteed-uniform bytes; use it directly if you
//! are studying the noise.

pub mod collector;
pub mod fips;
mod fold;
pub mod qualify;
pub mod quality;
#[cfg(feature = "rand_core")]
mod rng;
pub mod timer;

pub use collector::{Collector, CollectorConfig, CollectorError};
pub use fips::{FipsCheck, fips_enabled};
pub use fold::{DATA_SIZE_BITS, TIME_ENTROPY_BITS};
pub use qualify::{TimerQualityError, qualify_timer, qualify_timer_with};
pub use quality::{SampleReport, sample_report};
pub use timer::{MonotonicClock, TimeSource};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
