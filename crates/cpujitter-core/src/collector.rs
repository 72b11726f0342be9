//! The jitter entropy collector.
//!
//! A [`Collector`] owns a 64-bit entropy pool and everything needed to feed
//! it: the previous timer reading, an optional memory-access noise buffer,
//! and the sticky state of the FIPS 140-2 continuous self-test. One call to
//! [`Collector::read`] runs as many 64-bit collection rounds as the request
//! needs, self-tests each block, copies it out little-endian, and finishes
//! with one extra round whose output nobody ever sees — whatever lingers in
//! the pool afterwards was never handed to a caller.
//!
//! A collector is single-threaded state: it is `Send` but deliberately not
//! `Sync`. Callers that want sharing wrap it in a mutex or keep one
//! collector per thread.

use std::collections::TryReserveError;

use log::debug;
use thiserror::Error;
use zeroize::Zeroize;

use crate::fips::{self, FipsCheck};
use crate::fold::{
    self, DATA_SIZE_BITS, MAX_FOLD_LOOP_BITS, MIN_FOLD_LOOP_BITS, TIME_ENTROPY_BITS,
};
use crate::timer::{MonotonicClock, TimeSource};

/// Default noise-buffer block size in bytes.
pub const DEFAULT_MEMORY_BLOCK_SIZE: usize = 32;

/// Default number of noise-buffer blocks.
pub const DEFAULT_MEMORY_BLOCKS: usize = 64;

/// Default number of read-modify-write operations per measurement.
pub const DEFAULT_MEMORY_ACCESS_LOOPS: usize = 128;

/// Measurement pairs the debiaser consumes before declaring the noise
/// source stuck. The loop is theoretically unbounded; a healthy source
/// exits within a handful of pairs.
const DEBIAS_RETRY_LIMIT: u32 = 1024;

/// Failures surfaced by collector construction and reads.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The noise buffer could not be allocated.
    #[error("cannot allocate the memory-access noise buffer")]
    OutOfMemory(#[from] TryReserveError),
    /// The Von Neumann debiaser burned through its whole retry budget on
    /// identical measurement pairs. The timer is effectively frozen.
    #[error("noise source stuck: {DEBIAS_RETRY_LIMIT} measurement pairs were identical")]
    NoiseSourceStuck,
    /// The continuous self-test saw two identical output blocks. The
    /// failure is sticky: the collector is poisoned and must be dropped.
    #[error("continuous self-test failed; collector is poisoned")]
    HealthTestFailed,
}

/// Construction-time options for a [`Collector`].
///
/// The three `bool` switches mirror the collector's three optional
/// behaviors; turning any of them off trades quality for speed and is meant
/// for measurement harnesses, not production use. Buffer geometry is fixed
/// after construction.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Oversampling rate: multiplies the per-block collection loop count.
    /// `0` is treated as `1`.
    pub osr: u32,
    /// Walk the noise buffer before every timer sample, adding memory-bus
    /// and cache wait states to the measured execution time.
    pub memory_access: bool,
    /// Stir the pool with the SHA-1-constant mixer after every block.
    pub stir: bool,
    /// Von Neumann debiasing of measurement pairs.
    pub unbias: bool,
    /// Continuous self-test policy.
    pub fips: FipsCheck,
    /// Noise-buffer block size in bytes.
    pub memory_block_size: usize,
    /// Number of noise-buffer blocks.
    pub memory_blocks: usize,
    /// Read-modify-write operations per measurement.
    pub memory_access_loops: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            osr: 1,
            memory_access: true,
            stir: true,
            unbias: true,
            fips: FipsCheck::default(),
            memory_block_size: DEFAULT_MEMORY_BLOCK_SIZE,
            memory_blocks: DEFAULT_MEMORY_BLOCKS,
            memory_access_loops: DEFAULT_MEMORY_ACCESS_LOOPS,
        }
    }
}

/// Memory-access noise source: a byte buffer larger than a minimal L1 data
/// cache, walked with a stride coprime to its power-of-two block size so
/// successive accesses land in different cache lines and cover the buffer
/// evenly.
struct NoiseBuffer {
    bytes: Vec<u8>,
    cursor: usize,
    block_size: usize,
    access_loops: usize,
    locked: bool,
}

impl NoiseBuffer {
    fn new(
        block_size: usize,
        blocks: usize,
        access_loops: usize,
    ) -> Result<Self, CollectorError> {
        let len = block_size.saturating_mul(blocks);
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len)?;
        bytes.resize(len, 0);
        // Best effort: keep the working set off swap. EPERM under tight
        // RLIMIT_MEMLOCK is fine, the walk works either way.
        let locked = lock_pages(&bytes);
        Ok(Self {
            bytes,
            cursor: 0,
            block_size,
            access_loops,
            locked,
        })
    }

    /// One batch of read-increment-write accesses. Volatile on both sides:
    /// the compiler may not elide the reads, fuse the writes, or constant-
    /// fold the stride.
    fn walk(&mut self) {
        let wrap = self.bytes.len();
        for _ in 0..self.access_loops {
            // SAFETY: cursor < wrap is established at construction and
            // restored by the modulo below on every step.
            unsafe {
                let slot = self.bytes.as_mut_ptr().add(self.cursor);
                let value = std::ptr::read_volatile(slot);
                std::ptr::write_volatile(slot, value.wrapping_add(1));
            }
            self.cursor = (self.cursor + self.block_size - 1) % wrap;
        }
    }
}

impl Drop for NoiseBuffer {
    fn drop(&mut self) {
        if self.locked {
            unlock_pages(&self.bytes);
        }
        self.bytes.zeroize();
    }
}

#[cfg(unix)]
fn lock_pages(bytes: &[u8]) -> bool {
    // SAFETY: the slice is a live allocation of exactly this length.
    unsafe { libc::mlock(bytes.as_ptr().cast(), bytes.len()) == 0 }
}

#[cfg(not(unix))]
fn lock_pages(_bytes: &[u8]) -> bool {
    false
}

#[cfg(unix)]
fn unlock_pages(bytes: &[u8]) {
    // SAFETY: the slice is the same allocation that was mlock'ed.
    unsafe {
        libc::munlock(bytes.as_ptr().cast(), bytes.len());
    }
}

#[cfg(not(unix))]
fn unlock_pages(_bytes: &[u8]) {}

/// A CPU-jitter entropy collector.
///
/// See the [module documentation](self) for the collection pipeline. The
/// pool and the noise buffer are zeroized on drop.
pub struct Collector {
    /// The 64-bit entropy pool.
    data: u64,
    /// Previous timer reading; the first delta after construction is
    /// meaningless and every collection round discards its first sample.
    prev_time: u64,
    /// Previous output block for the continuous self-test.
    old_data: Option<u64>,
    /// Sticky self-test failure.
    fips_fail: bool,
    osr: u32,
    stir: bool,
    unbias: bool,
    fips: FipsCheck,
    mem: Option<NoiseBuffer>,
    timer: Box<dyn TimeSource>,
    /// Completed collection rounds, including self-test priming rounds and
    /// the discarded post-output round.
    rounds_completed: u64,
}

impl Collector {
    /// Create a collector running against the platform clock.
    ///
    /// Runs one full collection round so the pool starts non-zero, then
    /// primes the continuous self-test. A self-test verdict at construction
    /// is sticky and surfaces on the first read.
    pub fn new(config: CollectorConfig) -> Result<Self, CollectorError> {
        Self::with_time_source(config, Box::new(MonotonicClock))
    }

    /// Create a collector with an injected time source.
    pub fn with_time_source(
        config: CollectorConfig,
        timer: Box<dyn TimeSource>,
    ) -> Result<Self, CollectorError> {
        let mem = if config.memory_access
            && config.memory_block_size > 0
            && config.memory_blocks > 0
        {
            Some(NoiseBuffer::new(
                config.memory_block_size,
                config.memory_blocks,
                config.memory_access_loops,
            )?)
        } else {
            None
        };

        let mut collector = Self {
            data: 0,
            prev_time: 0,
            old_data: None,
            fips_fail: false,
            osr: config.osr.max(1),
            stir: config.stir,
            unbias: config.unbias,
            fips: config.fips,
            mem,
            timer,
            rounds_completed: 0,
        };

        collector.collect_block()?;
        // Prime the self-test; a verdict here is sticky, not returned.
        let _ = collector.health_check();

        debug!(
            "collector ready: osr={} stir={} unbias={} noise_buffer={}B",
            collector.osr,
            collector.stir,
            collector.unbias,
            collector.mem.as_ref().map_or(0, |m| m.bytes.len()),
        );
        Ok(collector)
    }

    /// Effective oversampling rate.
    pub fn osr(&self) -> u32 {
        self.osr
    }

    /// Whether the continuous self-test has permanently failed.
    pub fn is_poisoned(&self) -> bool {
        self.fips_fail
    }

    /// Completed collection rounds over the collector's lifetime.
    ///
    /// Observability hook: each `read` performs one round per 8 output
    /// bytes, plus one discarded round, plus one extra round the first time
    /// the self-test primes itself.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    /// Fill `dst` with collected entropy.
    ///
    /// Returns the number of bytes written, always `dst.len()`. An empty
    /// slice returns `Ok(0)` without collecting. Pool words are serialized
    /// little-endian, so a stream captured on any host is comparable.
    ///
    /// On [`CollectorError::HealthTestFailed`] the collector is poisoned:
    /// every later call fails too, and the only recovery is to drop it and
    /// construct a new one.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, CollectorError> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        while filled < dst.len() {
            self.collect_block()?;
            self.health_check()?;
            let take = (dst.len() - filled).min(size_of::<u64>());
            dst[filled..filled + take].copy_from_slice(&self.data.to_le_bytes()[..take]);
            filled += take;
        }

        // One more round the caller never sees: if this process is later
        // dumped, paged out or cold-boot read, the pool holds a value that
        // was never part of any output. A stuck debiaser here is ignored —
        // the bytes are already delivered and the fault resurfaces on the
        // next call.
        let _ = self.collect_block();
        Ok(dst.len())
    }

    /// One collection round: accumulate 64 bits' worth of debiased jitter
    /// measurements into the pool, then optionally stir.
    ///
    /// The loop count `ceil(64 / 3) × osr` passes the 3-bit folded value
    /// over every pool bit at least `osr` times; the rotation spreads each
    /// contribution across the word.
    fn collect_block(&mut self) -> Result<(), CollectorError> {
        let rounds = u64::from(DATA_SIZE_BITS.div_ceil(TIME_ENTROPY_BITS)) * u64::from(self.osr);
        for round in 0..rounds {
            if round == 0 {
                // Prime prev_time: the first delta of a batch measures the
                // gap since the previous batch, not the jitter of this one.
                self.measure_jitter();
            }
            let bits = self.unbiased_bit()?;
            self.data ^= bits;
            self.data = self.data.rotate_left(TIME_ENTROPY_BITS);
        }
        if self.stir {
            self.stir_pool();
        }
        self.rounds_completed += 1;
        Ok(())
    }

    /// One noisy measurement: walk the noise buffer, sample the timer, fold
    /// the delta to the previous sample.
    ///
    /// The folded delta carries the jitter of everything between the two
    /// timer samples — the buffer walk, the fold loop itself, and whatever
    /// the pipeline, caches and prefetchers were doing meanwhile.
    fn measure_jitter(&mut self) -> u64 {
        if let Some(mem) = &mut self.mem {
            mem.walk();
        }
        let time = self.timer.now_ns();
        let delta = time.wrapping_sub(self.prev_time);
        self.prev_time = time;

        let fold_loops = self.shuffled_fold_count();
        fold::fold_time(delta, fold_loops)
    }

    /// Data-dependent fold-loop count in `[1, 16]`, derived from a fresh
    /// timer reading XORed with the pool so no two invocations are
    /// statically predictable.
    fn shuffled_fold_count(&mut self) -> u64 {
        let seed = self.timer.now_ns() ^ self.data;
        fold::shuffle_fold(seed, MAX_FOLD_LOOP_BITS, MIN_FOLD_LOOP_BITS)
    }

    /// Von Neumann debiasing over pairs of measurements: equal pairs are
    /// discarded, the first of an unequal pair is returned. Assumes the two
    /// measurements are independent; if they are not, the step is still
    /// harmless because the pool mix is a bijective XOR.
    fn unbiased_bit(&mut self) -> Result<u64, CollectorError> {
        if !self.unbias {
            return Ok(self.measure_jitter());
        }
        for _ in 0..DEBIAS_RETRY_LIMIT {
            let a = self.measure_jitter();
            let b = self.measure_jitter();
            if a != b {
                return Ok(a);
            }
        }
        Err(CollectorError::NoiseSourceStuck)
    }

    /// Bit-dependent pool permutation. The mixer starts from the third and
    /// fourth SHA-1 initialization vectors and absorbs the first and second
    /// for every set pool bit, rotating between bits; the result is XORed
    /// back into the pool. The constants are used purely for their balanced
    /// bit patterns — nothing cryptographic is claimed, and being a XOR the
    /// stir can only diffuse entropy, never destroy it.
    fn stir_pool(&mut self) {
        const STIR_CONSTANT: u64 = 0x67452301_efcdab89;
        const MIXER_SEED: u64 = 0x98badcfe_10325476;

        let mut mixer = MIXER_SEED;
        for bit in 0..DATA_SIZE_BITS {
            if (self.data >> bit) & 1 == 1 {
                mixer ^= STIR_CONSTANT;
            }
            mixer = mixer.rotate_left(1);
        }
        self.data ^= mixer;
    }

    /// FIPS 140-2 continuous test: a freshly collected block equal to the
    /// previous one poisons the collector. The first invocation has nothing
    /// to compare against, so it records the current block and collects one
    /// more to judge.
    fn health_check(&mut self) -> Result<(), CollectorError> {
        if !fips::continuous_test_active(self.fips) {
            return Ok(());
        }
        if self.fips_fail {
            return Err(CollectorError::HealthTestFailed);
        }

        if self.old_data.is_none() {
            self.old_data = Some(self.data);
            self.collect_block()?;
        }

        if self.old_data == Some(self.data) {
            self.fips_fail = true;
            return Err(CollectorError::HealthTestFailed);
        }
        self.old_data = Some(self.data);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> u64 {
        self.data
    }

    #[cfg(test)]
    pub(crate) fn old_pool(&self) -> Option<u64> {
        self.old_data
    }

    #[cfg(test)]
    pub(crate) fn set_timer(&mut self, timer: Box<dyn TimeSource>) {
        self.timer = timer;
    }

    #[cfg(test)]
    pub(crate) fn force_health_state(&mut self, data: u64, old_data: Option<u64>) {
        self.data = data;
        self.old_data = old_data;
        self.fips_fail = false;
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.data.zeroize();
        self.prev_time.zeroize();
        self.old_data.zeroize();
        // The noise buffer zeroizes and unlocks itself.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::stubs::{StuckClock, TickClock};

    fn quiet_config() -> CollectorConfig {
        // Pin the self-test off so tests do not depend on the host's
        // kernel FIPS flag.
        CollectorConfig {
            fips: FipsCheck::Disabled,
            ..CollectorConfig::default()
        }
    }

    #[test]
    fn construction_fills_the_pool() {
        let collector = Collector::new(quiet_config()).unwrap();
        assert_ne!(collector.pool(), 0);
        assert_eq!(collector.rounds_completed(), 1);
    }

    #[test]
    fn read_returns_requested_length_across_osr() {
        for osr in 1..=10 {
            let config = CollectorConfig {
                osr,
                ..quiet_config()
            };
            let mut collector = Collector::new(config).unwrap();
            assert_eq!(collector.osr(), osr);
            let snapshot = collector.pool();
            let mut buf = [0u8; 8];
            assert_eq!(collector.read(&mut buf).unwrap(), 8);
            assert_ne!(buf, [0u8; 8]);
            assert_ne!(u64::from_le_bytes(buf), snapshot);
        }
    }

    #[test]
    fn zero_osr_is_normalized_to_one() {
        let config = CollectorConfig {
            osr: 0,
            ..quiet_config()
        };
        let mut collector = Collector::new(config).unwrap();
        assert_eq!(collector.osr(), 1);
        let mut buf = [0u8; 8];
        assert_eq!(collector.read(&mut buf).unwrap(), 8);
    }

    #[test]
    fn empty_read_does_not_collect() {
        let mut collector = Collector::new(quiet_config()).unwrap();
        let before = collector.rounds_completed();
        assert_eq!(collector.read(&mut []).unwrap(), 0);
        assert_eq!(collector.rounds_completed(), before);
    }

    #[test]
    fn read_runs_one_discarded_round() {
        let mut collector = Collector::new(quiet_config()).unwrap();
        let before = collector.rounds_completed();
        let mut buf = [0u8; 32];
        collector.read(&mut buf).unwrap();
        // Four output blocks plus the round nobody sees.
        assert_eq!(collector.rounds_completed() - before, 5);

        let words: Vec<u64> = buf
            .chunks_exact(8)
            .map(|w| u64::from_le_bytes(w.try_into().unwrap()))
            .collect();
        for (i, a) in words.iter().enumerate() {
            for b in &words[i + 1..] {
                assert_ne!(a, b, "two of four output words collided");
            }
        }
    }

    #[test]
    fn output_is_the_pool_after_the_last_output_block() {
        let config = CollectorConfig {
            fips: FipsCheck::Enabled,
            ..CollectorConfig::default()
        };
        let mut collector = Collector::new(config).unwrap();
        let mut buf = [0u8; 8];
        collector.read(&mut buf).unwrap();
        // The self-test recorded exactly the block that was copied out; the
        // discarded round has since moved the pool past it.
        assert_eq!(collector.old_pool(), Some(u64::from_le_bytes(buf)));
        assert_ne!(collector.pool(), u64::from_le_bytes(buf));
    }

    #[test]
    fn successive_reads_differ() {
        let mut collector = Collector::new(quiet_config()).unwrap();
        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        collector.read(&mut first).unwrap();
        collector.read(&mut second).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn independent_collectors_differ() {
        let mut a = Collector::new(quiet_config()).unwrap();
        let mut b = Collector::new(quiet_config()).unwrap();
        let mut buf_a = [0u8; 8];
        let mut buf_b = [0u8; 8];
        a.read(&mut buf_a).unwrap();
        b.read(&mut buf_b).unwrap();
        assert_ne!(buf_a, buf_b);
    }

    #[test]
    fn all_noise_stages_optional() {
        let config = CollectorConfig {
            memory_access: false,
            stir: false,
            unbias: false,
            ..quiet_config()
        };
        let mut collector = Collector::new(config).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(collector.read(&mut buf).unwrap(), 8);
    }

    #[test]
    fn odd_lengths_are_served_exactly() {
        let mut collector = Collector::new(quiet_config()).unwrap();
        for len in [1usize, 3, 7, 9, 17, 63] {
            let mut buf = vec![0u8; len];
            assert_eq!(collector.read(&mut buf).unwrap(), len);
        }
    }

    #[test]
    fn noise_walk_stays_in_bounds() {
        let mut buffer = NoiseBuffer::new(32, 64, 128).unwrap();
        let len = buffer.bytes.len();
        for _ in 0..1_000 {
            buffer.walk();
            assert!(buffer.cursor < len);
        }
        // The stride is coprime to the buffer size, so a long walk mutates
        // bytes all over the buffer, not just one block.
        let touched = buffer.bytes.iter().filter(|&&b| b != 0).count();
        assert!(touched > len / 2, "only {touched}/{len} bytes touched");
    }

    #[test]
    fn stir_of_zero_pool_is_the_mixer_seed() {
        // With no pool bit set the mixer is rotated 64 times and comes back
        // unchanged, so the stir XORs the bare seed into the pool.
        let mut collector = Collector::new(quiet_config()).unwrap();
        collector.force_health_state(0, None);
        collector.stir_pool();
        assert_eq!(collector.pool(), 0x98badcfe_10325476);
    }

    #[test]
    fn stir_is_deterministic_in_the_pool() {
        let mut collector = Collector::new(quiet_config()).unwrap();
        collector.force_health_state(0xA5A5_5A5A_DEAD_BEEF, None);
        collector.stir_pool();
        let once = collector.pool();
        collector.force_health_state(0xA5A5_5A5A_DEAD_BEEF, None);
        collector.stir_pool();
        assert_eq!(collector.pool(), once);
        assert_ne!(once, 0xA5A5_5A5A_DEAD_BEEF);
    }

    #[test]
    fn frozen_timer_trips_the_continuous_test() {
        let config = CollectorConfig {
            memory_access: false,
            stir: false,
            unbias: false,
            fips: FipsCheck::Enabled,
            ..CollectorConfig::default()
        };
        let mut collector =
            Collector::with_time_source(config, Box::new(TickClock::new(1_000, 7))).unwrap();

        // The timer dies: every later delta is zero, and the pool sits at
        // the all-zero fixed point of the collection loop.
        collector.set_timer(Box::new(StuckClock(123)));
        collector.force_health_state(0, Some(0xDEAD_BEEF));

        let mut buf = [0u8; 8];
        // First read still passes: the frozen block differs from the last
        // healthy one.
        assert_eq!(collector.read(&mut buf).unwrap(), 8);
        assert_eq!(buf, [0u8; 8]);
        // Second read compares frozen against frozen.
        assert!(matches!(
            collector.read(&mut buf),
            Err(CollectorError::HealthTestFailed)
        ));
        assert!(collector.is_poisoned());
        // Poisoning is sticky.
        assert!(matches!(
            collector.read(&mut buf),
            Err(CollectorError::HealthTestFailed)
        ));
    }

    #[test]
    fn frozen_timer_with_debiasing_is_caught_at_construction() {
        let config = CollectorConfig {
            memory_access: false,
            stir: false,
            unbias: true,
            fips: FipsCheck::Disabled,
            ..CollectorConfig::default()
        };
        // Every measurement folds a zero delta to the same value, so the
        // debiaser never sees an unequal pair and gives up.
        let result = Collector::with_time_source(config, Box::new(StuckClock(123)));
        assert!(matches!(result, Err(CollectorError::NoiseSourceStuck)));
    }

    #[test]
    fn collector_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Collector>();
    }
}
