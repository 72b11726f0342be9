//! High-resolution monotonic time source.
//!
//! Every timing measurement in this crate flows through [`TimeSource::now_ns`].
//! The trait exists so the collector and the qualification check can run
//! against stub clocks in tests; production code uses [`MonotonicClock`].
//!
//! Contract: the counter is 64-bit, nanosecond-scale and monotonically
//! non-decreasing. Two calls bracketing even a trivial computation must
//! normally observe distinct values — hosts where they do not are rejected by
//! [`qualify_timer`](crate::qualify_timer), not worked around here.

/// A 64-bit nanosecond-scale monotonic counter.
pub trait TimeSource: Send {
    /// Current counter value.
    fn now_ns(&mut self) -> u64;
}

/// The platform's finest monotonic clock.
///
/// On macOS this reads the ARM system counter via `mach_absolute_time()`; on
/// other Unix systems it reads `clock_gettime(CLOCK_MONOTONIC)`. Elsewhere it
/// falls back to `std::time::Instant` against a process-local epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl TimeSource for MonotonicClock {
    #[cfg(target_os = "macos")]
    fn now_ns(&mut self) -> u64 {
        unsafe extern "C" {
            fn mach_absolute_time() -> u64;
        }
        // SAFETY: mach_absolute_time() is a stable macOS API that returns the
        // current value of the system absolute time counter. Always safe to call.
        unsafe { mach_absolute_time() }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn now_ns(&mut self) -> u64 {
        // SAFETY: zeroed timespec is a valid value for an out-parameter.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: ts is a valid, writable timespec; CLOCK_MONOTONIC cannot
        // fail on any Unix this crate targets.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(ts.tv_nsec as u64)
    }

    #[cfg(not(unix))]
    fn now_ns(&mut self) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}
