//! One-time environment qualification.
//!
//! Before any collector is created, the host timer must be shown to be
//! present, fine-grained, forward-going and jittery — the properties the
//! entropy estimate rests on. [`qualify_timer`] brackets a fixed single-pass
//! fold between two timer readings, 400 times, discards the first 100
//! iterations as cache/branch-predictor warmup, and applies threshold checks
//! to the remaining 300.
//!
//! Qualification is cheap (well under a millisecond on current hardware) but
//! only needs to run once per boot; callers typically invoke it at startup
//! and refuse to construct collectors if it fails.

use std::hint::black_box;

use log::debug;
use thiserror::Error;

use crate::fold::{MIN_FOLD_LOOP_BITS, TIME_ENTROPY_BITS, fold_time};
use crate::timer::{MonotonicClock, TimeSource};

/// Measured iterations evaluated by the threshold checks.
const TEST_LOOPS: u64 = 300;

/// Leading iterations that only warm caches and predictors.
const WARMUP_LOOPS: u64 = 100;

/// Why a host timer is unfit for jitter collection.
///
/// None of these are retryable: the verdict describes the hardware and
/// kernel, not a transient condition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerQualityError {
    /// The timer returned zero.
    #[error("no usable time source: timer returned zero")]
    NoTimer,
    /// Two bracketing readings collapsed to the same value, or deltas step
    /// in multiples of 100 almost all of the time.
    #[error("timer too coarse to resolve the fold loop")]
    CoarseTimer,
    /// A delta fell below the assumed per-sample entropy floor.
    #[error("timer variation below {TIME_ENTROPY_BITS} ns")]
    SmallVariation,
    /// The timer went backwards more than three times.
    #[error("timer is not monotonic")]
    NonMonotonic,
    /// Consecutive deltas never differed.
    #[error("timer deltas carry no variation")]
    StuckDelta,
    /// Consecutive deltas differ, but on average by less than the assumed
    /// per-sample entropy.
    #[error("mean variation of timer deltas below {TIME_ENTROPY_BITS} ns")]
    SmallDeltaVariation,
}

/// Qualify the platform's monotonic clock.
pub fn qualify_timer() -> Result<(), TimerQualityError> {
    qualify_timer_with(&mut MonotonicClock)
}

/// Qualify an arbitrary time source. Production callers want
/// [`qualify_timer`]; this entry point exists for harnesses with stub clocks.
pub fn qualify_timer_with(timer: &mut dyn TimeSource) -> Result<(), TimerQualityError> {
    let mut backwards = 0u32;
    let mut mod100 = 0u64;
    let mut delta_of_delta_sum = 0u64;
    let mut distinct_deltas = 0u64;
    let mut prev_delta: Option<u64> = None;

    for i in 0..WARMUP_LOOPS + TEST_LOOPS {
        let before = timer.now_ns();
        black_box(fold_time(before, 1 << MIN_FOLD_LOOP_BITS));
        let after = timer.now_ns();

        if before == 0 || after == 0 {
            return Err(TimerQualityError::NoTimer);
        }
        let delta = after.wrapping_sub(before);
        if delta == 0 {
            return Err(TimerQualityError::CoarseTimer);
        }
        if delta < u64::from(TIME_ENTROPY_BITS) {
            return Err(TimerQualityError::SmallVariation);
        }

        // Everything up to here already touched code, data and the branch
        // predictors; the warmup iterations exist for exactly that and their
        // statistics are discarded.
        if i < WARMUP_LOOPS {
            continue;
        }

        if after <= before {
            backwards += 1;
        }
        if delta % 100 == 0 {
            mod100 += 1;
        }
        if let Some(prev) = prev_delta {
            if delta != prev {
                distinct_deltas += 1;
            }
            delta_of_delta_sum += delta.abs_diff(prev);
        }
        prev_delta = Some(delta);
    }

    // CLOCK_MONOTONIC should never run backwards, but an NTP slew hitting a
    // flawed host clock mid-test gets three strikes before we condemn it.
    if backwards > 3 {
        return Err(TimerQualityError::NonMonotonic);
    }
    if delta_of_delta_sum == 0 {
        return Err(TimerQualityError::StuckDelta);
    }
    if delta_of_delta_sum / TEST_LOOPS <= u64::from(TIME_ENTROPY_BITS) {
        return Err(TimerQualityError::SmallDeltaVariation);
    }
    if mod100 > TEST_LOOPS / 10 * 9 {
        return Err(TimerQualityError::CoarseTimer);
    }

    debug!(
        "timer qualified: {distinct_deltas} distinct consecutive deltas, \
         mean delta-of-delta {}",
        delta_of_delta_sum / TEST_LOOPS
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::stubs::{BackwardsClock, JitterClock, PatternClock, StuckClock, TickClock};

    #[test]
    #[ignore] // Run with: cargo test -- --ignored
    fn host_timer_qualifies() {
        // Hardware-dependent: any host fit to run the collector passes, but
        // emulators and coarse-timer VMs may legitimately fail.
        assert_eq!(qualify_timer(), Ok(()));
    }

    #[test]
    fn jittery_clock_qualifies() {
        assert_eq!(qualify_timer_with(&mut JitterClock::new(42)), Ok(()));
        assert_eq!(qualify_timer_with(&mut JitterClock::new(7)), Ok(()));
    }

    #[test]
    fn zero_clock_is_rejected() {
        assert_eq!(
            qualify_timer_with(&mut StuckClock(0)),
            Err(TimerQualityError::NoTimer)
        );
    }

    #[test]
    fn frozen_clock_is_rejected_as_coarse() {
        assert_eq!(
            qualify_timer_with(&mut StuckClock(5_000)),
            Err(TimerQualityError::CoarseTimer)
        );
    }

    #[test]
    fn sub_floor_deltas_are_rejected() {
        assert_eq!(
            qualify_timer_with(&mut TickClock::new(1_000, 2)),
            Err(TimerQualityError::SmallVariation)
        );
    }

    #[test]
    fn backwards_clock_is_rejected() {
        assert_eq!(
            qualify_timer_with(&mut BackwardsClock::new()),
            Err(TimerQualityError::NonMonotonic)
        );
    }

    #[test]
    fn constant_delta_is_rejected() {
        // Perfectly regular 64 ns steps: forward, fine-grained, but the
        // delta never varies.
        assert_eq!(
            qualify_timer_with(&mut TickClock::new(1_000, 64)),
            Err(TimerQualityError::StuckDelta)
        );
    }

    #[test]
    fn tiny_delta_variation_is_rejected() {
        // Each iteration reads the clock twice, so the measured deltas are
        // the odd-position steps: they alternate 10, 11 — variation exists
        // but averages well under the entropy floor.
        assert_eq!(
            qualify_timer_with(&mut PatternClock::new(1_000, &[1, 10, 1, 11])),
            Err(TimerQualityError::SmallDeltaVariation)
        );
    }

    #[test]
    fn hundreds_stepping_clock_is_rejected_as_coarse() {
        // Measured deltas cycle 200, 500, 300: healthy variation, but every
        // one a multiple of 100.
        assert_eq!(
            qualify_timer_with(&mut PatternClock::new(1_000, &[100, 200, 100, 500, 100, 300])),
            Err(TimerQualityError::CoarseTimer)
        );
    }
}
