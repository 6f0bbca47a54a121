//! Compare unit over a simulated microsecond clock.
//!
//! Models a 16-bit counter ticking every 4us, the resolution of the
//! ignition timers on the smaller targets. Host tests and the emulator move
//! the clock forward and call the schedule's compare handler whenever
//! [`SimTimer::advance_to`] reports a match.

use crate::crank_maths::Micros;

use super::CompareTimer;

const TICK_SHIFT: u32 = 2;
const COUNTER_MASK: u32 = 0xFFFF;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimTimer {
    now: Micros,
    compare: u32,
    enabled: bool,
}

impl SimTimer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: 0,
            compare: 0,
            enabled: false,
        }
    }

    #[must_use]
    pub const fn now(&self) -> Micros {
        self.now
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Time until the counter next reaches the compare value, while the
    /// interrupt is enabled.
    #[must_use]
    pub fn micros_to_compare(&self) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        let ticks = match self.compare.wrapping_sub(self.counter()) & COUNTER_MASK {
            0 => COUNTER_MASK + 1,
            ticks => ticks,
        };
        // The counter moves on the next 4us boundary.
        Some((ticks << TICK_SHIFT) - (self.now & ((1 << TICK_SHIFT) - 1)))
    }

    /// Moves the clock to `now`. Returns `true` when the compare matched
    /// on the way there.
    pub fn advance_to(&mut self, now: Micros) -> bool {
        let elapsed = now.wrapping_sub(self.now);
        let matched = self.micros_to_compare().is_some_and(|wait| elapsed >= wait);
        self.now = now;
        matched
    }
}

impl CompareTimer for SimTimer {
    const MAX_PERIOD_US: u32 = COUNTER_MASK << TICK_SHIFT;
    const COUNTER_MASK: u32 = COUNTER_MASK;

    fn counter(&self) -> u32 {
        (self.now >> TICK_SHIFT) & COUNTER_MASK
    }

    fn set_compare(&mut self, compare: u32) {
        self.compare = compare & COUNTER_MASK;
    }

    fn compare(&self) -> u32 {
        self.compare
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn us_to_ticks(micros: u32) -> u32 {
        micros >> TICK_SHIFT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_matches_on_tick_boundary() {
        let mut timer = SimTimer::new();
        timer.advance_to(1_001);
        timer.set_compare(timer.counter() + 1);
        timer.enable();
        assert_eq!(timer.micros_to_compare(), Some(3));
        assert!(!timer.advance_to(1_003));
        assert!(timer.advance_to(1_004));
    }

    #[test]
    fn disabled_timer_never_matches() {
        let mut timer = SimTimer::new();
        timer.set_compare(10);
        assert_eq!(timer.micros_to_compare(), None);
        assert!(!timer.advance_to(100_000));
    }

    #[test]
    fn counter_wraps_with_clock() {
        let mut timer = SimTimer::new();
        timer.advance_to(u32::MAX - 3);
        timer.set_compare(timer.counter() + 2);
        timer.enable();
        assert!(timer.advance_to(4));
        assert_eq!(timer.counter(), 1);
    }
}
