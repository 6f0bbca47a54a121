//! Fire-once output schedules driven by hardware compare units.
//!
//! Each output channel owns one [`Schedule`] bound at compile time to a
//! [`CompareTimer`]. A request arms the start compare; the compare
//! interrupt calls [`Schedule::on_compare`], which runs the start callback
//! and re-arms for the end without leaving the interrupt. A request that
//! arrives while the output is on is queued and armed the moment the
//! current pulse ends.
//!
//! ```text
//! Off --set--> Pending --compare--> Running --compare--> Off
//!                 ^                    |
//!                 |                   set (queued)
//!                 |                    v
//!                 +----compare---- RunningWithNext
//! ```

use core::fmt;

use crate::crank_maths::Micros;

mod bank;
mod sim;

pub use bank::{Bank, BankKind, Fuel, FuelBank, Ignition, IgnitionBank, PRIMING_DELAY};
pub use sim::SimTimer;

/// Output action run from the compare interrupt.
pub type Callback = fn();

fn no_action() {}

/// One hardware compare unit.
///
/// Compare values are in timer ticks and wrap at [`CompareTimer::COUNTER_MASK`].
pub trait CompareTimer {
    /// Longest delay, in microseconds, one counter span can represent.
    const MAX_PERIOD_US: u32;
    /// Counter width as a bit mask.
    const COUNTER_MASK: u32;

    fn counter(&self) -> u32;

    fn set_compare(&mut self, compare: u32);

    fn compare(&self) -> u32;

    /// Enables the compare interrupt.
    fn enable(&mut self);

    /// Disables the compare interrupt.
    fn disable(&mut self);

    fn us_to_ticks(micros: u32) -> u32;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScheduleStatus {
    #[default]
    Off,
    /// Start compare armed.
    Pending,
    /// Output on, end compare armed.
    Running,
    /// Output on with a follow-on event queued.
    RunningWithNext,
}

impl ScheduleStatus {
    /// The output is physically on.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, ScheduleStatus::Running | ScheduleStatus::RunningWithNext)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Off => f.write_str("off"),
            ScheduleStatus::Pending => f.write_str("pending"),
            ScheduleStatus::Running => f.write_str("running"),
            ScheduleStatus::RunningWithNext => f.write_str("running+next"),
        }
    }
}

/// Request rejected without touching the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScheduleError {
    ZeroDelay,
    ZeroDuration,
    /// The delay does not fit in one counter span.
    DelayOutOfRange { delay: u32, max: u32 },
    /// The output is on and queuing was not allowed.
    Busy,
    NoChannel(usize),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::ZeroDelay => f.write_str("zero delay"),
            ScheduleError::ZeroDuration => f.write_str("zero duration"),
            ScheduleError::DelayOutOfRange { delay, max } => {
                write!(f, "delay {delay}us exceeds timer range {max}us")
            }
            ScheduleError::Busy => f.write_str("channel running"),
            ScheduleError::NoChannel(channel) => write!(f, "no channel {channel}"),
        }
    }
}

impl core::error::Error for ScheduleError {}

/// A compare point recorded relative to the counter when it was requested,
/// so a point that has already passed can be told apart from one a full
/// counter span away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Deadline {
    armed_at: u32,
    ticks: u32,
}

impl Deadline {
    const fn compare<T: CompareTimer>(self, counter: u32) -> u32 {
        let elapsed = counter.wrapping_sub(self.armed_at) & T::COUNTER_MASK;
        if elapsed >= self.ticks {
            // Late: fire on the next tick rather than a span later.
            counter.wrapping_add(1) & T::COUNTER_MASK
        } else {
            self.armed_at.wrapping_add(self.ticks) & T::COUNTER_MASK
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Queued {
    start: Deadline,
    duration: u32,
}

/// One output channel.
pub struct Schedule<T> {
    timer: T,
    status: ScheduleStatus,
    /// Microseconds from start to end of the current or pending event.
    duration: u32,
    next: Option<Queued>,
    /// End point set from tooth timing before the event started.
    end: Option<Deadline>,
    start_time: Micros,
    start_callback: Callback,
    end_callback: Callback,
}

impl<T: CompareTimer> Schedule<T> {
    #[must_use]
    pub const fn new(timer: T) -> Self {
        Self {
            timer,
            status: ScheduleStatus::Off,
            duration: 0,
            next: None,
            end: None,
            start_time: 0,
            start_callback: no_action,
            end_callback: no_action,
        }
    }

    pub fn set_callbacks(&mut self, start: Callback, end: Callback) {
        self.start_callback = start;
        self.end_callback = end;
    }

    #[must_use]
    pub const fn status(&self) -> ScheduleStatus {
        self.status
    }

    #[must_use]
    pub const fn duration(&self) -> u32 {
        self.duration
    }

    /// Time the output last turned on.
    #[must_use]
    pub const fn start_time(&self) -> Micros {
        self.start_time
    }

    #[must_use]
    pub const fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    fn ticks(micros: u32) -> u32 {
        T::us_to_ticks(micros).max(1)
    }

    fn deadline(&self, micros: u32) -> Deadline {
        Deadline {
            armed_at: self.timer.counter(),
            ticks: Self::ticks(micros),
        }
    }

    /// Requests an event `delay` microseconds from now lasting `duration`.
    ///
    /// While the output is on the request is queued behind the current
    /// event when `allow_queue` is set.
    ///
    /// # Errors
    ///
    /// Rejects zero delays or durations, delays beyond the timer range and
    /// unqueued requests on a running channel. The channel is unchanged.
    pub fn set(&mut self, delay: u32, duration: u32, allow_queue: bool) -> Result<(), ScheduleError> {
        let result = self.try_set(delay, duration, allow_queue);
        if let Err(error) = result {
            debug!("schedule request rejected: {}", error);
        }
        result
    }

    fn try_set(&mut self, delay: u32, duration: u32, allow_queue: bool) -> Result<(), ScheduleError> {
        if delay == 0 {
            return Err(ScheduleError::ZeroDelay);
        }
        if duration == 0 {
            return Err(ScheduleError::ZeroDuration);
        }
        if delay >= T::MAX_PERIOD_US {
            return Err(ScheduleError::DelayOutOfRange {
                delay,
                max: T::MAX_PERIOD_US,
            });
        }
        let duration = duration.min(T::MAX_PERIOD_US - 1);
        let start = self.deadline(delay);

        match self.status {
            ScheduleStatus::Off | ScheduleStatus::Pending => {
                self.duration = duration;
                self.timer.set_compare(start.compare::<T>(start.armed_at));
                self.status = ScheduleStatus::Pending;
                self.timer.enable();
                Ok(())
            }
            ScheduleStatus::Running | ScheduleStatus::RunningWithNext if allow_queue => {
                self.next = Some(Queued { start, duration });
                self.status = ScheduleStatus::RunningWithNext;
                Ok(())
            }
            ScheduleStatus::Running | ScheduleStatus::RunningWithNext => Err(ScheduleError::Busy),
        }
    }

    /// Compare interrupt handler.
    pub fn on_compare(&mut self, now: Micros) {
        match self.status {
            ScheduleStatus::Pending => {
                (self.start_callback)();
                self.status = ScheduleStatus::Running;
                self.start_time = now;
                let counter = self.timer.counter();
                let end = match self.end.take() {
                    Some(end) => end.compare::<T>(counter),
                    None => counter.wrapping_add(Self::ticks(self.duration)) & T::COUNTER_MASK,
                };
                self.timer.set_compare(end);
                trace!("output started at {}, end compare {}", now, end);
            }
            ScheduleStatus::Running => {
                (self.end_callback)();
                self.status = ScheduleStatus::Off;
                self.timer.disable();
            }
            ScheduleStatus::RunningWithNext => {
                (self.end_callback)();
                match self.next.take() {
                    Some(next) => {
                        self.duration = next.duration;
                        self.timer.set_compare(next.start.compare::<T>(self.timer.counter()));
                        self.status = ScheduleStatus::Pending;
                    }
                    None => {
                        self.status = ScheduleStatus::Off;
                        self.timer.disable();
                    }
                }
            }
            ScheduleStatus::Off => self.timer.disable(),
        }
    }

    /// Drops an event that has not started. Running outputs always finish.
    pub fn cancel_pending(&mut self) -> bool {
        if self.status != ScheduleStatus::Pending {
            return false;
        }
        self.status = ScheduleStatus::Off;
        self.end = None;
        self.timer.disable();
        true
    }

    /// Moves the end of the current dwell to `time_to_end` from now when
    /// that is sooner than its programmed end. A pending event instead
    /// takes the end point for when it starts if `allow_end_compare` is set.
    pub fn retime_end(&mut self, time_to_end: u32, allow_end_compare: bool) {
        match self.status {
            ScheduleStatus::Running | ScheduleStatus::RunningWithNext => {
                if time_to_end > 0 && time_to_end < self.duration {
                    let end = self.timer.counter().wrapping_add(Self::ticks(time_to_end)) & T::COUNTER_MASK;
                    self.timer.set_compare(end);
                }
            }
            ScheduleStatus::Pending if allow_end_compare => {
                self.end = Some(self.deadline(time_to_end));
            }
            _ => {}
        }
    }

    /// Output has been on longer than `limit` microseconds at `now`.
    #[must_use]
    pub fn on_longer_than(&self, now: Micros, limit: u32) -> bool {
        self.status.is_running() && now.wrapping_sub(self.start_time) > limit
    }

    /// Ends a running output immediately, dropping any queued event.
    pub fn force_end(&mut self) -> bool {
        if !self.status.is_running() {
            return false;
        }
        (self.end_callback)();
        self.status = ScheduleStatus::Off;
        self.next = None;
        self.end = None;
        self.timer.disable();
        true
    }

    /// Runs the end action without changing state.
    pub fn fire_end_action(&self) {
        (self.end_callback)();
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn schedule() -> Schedule<SimTimer> {
        Schedule::new(SimTimer::new())
    }

    /// Advances to the next compare and runs the handler.
    fn fire(schedule: &mut Schedule<SimTimer>) -> Micros {
        let wait = schedule.timer().micros_to_compare().expect("compare armed");
        let now = schedule.timer().now().wrapping_add(wait);
        schedule.timer_mut().advance_to(now);
        schedule.on_compare(now);
        now
    }

    #[test]
    fn pending_running_off() {
        let mut schedule = schedule();
        schedule.set(1_000, 1_000, false).expect("accepted");
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        assert_eq!(fire(&mut schedule), 1_000);
        assert_eq!(schedule.status(), ScheduleStatus::Running);
        assert_eq!(fire(&mut schedule), 2_000);
        assert_eq!(schedule.status(), ScheduleStatus::Off);
        assert!(!schedule.timer().is_enabled());
    }

    #[test]
    fn degenerate_requests_leave_channel_off() {
        let mut schedule = schedule();
        assert_eq!(schedule.set(0, 1_000, false), Err(ScheduleError::ZeroDelay));
        assert_eq!(schedule.set(1_000, 0, false), Err(ScheduleError::ZeroDuration));
        assert!(matches!(
            schedule.set(SimTimer::MAX_PERIOD_US, 1_000, false),
            Err(ScheduleError::DelayOutOfRange { .. })
        ));
        assert_eq!(schedule.status(), ScheduleStatus::Off);
        assert!(!schedule.timer().is_enabled());
    }

    #[test]
    fn long_duration_is_clamped() {
        let mut schedule = schedule();
        schedule.set(100, u32::MAX, false).expect("accepted");
        assert_eq!(schedule.duration(), SimTimer::MAX_PERIOD_US - 1);
    }

    #[test]
    fn request_while_running_needs_queue() {
        let mut schedule = schedule();
        schedule.set(1_000, 1_000, false).expect("accepted");
        fire(&mut schedule);
        assert_eq!(schedule.set(1_500, 500, false), Err(ScheduleError::Busy));
        assert_eq!(schedule.status(), ScheduleStatus::Running);
        schedule.set(1_500, 500, true).expect("queued");
        assert_eq!(schedule.status(), ScheduleStatus::RunningWithNext);
    }

    #[test]
    fn queued_event_follows_current_one() {
        let mut schedule = schedule();
        schedule.set(1_000, 1_000, false).expect("accepted");
        fire(&mut schedule);
        schedule.set(1_500, 500, true).expect("queued");

        assert_eq!(fire(&mut schedule), 2_000);
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        // Queued at 1000 with a 1500 delay.
        assert_eq!(fire(&mut schedule), 2_500);
        assert_eq!(schedule.status(), ScheduleStatus::Running);
        assert_eq!(fire(&mut schedule), 3_000);
        assert_eq!(schedule.status(), ScheduleStatus::Off);
    }

    #[test]
    fn queued_start_already_passed_fires_next_tick() {
        let mut schedule = schedule();
        schedule.set(100, 2_000, false).expect("accepted");
        fire(&mut schedule);
        schedule.set(500, 100, true).expect("queued");
        assert_eq!(fire(&mut schedule), 2_100);
        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        let wait = schedule.timer().micros_to_compare().expect("armed");
        assert!(wait <= 4, "late start waited {wait}us");
    }

    #[test]
    fn pending_event_can_be_cancelled() {
        let mut schedule = schedule();
        schedule.set(1_000, 1_000, false).expect("accepted");
        assert!(schedule.cancel_pending());
        assert_eq!(schedule.status(), ScheduleStatus::Off);
        assert!(!schedule.timer().is_enabled());
    }

    #[test]
    fn running_event_cannot_be_cancelled() {
        let mut schedule = schedule();
        schedule.set(1_000, 1_000, false).expect("accepted");
        fire(&mut schedule);
        assert!(!schedule.cancel_pending());
        assert_eq!(schedule.status(), ScheduleStatus::Running);
    }

    #[test]
    fn retime_only_shortens_running_dwell() {
        let mut schedule = schedule();
        schedule.set(1_000, 3_000, false).expect("accepted");
        fire(&mut schedule);
        schedule.retime_end(5_000, true);
        assert_eq!(schedule.timer().micros_to_compare(), Some(3_000));
        schedule.retime_end(2_000, true);
        assert_eq!(schedule.timer().micros_to_compare(), Some(2_000));
    }

    #[test]
    fn pending_event_takes_end_point_from_tooth() {
        let mut schedule = schedule();
        schedule.set(1_000, 3_000, false).expect("accepted");
        schedule.retime_end(2_500, false);
        schedule.retime_end(2_000, true);
        assert_eq!(fire(&mut schedule), 1_000);
        assert_eq!(fire(&mut schedule), 2_000);
    }

    static ENDS: AtomicU32 = AtomicU32::new(0);

    fn count_end() {
        ENDS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn force_end_runs_end_action_once() {
        let mut schedule = schedule();
        schedule.set_callbacks(no_action, count_end);
        schedule.set(100, 50_000, false).expect("accepted");
        fire(&mut schedule);
        assert!(schedule.on_longer_than(100 + 10_001, 10_000));
        assert!(schedule.force_end());
        assert!(!schedule.force_end());
        assert_eq!(ENDS.load(Ordering::Relaxed), 1);
        assert_eq!(schedule.status(), ScheduleStatus::Off);
    }
}
