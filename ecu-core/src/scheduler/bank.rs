//! Fixed arrays of output channels.
//!
//! Channels are indexed at compile time so an interrupt handler reaches its
//! schedule with a constant index. Fuel banks add injector priming;
//! ignition banks add the overdwell sweep and accept per-tooth end
//! adjustments from the decoders.

use core::marker::PhantomData;

use crate::crank_maths::Micros;
use crate::decoders::ToothHooks;

use super::{Callback, CompareTimer, Schedule, ScheduleError};

/// Delay before every injector fires its priming pulse.
pub const PRIMING_DELAY: u32 = 100;

/// What a bank drives.
pub trait BankKind {
    const NAME: &'static str;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Fuel;

#[derive(Clone, Copy, Debug, Default)]
pub struct Ignition;

impl BankKind for Fuel {
    const NAME: &'static str = "fuel";
}

impl BankKind for Ignition {
    const NAME: &'static str = "ign";
}

pub struct Bank<T, K, const N: usize> {
    channels: [Schedule<T>; N],
    kind: PhantomData<K>,
}

pub type FuelBank<T, const N: usize> = Bank<T, Fuel, N>;
pub type IgnitionBank<T, const N: usize> = Bank<T, Ignition, N>;

impl<T: CompareTimer, K: BankKind, const N: usize> Bank<T, K, N> {
    #[must_use]
    pub fn new(timers: [T; N]) -> Self {
        Self {
            channels: timers.map(Schedule::new),
            kind: PhantomData,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        N
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    #[must_use]
    pub fn channel(&self, channel: usize) -> Option<&Schedule<T>> {
        self.channels.get(channel)
    }

    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut Schedule<T>> {
        self.channels.get_mut(channel)
    }

    #[must_use]
    pub fn channels(&self) -> &[Schedule<T>] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Schedule<T>] {
        &mut self.channels
    }

    /// # Errors
    ///
    /// [`ScheduleError::NoChannel`] when `channel` is out of range.
    pub fn set_callbacks(&mut self, channel: usize, start: Callback, end: Callback) -> Result<(), ScheduleError> {
        let schedule = self.channels.get_mut(channel).ok_or(ScheduleError::NoChannel(channel))?;
        schedule.set_callbacks(start, end);
        Ok(())
    }

    /// Requests an event on `channel`. See [`Schedule::set`].
    ///
    /// # Errors
    ///
    /// Fails for an unknown channel or a request the channel rejects.
    pub fn set(&mut self, channel: usize, delay: u32, duration: u32, allow_queue: bool) -> Result<(), ScheduleError> {
        self.channels
            .get_mut(channel)
            .ok_or(ScheduleError::NoChannel(channel))?
            .set(delay, duration, allow_queue)
    }

    /// Compare interrupt for `channel`.
    pub fn on_compare(&mut self, channel: usize, now: Micros) {
        if let Some(schedule) = self.channels.get_mut(channel) {
            schedule.on_compare(now);
        }
    }

    pub fn cancel_pending(&mut self, channel: usize) -> bool {
        self.channels.get_mut(channel).is_some_and(Schedule::cancel_pending)
    }
}

impl<T: CompareTimer, const N: usize> Bank<T, Fuel, N> {
    /// Fires a priming pulse on the first `outputs` injectors. Returns the
    /// number of channels armed.
    pub fn begin_priming(&mut self, pulse_width: u32, outputs: usize) -> usize {
        if pulse_width == 0 {
            return 0;
        }
        let armed = self
            .channels
            .iter_mut()
            .take(outputs)
            .filter(|schedule| schedule.set(PRIMING_DELAY, pulse_width, false).is_ok())
            .count();
        info!("priming {} injectors for {}us", armed, pulse_width);
        armed
    }
}

impl<T: CompareTimer, const N: usize> Bank<T, Ignition, N> {
    /// Ends every coil that has dwelled longer than `limit` microseconds.
    /// Returns the number of channels forced off.
    pub fn sweep_overdwell(&mut self, now: Micros, limit: u32) -> usize {
        let mut forced = 0;
        for (channel, schedule) in self.channels.iter_mut().enumerate() {
            if schedule.on_longer_than(now, limit) && schedule.force_end() {
                warn!("overdwell on {} channel {}", Ignition::NAME, channel);
                forced += 1;
            }
        }
        forced
    }
}

impl<T: CompareTimer, const N: usize> ToothHooks for Bank<T, Ignition, N> {
    fn retime_ignition_end(&mut self, channel: usize, time_to_end: u32, allow_end_compare: bool) {
        if let Some(schedule) = self.channels.get_mut(channel) {
            schedule.retime_end(time_to_end, allow_end_compare);
        }
    }

    fn end_coil_charge(&mut self, channel: usize) {
        if let Some(schedule) = self.channels.get(channel) {
            schedule.fire_end_action();
        }
    }
}
