//! State shared by every trigger pattern.
//!
//! A [`DecoderContext`] holds the tooth timing, sync flags, filter times and
//! derived speed that all patterns read and write the same way. State that
//! only makes sense for one wheel lives on that pattern's decoder struct.

use crate::config::TriggerConfig;
use crate::crank_maths::{
    AngleConverter, Degrees, MICROS_PER_MIN, MICROS_PER_SEC, Micros, interval_time_to_angle, low_pass_filter,
    rpm_from_revolution_time, wrap_angle,
};
use crate::status::{EngineStatus, SyncStatus};

use super::ToothHooks;

/// Number of ignition output channels tracked for per-tooth timing.
pub const IGN_CHANNELS: usize = 8;

/// Start revolutions required before a decoder may pre-set the end compare
/// of an ignition channel that has not started yet.
pub const MIN_CYCLES_FOR_END_COMPARE: u16 = 6;

/// Stall timeout used until a decoder computes its own.
pub const DEFAULT_STALL_TIME: u32 = MICROS_PER_SEC / 2;

/// Tooth timing, sync and speed state common to all decoders.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderContext {
    pub config: TriggerConfig,

    /// Gap between the current and previous accepted primary edge.
    pub cur_gap: u32,
    pub cur_gap2: u32,
    pub cur_gap3: u32,

    pub tooth_last_tooth_time: Micros,
    pub tooth_last_minus_one_tooth_time: Micros,
    pub tooth_last_sec_tooth_time: Micros,
    pub tooth_last_minus_one_sec_tooth_time: Micros,
    pub tooth_last_third_tooth_time: Micros,
    pub tooth_one_time: Micros,
    pub tooth_one_minus_one_time: Micros,
    /// Used by patterns that measure tooth width between opposite edges.
    pub tooth_last_tooth_rising_time: Micros,
    pub tooth_last_sec_tooth_rising_time: Micros,
    /// Timestamp of the last physical tooth on patterns that skip teeth for angle maths.
    pub tooth_system_last_tooth_time: Micros,

    /// Ordinal of the last primary tooth, 1-based.
    pub tooth_current_count: u16,
    /// Physical tooth counter on patterns that skip teeth for angle maths.
    pub tooth_system_count: u16,
    pub secondary_tooth_count: u16,
    pub third_tooth_count: u16,
    /// Physical teeth per revolution of the primary wheel.
    pub trigger_actual_teeth: u16,
    /// Teeth that must pass before a missing-tooth gap is trusted.
    pub check_sync_tooth_count: u16,
    /// For sequential operation: set while in the second crank revolution of the cycle.
    pub revolution_one: bool,

    pub filter_time: u32,
    pub sec_filter_time: u32,
    pub third_filter_time: u32,

    /// Degrees covered by the last completed tooth gap.
    pub trigger_tooth_angle: u16,
    /// `trigger_tooth_angle` describes the last gap exactly.
    pub tooth_angle_correct: bool,
    /// The last edge passed the filters.
    pub valid_trigger: bool,
    pub has_secondary: bool,
    pub is_sequential: bool,
    pub fixed_cranking: bool,

    pub sync: SyncStatus,
    pub sync_loss_counter: u8,
    pub start_revolutions: u16,
    pub rpm: u16,
    pub stall_time: u32,
    pub angle: AngleConverter,

    pub vvt1_angle: i16,
    pub vvt2_angle: i16,

    /// Desired spark angles, supplied by the advance calculation.
    pub ignition_end_angles: [Degrees; IGN_CHANNELS],
    /// Tooth on which each channel's end is re-timed.
    pub ignition_end_teeth: [u16; IGN_CHANNELS],
    /// Current spark advance in degrees BTDC.
    pub advance: i16,
    /// Engine is in the cranking phase.
    pub engine_cranking: bool,
    /// Fixed cranking timing is active; per-tooth timing is suspended.
    pub fixed_cranking_override: bool,
}

impl DecoderContext {
    #[must_use]
    pub const fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            cur_gap: 0,
            cur_gap2: 0,
            cur_gap3: 0,
            tooth_last_tooth_time: 0,
            tooth_last_minus_one_tooth_time: 0,
            tooth_last_sec_tooth_time: 0,
            tooth_last_minus_one_sec_tooth_time: 0,
            tooth_last_third_tooth_time: 0,
            tooth_one_time: 0,
            tooth_one_minus_one_time: 0,
            tooth_last_tooth_rising_time: 0,
            tooth_last_sec_tooth_rising_time: 0,
            tooth_system_last_tooth_time: 0,
            tooth_current_count: 0,
            tooth_system_count: 0,
            secondary_tooth_count: 0,
            third_tooth_count: 0,
            trigger_actual_teeth: 0,
            check_sync_tooth_count: 0,
            revolution_one: false,
            filter_time: 0,
            sec_filter_time: 0,
            third_filter_time: 0,
            trigger_tooth_angle: 0,
            tooth_angle_correct: false,
            valid_trigger: false,
            has_secondary: false,
            is_sequential: false,
            fixed_cranking: false,
            sync: SyncStatus::None,
            sync_loss_counter: 0,
            start_revolutions: 0,
            rpm: 0,
            stall_time: DEFAULT_STALL_TIME,
            angle: AngleConverter::new(),
            vvt1_angle: 0,
            vvt2_angle: 0,
            ignition_end_angles: [0; IGN_CHANNELS],
            ignition_end_teeth: [0; IGN_CHANNELS],
            advance: 0,
            engine_cranking: false,
            fixed_cranking_override: false,
        }
    }

    /// Full sync.
    #[must_use]
    pub const fn has_sync(&self) -> bool {
        self.sync.is_full()
    }

    /// Full or half sync.
    #[must_use]
    pub const fn has_any_sync(&self) -> bool {
        self.sync.has_any()
    }

    #[must_use]
    pub const fn is_half_sync(&self) -> bool {
        matches!(self.sync, SyncStatus::Half)
    }

    pub fn declare_sync(&mut self) {
        if !self.has_sync() {
            info!("trigger sync acquired at tooth {}", self.tooth_current_count);
        }
        self.sync = SyncStatus::Full;
    }

    pub fn declare_half_sync(&mut self) {
        self.sync = SyncStatus::Half;
    }

    /// Drops sync without counting it as a loss (initial or pattern-driven reset).
    pub fn clear_sync(&mut self) {
        self.sync = SyncStatus::None;
    }

    /// Drops sync and records the loss. Only a decoder that held sync can
    /// lose it, so repeated calls while searching count nothing.
    pub fn lose_sync(&mut self) {
        if !self.has_any_sync() {
            return;
        }
        self.sync = SyncStatus::None;
        self.sync_loss_counter = self.sync_loss_counter.wrapping_add(1);
        warn!(
            "trigger sync lost at tooth {} (losses {})",
            self.tooth_current_count, self.sync_loss_counter
        );
    }

    /// Records a synced tooth count the pattern had to correct. Sync is kept.
    pub fn record_resync(&mut self) {
        if self.has_any_sync() {
            self.sync_loss_counter = self.sync_loss_counter.wrapping_add(1);
        }
    }

    /// Recomputes the primary filter from the configured level.
    pub fn set_filter(&mut self, gap: u32) {
        self.filter_time = self.config.filter.apply(gap);
    }

    /// Shifts the two most recent primary tooth timestamps.
    pub fn shift_tooth_times(&mut self, now: Micros) {
        self.tooth_last_minus_one_tooth_time = self.tooth_last_tooth_time;
        self.tooth_last_tooth_time = now;
    }

    /// Shifts the two most recent tooth-one timestamps.
    pub fn shift_tooth_one(&mut self, now: Micros) {
        self.tooth_one_minus_one_time = self.tooth_one_time;
        self.tooth_one_time = now;
    }

    /// Engine is below cranking speed and has not completed a revolution.
    #[must_use]
    pub const fn is_cranking(&self) -> bool {
        self.rpm < self.config.crank_rpm && self.start_revolutions == 0
    }

    /// A tooth has been seen within the stall time.
    #[must_use]
    pub fn engine_is_running(&self, now: Micros) -> bool {
        if self.tooth_last_tooth_time == 0 {
            return false;
        }
        // A tooth arriving between sampling `now` and this check shows as negative elapsed time.
        let elapsed = now.wrapping_sub(self.tooth_last_tooth_time) as i32;
        elapsed < 0 || elapsed.unsigned_abs() < self.stall_time
    }

    /// Clears the timing that must not survive a stall or pattern change.
    pub fn reset(&mut self) {
        self.tooth_last_sec_tooth_time = 0;
        self.tooth_last_tooth_time = 0;
        self.tooth_system_count = 0;
        self.secondary_tooth_count = 0;
    }

    /// Updates the revolution time. Returns `true` when it changed.
    pub fn set_revolution_time(&mut self, revolution_time: u32) -> bool {
        self.angle.set_revolution_time(revolution_time)
    }

    #[must_use]
    pub const fn revolution_time(&self) -> u32 {
        self.angle.revolution_time()
    }

    /// Takes the revolution time from successive tooth-one events when the
    /// engine is synced and past cranking.
    pub fn update_revolution_time_from_teeth(&mut self, cam_teeth: bool) -> bool {
        if !self.has_any_sync()
            || self.is_cranking()
            || self.tooth_one_minus_one_time == 0
            || self.tooth_one_time <= self.tooth_one_minus_one_time
        {
            return false;
        }
        let shift = u32::from(cam_teeth);
        let revolution = (self.tooth_one_time - self.tooth_one_minus_one_time) >> shift;
        self.set_revolution_time(revolution)
    }

    /// RPM for the current revolution time; keeps the previous value when out of range.
    #[must_use]
    pub fn rpm_from_revolution_time(&self) -> u16 {
        rpm_from_revolution_time(self.revolution_time()).unwrap_or(self.rpm)
    }

    /// RPM from the time between tooth-one events.
    pub fn std_rpm(&mut self, cam_teeth: bool) -> u16 {
        if self.update_revolution_time_from_teeth(cam_teeth) {
            self.rpm_from_revolution_time()
        } else {
            self.rpm
        }
    }

    /// RPM from the last tooth gap, for evenly spaced wheels during cranking.
    /// `total_teeth` counts missing teeth as present.
    pub fn cranking_rpm(&mut self, total_teeth: u16, cam_teeth: bool) -> u16 {
        if self.start_revolutions < u16::from(self.config.stg_cycles) || !self.has_any_sync() {
            return self.rpm;
        }
        if self.tooth_last_minus_one_tooth_time == 0
            || self.tooth_last_tooth_time <= self.tooth_last_minus_one_tooth_time
        {
            return self.rpm;
        }
        let gap = self.tooth_last_tooth_time - self.tooth_last_minus_one_tooth_time;
        let revolution = gap.wrapping_mul(u32::from(total_teeth)) >> u32::from(cam_teeth);
        if self.set_revolution_time(revolution) {
            self.rpm_from_revolution_time()
        } else {
            self.rpm
        }
    }

    /// RPM from the last tooth gap and the angle it covered, for uneven
    /// wheels while cranking. Zero until two teeth have been seen.
    pub fn tooth_angle_rpm(&mut self) -> u16 {
        if self.tooth_last_tooth_time == 0 || self.tooth_last_minus_one_tooth_time == 0 {
            return 0;
        }
        let gap = self
            .tooth_last_tooth_time
            .wrapping_sub(self.tooth_last_minus_one_tooth_time);
        let tooth_time = u64::from(gap) * 36;
        let angle = u64::from(self.trigger_tooth_angle);
        if tooth_time == 0 || angle == 0 {
            return self.rpm;
        }
        let rpm = angle * u64::from(MICROS_PER_MIN / 10) / tooth_time;
        self.set_revolution_time((10 * tooth_time / angle) as u32);
        u16::try_from(rpm).unwrap_or(self.rpm)
    }

    /// Wraps into the ignition angle range.
    #[must_use]
    pub const fn ignition_limits(&self, angle: Degrees) -> Degrees {
        wrap_angle(angle, self.config.max_ignition_angle())
    }

    /// Crank angle range reported by `crank_angle`.
    #[must_use]
    pub const fn max_crank_angle(&self) -> Degrees {
        self.config.max_crank_angle()
    }

    /// Wraps a raw crank angle into `[0, 720)` then into the crank angle range.
    #[must_use]
    pub const fn wrap_crank_angle(&self, angle: Degrees) -> Degrees {
        let angle = wrap_angle(angle, 720);
        wrap_angle(angle, self.max_crank_angle())
    }

    /// Angle covered since `since`, using the average revolution speed.
    #[must_use]
    pub fn elapsed_angle(&self, now: Micros, since: Micros) -> Degrees {
        self.angle.time_to_angle(now.wrapping_sub(since)) as Degrees
    }

    /// Angle covered since the last tooth, using the last tooth gap when it
    /// is known to be accurate.
    #[must_use]
    pub fn interval_angle(&self, now: Micros) -> Degrees {
        let elapsed = now.wrapping_sub(self.tooth_last_tooth_time);
        let average = self.angle.time_to_angle(elapsed);
        if !self.tooth_angle_correct {
            return average as Degrees;
        }
        let gap = self
            .tooth_last_tooth_time
            .wrapping_sub(self.tooth_last_minus_one_tooth_time);
        interval_time_to_angle(elapsed, u32::from(self.trigger_tooth_angle), gap, average)
            as Degrees
    }

    /// Re-times the ignition channel whose end tooth is `tooth`.
    pub fn check_per_tooth_timing<H: ToothHooks>(
        &self,
        crank_angle: Degrees,
        tooth: u16,
        hooks: &mut H,
    ) {
        if self.fixed_cranking_override || self.rpm == 0 {
            return;
        }
        let Some(channel) = self.ignition_end_teeth.iter().position(|&end| end == tooth) else {
            return;
        };
        let remaining = self.ignition_limits(self.ignition_end_angles[channel] - crank_angle);
        let time_to_end = self.angle.angle_to_time(remaining as u32);
        let allow_end_compare = self.start_revolutions > MIN_CYCLES_FOR_END_COMPARE;
        hooks.retime_ignition_end(channel, time_to_end, allow_end_compare);
    }

    /// Cam position in whole degrees relative to TDC for a cam edge seen at
    /// `crank_angle`, less `closed_loop_angle` in closed loop.
    #[must_use]
    pub fn vvt_offset(&self, crank_angle: Degrees, closed_loop_angle: i16) -> Degrees {
        let mut angle = crank_angle;
        while angle > 360 {
            angle -= 360;
        }
        angle -= Degrees::from(self.config.trigger_angle);
        if self.config.vvt.closed_loop {
            angle -= Degrees::from(closed_loop_angle);
        }
        angle
    }

    /// [`Self::vvt_offset`] filtered into `prior`. Stored doubled for
    /// half-degree resolution.
    #[must_use]
    pub fn vvt_angle(&self, crank_angle: Degrees, cl0_duty_angle: i16, prior: i16) -> i16 {
        let angle = self.vvt_offset(crank_angle, cl0_duty_angle);
        low_pass_filter(angle << 1, self.config.vvt.angle_filter, Degrees::from(prior)) as i16
    }

    /// Records a VVT1 sample when VVT is enabled and the cycle is in revolution one.
    pub fn record_vvt1_angle(&mut self, crank_angle: Degrees) {
        if self.config.vvt.enabled && self.revolution_one {
            self.vvt1_angle = self.vvt_angle(crank_angle, self.config.vvt.cl0_duty_angle, self.vvt1_angle);
        }
    }

    /// Coil lock while cranking is configured and active.
    #[must_use]
    pub const fn cranking_coil_lock(&self) -> bool {
        self.config.ign_cranklock && self.engine_cranking
    }

    /// Per-tooth ignition is enabled and the engine is past cranking.
    #[must_use]
    pub const fn per_tooth_active(&self) -> bool {
        self.config.per_tooth_ign && !self.engine_cranking
    }

    /// Builds the published status with a precomputed crank angle.
    #[must_use]
    pub fn status(&self, crank_angle: Degrees, now: Micros) -> EngineStatus {
        EngineStatus {
            rpm: self.rpm,
            crank_angle,
            sync: self.sync,
            sync_loss_counter: self.sync_loss_counter,
            start_revolutions: self.start_revolutions,
            tooth_count: self.tooth_current_count,
            vvt1_angle: self.vvt1_angle,
            vvt2_angle: self.vvt2_angle,
            revolution_time: self.revolution_time(),
            running: self.engine_is_running(now),
            cranking: self.engine_cranking,
        }
    }
}

impl Default for DecoderContext {
    fn default() -> Self {
        Self::new(TriggerConfig::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerFilter;
    use crate::decoders::NoHooks;

    #[derive(Default)]
    struct RecordingHooks {
        retimed: Option<(usize, u32, bool)>,
    }

    impl ToothHooks for RecordingHooks {
        fn retime_ignition_end(&mut self, channel: usize, time_to_end: u32, allow_end_compare: bool) {
            self.retimed = Some((channel, time_to_end, allow_end_compare));
        }

        fn end_coil_charge(&mut self, _channel: usize) {}
    }

    fn synced_context() -> DecoderContext {
        let mut ctx = DecoderContext::default();
        ctx.sync = SyncStatus::Full;
        ctx.rpm = 1000;
        ctx.set_revolution_time(60_000);
        ctx
    }

    #[test]
    fn losses_count_only_while_synced() {
        let mut ctx = DecoderContext::default();
        ctx.lose_sync();
        ctx.record_resync();
        assert_eq!(ctx.sync_loss_counter, 0);

        ctx.declare_half_sync();
        ctx.lose_sync();
        ctx.lose_sync();
        assert_eq!(ctx.sync, SyncStatus::None);
        assert_eq!(ctx.sync_loss_counter, 1);

        ctx.declare_sync();
        ctx.record_resync();
        assert!(ctx.has_sync());
        assert_eq!(ctx.sync_loss_counter, 2);
    }

    #[test]
    fn filter_follows_configured_level() {
        let mut ctx = DecoderContext::new(TriggerConfig::new().with_filter(TriggerFilter::Medium));
        ctx.set_filter(1000);
        assert_eq!(ctx.filter_time, 500);
    }

    #[test]
    fn std_rpm_uses_tooth_one_interval() {
        let mut ctx = synced_context();
        ctx.start_revolutions = 2;
        ctx.tooth_one_minus_one_time = 100_000;
        ctx.tooth_one_time = 136_000;
        assert_eq!(ctx.std_rpm(false), 1667);
        assert_eq!(ctx.revolution_time(), 36_000);
    }

    #[test]
    fn std_rpm_halves_cam_speed_interval() {
        let mut ctx = synced_context();
        ctx.start_revolutions = 2;
        ctx.tooth_one_minus_one_time = 100_000;
        ctx.tooth_one_time = 172_000;
        assert_eq!(ctx.std_rpm(true), 1667);
    }

    #[test]
    fn std_rpm_keeps_previous_without_sync() {
        let mut ctx = synced_context();
        ctx.sync = SyncStatus::None;
        ctx.tooth_one_minus_one_time = 100_000;
        ctx.tooth_one_time = 136_000;
        assert_eq!(ctx.std_rpm(false), 1000);
    }

    #[test]
    fn cranking_rpm_scales_last_gap() {
        let mut ctx = synced_context();
        ctx.rpm = 0;
        ctx.tooth_last_minus_one_tooth_time = 10_000;
        ctx.tooth_last_tooth_time = 15_000;
        assert_eq!(ctx.cranking_rpm(36, false), 333);
    }

    #[test]
    fn tooth_angle_rpm_scales_by_gap_angle() {
        let mut ctx = synced_context();
        ctx.tooth_last_minus_one_tooth_time = 10_000;
        ctx.tooth_last_tooth_time = 17_200;
        ctx.trigger_tooth_angle = 72;
        assert_eq!(ctx.tooth_angle_rpm(), 1666);
        assert_eq!(ctx.revolution_time(), 36_000);
    }

    #[test]
    fn engine_running_follows_stall_time() {
        let mut ctx = synced_context();
        ctx.tooth_last_tooth_time = 1_000;
        ctx.stall_time = 500;
        assert!(ctx.engine_is_running(1_400));
        assert!(!ctx.engine_is_running(1_600));
        assert!(ctx.engine_is_running(900));
        ctx.reset();
        assert!(!ctx.engine_is_running(1_400));
    }

    #[test]
    fn per_tooth_timing_retimes_matching_channel() {
        let mut ctx = synced_context();
        ctx.ignition_end_teeth = [34, 16, 0, 0, 0, 0, 0, 0];
        ctx.ignition_end_angles[1] = 170;
        let mut hooks = RecordingHooks::default();
        ctx.check_per_tooth_timing(150, 16, &mut hooks);
        // 20 degrees at 1000rpm.
        let (channel, time, allow) = hooks.retimed.expect("channel 2 should be retimed");
        assert_eq!(channel, 1);
        assert!((3333..=3334).contains(&time));
        assert!(!allow);
    }

    #[test]
    fn per_tooth_timing_suspended_by_fixed_cranking() {
        let mut ctx = synced_context();
        ctx.ignition_end_teeth = [10, 0, 0, 0, 0, 0, 0, 0];
        ctx.fixed_cranking_override = true;
        let mut hooks = RecordingHooks::default();
        ctx.check_per_tooth_timing(90, 10, &mut hooks);
        assert!(hooks.retimed.is_none());
        ctx.check_per_tooth_timing(90, 10, &mut NoHooks);
    }

    #[test]
    fn vvt_angle_is_relative_to_tdc() {
        let mut ctx = DecoderContext::new(TriggerConfig::new().with_trigger_angle(10));
        assert_eq!(ctx.vvt_angle(400, 0, 0), 60);
        ctx.config.vvt.closed_loop = true;
        assert_eq!(ctx.vvt_angle(400, 5, 0), 50);
        ctx.config.vvt.angle_filter = 128;
        assert_eq!(ctx.vvt_angle(400, 5, 0), 25);
    }

    #[test]
    fn crank_angle_wraps_into_cycle() {
        let ctx = DecoderContext::default();
        assert_eq!(ctx.wrap_crank_angle(725), 5);
        assert_eq!(ctx.wrap_crank_angle(-5), 355);
    }
}
