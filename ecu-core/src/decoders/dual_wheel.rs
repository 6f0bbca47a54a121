//! Two wheels: an evenly spaced primary wheel and a single-tooth secondary.
//!
//! The secondary tooth marks the tooth before tooth one. The primary wheel
//! has no missing teeth and may run at crank or cam speed. The non-360
//! variant scales the tooth angle by a multiplier for wheels whose tooth
//! count does not divide 360.

use crate::config::{SparkMode, TriggerEdge, TriggerSpeed};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_MIN, MICROS_PER_SEC, Micros, nudge};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, IGN_CHANNELS, ToothHooks};

/// Tooth count before the first secondary edge.
pub(super) const UNSYNCED_TOOTH_COUNT: u16 = u8::MAX as u16;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DualWheel;

impl DualWheel {
    fn end_tooth(ctx: &DecoderContext, end_angle: Degrees, tooth_adder: u16) -> u16 {
        let tooth = (end_angle - Degrees::from(ctx.config.trigger_angle)) / Degrees::from(ctx.trigger_tooth_angle);
        let range = Degrees::from(ctx.config.teeth) + Degrees::from(tooth_adder);
        nudge(1, range, tooth, range) as u16
    }

    /// Angle of the last seen tooth, treating a zero count as the last tooth of the wheel.
    fn last_tooth_index(ctx: &DecoderContext) -> Degrees {
        let count = if ctx.tooth_current_count == 0 {
            ctx.config.teeth
        } else {
            ctx.tooth_current_count
        };
        Degrees::from(count) - 1
    }

    /// Per-tooth timing shared with the patterns that reuse this primary wheel.
    pub(super) fn per_tooth_timing<H: ToothHooks>(ctx: &DecoderContext, hooks: &mut H) {
        if !ctx.per_tooth_active() {
            return;
        }
        let config = ctx.config;
        let mut angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(config.trigger_angle);
        let mut tooth = ctx.tooth_current_count;
        if config.spark_mode == SparkMode::Sequential && ctx.revolution_one && config.speed == TriggerSpeed::Crank {
            angle += 360;
            tooth += config.teeth;
        }
        ctx.check_per_tooth_timing(angle, tooth, hooks);
    }
}

impl Decoder for DualWheel {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        let config = ctx.config;
        let teeth = u32::from(config.teeth);
        ctx.trigger_tooth_angle = if config.is_cam_speed() {
            (720 / teeth) as u16
        } else {
            (360 / teeth) as u16
        };
        ctx.tooth_current_count = UNSYNCED_TOOTH_COUNT;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * teeth);
        // Two teeth on the secondary, halved again for cam speed.
        ctx.sec_filter_time = (MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 2)) / 2;
        ctx.is_sequential = true;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);

        if ctx.has_sync() {
            if ctx.tooth_current_count == 1 || ctx.tooth_current_count > ctx.config.teeth {
                ctx.tooth_current_count = 1;
                ctx.revolution_one = !ctx.revolution_one;
                ctx.shift_tooth_one(now);
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
                if ctx.config.is_cam_speed() {
                    ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
                }
            }
            ctx.set_filter(ctx.cur_gap);
        }

        Self::per_tooth_timing(ctx, hooks);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 < ctx.sec_filter_time {
            // Keeps the filter aligned with engine speed when edges keep arriving early.
            ctx.sec_filter_time = ctx.revolution_time() >> 1;
            return;
        }
        ctx.tooth_last_sec_tooth_time = now;
        ctx.sec_filter_time = ctx.cur_gap2 >> 2;

        let teeth = ctx.config.teeth;
        if !ctx.has_sync() || ctx.start_revolutions <= u16::from(ctx.config.stg_cycles) {
            // Pin the speed at 10rpm until a full revolution has been measured.
            ctx.tooth_last_tooth_time = now;
            ctx.tooth_last_minus_one_tooth_time = now.wrapping_sub((MICROS_PER_MIN / 10) / u32::from(teeth));
            ctx.tooth_current_count = teeth;
            ctx.filter_time = 0;
            ctx.declare_sync();
        } else {
            if ctx.tooth_current_count != teeth && ctx.start_revolutions > 2 {
                ctx.record_resync();
                warn!("dual wheel cam edge at tooth {}", ctx.tooth_current_count);
            }
            if ctx.config.use_resync {
                ctx.tooth_current_count = teeth;
            }
        }
        ctx.revolution_one = true;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() {
            return 0;
        }
        let cam = ctx.config.is_cam_speed();
        if ctx.rpm < ctx.config.crank_rpm {
            ctx.cranking_rpm(ctx.config.teeth, cam)
        } else {
            ctx.std_rpm(cam)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let mut angle = Self::last_tooth_index(ctx) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(ctx.config.trigger_angle);
        angle += ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        if ctx.revolution_one && ctx.config.speed == TriggerSpeed::Crank {
            angle += 360;
        }
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let config = ctx.config;
        let tooth_adder = if config.spark_mode == SparkMode::Sequential && config.speed == TriggerSpeed::Crank {
            config.teeth
        } else {
            0
        };
        for channel in 0..IGN_CHANNELS {
            ctx.ignition_end_teeth[channel] = Self::end_tooth(ctx, ctx.ignition_end_angles[channel], tooth_adder);
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }

    fn last_tooth(&self, ctx: &DecoderContext) -> u16 {
        ctx.config.teeth
    }
}

/// Dual wheel whose primary tooth angle is multiplied to stay integral.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NonThreeSixty;

impl Decoder for NonThreeSixty {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        let config = ctx.config;
        let teeth = u32::from(config.teeth);
        ctx.trigger_tooth_angle = ((360 * u32::from(config.trigger_angle_multiplier)) / teeth) as u16;
        ctx.tooth_current_count = UNSYNCED_TOOTH_COUNT;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * teeth);
        ctx.sec_filter_time = (MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 2)) / 2;
        ctx.is_sequential = true;
        ctx.has_secondary = true;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        DualWheel.on_primary(ctx, edge, hooks);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        DualWheel.on_secondary(ctx, edge, hooks);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() || ctx.tooth_current_count == 0 {
            return 0;
        }
        if ctx.rpm < ctx.config.crank_rpm {
            ctx.cranking_rpm(ctx.config.teeth, false)
        } else {
            ctx.std_rpm(false)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let scaled = DualWheel::last_tooth_index(ctx) * Degrees::from(ctx.trigger_tooth_angle);
        let mut angle =
            scaled / Degrees::from(ctx.config.trigger_angle_multiplier) + Degrees::from(ctx.config.trigger_angle);
        angle += ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Falling)
    }

    fn last_tooth(&self, ctx: &DecoderContext) -> u16 {
        ctx.config.teeth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;
    use crate::status::SyncStatus;

    const GAP: u32 = 2_000;

    fn config() -> TriggerConfig {
        TriggerConfig::new()
            .with_pattern(DecoderKind::DualWheel)
            .with_teeth(12, 0)
    }

    #[test]
    fn cam_tooth_gives_sync_and_next_tooth_is_one() {
        let mut rig = Rig::new(DualWheel, config());
        for _ in 0..5 {
            rig.primary(GAP);
        }
        assert_eq!(rig.ctx.sync, SyncStatus::None);
        assert_eq!(rig.update_rpm(), 0);

        rig.secondary(GAP / 2);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 12);
        assert!(rig.ctx.revolution_one);

        rig.primary(GAP / 2);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert!(!rig.ctx.revolution_one);
        assert_eq!(rig.ctx.start_revolutions, 1);
    }

    #[test]
    fn crank_angle_counts_from_tooth_one() {
        let mut rig = Rig::new(DualWheel, config().with_trigger_angle(60));
        rig.secondary(GAP);
        rig.primary(GAP);
        rig.ctx.set_revolution_time(12 * GAP);
        assert_eq!(rig.angle(), 60);
        rig.primary(GAP);
        rig.primary(GAP);
        assert_eq!(rig.angle(), 120);
        assert_eq!(rig.angle_after(GAP / 2), 135);
    }

    #[test]
    fn misplaced_cam_edge_counts_sync_loss() {
        let mut rig = Rig::new(DualWheel, config());
        rig.secondary(GAP);
        for _ in 0..4 {
            for _ in 0..12 {
                rig.primary(GAP);
            }
            rig.secondary(GAP / 4);
            rig.advance(GAP - GAP / 4);
            rig.primary(0);
            for _ in 0..11 {
                rig.primary(GAP);
            }
        }
        assert_eq!(rig.ctx.sync_loss_counter, 0);
        assert!(rig.ctx.start_revolutions > 2);

        for _ in 0..5 {
            rig.primary(GAP);
        }
        rig.secondary(GAP / 4);
        assert_eq!(rig.ctx.sync_loss_counter, 1);
    }

    #[test]
    fn end_teeth_wrap_into_wheel() {
        let mut rig = Rig::new(DualWheel, config());
        rig.ctx.ignition_end_angles[0] = 330;
        rig.ctx.ignition_end_angles[1] = -30;
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(rig.ctx.ignition_end_teeth[0], 11);
        assert_eq!(rig.ctx.ignition_end_teeth[1], 11);
    }

    #[test]
    fn non_360_divides_multiplied_angle() {
        let mut config = config().with_teeth(18, 0).with_pattern(DecoderKind::NonThreeSixty);
        config.trigger_angle_multiplier = 2;
        let mut rig = Rig::new(NonThreeSixty, config);
        assert_eq!(rig.ctx.trigger_tooth_angle, 40);
        rig.secondary(GAP);
        rig.primary(GAP);
        rig.primary(GAP);
        rig.primary(GAP);
        // Tooth three of 18 on a 360 degree wheel.
        assert_eq!(rig.angle(), 40);
    }
}
