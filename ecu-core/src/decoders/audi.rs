//! Audi 135 tooth crank wheel with one cam tooth.
//!
//! 135 teeth do not divide 360 degrees evenly, so only every third tooth is
//! used and the wheel is decoded as a 45 tooth dual wheel.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros};

use super::dual_wheel::UNSYNCED_TOOTH_COUNT;
use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

const PHYSICAL_TEETH: u32 = 135;
const TEETH: u16 = 45;
/// Physical teeth per decoded tooth.
const TEETH_PER_STEP: u16 = 3;
/// The cam sync check is dropped after this many revolutions without resync.
const RESYNC_REVOLUTIONS: u16 = 100;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Audi135;

impl Decoder for Audi135 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.trigger_tooth_angle = 360 / TEETH;
        ctx.tooth_current_count = UNSYNCED_TOOTH_COUNT;
        ctx.tooth_system_count = 0;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * PHYSICAL_TEETH);
        ctx.sec_filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 2) / 2;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
        ctx.is_sequential = true;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_system_last_tooth_time);
        if ctx.cur_gap <= ctx.filter_time && ctx.start_revolutions != 0 {
            return;
        }
        ctx.tooth_system_count = ctx.tooth_system_count.saturating_add(1);

        if !ctx.has_sync() {
            ctx.tooth_last_tooth_time = now;
            ctx.tooth_system_last_tooth_time = now;
            return;
        }
        if ctx.tooth_system_count < TEETH_PER_STEP {
            return;
        }

        ctx.valid_trigger = true;
        ctx.tooth_system_last_tooth_time = now;
        ctx.tooth_system_count = 0;
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        if ctx.tooth_current_count == 1 || ctx.tooth_current_count > TEETH {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.revolution_one = !ctx.revolution_one;
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }
        ctx.set_filter(ctx.cur_gap);
        ctx.shift_tooth_times(now);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, _edge: Edge, _hooks: &mut H) {
        // The next physical crank tooth becomes tooth one.
        if !ctx.has_sync() {
            ctx.tooth_current_count = 0;
            ctx.declare_sync();
            ctx.tooth_system_count = TEETH_PER_STEP;
        } else if ctx.config.use_resync {
            ctx.tooth_current_count = 0;
            ctx.tooth_system_count = TEETH_PER_STEP;
        } else if ctx.start_revolutions < RESYNC_REVOLUTIONS && ctx.tooth_current_count != TEETH {
            ctx.tooth_current_count = 0;
        }
        ctx.revolution_one = true;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(false)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let tooth = if ctx.tooth_current_count == 0 {
            TEETH
        } else {
            ctx.tooth_current_count
        };
        let mut angle = (Degrees::from(tooth) - 1) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        if ctx.revolution_one {
            angle += 360;
        }
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Rising)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        TEETH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    fn synced() -> Rig<Audi135> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Audi135)
            .with_sequential_fuel(true);
        let mut rig = Rig::new(Audi135, config);
        rig.primary(300);
        rig.primary(300);
        assert!(!rig.ctx.has_sync());
        rig.secondary(0);
        assert!(rig.ctx.has_sync());
        rig
    }

    #[test]
    fn setup_filters_at_max_rpm() {
        let rig = synced();
        assert_eq!(rig.ctx.filter_time, 24);
        assert_eq!(rig.ctx.trigger_tooth_angle, 8);
    }

    #[test]
    fn first_tooth_after_cam_is_tooth_one() {
        let mut rig = synced();
        rig.primary(300);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert!(!rig.ctx.revolution_one);
        assert_eq!(rig.angle(), 0);
    }

    #[test]
    fn only_every_third_tooth_is_counted() {
        let mut rig = synced();
        rig.primary(300);
        rig.primary(300);
        rig.primary(300);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        rig.primary(300);
        assert_eq!(rig.ctx.tooth_current_count, 2);
        assert_eq!(rig.ctx.filter_time, 900 >> 2);
        assert_eq!(rig.angle(), 8);
    }

    #[test]
    fn cam_tooth_marks_second_revolution() {
        let mut rig = synced();
        assert_eq!(rig.angle(), 44 * 8 + 360);
    }
}
