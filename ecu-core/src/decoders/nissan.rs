//! Nissan 360 slot optical disc in the distributor.
//!
//! The outer track has 360 slots per cam revolution, one every two crank
//! degrees. The inner track has one window per cylinder, each a different
//! length, so the window width measured in outer slots identifies the
//! cylinder.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

const SLOTS: u16 = 360;
/// End teeth are set this many slots early to leave time to arm the schedule.
const END_TOOTH_OFFSET: Degrees = 4;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Nissan360;

impl Nissan360 {
    /// Slot count at the end of a window `width` slots wide, or `None` when
    /// the width does not identify a cylinder.
    fn window_end(cylinders: u8, width: u16) -> Option<u16> {
        match (cylinders, width) {
            (4, 15..=17) => Some(16),
            (4, 11..=13) => Some(102),
            (4, 7..=9) => Some(188),
            (4, 3..=5) => Some(274),
            (6, 3..=5) => Some(124),
            // Optispark: the shortest individual window ends at 102 crank degrees.
            (8, 6..=8) => Some(56),
            _ => None,
        }
    }
}

impl Decoder for Nissan360 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * u32::from(SLOTS));
        ctx.sec_filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 2) / 2;
        ctx.secondary_tooth_count = 0;
        ctx.is_sequential = true;
        ctx.has_secondary = true;
        ctx.tooth_current_count = 1;
        ctx.trigger_tooth_angle = 2;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);

        if !ctx.has_sync() {
            return;
        }
        if ctx.tooth_current_count == SLOTS + 1 {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }

        if ctx.config.per_tooth_ign {
            let angle =
                (Degrees::from(ctx.tooth_current_count) - 1) * 2 + Degrees::from(ctx.config.trigger_angle);
            let max = ctx.config.max_ignition_angle();
            if angle > max {
                ctx.check_per_tooth_timing(angle - max, ctx.tooth_current_count / 2, hooks);
            } else {
                ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
            }
        }
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        ctx.tooth_last_sec_tooth_time = now;

        // A rising secondary edge setting means windows open when the input goes low.
        let window_start_level = ctx.config.secondary_edge == TriggerEdge::Falling;
        if ctx.secondary_tooth_count == 0 || edge.secondary_high == window_start_level {
            ctx.secondary_tooth_count = ctx.tooth_current_count;
            return;
        }

        let width = ctx.tooth_current_count.wrapping_sub(ctx.secondary_tooth_count) & 0xFF;
        let end = Self::window_end(ctx.config.cylinders, width);
        if !ctx.has_sync() {
            match end {
                Some(tooth) => {
                    ctx.tooth_current_count = tooth;
                    ctx.declare_sync();
                }
                None => ctx.clear_sync(),
            }
        } else if ctx.config.use_resync && ctx.config.cylinders == 4 && end == Some(16) {
            // Re-check once per cycle on the longest window.
            ctx.tooth_current_count = 16;
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() || ctx.tooth_last_tooth_time == 0 || ctx.tooth_last_minus_one_tooth_time == 0 {
            return 0;
        }
        let revolution = if ctx.start_revolutions < 2 {
            // Each slot covers two crank degrees.
            ctx.tooth_last_tooth_time
                .wrapping_sub(ctx.tooth_last_minus_one_tooth_time)
                .wrapping_mul(180)
        } else {
            ctx.tooth_one_time.wrapping_sub(ctx.tooth_one_minus_one_time) >> 1
        };
        ctx.set_revolution_time(revolution);
        ctx.stall_time = ctx.revolution_time() << 1;
        ctx.rpm_from_revolution_time()
    }

    /// Slot resolution is two degrees, so only the half-slot point is interpolated.
    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let mut angle =
            (Degrees::from(ctx.tooth_current_count) - 1) * 2 + Degrees::from(ctx.config.trigger_angle);
        let half_slot = ctx
            .tooth_last_tooth_time
            .wrapping_sub(ctx.tooth_last_minus_one_tooth_time)
            / 2;
        if now.wrapping_sub(ctx.tooth_last_tooth_time) > half_slot {
            angle += 1;
        }
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let trigger_angle = Degrees::from(ctx.config.trigger_angle);
        for channel in 0..4 {
            let end_angle = ctx.ignition_end_angles[channel];
            let end_angle = if end_angle - END_TOOTH_OFFSET > trigger_angle {
                end_angle
            } else {
                end_angle + 720
            };
            let tooth = (end_angle - trigger_angle) / 2 - END_TOOTH_OFFSET;
            ctx.ignition_end_teeth[channel] = tooth.max(0) as u16;
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Both)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        SLOTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    /// Two degrees per slot at 1667rpm.
    const SLOT_GAP: u32 = 200;

    fn rig(cylinders: u8) -> Rig<Nissan360> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Nissan360)
            .with_cylinders(cylinders)
            .with_sequential_fuel(true);
        Rig::new(Nissan360, config)
    }

    fn slots(rig: &mut Rig<Nissan360>, count: usize) {
        for _ in 0..count {
            rig.primary(SLOT_GAP);
        }
    }

    fn window(rig: &mut Rig<Nissan360>, width: usize) {
        rig.secondary_edge(0, Edge::at(0).with_levels(false, false, false));
        slots(rig, width);
        rig.secondary_edge(0, Edge::at(0).with_levels(false, true, false));
    }

    #[test]
    fn longest_window_syncs_four_cylinder() {
        let mut rig = rig(4);
        slots(&mut rig, 5);
        window(&mut rig, 16);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 16);
        assert_eq!(rig.angle(), 30);
        assert_eq!(rig.angle_after(150), 31);
    }

    #[test]
    fn shortest_window_syncs_six_cylinder() {
        let mut rig = rig(6);
        slots(&mut rig, 2);
        window(&mut rig, 4);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 124);
    }

    #[test]
    fn unknown_window_keeps_searching() {
        let mut rig = rig(4);
        slots(&mut rig, 2);
        window(&mut rig, 20);
        assert!(!rig.ctx.has_sync());
        // Nothing was held, so nothing was lost.
        assert_eq!(rig.ctx.sync_loss_counter, 0);
    }

    #[test]
    fn first_revolutions_use_slot_gap_for_rpm() {
        let mut rig = rig(4);
        slots(&mut rig, 5);
        window(&mut rig, 16);
        assert_eq!(rig.update_rpm(), 1667);
        assert_eq!(rig.ctx.revolution_time(), 36_000);
        assert_eq!(rig.ctx.stall_time, 72_000);
    }

    #[test]
    fn end_teeth_lead_end_angle_by_four_slots() {
        let mut rig = rig(4);
        rig.ctx.ignition_end_angles[..4].copy_from_slice(&[360, 2, 180, 540]);
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(&rig.ctx.ignition_end_teeth[..4], &[176, 357, 86, 266]);
    }
}
