//! General Motors crank patterns.
//!
//! The 7X wheel has six evenly spaced teeth plus a seventh sync tooth shortly
//! after the second; the sync tooth is numbered three so the remaining
//! teeth keep simple angles. The 24X wheel has 24 unevenly spaced teeth and a
//! cam signal that changes level once per crank revolution.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MICROS_PER_DEG_1_RPM, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

/// Angle ATDC of tooth one on the 7X wheel before the trigger angle is applied.
const GM7X_TOOTH_ONE_ANGLE: Degrees = 42;
/// The 7X sync tooth sits at a fixed angle regardless of the trigger angle.
const GM7X_SYNC_TOOTH_ANGLE: Degrees = 112;
const GM7X_TEETH: u16 = 7;
/// Advance at which the 7X end teeth move one tooth earlier.
const GM7X_EARLY_END_ADVANCE: i16 = 18;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gm7x;

impl Gm7x {
    fn tooth_angle(ctx: &DecoderContext, tooth: u16) -> Degrees {
        let tooth = Degrees::from(tooth);
        let trigger_angle = Degrees::from(ctx.config.trigger_angle);
        if tooth < 3 {
            (tooth - 1) * 60 + GM7X_TOOTH_ONE_ANGLE + trigger_angle
        } else if tooth == 3 {
            GM7X_SYNC_TOOTH_ANGLE
        } else {
            (tooth - 2) * 60 + GM7X_TOOTH_ONE_ANGLE + trigger_angle
        }
    }
}

impl Decoder for Gm7x {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.trigger_tooth_angle = 360 / 6;
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        let last_gap = ctx.cur_gap;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        if ctx.tooth_last_tooth_time > 0 && ctx.tooth_last_minus_one_tooth_time > 0 {
            if ctx.tooth_current_count > GM7X_TEETH {
                ctx.tooth_current_count = 1;
                ctx.shift_tooth_one(now);
                ctx.tooth_angle_correct = true;
            } else if ctx.cur_gap < last_gap >> 1 {
                // Less than half the previous gap: the sync tooth.
                ctx.tooth_current_count = 3;
                ctx.declare_sync();
                ctx.tooth_angle_correct = false;
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            } else {
                ctx.tooth_angle_correct = true;
            }
        }

        if ctx.config.per_tooth_ign && ctx.tooth_current_count != 3 {
            let angle = Self::tooth_angle(ctx, ctx.tooth_current_count);
            ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
        }

        ctx.shift_tooth_times(now);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(false)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let angle =
            Self::tooth_angle(ctx, ctx.tooth_current_count) + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let teeth: [u16; 3] = if ctx.advance < GM7X_EARLY_END_ADVANCE {
            [7, 2, 5]
        } else {
            [6, 1, 4]
        };
        ctx.ignition_end_teeth[..3].copy_from_slice(&teeth);
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        GM7X_TEETH
    }
}

/// Angle of each 24X tooth within one crank revolution.
const GM24X_TOOTH_ANGLES: [i16; 24] = [
    12, 18, 33, 48, 63, 78, 102, 108, 123, 138, 162, 177, 183, 198, 222, 237, 252, 258, 282, 288, 312, 327, 342, 357,
];
/// Count parked at until the first cam edge has been seen.
const GM24X_WAITING_FOR_CAM: u16 = 25;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gm24x;

impl Gm24x {
    fn tooth_angle(tooth: u16) -> Degrees {
        usize::from(tooth)
            .checked_sub(1)
            .and_then(|index| GM24X_TOOTH_ANGLES.get(index))
            .map_or(0, |&angle| Degrees::from(angle))
    }
}

impl Decoder for Gm24x {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        ctx.trigger_tooth_angle = 15;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
        ctx.tooth_current_count = GM24X_WAITING_FOR_CAM;
        ctx.tooth_last_tooth_time = now;
        ctx.is_sequential = true;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        if ctx.tooth_current_count == GM24X_WAITING_FOR_CAM {
            ctx.clear_sync();
            return;
        }
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);

        if ctx.tooth_current_count == 0 {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.revolution_one = !ctx.revolution_one;
            ctx.declare_sync();
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            ctx.trigger_tooth_angle = 15;
        } else {
            ctx.tooth_current_count += 1;
            let gap = Self::tooth_angle(ctx.tooth_current_count) - Self::tooth_angle(ctx.tooth_current_count - 1);
            ctx.trigger_tooth_angle = gap.max(0) as u16;
        }
        ctx.valid_trigger = true;
        ctx.tooth_last_tooth_time = now;
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, _edge: Edge, _hooks: &mut H) {
        ctx.tooth_current_count = 0;
        ctx.revolution_one = true;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(false)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let mut angle = Self::tooth_angle(ctx.tooth_current_count) + Degrees::from(ctx.config.trigger_angle);
        angle += ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        if ctx.revolution_one {
            angle += 360;
        }
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Both)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        GM24X_WAITING_FOR_CAM - 1
    }
}
