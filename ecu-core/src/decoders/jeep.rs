//! Jeep 2000 crank wheel: three groups of four teeth 20 degrees apart, with
//! 60 degrees between groups, and one cam tooth per cycle.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MICROS_PER_DEG_1_RPM, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

const TOOTH_ANGLES: [i16; 12] = [174, 194, 214, 234, 294, 314, 334, 354, 414, 434, 454, 474];
/// Angle reported when the cam tooth was the last edge: the crank tooth before it.
const CAM_TOOTH_ANGLE: Degrees = 114;
/// Count parked at until the first cam tooth.
const WAITING_FOR_CAM: u16 = 13;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Jeep2000;

impl Jeep2000 {
    fn tooth_angle(tooth: u16) -> Degrees {
        usize::from(tooth)
            .checked_sub(1)
            .and_then(|index| TOOTH_ANGLES.get(index))
            .map_or(0, |&angle| Degrees::from(angle))
    }
}

impl Decoder for Jeep2000 {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        ctx.trigger_tooth_angle = 0;
        // Largest gap is 60 degrees.
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * 60;
        ctx.tooth_current_count = WAITING_FOR_CAM;
        ctx.tooth_last_tooth_time = now;
        ctx.is_sequential = false;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        if ctx.tooth_current_count == WAITING_FOR_CAM {
            ctx.clear_sync();
            return;
        }
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }

        if ctx.tooth_current_count == 0 {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.declare_sync();
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            ctx.trigger_tooth_angle = 60;
        } else {
            ctx.tooth_current_count = ctx.tooth_current_count.saturating_add(1);
            let gap = Self::tooth_angle(ctx.tooth_current_count) - Self::tooth_angle(ctx.tooth_current_count - 1);
            ctx.trigger_tooth_angle = gap.max(0) as u16;
        }

        ctx.set_filter(ctx.cur_gap);
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, _edge: Edge, _hooks: &mut H) {
        ctx.tooth_current_count = 0;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(false)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let base = if ctx.tooth_current_count == 0 {
            CAM_TOOTH_ANGLE
        } else {
            Self::tooth_angle(ctx.tooth_current_count)
        };
        let angle = base + Degrees::from(ctx.config.trigger_angle) + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Both)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        WAITING_FOR_CAM - 1
    }
}
