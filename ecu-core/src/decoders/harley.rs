//! Harley-Davidson V-twin with two unevenly spaced crank teeth.
//!
//! Tooth two sits 157 degrees after tooth one, so the gap after it is the
//! longer one. Only rising edges are used and the cam input is ignored.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MICROS_PER_DEG_1_RPM, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

const TOOTH_TWO_ANGLE: u16 = 157;
const STARTUP_FILTER_TIME: u32 = 1_500;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Harley;

impl Decoder for Harley {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        ctx.trigger_tooth_angle = 0;
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * 60;
        ctx.tooth_last_tooth_time = now;
        ctx.filter_time = STARTUP_FILTER_TIME;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        let last_gap = ctx.cur_gap;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        ctx.set_filter(ctx.cur_gap);
        if ctx.cur_gap <= ctx.filter_time {
            return;
        }

        if !edge.primary_high {
            // A falling edge got through, so the position is unknown.
            if ctx.has_sync() {
                ctx.lose_sync();
            }
            ctx.tooth_current_count = 0;
            return;
        }

        ctx.valid_trigger = true;
        if ctx.cur_gap > last_gap {
            ctx.tooth_current_count = 1;
            // The long gap ending at tooth one.
            ctx.trigger_tooth_angle = 360 - TOOTH_TWO_ANGLE;
            ctx.shift_tooth_one(now);
            ctx.declare_sync();
        } else {
            ctx.tooth_current_count = 2;
            ctx.trigger_tooth_angle = TOOTH_TWO_ANGLE;
        }
        ctx.shift_tooth_times(now);
        ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() {
            return 0;
        }
        if ctx.rpm < ctx.config.crank_rpm {
            ctx.tooth_angle_rpm()
        } else {
            ctx.std_rpm(false)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let tooth_angle = if ctx.tooth_current_count == 2 {
            Degrees::from(TOOTH_TWO_ANGLE)
        } else {
            0
        };
        let angle = tooth_angle
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, _ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(TriggerEdge::Rising)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        2
    }
}
