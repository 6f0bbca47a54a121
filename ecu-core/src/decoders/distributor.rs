//! Distributor with one evenly spaced tooth per cylinder at cam speed.
//!
//! There is no position reference, so the first tooth seen is taken as tooth
//! one and the crank angle is only meaningful relative to it.

use crate::crank_maths::{Degrees, MICROS_PER_DEG_1_RPM, Micros};

use super::{Decoder, DecoderContext, Edge, ToothHooks};

/// Stall time floor, 50rpm over two revolutions.
const MIN_STALL_TIME: u32 = 366_667;
/// Coils released at each tooth while cranking with coil lock.
const CRANKING_LOCK_COILS: usize = 4;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BasicDistributor;

impl BasicDistributor {
    /// End tooth for each channel given the first channel's end angle relative to tooth one.
    fn end_teeth(cylinders: u8, end_angle: Degrees) -> &'static [u16] {
        match cylinders {
            4 => {
                if end_angle > 180 || end_angle <= 0 {
                    &[2, 1]
                } else {
                    &[1, 2]
                }
            }
            3 | 6 => {
                if end_angle > 120 && end_angle <= 240 {
                    &[2, 3, 1]
                } else if end_angle > 240 || end_angle <= 0 {
                    &[3, 1, 2]
                } else {
                    &[1, 2, 3]
                }
            }
            8 => {
                if end_angle > 90 && end_angle <= 180 {
                    &[2, 3, 4, 1]
                } else if end_angle > 180 && end_angle <= 270 {
                    &[3, 4, 1, 2]
                } else if end_angle > 270 || end_angle <= 0 {
                    &[4, 1, 2, 3]
                } else {
                    &[1, 2, 3, 4]
                }
            }
            _ => &[],
        }
    }
}

impl Decoder for BasicDistributor {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        let config = ctx.config;
        ctx.trigger_actual_teeth = u16::from(config.cylinders.max(1));
        let cycle = if config.is_four_stroke() { 720 } else { 360 };
        ctx.trigger_tooth_angle = cycle / ctx.trigger_actual_teeth;
        ctx.filter_time = 0;
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.tooth_current_count = 0;
        ctx.fixed_cranking = true;
        ctx.tooth_angle_correct = true;
        // A 4 cylinder at 50rpm would take too long to declare a stall, so use 90rpm there.
        let micros_per_degree = if config.cylinders <= 4 {
            MICROS_PER_DEG_1_RPM / 90
        } else {
            MICROS_PER_DEG_1_RPM / 50
        };
        ctx.stall_time = micros_per_degree * u32::from(ctx.trigger_tooth_angle);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        if ctx.has_sync() {
            ctx.set_filter(ctx.cur_gap);
        } else {
            ctx.filter_time = 0;
        }

        if ctx.tooth_current_count == ctx.trigger_actual_teeth || !ctx.has_sync() {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.declare_sync();
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        } else if ctx.tooth_current_count < ctx.trigger_actual_teeth {
            ctx.tooth_current_count += 1;
        } else if ctx.has_sync() {
            ctx.lose_sync();
        }
        ctx.valid_trigger = true;

        if ctx.cranking_coil_lock() {
            for channel in 0..CRANKING_LOCK_COILS {
                hooks.end_coil_charge(channel);
            }
        }

        if ctx.config.per_tooth_ign {
            let angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(ctx.trigger_tooth_angle)
                + Degrees::from(ctx.config.trigger_angle);
            let angle = ctx.ignition_limits(angle);
            let half = ctx.trigger_actual_teeth / 2;
            let tooth = if ctx.tooth_current_count > half {
                ctx.tooth_current_count - half
            } else {
                ctx.tooth_current_count
            };
            ctx.check_per_tooth_timing(angle, tooth, hooks);
        }

        ctx.shift_tooth_times(now);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        // Two-stroke distributors turn at crank speed.
        let cam = ctx.config.is_four_stroke();
        let rpm = if ctx.rpm < ctx.config.crank_rpm || ctx.rpm < 1_500 {
            ctx.cranking_rpm(ctx.trigger_actual_teeth, cam)
        } else {
            ctx.std_rpm(cam)
        };
        ctx.stall_time = (ctx.revolution_time() << 1).max(MIN_STALL_TIME);
        rpm
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.interval_angle(now);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let end_angle = ctx.ignition_limits(ctx.ignition_end_angles[0] - Degrees::from(ctx.config.trigger_angle));
        let teeth = Self::end_teeth(ctx.config.cylinders, end_angle);
        ctx.ignition_end_teeth[..teeth.len()].copy_from_slice(teeth);
    }
}
