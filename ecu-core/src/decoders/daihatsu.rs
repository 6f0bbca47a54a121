//! Daihatsu +1 cam pattern.
//!
//! One tooth per cylinder over the cycle plus an extra tooth 30 degrees
//! after tooth one. The extra tooth is found as a gap much shorter than the
//! one before it.

use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_MIN, Micros};

use super::{Decoder, DecoderContext, Edge, ToothHooks};

const THREE_CYLINDER_ANGLES: [i16; 4] = [0, 30, 240, 480];
const FOUR_CYLINDER_ANGLES: [i16; 5] = [0, 30, 180, 360, 540];
/// Teeth to see before looking for the extra tooth.
const SYNC_TEETH: u16 = 3;
/// Stall detection uses 90rpm; 50rpm would wait too long on a four cylinder.
const STALL_RPM: u32 = 90;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Daihatsu;

impl Daihatsu {
    fn tooth_angles(cylinders: u8) -> &'static [i16] {
        if cylinders == 3 {
            &THREE_CYLINDER_ANGLES
        } else {
            &FOUR_CYLINDER_ANGLES
        }
    }

    /// Longest gap the extra tooth can show after the previous gap.
    fn extra_tooth_gap(cylinders: u8, previous_gap: u32) -> u32 {
        if cylinders == 3 {
            // 240 degree teeth, about 60 degrees.
            previous_gap / 4
        } else {
            // 180 degree teeth, about 67 degrees.
            previous_gap * 3 / 8
        }
    }
}

impl Decoder for Daihatsu {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        let cylinders = ctx.config.cylinders.max(1);
        ctx.trigger_actual_teeth = u16::from(cylinders) + 1;
        ctx.trigger_tooth_angle = 720 / ctx.trigger_actual_teeth;
        ctx.filter_time = MICROS_PER_MIN / u32::from(MAX_RPM) / u32::from(cylinders) / 2;
        ctx.is_sequential = true;
        ctx.has_secondary = false;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / STALL_RPM) * u32::from(ctx.trigger_tooth_angle) * 4;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        ctx.tooth_system_count = ctx.tooth_system_count.saturating_add(1);
        ctx.valid_trigger = true;

        if ctx.has_sync() {
            if ctx.tooth_current_count == ctx.trigger_actual_teeth {
                ctx.tooth_current_count = 1;
                ctx.shift_tooth_one(now);
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            } else {
                ctx.tooth_current_count += 1;
                ctx.set_filter(ctx.cur_gap);
            }

            // Cranking timing locked to TDC on each tooth.
            if ctx.cranking_coil_lock() && (1..=4).contains(&ctx.tooth_current_count) {
                hooks.end_coil_charge(usize::from(ctx.tooth_current_count - 1));
            }
        } else if ctx.tooth_system_count >= SYNC_TEETH {
            let previous_gap = ctx
                .tooth_last_tooth_time
                .wrapping_sub(ctx.tooth_last_minus_one_tooth_time);
            let target = Self::extra_tooth_gap(ctx.config.cylinders, previous_gap);
            if ctx.cur_gap < target {
                ctx.tooth_current_count = 2;
                ctx.declare_sync();
                ctx.filter_time = target;
            }
        }

        ctx.shift_tooth_times(now);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(true)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let tooth_angle = usize::from(ctx.tooth_current_count)
            .checked_sub(1)
            .and_then(|index| Self::tooth_angles(ctx.config.cylinders).get(index))
            .map_or(0, |&angle| Degrees::from(angle));
        let angle = tooth_angle
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}
}
