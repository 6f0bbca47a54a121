//! 36 tooth crank wheels with several groups of missing teeth.
//!
//! Both wheels count teeth in 10 degree steps the way the plain
//! missing-tooth wheel does and share its crank angle calculation; they
//! differ in how the gap groups identify the position.

use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, MissingTooth, ToothHooks};

const NOMINAL_TEETH: u16 = 36;
const TOOTH_ANGLE: u16 = 10;

fn setup_thirty_six(ctx: &mut DecoderContext, actual_teeth: u16) {
    ctx.trigger_tooth_angle = TOOTH_ANGLE;
    ctx.trigger_actual_teeth = actual_teeth;
    ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * u32::from(NOMINAL_TEETH));
    ctx.is_sequential = false;
    ctx.has_secondary = true;
    ctx.check_sync_tooth_count = ctx.config.teeth >> 1;
    ctx.tooth_last_minus_one_tooth_time = 0;
    ctx.tooth_current_count = 0;
    ctx.tooth_one_time = 0;
    ctx.tooth_one_minus_one_time = 0;
    ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(TOOTH_ANGLE) * 2;
}

fn per_tooth_timing<H: ToothHooks>(ctx: &DecoderContext, hooks: &mut H) {
    if !ctx.config.per_tooth_ign {
        return;
    }
    let angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(TOOTH_ANGLE)
        + Degrees::from(ctx.config.trigger_angle);
    let angle = ctx.ignition_limits(angle);
    ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
}

/// Gap before the current tooth, or zero until two teeth have been seen.
fn measured_gap(ctx: &DecoderContext) -> u32 {
    if ctx.tooth_last_tooth_time == 0 || ctx.tooth_last_minus_one_tooth_time == 0 {
        0
    } else {
        ctx.cur_gap
    }
}

fn last_tooth_gap(ctx: &DecoderContext) -> u32 {
    ctx.tooth_last_tooth_time
        .wrapping_sub(ctx.tooth_last_minus_one_tooth_time)
}

fn next_revolution(ctx: &mut DecoderContext, now: Micros) {
    ctx.tooth_current_count = 1;
    ctx.revolution_one = !ctx.revolution_one;
    ctx.shift_tooth_one(now);
    ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
}

/// Boxer wheels with three groups of two missing teeth, two of them either
/// side of a single tooth. Four cylinders run 13-missing-16-missing-1-missing
/// and six cylinders 19-missing-10-missing-1-missing.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThirtySixMinus222 {
    target_gap: u32,
}

impl ThirtySixMinus222 {
    /// Tooth after both gaps of the double group.
    fn double_gap_tooth(cylinders: u8) -> Option<u16> {
        match cylinders {
            4 => Some(19),
            6 => Some(12),
            _ => None,
        }
    }

    /// Regular tooth following the lone gap group.
    fn after_single_gap_tooth(cylinders: u8) -> Option<u16> {
        match cylinders {
            4 => Some(35),
            6 => Some(34),
            _ => None,
        }
    }

    /// Teeth whose preceding gap spans missing teeth.
    fn after_gap_teeth(cylinders: u8) -> &'static [u16] {
        match cylinders {
            4 => &[16, 19, 34],
            6 => &[9, 12, 33],
            _ => &[],
        }
    }
}

impl Decoder for ThirtySixMinus222 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        setup_thirty_six(ctx, 30);
        self.target_gap = 0;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        // The target is held across the tooth between the two gaps of the double group.
        if ctx.tooth_system_count == 0 {
            self.target_gap = last_tooth_gap(ctx).wrapping_mul(2);
        }
        let gap = measured_gap(ctx);
        let cylinders = ctx.config.cylinders;

        if gap > self.target_gap {
            if ctx.tooth_system_count == 1 {
                if let Some(tooth) = Self::double_gap_tooth(cylinders) {
                    ctx.tooth_current_count = tooth;
                    ctx.declare_sync();
                }
                ctx.tooth_system_count = 0;
            } else {
                // One gap group seen; the next tooth tells which.
                ctx.tooth_system_count = 1;
                ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(2);
            }
            ctx.tooth_angle_correct = false;
            ctx.filter_time = 0;
        } else {
            if ctx.tooth_current_count > NOMINAL_TEETH {
                next_revolution(ctx, now);
            } else if ctx.tooth_system_count == 1
                && let Some(tooth) = Self::after_single_gap_tooth(cylinders)
            {
                ctx.tooth_current_count = tooth;
                ctx.declare_sync();
            }
            ctx.set_filter(gap);
            ctx.tooth_angle_correct = true;
            ctx.tooth_system_count = 0;
        }

        ctx.shift_tooth_times(now);
        per_tooth_timing(ctx, hooks);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.rpm >= ctx.config.crank_rpm {
            return ctx.std_rpm(false);
        }
        let cylinders = ctx.config.cylinders;
        let per_tooth = matches!(cylinders, 4 | 6)
            && ctx.tooth_angle_correct
            && !Self::after_gap_teeth(cylinders).contains(&ctx.tooth_current_count);
        if per_tooth {
            ctx.cranking_rpm(NOMINAL_TEETH, false)
        } else {
            ctx.rpm
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        MissingTooth.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let advance = ctx.advance;
        match ctx.config.cylinders {
            4 => {
                ctx.ignition_end_teeth[0] = match advance {
                    i16::MIN..=9 => 36,
                    10..=19 => 35,
                    20..=29 => 34,
                    _ => 31,
                };
                ctx.ignition_end_teeth[1] = if advance < 30 { 16 } else { 13 };
            }
            6 => {
                ctx.ignition_end_teeth[0] = match advance {
                    i16::MIN..=9 => 36,
                    10..=19 => 35,
                    20..=29 => 34,
                    30..=39 => 33,
                    _ => 31,
                };
                ctx.ignition_end_teeth[1] = if advance < 20 { 9 } else { 6 };
                ctx.ignition_end_teeth[2] = match advance {
                    i16::MIN..=9 => 23,
                    10..=19 => 22,
                    20..=29 => 21,
                    30..=39 => 20,
                    _ => 19,
                };
            }
            _ => {}
        }
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        NOMINAL_TEETH
    }
}

/// Mitsubishi 4B11 wheel: one double and one single missing tooth.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThirtySixMinus21;

impl ThirtySixMinus21 {
    /// Tooth after the single missing tooth.
    const SINGLE_GAP_TOOTH: u16 = 20;
}

impl Decoder for ThirtySixMinus21 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        setup_thirty_six(ctx, 33);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        let double_gap = last_tooth_gap(ctx).wrapping_mul(3);
        let single_gap = double_gap >> 1;
        let gap = measured_gap(ctx);

        if gap > single_gap {
            if gap < double_gap {
                ctx.tooth_current_count = Self::SINGLE_GAP_TOOTH;
            } else {
                next_revolution(ctx, now);
            }
            ctx.declare_sync();
            ctx.tooth_angle_correct = false;
            ctx.filter_time = 0;
        } else {
            if ctx.tooth_current_count > NOMINAL_TEETH || ctx.tooth_current_count == 1 {
                next_revolution(ctx, now);
            }
            ctx.set_filter(gap);
            ctx.tooth_angle_correct = true;
        }

        ctx.shift_tooth_times(now);
        per_tooth_timing(ctx, hooks);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        MissingTooth.on_secondary(ctx, edge, hooks);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.rpm >= ctx.config.crank_rpm {
            ctx.std_rpm(false)
        } else if ctx.tooth_current_count != Self::SINGLE_GAP_TOOTH && ctx.tooth_angle_correct {
            ctx.cranking_rpm(NOMINAL_TEETH, false)
        } else {
            ctx.rpm
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        MissingTooth.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        // Tooth 28 sits 180 degrees after tooth 10.
        ctx.ignition_end_teeth[0] = 10;
        ctx.ignition_end_teeth[1] = 28;
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        NOMINAL_TEETH
    }
}
