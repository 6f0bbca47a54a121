//! Multi-tooth wheel with one or more missing teeth.
//!
//! The first tooth after the gap is tooth one and carries the trigger angle.
//! An optional cam input supplies the revolution-one reference for
//! sequential operation and the VVT1 angle; a third input measures VVT2.

use crate::config::{SecondaryPattern, SparkMode, TriggerSpeed};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_MIN, MICROS_PER_SEC, Micros, nudge};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, IGN_CHANNELS, ToothHooks};

/// Below this speed the gap search runs on every tooth.
const FULL_SEARCH_RPM: u16 = 2_000;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MissingTooth;

impl MissingTooth {
    pub(super) fn end_tooth(ctx: &DecoderContext, end_angle: Degrees, tooth_adder: u16) -> u16 {
        let teeth = i32::from(ctx.config.teeth);
        let mut tooth = (end_angle - i32::from(ctx.config.trigger_angle)) / i32::from(ctx.trigger_tooth_angle);
        // One tooth of margin for calculation time on fine wheels.
        if teeth > 12 {
            tooth -= 1;
        }
        let range = teeth + i32::from(tooth_adder);
        let mut tooth = nudge(1, range, tooth, range) as u16;
        if tooth > ctx.trigger_actual_teeth && tooth <= ctx.config.teeth {
            tooth = ctx.trigger_actual_teeth;
        }
        tooth.min(ctx.trigger_actual_teeth + tooth_adder)
    }

    fn tooth_one(ctx: &mut DecoderContext, edge: Edge) {
        let config = ctx.config;
        if ctx.has_any_sync() {
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            if config.is_cam_speed() {
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            }
        } else {
            ctx.start_revolutions = 0;
        }

        ctx.tooth_current_count = 1;
        ctx.revolution_one = if config.secondary == SecondaryPattern::Poll {
            config.poll_level_high == edge.secondary_high
        } else {
            !ctx.revolution_one
        };
        ctx.shift_tooth_one(edge.time);

        if config.is_sequential() {
            if ctx.secondary_tooth_count > 0
                || config.is_cam_speed()
                || config.secondary == SecondaryPattern::Poll
                || !config.is_four_stroke()
            {
                ctx.declare_sync();
            } else if !ctx.has_sync() {
                ctx.declare_half_sync();
            }
        } else {
            ctx.declare_sync();
        }
        if matches!(config.secondary, SecondaryPattern::Single | SecondaryPattern::Toyota3) {
            ctx.secondary_tooth_count = 0;
        }

        // A burst of noise must not leave the filter stuck above the real gap.
        ctx.filter_time = 0;
        ctx.shift_tooth_times(edge.time);
        ctx.tooth_angle_correct = false;
    }
}

impl Decoder for MissingTooth {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        let config = ctx.config;
        let teeth = u32::from(config.teeth);
        ctx.is_sequential = false;
        ctx.trigger_tooth_angle = (360 / teeth) as u16;
        if config.is_cam_speed() {
            ctx.trigger_tooth_angle = (720 / teeth) as u16;
            ctx.is_sequential = true;
        }
        ctx.trigger_actual_teeth = config.teeth - u16::from(config.missing_teeth);
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * teeth);
        ctx.sec_filter_time = if config.secondary == SecondaryPattern::FourMinusOne {
            MICROS_PER_MIN / u32::from(MAX_RPM) / 4 / 2
        } else {
            MICROS_PER_SEC / (u32::from(MAX_RPM) / 60)
        };
        ctx.check_sync_tooth_count = config.teeth >> 1;
        ctx.tooth_last_minus_one_tooth_time = 0;
        ctx.tooth_current_count = 0;
        ctx.secondary_tooth_count = 0;
        ctx.third_tooth_count = 0;
        ctx.tooth_one_time = 0;
        ctx.tooth_one_minus_one_time = 0;
        // Slowest speed still considered running is 50rpm.
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50)
            * u32::from(ctx.trigger_tooth_angle)
            * (u32::from(config.missing_teeth) + 1);
        ctx.has_secondary = config.speed == TriggerSpeed::Crank
            && (config.spark_mode == SparkMode::Sequential || config.sequential_fuel || config.vvt.enabled);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        if ctx.tooth_last_tooth_time > 0 && ctx.tooth_last_minus_one_tooth_time > 0 {
            let mut missing_tooth = false;
            if !ctx.has_sync()
                || ctx.rpm < FULL_SEARCH_RPM
                || ctx.tooth_current_count >= (3 * ctx.trigger_actual_teeth) >> 2
            {
                let last_gap = ctx
                    .tooth_last_tooth_time
                    .wrapping_sub(ctx.tooth_last_minus_one_tooth_time);
                let target_gap = if ctx.config.missing_teeth == 1 {
                    last_gap.wrapping_mul(3) >> 1
                } else {
                    last_gap.wrapping_mul(u32::from(ctx.config.missing_teeth))
                };

                if ctx.cur_gap > target_gap || ctx.tooth_current_count > ctx.trigger_actual_teeth {
                    missing_tooth = true;
                    if ctx.tooth_current_count < ctx.trigger_actual_teeth && ctx.has_sync() {
                        // Gap arrived early: teeth were lost somewhere in the revolution.
                        ctx.lose_sync();
                    } else {
                        Self::tooth_one(ctx, edge);
                    }
                }
            }

            if !missing_tooth {
                ctx.set_filter(ctx.cur_gap);
                ctx.shift_tooth_times(now);
                ctx.tooth_angle_correct = true;
            }
        } else {
            ctx.shift_tooth_times(now);
        }

        if ctx.per_tooth_active() {
            let config = ctx.config;
            let tooth_angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(ctx.trigger_tooth_angle)
                + Degrees::from(config.trigger_angle);
            if config.spark_mode == SparkMode::Sequential
                && ctx.revolution_one
                && config.speed == TriggerSpeed::Crank
                && config.is_four_stroke()
            {
                let angle = ctx.ignition_limits(tooth_angle + 360);
                ctx.check_per_tooth_timing(angle, config.teeth + ctx.tooth_current_count, hooks);
            } else {
                let angle = ctx.ignition_limits(tooth_angle);
                ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
            }
        }
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.tooth_last_sec_tooth_time == 0 {
            ctx.cur_gap2 = 0;
            ctx.tooth_last_sec_tooth_time = now;
        }
        if ctx.cur_gap2 < ctx.sec_filter_time {
            return;
        }

        match ctx.config.secondary {
            SecondaryPattern::FourMinusOne => {
                let last_gap = ctx
                    .tooth_last_sec_tooth_time
                    .wrapping_sub(ctx.tooth_last_minus_one_sec_tooth_time);
                let target_gap = last_gap.wrapping_mul(3) >> 1;
                ctx.tooth_last_minus_one_sec_tooth_time = ctx.tooth_last_sec_tooth_time;
                if ctx.cur_gap2 >= target_gap || ctx.secondary_tooth_count > 3 {
                    ctx.secondary_tooth_count = 1;
                    ctx.revolution_one = true;
                    ctx.sec_filter_time = 0;
                    ctx.record_vvt1_angle(self.crank_angle(ctx, now));
                } else {
                    ctx.sec_filter_time = ctx.cur_gap2 >> 2;
                    ctx.secondary_tooth_count += 1;
                }
            }
            SecondaryPattern::Poll => {
                // Revolution one comes from the level read at tooth one.
                ctx.sec_filter_time = ctx.cur_gap2 >> 1;
                ctx.record_vvt1_angle(self.crank_angle(ctx, now));
            }
            SecondaryPattern::Single => {
                ctx.revolution_one = true;
                ctx.sec_filter_time = ctx.cur_gap2 >> 1;
                ctx.secondary_tooth_count += 1;
                ctx.record_vvt1_angle(self.crank_angle(ctx, now));
            }
            SecondaryPattern::Toyota3 => {
                // One tooth in the first crank revolution, two in the second.
                ctx.secondary_tooth_count += 1;
                if ctx.secondary_tooth_count == 2 {
                    ctx.revolution_one = true;
                    ctx.record_vvt1_angle(self.crank_angle(ctx, now));
                }
                ctx.sec_filter_time = ctx.cur_gap2 >> 2;
            }
            SecondaryPattern::FiveThreeTwo => {}
        }
        ctx.tooth_last_sec_tooth_time = now;
    }

    fn on_tertiary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap3 = now.wrapping_sub(ctx.tooth_last_third_tooth_time);
        if ctx.tooth_last_third_tooth_time == 0 {
            ctx.cur_gap3 = 0;
            ctx.tooth_last_third_tooth_time = now;
        }
        if ctx.cur_gap3 < ctx.third_filter_time {
            return;
        }
        ctx.third_tooth_count += 1;
        ctx.third_filter_time = ctx.cur_gap3 >> 2;
        let crank_angle = self.crank_angle(ctx, now);
        ctx.vvt2_angle = ctx.vvt_angle(crank_angle, ctx.config.vvt.vvt2_cl0_duty_angle, ctx.vvt2_angle);
        ctx.tooth_last_third_tooth_time = now;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        let cam = ctx.config.is_cam_speed();
        if ctx.rpm < ctx.config.crank_rpm {
            // The gap before tooth one spans the missing teeth.
            if ctx.tooth_current_count == 1 {
                ctx.rpm
            } else {
                ctx.cranking_rpm(ctx.config.teeth, cam)
            }
        } else {
            ctx.std_rpm(cam)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let mut angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(ctx.config.trigger_angle);
        if ctx.revolution_one && ctx.config.speed == TriggerSpeed::Crank {
            angle += 360;
        }
        angle += ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let config = ctx.config;
        let tooth_adder = if matches!(config.spark_mode, SparkMode::Sequential | SparkMode::Single)
            && config.speed == TriggerSpeed::Crank
            && config.is_four_stroke()
        {
            config.teeth
        } else {
            0
        };
        for channel in 0..IGN_CHANNELS {
            ctx.ignition_end_teeth[channel] = Self::end_tooth(ctx, ctx.ignition_end_angles[channel], tooth_adder);
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        let mut edges = EdgeSelection::primary(ctx.config.primary_edge);
        if ctx.has_secondary {
            edges = edges.with_secondary(ctx.config.secondary_edge);
        }
        if ctx.config.vvt.vvt2_enabled {
            edges = edges.with_tertiary(ctx.config.tertiary_edge);
        }
        edges
    }
}
