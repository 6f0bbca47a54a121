//! Ford patterns: the ST170 36-1 crank with an 8-3 cam, and the TFI
//! distributor with one narrow signature vane.

use crate::config::{SparkMode, TriggerSpeed};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_MIN, MICROS_PER_SEC, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, MissingTooth, ToothHooks};

const ST170_TEETH: u16 = 36;
/// Ignition channels an ST170 engine uses.
const ST170_CHANNELS: usize = 4;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FordSt170;

impl Decoder for FordSt170 {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        // The crank wheel is fixed whatever the configuration says.
        ctx.config = ctx
            .config
            .with_teeth(ST170_TEETH, 1)
            .with_speed(TriggerSpeed::Crank);
        MissingTooth.setup(ctx, now);
        // Nearest cam teeth are 90 crank degrees apart, down to 20 with full advance.
        ctx.sec_filter_time = MICROS_PER_MIN / u32::from(MAX_RPM) / 8 / 2;
        ctx.is_sequential = true;
        ctx.has_secondary = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        MissingTooth.on_primary(ctx, edge, hooks);
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

        let last_gap = ctx
            .tooth_last_sec_tooth_time
            .wrapping_sub(ctx.tooth_last_minus_one_sec_tooth_time);
        let target_gap = last_gap.wrapping_mul(3) >> 1;
        ctx.tooth_last_minus_one_sec_tooth_time = ctx.tooth_last_sec_tooth_time;
        if ctx.cur_gap2 >= target_gap || ctx.secondary_tooth_count == 5 {
            // First cam tooth after the three missing ones.
            ctx.secondary_tooth_count = 1;
            ctx.revolution_one = true;
            ctx.sec_filter_time = 0;
        } else {
            ctx.sec_filter_time = ctx.cur_gap2 >> 2;
            ctx.secondary_tooth_count += 1;
        }
        ctx.tooth_last_sec_tooth_time = now;

        if ctx.secondary_tooth_count == 1 {
            ctx.record_vvt1_angle(self.crank_angle(ctx, now));
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, now: Micros) -> u16 {
        MissingTooth.rpm(ctx, now)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        MissingTooth.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let tooth_adder = if ctx.config.spark_mode == SparkMode::Sequential {
            ST170_TEETH
        } else {
            0
        };
        for channel in 0..ST170_CHANNELS {
            ctx.ignition_end_teeth[channel] =
                MissingTooth::end_tooth(ctx, ctx.ignition_end_angles[channel], tooth_adder);
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }
}

/// Gaps beyond this are treated as a stopped engine by the signature check.
const TFI_GAP_LIMIT: u32 = 20_000_000;
/// Cam revolutions allowed without seeing the signature vane.
const TFI_SIGNATURE_REVOLUTIONS: u16 = 3;
/// Below this speed rpm comes from the last vane gap.
const TFI_TOOTH_RPM_LIMIT: u16 = 1_500;
/// Stall time never drops below 50rpm.
const TFI_MIN_STALL_TIME: u32 = 366_667;

/// One vane per cylinder on a cam speed distributor. The signature vane
/// is narrower than the rest and is seen as a short falling edge gap
/// followed by a long one.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FordTfi {
    last_sync_revolution: u16,
    /// Falling edge gaps before the current one, newest first.
    vane_gaps: [u32; 2],
}

impl FordTfi {
    fn is_signature(&self, crank_gap: u32, vane_gap: u32) -> bool {
        let (wide, narrow) = if crank_gap > 0 && crank_gap < TFI_GAP_LIMIT {
            (crank_gap * 110 / 100, crank_gap * 90 / 100)
        } else {
            (0, 0)
        };
        let [previous, before] = self.vane_gaps;
        vane_gap > wide && previous < narrow && before < wide && before > narrow
    }
}

impl Decoder for FordTfi {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        let cylinders = ctx.config.cylinders.max(1);
        *self = Self::default();
        ctx.trigger_actual_teeth = u16::from(cylinders);
        ctx.trigger_tooth_angle = 720 / ctx.trigger_actual_teeth;
        ctx.tooth_current_count = 0;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 30 * u32::from(cylinders));
        // The signature vane is about 80% of a regular one.
        ctx.sec_filter_time = ctx.filter_time * 4 / 5;
        ctx.is_sequential = true;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
        let stall_rpm = if cylinders <= 4 { 90 } else { 50 };
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / stall_rpm) * u32::from(ctx.trigger_tooth_angle);
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

        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        if ctx.tooth_current_count > ctx.trigger_actual_teeth {
            if ctx.has_sync()
                && self.last_sync_revolution.saturating_add(TFI_SIGNATURE_REVOLUTIONS) < ctx.start_revolutions
            {
                ctx.lose_sync();
            }
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }
        ctx.valid_trigger = true;

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

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.tooth_last_sec_tooth_time == 0 {
            ctx.cur_gap2 = 0;
            ctx.tooth_last_sec_tooth_time = now;
        }

        if ctx.cur_gap2 >= ctx.sec_filter_time {
            if self.is_signature(ctx.cur_gap, ctx.cur_gap2) {
                if !ctx.has_sync() || ctx.start_revolutions <= u16::from(ctx.config.stg_cycles) {
                    // The last primary edge was tooth two.
                    ctx.tooth_current_count = 2;
                    ctx.filter_time = 0;
                    ctx.declare_sync();
                } else {
                    if ctx.tooth_current_count != 2 && ctx.start_revolutions > 2 {
                        ctx.record_resync();
                        warn!("tfi signature at tooth {}", ctx.tooth_current_count);
                    }
                    if ctx.config.use_resync {
                        ctx.tooth_current_count = 2;
                        ctx.declare_sync();
                    }
                }
                self.last_sync_revolution = ctx.start_revolutions;
            }
            ctx.tooth_last_sec_tooth_time = now;
            self.vane_gaps = [ctx.cur_gap2, self.vane_gaps[0]];
        }
        ctx.sec_filter_time = ctx.cur_gap >> 1;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        let rpm = if ctx.rpm < ctx.config.crank_rpm || ctx.rpm < TFI_TOOTH_RPM_LIMIT {
            ctx.cranking_rpm(ctx.trigger_actual_teeth, true)
        } else {
            ctx.std_rpm(true)
        };
        ctx.stall_time = (ctx.revolution_time() << 1).max(TFI_MIN_STALL_TIME);
        rpm
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        // Zero means the signature edge was the last one seen.
        let tooth = if ctx.tooth_current_count == 0 {
            2
        } else {
            ctx.tooth_current_count
        };
        let angle = (Degrees::from(tooth) - 1) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let teeth = match ctx.config.cylinders {
            4 => 2,
            6 => 3,
            8 => 4,
            _ => return,
        };
        let end_angle = ctx.ignition_limits(ctx.ignition_end_angles[0] - Degrees::from(ctx.config.trigger_angle));
        let step = Degrees::from(ctx.trigger_tooth_angle);
        // Tooth that ends channel one; the rest follow in firing order.
        let first = if end_angle <= 0 {
            teeth - 1
        } else {
            ((end_angle - 1) / step).min(Degrees::from(teeth) - 1) as u16
        };
        for channel in 0..usize::from(teeth) {
            ctx.ignition_end_teeth[channel] = (first + channel as u16) % teeth + 1;
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }
}
