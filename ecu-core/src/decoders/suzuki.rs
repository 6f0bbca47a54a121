//! Suzuki K6A three cylinder: seven uneven cam teeth over the cycle.
//!
//! Long and short teeth alternate except around the extra sync tooth,
//! which is the only place where three gaps in a row get shorter. Every
//! other tooth is checked against the expected long/short alternation.

use crate::config::{TriggerFilter, TriggerSpeed};
use crate::crank_maths::{Degrees, Micros};

use super::{Decoder, DecoderContext, Edge, ToothHooks};

/// Angle of each tooth, indexed by tooth count. Index zero wraps to the
/// last tooth of the previous cycle and index eight closes the cycle.
const TOOTH_ANGLES: [i16; 9] = [-70, 0, 170, 240, 410, 480, 515, 650, 720];
const ACTUAL_TEETH: u16 = 7;
const SYNC_TOOTH: u16 = 6;
const STARTUP_FILTER_TIME: u32 = 1_500;
const MIN_STALL_TIME: u32 = 366_667;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SuzukiK6a {
    /// The two gaps before the current one, newest first.
    gaps: [u32; 2],
}

impl SuzukiK6a {
    fn tooth_angle(tooth: u16) -> Degrees {
        TOOTH_ANGLES
            .get(usize::from(tooth))
            .map_or(0, |&angle| Degrees::from(angle))
    }

    /// Teeth whose gap is shorter than the one before.
    const fn ends_short_gap(tooth: u16) -> bool {
        matches!(tooth, 1 | 3 | 5 | 6)
    }

    /// Filter for the next tooth, sized from the gap that just ended at
    /// `tooth` and the angle to the next one.
    const fn next_filter(filter: TriggerFilter, tooth: u16, gap: u32) -> u32 {
        match (tooth, filter) {
            (_, TriggerFilter::Off) => 0,
            // 170 degrees then 70.
            (2 | 4, TriggerFilter::Lite) => gap >> 3,
            (2 | 4, TriggerFilter::Medium) => (gap >> 3) + (gap >> 4),
            (2 | 4, TriggerFilter::Aggressive) => (gap >> 2) + (gap >> 4),
            // 70 degrees then 35.
            (5, TriggerFilter::Lite) => gap >> 3,
            (5, TriggerFilter::Medium) => gap >> 2,
            (5, TriggerFilter::Aggressive) => (gap >> 2) + (gap >> 3),
            // 35 degrees then 135.
            (6, TriggerFilter::Lite) => gap,
            (6, TriggerFilter::Medium) => gap * 2,
            (6, TriggerFilter::Aggressive) => gap * 3,
            // 135 degrees then 70.
            (7, TriggerFilter::Lite) => gap >> 3,
            (7, TriggerFilter::Medium) => gap >> 2,
            (7, TriggerFilter::Aggressive) => (gap >> 2) + (gap >> 3),
            // 70 degrees then 170.
            (1 | 3, TriggerFilter::Lite) => (gap >> 1) + (gap >> 3),
            (1 | 3, TriggerFilter::Medium) => gap + (gap >> 2),
            (1 | 3, TriggerFilter::Aggressive) => gap + (gap >> 1) + (gap >> 2),
            _ => 0,
        }
    }

    fn drop_sync(ctx: &mut DecoderContext, tooth: u16) {
        if ctx.has_sync() {
            ctx.lose_sync();
        }
        ctx.filter_time = 0;
        ctx.tooth_current_count = tooth;
    }

    fn end_tooth(ctx: &DecoderContext, end_angle: Degrees) -> u16 {
        let end_angle = ctx.ignition_limits(end_angle - Degrees::from(ctx.config.trigger_angle));
        let next = (1..=ACTUAL_TEETH).find(|&tooth| end_angle <= Self::tooth_angle(tooth));
        match next {
            // The tooth before the one past the end angle.
            Some(tooth) if tooth > 1 => tooth - 1,
            _ => ACTUAL_TEETH,
        }
    }
}

impl Decoder for SuzukiK6a {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        *self = Self::default();
        ctx.config = ctx.config.with_speed(TriggerSpeed::Cam);
        ctx.trigger_tooth_angle = 90;
        ctx.trigger_actual_teeth = ACTUAL_TEETH;
        ctx.tooth_current_count = 1;
        ctx.cur_gap = 0;
        ctx.tooth_last_tooth_time = now;
        ctx.tooth_last_minus_one_tooth_time = 0;
        ctx.stall_time = 3_333 * u32::from(ctx.trigger_tooth_angle);
        ctx.filter_time = STARTUP_FILTER_TIME;
        ctx.sec_filter_time = 0;
        ctx.fixed_cranking = false;
        ctx.tooth_angle_correct = false;
        ctx.has_secondary = false;
        ctx.is_sequential = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time && ctx.start_revolutions != 0 {
            return;
        }
        ctx.tooth_current_count += 1;
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);

        let gap = ctx.cur_gap;
        let [previous, before] = self.gaps;
        if gap <= previous && previous <= before {
            ctx.tooth_current_count = SYNC_TOOTH;
            ctx.declare_sync();
        }
        self.gaps = [gap, previous];

        if ctx.tooth_current_count == ACTUAL_TEETH + 1 && ctx.has_sync() {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            // One cam revolution is two crank revolutions.
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(2);
        } else if ctx.tooth_current_count > ACTUAL_TEETH + 1 {
            Self::drop_sync(ctx, 0);
        }

        if Self::ends_short_gap(ctx.tooth_current_count) {
            if gap > previous {
                Self::drop_sync(ctx, 2);
            }
        } else if gap < previous {
            Self::drop_sync(ctx, 1);
        }

        if !ctx.has_sync() {
            return;
        }
        let tooth = ctx.tooth_current_count;
        ctx.filter_time = Self::next_filter(ctx.config.filter, tooth, gap);
        ctx.trigger_tooth_angle = (Self::tooth_angle(tooth) - Self::tooth_angle(tooth - 1)) as u16;
        if ctx.config.per_tooth_ign {
            let angle = ctx.ignition_limits(Self::tooth_angle(tooth) + Degrees::from(ctx.config.trigger_angle));
            ctx.check_per_tooth_timing(angle, tooth, hooks);
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        let rpm = ctx.std_rpm(true);
        ctx.stall_time = (ctx.revolution_time() << 1).max(MIN_STALL_TIME);
        rpm
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let angle = Self::tooth_angle(ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        for channel in 0..3 {
            ctx.ignition_end_teeth[channel] = Self::end_tooth(ctx, ctx.ignition_end_angles[channel]);
        }
    }
}
