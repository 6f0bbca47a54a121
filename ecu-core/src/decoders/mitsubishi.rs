//! Mitsubishi 4G63 and 6G72 crank angle sensor.
//!
//! The crank disc has one window per cylinder pair with edges alternating
//! 70/110 degrees apart (70/50 on the six). Both edges are decoded. The cam
//! disc is read as a level at each crank edge to find where the cycle starts.

use crate::config::{SparkMode, TriggerEdge, TriggerFilter};
use crate::crank_maths::{Degrees, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

/// Stall time floor, 50rpm.
const MIN_STALL_TIME: u32 = 366_667;
const STARTUP_FILTER_TIME: u32 = 1_500;
/// Fake count parked at until the first edge.
const UNSYNCED_TOOTH_COUNT: u16 = 99;
/// Below this speed the lite filter is used whatever the configuration.
const LITE_FILTER_RPM: u16 = 1_400;

/// Crank angle of every edge over the 720 degree cycle, 4 cylinder.
const TOOTH_ANGLES_4: [i16; 8] = [715, 105, 175, 285, 355, 465, 535, 645];
/// As above for the 6 cylinder.
const TOOTH_ANGLES_6: [i16; 12] = [715, 45, 115, 165, 235, 285, 355, 405, 475, 525, 595, 645];

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mitsubishi4G63;

impl Mitsubishi4G63 {
    fn tooth_angles(cylinders: u8) -> &'static [i16] {
        if cylinders == 6 {
            &TOOTH_ANGLES_6
        } else {
            &TOOTH_ANGLES_4
        }
    }

    fn tooth_angle(ctx: &DecoderContext, tooth: u16) -> Degrees {
        usize::from(tooth)
            .checked_sub(1)
            .and_then(|index| Self::tooth_angles(ctx.config.cylinders).get(index))
            .map_or(0, |&angle| Degrees::from(angle))
    }

    /// Sets the angle of the gap just measured and the filter for the next one.
    /// Odd edges close a 70 degree gap; even edges close the long one, 110
    /// degrees on four-window discs and 50 on six.
    pub(super) fn retune_filter(ctx: &mut DecoderContext, gap: u32, four: bool) {
        let short = ctx.tooth_current_count % 2 == 1;
        let long_angle = if four { 110 } else { 50 };
        let level = if ctx.rpm < LITE_FILTER_RPM {
            TriggerFilter::Lite
        } else {
            ctx.config.filter
        };

        let (angle, filter) = match (level, short, four) {
            (TriggerFilter::Lite, true, true) => (70, gap),
            (TriggerFilter::Lite, true, false) => (70, gap >> 2),
            (TriggerFilter::Lite, false, true) => (110, gap.wrapping_mul(3) >> 3),
            (TriggerFilter::Lite, false, false) => (50, gap >> 1),
            (TriggerFilter::Medium, true, true) => (70, gap.wrapping_mul(5) >> 2),
            (TriggerFilter::Medium, true, false) => (70, gap >> 1),
            (TriggerFilter::Medium, false, true) => (110, gap >> 1),
            (TriggerFilter::Medium, false, false) => (50, gap.wrapping_mul(3) >> 2),
            (TriggerFilter::Aggressive, true, true) => (70, gap.wrapping_mul(11) >> 3),
            (TriggerFilter::Aggressive, true, false) => (70, gap >> 1),
            (TriggerFilter::Aggressive, false, true) => (110, gap.wrapping_mul(9) >> 5),
            (TriggerFilter::Aggressive, false, false) => (50, gap),
            (TriggerFilter::Off, true, _) => (70, 0),
            (TriggerFilter::Off, false, _) => (long_angle, 0),
        };
        ctx.trigger_tooth_angle = angle;
        ctx.filter_time = filter;
    }

    /// Wasted-spark coil release at the crank edges nearest TDC while cranking.
    fn cranking_coil_release<H: ToothHooks>(ctx: &DecoderContext, hooks: &mut H) {
        let channels: &[usize] = match (ctx.config.cylinders, ctx.tooth_current_count) {
            (4, 1 | 5) => &[0, 2],
            (4, 3 | 7) => &[1, 3],
            (6, 1 | 7) => &[0],
            (6, 3 | 9) => &[1],
            (6, 5 | 11) => &[2],
            _ => &[],
        };
        for &channel in channels {
            hooks.end_coil_charge(channel);
        }
    }

    /// Works out the cycle position from the crank and cam levels before sync.
    fn level_sync(ctx: &mut DecoderContext, edge: Edge) {
        ctx.sec_filter_time = 0;
        let four = ctx.config.cylinders == 4;
        if edge.primary_high {
            ctx.revolution_one = edge.secondary_high;
        } else if ctx.revolution_one {
            // The crank window opened while the cam was high.
            if !edge.secondary_high {
                if four {
                    ctx.tooth_current_count = 1;
                }
            } else if four {
                ctx.tooth_current_count = 5;
            } else if ctx.config.cylinders == 6 {
                ctx.tooth_current_count = 2;
                ctx.declare_sync();
            }
        }
    }
}

impl Decoder for Mitsubishi4G63 {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        ctx.trigger_tooth_angle = 180;
        ctx.tooth_current_count = UNSYNCED_TOOTH_COUNT;
        ctx.is_sequential = true;
        ctx.fixed_cranking = true;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
        ctx.stall_time = MIN_STALL_TIME;
        ctx.tooth_last_tooth_time = now;
        ctx.trigger_actual_teeth = Self::tooth_angles(ctx.config.cylinders).len() as u16;
        ctx.filter_time = STARTUP_FILTER_TIME;
        // Two cam edges per cycle at maximum speed, halved for cam speed.
        ctx.sec_filter_time = 833;
        ctx.tooth_last_sec_tooth_time = 0;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time && ctx.start_revolutions != 0 {
            return;
        }
        ctx.valid_trigger = true;
        ctx.filter_time = ctx.cur_gap >> 2;
        ctx.shift_tooth_times(now);

        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        if ctx.tooth_current_count == 1 || ctx.tooth_current_count > ctx.trigger_actual_teeth {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }

        if !ctx.has_sync() {
            Self::level_sync(ctx, edge);
            return;
        }

        if ctx.cranking_coil_lock() && ctx.start_revolutions >= u16::from(ctx.config.stg_cycles) {
            Self::cranking_coil_release(ctx, hooks);
        }

        Self::retune_filter(ctx, ctx.cur_gap, ctx.config.cylinders == 4);

        // Per-tooth timing is only defined for the stock sensor position.
        if ctx.config.per_tooth_ign
            && ctx.config.trigger_angle == 0
            && ctx.config.cylinders == 4
            && ctx.advance > 0
        {
            let angle = ctx.ignition_limits(Self::tooth_angle(ctx, ctx.tooth_current_count));
            let cylinders = u16::from(ctx.config.cylinders);
            let tooth = if ctx.config.spark_mode != SparkMode::Sequential
                && ctx.tooth_current_count > cylinders
            {
                ctx.tooth_current_count - cylinders
            } else {
                ctx.tooth_current_count
            };
            ctx.check_per_tooth_timing(angle, tooth, hooks);
        }
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 < ctx.sec_filter_time {
            return;
        }
        ctx.tooth_last_sec_tooth_time = now;
        ctx.valid_trigger = true;
        ctx.sec_filter_time = ctx.cur_gap2 >> 1;

        let four = ctx.config.cylinders == 4;
        if !ctx.has_sync() {
            // Without this the engine can fail to resync after a stall.
            ctx.filter_time = STARTUP_FILTER_TIME;
            ctx.sec_filter_time >>= 1;
            let synced = if edge.primary_high {
                (four && ctx.tooth_current_count == 8)
                    || (ctx.config.cylinders == 6 && ctx.tooth_current_count == 7)
            } else {
                four && ctx.tooth_current_count == 5
            };
            if synced {
                ctx.declare_sync();
            }
        }

        let resync = ctx.rpm < ctx.config.crank_rpm || ctx.config.use_resync;
        if resync
            && ctx.has_sync()
            && four
            && edge.primary_high
            && ctx.tooth_current_count != 8
        {
            ctx.lose_sync();
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() {
            return 0;
        }
        if ctx.rpm >= ctx.config.crank_rpm {
            let rpm = ctx.std_rpm(true);
            ctx.stall_time = (ctx.revolution_time() << 1).max(MIN_STALL_TIME);
            return rpm;
        }

        // The edges are uneven, so cranking speed comes from the angle of the last gap.
        let rpm = ctx.tooth_angle_rpm();
        ctx.stall_time = MIN_STALL_TIME;
        rpm
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        if !ctx.has_sync() {
            return 0;
        }
        let angle = Self::tooth_angle(ctx, ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.interval_angle(now);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let sequential = ctx.config.spark_mode == SparkMode::Sequential;
        let teeth: [u16; 4] = match (ctx.config.cylinders, sequential) {
            (_, true) => [8, 2, 4, 6],
            (6, false) => [6, 2, 4, 2],
            _ => [4, 2, 4, 2],
        };
        ctx.ignition_end_teeth[..4].copy_from_slice(&teeth);
    }

    fn edges(&self, _ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(TriggerEdge::Both).with_secondary(TriggerEdge::Falling)
    }
}
