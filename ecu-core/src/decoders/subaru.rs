//! Subaru 6/7 (late 90s) crank and cam patterns.
//!
//! The 6/7 pattern has six irregular crank teeth and seven cam teeth in
//! groups of one, two and three; the number of cam teeth seen between two
//! crank teeth identifies the next crank tooth. The crank-only variant
//! finds tooth one from the shape of the last four crank gaps alone.

use crate::config::{SparkMode, TriggerEdge};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros, wrap_angle};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

fn table_angle(table: &[i16], tooth: u16) -> Degrees {
    usize::from(tooth)
        .checked_sub(1)
        .and_then(|index| table.get(index))
        .map_or(0, |&angle| Degrees::from(angle))
}

/// Crank tooth angles over the 720 degree cycle.
const SUBARU67_TOOTH_ANGLES: [i16; 12] = [710, 83, 115, 170, 263, 295, 350, 443, 475, 530, 623, 655];
const SUBARU67_TEETH: u16 = 12;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subaru67;

impl Subaru67 {
    /// Checks the tooth count against the cam group just seen. A mismatch
    /// drops sync and moves the count to where the group says it is.
    fn check_cam_group(ctx: &mut DecoderContext) {
        let expected: &[u16] = match ctx.secondary_tooth_count {
            0 => return,
            1 => &[5, 11],
            2 => &[8],
            3 => &[2],
            _ => {
                // Noise or a stop/start during cranking.
                ctx.lose_sync();
                ctx.tooth_angle_correct = false;
                ctx.secondary_tooth_count = 0;
                return;
            }
        };
        if expected.contains(&ctx.tooth_current_count) {
            ctx.declare_sync();
        } else {
            ctx.lose_sync();
            // A single cam tooth could be either 5 or 11; guess the first.
            ctx.tooth_current_count = expected[0];
        }
        ctx.secondary_tooth_count = 0;
    }
}

impl Decoder for Subaru67 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 360);
        ctx.sec_filter_time = 0;
        ctx.secondary_tooth_count = 0;
        ctx.is_sequential = true;
        ctx.has_secondary = true;
        ctx.tooth_current_count = 1;
        ctx.trigger_tooth_angle = 2;
        ctx.tooth_angle_correct = false;
        ctx.tooth_system_count = 0;
        // Largest gap is 93 degrees.
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * 93;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.tooth_system_count = ctx.tooth_system_count.saturating_add(1);
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);

        if ctx.tooth_current_count > SUBARU67_TEETH + 1 {
            ctx.tooth_current_count = 0;
            ctx.lose_sync();
        }

        Self::check_cam_group(ctx);
        if !ctx.has_sync() {
            return;
        }

        // Locked cranking timing, fixed at 10 degrees BTDC.
        if ctx.cranking_coil_lock() {
            let channels: &[usize] = match ctx.tooth_current_count {
                1 | 7 => &[0, 2],
                4 | 10 => &[1, 3],
                _ => &[],
            };
            for &channel in channels {
                hooks.end_coil_charge(channel);
            }
        }

        if ctx.tooth_current_count > SUBARU67_TEETH {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }

        ctx.trigger_tooth_angle = match ctx.tooth_current_count {
            1 => 55,
            2 => 93,
            tooth => {
                let gap = table_angle(&SUBARU67_TOOTH_ANGLES, tooth)
                    - table_angle(&SUBARU67_TOOTH_ANGLES, tooth.saturating_sub(1));
                gap.max(0) as u16
            }
        };
        ctx.tooth_angle_correct = true;

        if ctx.per_tooth_active() {
            let tooth_angle = table_angle(&SUBARU67_TOOTH_ANGLES, ctx.tooth_current_count);
            if ctx.config.spark_mode == SparkMode::Sequential {
                let angle = tooth_angle + Degrees::from(ctx.config.trigger_angle);
                ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
            } else {
                let angle = ctx.ignition_limits(tooth_angle);
                let tooth = if ctx.tooth_current_count > 6 {
                    ctx.tooth_current_count - 6
                } else {
                    ctx.tooth_current_count
                };
                ctx.check_per_tooth_timing(angle, tooth, hooks);
            }
        }
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        // Cam teeth only count straight after another cam tooth or three crank teeth after one.
        if ctx.tooth_system_count != 0 && ctx.tooth_system_count != 3 {
            if ctx.tooth_system_count > 3 {
                // More than three crank teeth between cam teeth is impossible.
                ctx.tooth_system_count = 0;
                ctx.lose_sync();
            }
            ctx.secondary_tooth_count = 0;
            return;
        }

        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 <= ctx.sec_filter_time {
            return;
        }
        ctx.tooth_last_sec_tooth_time = now;
        ctx.secondary_tooth_count = ctx.secondary_tooth_count.saturating_add(1);
        ctx.tooth_system_count = 0;
        // The filter can only be set from the second or third tooth of a group.
        ctx.sec_filter_time = if ctx.secondary_tooth_count > 1 {
            ctx.cur_gap2 >> 2
        } else {
            0
        };
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.start_revolutions == 0 {
            return 0;
        }
        ctx.std_rpm(true)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        if !ctx.has_sync() {
            return 0;
        }
        let angle = table_angle(&SUBARU67_TOOTH_ANGLES, ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.interval_angle(now);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let late = ctx.advance >= 10;
        if ctx.config.spark_mode == SparkMode::Sequential {
            let teeth = if late { [12, 3, 6, 9] } else { [1, 4, 7, 10] };
            ctx.ignition_end_teeth[..4].copy_from_slice(&teeth);
        } else {
            let teeth = if late { [6, 3] } else { [1, 4] };
            ctx.ignition_end_teeth[..2].copy_from_slice(&teeth);
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Falling)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        SUBARU67_TEETH
    }
}

const SUBARU7_TOOTH_ANGLES: [i16; 7] = [350, 5, 83, 115, 170, 263, 295];
const SUBARU7_TEETH: u16 = 7;
/// Gaps longer than this are a stopped engine, not a tooth.
const SUBARU7_MAX_GAP: u32 = 1_000_000;

/// Subaru 7 tooth crank without cam. Keeps the three gaps before the
/// current one to recognise the short gap ahead of the 5 degree tooth.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subaru7CrankOnly {
    last_gap: u32,
    target_gap: u32,
    target_gap2: u32,
}

impl Subaru7CrankOnly {
    /// The current gap is the short 15 degree gap after the 55 degree one.
    const fn is_short_gap(&self, gap: u32) -> bool {
        gap * 20 < self.target_gap * 17
            && gap * 40 < self.target_gap2 * 10
            && gap * 30 < self.last_gap * 14
            && self.last_gap * 10 > self.target_gap * 11
    }
}

impl Decoder for Subaru7CrankOnly {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 1_500 * 360);
        ctx.sec_filter_time = 0;
        ctx.secondary_tooth_count = 0;
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.tooth_current_count = 1;
        ctx.trigger_tooth_angle = 2;
        ctx.tooth_angle_correct = false;
        // Largest gap is 93 degrees, at 100rpm.
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 100) * 93;
        ctx.cur_gap = 0;
        ctx.tooth_last_tooth_time = now;
        *self = Self::default();
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        if (now.wrapping_sub(ctx.tooth_last_tooth_time) as i32) < 0 {
            // Out of order.
            return;
        }
        let gap = now - ctx.tooth_last_tooth_time;
        if gap < ctx.filter_time || gap > SUBARU7_MAX_GAP {
            return;
        }
        self.target_gap2 = self.target_gap;
        self.target_gap = self.last_gap;
        self.last_gap = ctx.cur_gap;
        ctx.cur_gap = gap;

        if self.is_short_gap(gap) {
            if ctx.tooth_current_count != 1 {
                ctx.lose_sync();
                ctx.tooth_current_count = 1;
                ctx.tooth_system_count = 1;
            }
            ctx.revolution_one = true;
        }
        if ctx.tooth_current_count > 2 && !ctx.revolution_one {
            // Tooth one was missed.
            ctx.clear_sync();
        }

        ctx.tooth_current_count += 1;
        ctx.tooth_system_count = ctx.tooth_system_count.saturating_add(1);
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);

        if ctx.tooth_current_count > SUBARU7_TEETH {
            ctx.tooth_current_count = 1;
            ctx.tooth_system_count = 1;
            ctx.shift_tooth_one(now);
            ctx.revolution_one = false;
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }

        if ctx.tooth_current_count == SUBARU7_TEETH && ctx.revolution_one {
            ctx.declare_sync();
        }

        // Locked cranking timing, fixed at 10 degrees BTDC.
        if ctx.has_sync() && ctx.cranking_coil_lock() {
            let channels: &[usize] = match ctx.tooth_current_count {
                1 => &[0, 2],
                5 => &[1, 3],
                _ => &[],
            };
            for &channel in channels {
                hooks.end_coil_charge(channel);
            }
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.start_revolutions == 0 {
            return 0;
        }
        ctx.std_rpm(false)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        if !ctx.has_sync() {
            return 0;
        }
        let angle = table_angle(&SUBARU7_TOOTH_ANGLES, ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        // Crank-only, so there is no second revolution to report.
        wrap_angle(angle, 360)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        SUBARU7_TEETH
    }
}
