//! Chrysler crank and cam patterns: the DSM 420a and the NGC family.

use crate::config::{SparkMode, TriggerEdge, TriggerSpeed};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros, nudge};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, IGN_CHANNELS, MissingTooth, ToothHooks};

/// Four short pulses before each TDC on a 720 degree cycle.
const TOOTH_ANGLES_420A: [i16; 16] = [
    711, 111, 131, 151, 171, 291, 311, 331, 351, 471, 491, 511, 531, 651, 671, 691,
];
const TEETH_420A: u16 = 16;

/// DSM 420a. The cam falling edge lands with the crank input high before
/// tooth 13 and low before tooth 5.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Chrysler420a;

impl Chrysler420a {
    fn tooth_angle(tooth: u16) -> Degrees {
        usize::from(tooth)
            .checked_sub(1)
            .and_then(|index| TOOTH_ANGLES_420A.get(index))
            .map_or(0, |&angle| Degrees::from(angle))
    }
}

impl Decoder for Chrysler420a {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 360);
        ctx.sec_filter_time = 0;
        ctx.secondary_tooth_count = 0;
        ctx.is_sequential = true;
        ctx.has_secondary = true;
        ctx.tooth_current_count = 1;
        // Only right for the short pulses.
        ctx.trigger_tooth_angle = 20;
        ctx.tooth_angle_correct = false;
        ctx.tooth_system_count = 0;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * 93;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        if ctx.tooth_current_count > TEETH_420A && ctx.has_sync() {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }
        ctx.filter_time = 0;
        ctx.tooth_angle_correct = false;
        ctx.shift_tooth_times(now);

        if ctx.config.per_tooth_ign {
            let angle = Self::tooth_angle(ctx.tooth_current_count) + Degrees::from(ctx.config.trigger_angle);
            let angle = ctx.ignition_limits(angle);
            ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
        }
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let expected = if edge.primary_high { 13 } else { 5 };
        if !ctx.has_sync() {
            ctx.tooth_current_count = expected;
            ctx.declare_sync();
        } else if ctx.tooth_current_count != expected {
            // The count is corrected without dropping sync.
            ctx.record_resync();
            warn!("420a cam edge at tooth {}, expected {}", ctx.tooth_current_count, expected);
            ctx.tooth_current_count = expected;
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(true)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let angle = Self::tooth_angle(ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let teeth = if ctx.advance < 9 { [1, 5, 9, 13] } else { [16, 4, 8, 12] };
        ctx.ignition_end_teeth[..4].copy_from_slice(&teeth);
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Falling)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        TEETH_420A
    }
}

const NGC_TEETH: u16 = 36;
const NGC_TOOTH_ANGLE: u16 = 10;
/// Teeth where a missing tooth is due: the first tooth after each gap, counted without the gap.
const NGC_GAP_CHECK_TEETH: [u16; 2] = [17, 35];
/// Cam teeth per group, padded at both ends with the neighbouring group.
const NGC6_CAM_GROUPS: [u16; 8] = [1, 3, 1, 2, 3, 2, 1, 3];
const NGC8_CAM_GROUPS: [u16; 10] = [3, 1, 1, 2, 3, 2, 2, 1, 3, 1];

/// Chrysler NGC 36-2-2 crank with a cam wheel per cylinder count.
///
/// The two crank gaps are told apart by polarity: one is a long high, the
/// other a long low. Four cylinder cams carry their own missing teeth; six
/// and eight cylinder cams are identified by groups of one to three teeth.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChryslerNgc {
    previous_group_teeth: u16,
}

impl ChryslerNgc {
    fn cam_groups(cylinders: u8) -> &'static [u16] {
        match cylinders {
            6 => &NGC6_CAM_GROUPS,
            8 => &NGC8_CAM_GROUPS,
            _ => &[],
        }
    }

    /// Cam group whose tooth count follows the one before it.
    fn find_group(cylinders: u8, teeth: u16, previous: u16) -> u16 {
        let groups = Self::cam_groups(cylinders);
        (1..=u16::from(cylinders))
            .find(|&group| {
                let group = usize::from(group);
                groups.get(group) == Some(&teeth) && groups.get(group - 1) == Some(&previous)
            })
            .unwrap_or(0)
    }

    /// Which revolution the crank gap at `tooth` falls in, from cam state.
    /// `None` when the cam does not agree with either.
    fn revolution_from_cam(cylinders: u8, tooth: u16, cam_teeth: u16, cam_group: u16) -> Option<bool> {
        match (cylinders, tooth) {
            (4, 1) => match cam_teeth {
                1 | 2 => Some(false),
                5 => Some(true),
                _ => None,
            },
            (4, 19) => match cam_teeth {
                4 => Some(false),
                7 => Some(true),
                _ => None,
            },
            (6, 1) => match cam_group {
                1 | 2 => Some(false),
                4 | 5 => Some(true),
                _ => None,
            },
            (6, 19) => match cam_group {
                2 | 3 => Some(false),
                5 | 6 => Some(true),
                _ => None,
            },
            (8, 1) => match cam_group {
                1 | 2 => Some(false),
                5 | 6 => Some(true),
                _ => None,
            },
            (8, 19) => match cam_group {
                3 | 4 => Some(false),
                7 | 8 => Some(true),
                _ => None,
            },
            _ => None,
        }
    }

    /// The long part of the last pulse was high. `rising` is the rising
    /// edge between the last falling edge `last` and `now`.
    const fn long_high(last: Micros, rising: Micros, now: Micros) -> bool {
        rising.wrapping_sub(last) < now.wrapping_sub(rising)
    }

    fn end_tooth(ctx: &DecoderContext, end_angle: Degrees, tooth_adder: u16) -> u16 {
        let tooth = (end_angle - Degrees::from(ctx.config.trigger_angle)) / Degrees::from(NGC_TOOTH_ANGLE);
        let range = Degrees::from(NGC_TEETH + tooth_adder);
        let tooth = nudge(1, range, tooth - 1, range).max(0) as u16;
        // Missing teeth move to the tooth before.
        match tooth {
            17 | 18 => 16,
            35 | 36 => 34,
            53 | 54 => 52,
            71..=u16::MAX => 70,
            _ => tooth,
        }
    }

    fn on_missing_tooth(ctx: &mut DecoderContext, now: Micros) {
        ctx.filter_time = 0;
        ctx.tooth_angle_correct = false;

        if Self::long_high(ctx.tooth_last_tooth_time, ctx.tooth_last_tooth_rising_time, now) {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = if ctx.has_sync() {
                ctx.start_revolutions.wrapping_add(1)
            } else {
                0
            };
        } else {
            ctx.tooth_current_count = 19;
        }

        if !ctx.config.is_sequential() {
            ctx.declare_sync();
            return;
        }
        let revolution = Self::revolution_from_cam(
            ctx.config.cylinders,
            ctx.tooth_current_count,
            ctx.secondary_tooth_count,
            ctx.tooth_system_count,
        );
        match revolution {
            Some(revolution_one) => {
                ctx.revolution_one = revolution_one;
                ctx.declare_sync();
            }
            None => {
                if ctx.has_sync() {
                    ctx.lose_sync();
                }
                ctx.declare_half_sync();
            }
        }
    }

    /// Four cylinder cam: 36 degree teeth with a long high and a long low.
    fn four_cylinder_cam(ctx: &mut DecoderContext, edge: Edge) {
        let now = edge.time;
        if edge.secondary_high {
            ctx.tooth_last_sec_tooth_rising_time = now;
            return;
        }
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 <= ctx.sec_filter_time {
            return;
        }

        if ctx.tooth_last_sec_tooth_time > 0 && ctx.tooth_last_minus_one_sec_tooth_time > 0 {
            if ctx.secondary_tooth_count > 0 {
                ctx.secondary_tooth_count += 1;
            }
            let last_gap = ctx
                .tooth_last_sec_tooth_time
                .wrapping_sub(ctx.tooth_last_minus_one_sec_tooth_time);
            if ctx.cur_gap2 >= last_gap.wrapping_mul(3) >> 1 {
                let long_high =
                    Self::long_high(ctx.tooth_last_sec_tooth_time, ctx.tooth_last_sec_tooth_rising_time, now);
                // Any other count means a tooth was missed or added; start over.
                ctx.secondary_tooth_count = match (long_high, ctx.secondary_tooth_count) {
                    (true, 0 | 8) => 1,
                    (false, 0 | 5) => 5,
                    _ => 0,
                };
                ctx.sec_filter_time = 0;
            } else if ctx.secondary_tooth_count > 0 {
                ctx.sec_filter_time = ctx.cur_gap2 >> 2;
            }
        }

        ctx.tooth_last_minus_one_sec_tooth_time = ctx.tooth_last_sec_tooth_time;
        ctx.tooth_last_sec_tooth_time = now;
    }

    /// Six and eight cylinder cams: groups of teeth. The crank tooth gap is
    /// the reference since a group can be a single tooth.
    fn grouped_cam(&mut self, ctx: &mut DecoderContext, edge: Edge) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 <= ctx.sec_filter_time {
            return;
        }

        if ctx.tooth_last_sec_tooth_time > 0
            && ctx.tooth_last_tooth_time > 0
            && ctx.tooth_last_minus_one_tooth_time > 0
        {
            let crank_gap = ctx
                .tooth_last_tooth_time
                .wrapping_sub(ctx.tooth_last_minus_one_tooth_time);
            // One cam tooth spans about 2.1 crank teeth.
            if ctx.cur_gap2 >= crank_gap.wrapping_mul(3) {
                let teeth = ctx.secondary_tooth_count;
                if teeth > 0 && self.previous_group_teeth > 0 {
                    let cylinders = ctx.config.cylinders;
                    let next = usize::from(ctx.tooth_system_count) + 1;
                    if ctx.tooth_system_count > 0 && Self::cam_groups(cylinders).get(next) == Some(&teeth) {
                        ctx.tooth_system_count += 1;
                        if ctx.tooth_system_count > u16::from(cylinders) {
                            ctx.tooth_system_count = 1;
                        }
                    } else {
                        ctx.tooth_system_count = Self::find_group(cylinders, teeth, self.previous_group_teeth);
                    }
                }
                self.previous_group_teeth = teeth;
                ctx.secondary_tooth_count = 1;
                ctx.sec_filter_time = 0;
            } else if ctx.secondary_tooth_count > 0 {
                ctx.secondary_tooth_count += 1;
                ctx.sec_filter_time = ctx.cur_gap2 >> 2;
            }
        }

        ctx.tooth_last_sec_tooth_time = now;
    }
}

impl Decoder for ChryslerNgc {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.is_sequential = true;
        ctx.has_secondary = true;
        ctx.trigger_tooth_angle = NGC_TOOTH_ANGLE;
        ctx.trigger_actual_teeth = NGC_TEETH - 4;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60) / u32::from(360 / NGC_TOOTH_ANGLE);
        ctx.tooth_current_count = 0;
        ctx.tooth_one_time = 0;
        ctx.tooth_one_minus_one_time = 0;
        ctx.tooth_last_minus_one_tooth_time = 0;
        ctx.tooth_last_tooth_rising_time = 0;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(NGC_TOOTH_ANGLE) * 2;

        // Closest cam edges are 36 degrees apart on four cylinders and 21 otherwise, at half speed.
        let closest_cam_edges = if ctx.config.cylinders == 4 { 36 } else { 21 };
        ctx.sec_filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60) / (360 / closest_cam_edges) * 2;
        ctx.secondary_tooth_count = 0;
        ctx.tooth_system_count = 0;
        ctx.tooth_last_sec_tooth_rising_time = 0;
        ctx.tooth_last_sec_tooth_time = 0;
        ctx.tooth_last_minus_one_sec_tooth_time = 0;
        self.previous_group_teeth = 0;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        // Rising edges only mark the polarity of the gaps.
        if edge.primary_high {
            ctx.tooth_last_tooth_rising_time = now;
            return;
        }

        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        let last_gap = ctx
            .tooth_last_tooth_time
            .wrapping_sub(ctx.tooth_last_minus_one_tooth_time);
        let mut missing_tooth = false;
        if ctx.tooth_last_tooth_time > 0 && ctx.tooth_last_minus_one_tooth_time > 0 {
            let gap_due = NGC_GAP_CHECK_TEETH.contains(&ctx.tooth_current_count) || !ctx.has_any_sync();
            if gap_due {
                if ctx.cur_gap > last_gap.wrapping_mul(2) {
                    missing_tooth = true;
                    Self::on_missing_tooth(ctx, now);
                } else if ctx.has_sync() {
                    ctx.lose_sync();
                } else {
                    ctx.clear_sync();
                }
            }
            if !missing_tooth {
                ctx.set_filter(ctx.cur_gap);
                ctx.tooth_angle_correct = true;
            }
        }

        // Across a gap, keep the regular tooth length.
        ctx.tooth_last_minus_one_tooth_time = if missing_tooth {
            now.wrapping_sub(last_gap)
        } else {
            ctx.tooth_last_tooth_time
        };
        ctx.tooth_last_tooth_time = now;

        if ctx.per_tooth_active() {
            let config = ctx.config;
            let angle = (Degrees::from(ctx.tooth_current_count) - 1) * Degrees::from(NGC_TOOTH_ANGLE)
                + Degrees::from(config.trigger_angle);
            let angle = ctx.ignition_limits(angle);
            if config.spark_mode == SparkMode::Sequential && ctx.revolution_one && config.speed == TriggerSpeed::Crank
            {
                ctx.check_per_tooth_timing(angle + 360, NGC_TEETH + ctx.tooth_current_count, hooks);
            } else {
                ctx.check_per_tooth_timing(angle, ctx.tooth_current_count, hooks);
            }
        }
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        // The cam only matters for sequential operation.
        if !ctx.config.is_sequential() {
            return;
        }
        if ctx.config.cylinders == 4 {
            Self::four_cylinder_cam(ctx, edge);
        } else {
            self.grouped_cam(ctx, edge);
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.rpm >= ctx.config.crank_rpm {
            ctx.std_rpm(false)
        } else if ctx.tooth_angle_correct {
            ctx.cranking_rpm(NGC_TEETH, false)
        } else {
            ctx.rpm
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        MissingTooth.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let tooth_adder =
            if ctx.config.spark_mode == SparkMode::Sequential && ctx.config.speed == TriggerSpeed::Crank {
                NGC_TEETH
            } else {
                0
            };
        for channel in 0..IGN_CHANNELS {
            ctx.ignition_end_teeth[channel] = Self::end_tooth(ctx, ctx.ignition_end_angles[channel], tooth_adder);
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        let secondary = if ctx.config.cylinders == 4 {
            TriggerEdge::Both
        } else {
            TriggerEdge::Falling
        };
        EdgeSelection::primary(TriggerEdge::Both).with_secondary(secondary)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        NGC_TEETH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    fn rig_420a() -> Rig<Chrysler420a> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Chrysler420a)
            .with_sequential_fuel(true);
        Rig::new(Chrysler420a, config)
    }

    #[test]
    fn cam_edge_with_crank_low_is_tooth_five() {
        let mut rig = rig_420a();
        rig.primary(2_000);
        rig.primary(2_000);
        rig.secondary_edge(500, Edge::at(0).with_levels(false, false, false));
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 5);
        assert_eq!(rig.angle(), 171);
        rig.primary(12_000);
        assert_eq!(rig.angle(), 291);

        for _ in 0..10 {
            rig.primary(2_000);
        }
        assert_eq!(rig.ctx.tooth_current_count, 16);
        rig.primary(2_000);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        assert_eq!(rig.angle(), 711);
    }

    #[test]
    fn cam_edge_at_wrong_tooth_corrects_count() {
        let mut rig = rig_420a();
        rig.secondary_edge(500, Edge::at(0).with_levels(true, false, false));
        assert_eq!(rig.ctx.tooth_current_count, 13);
        rig.primary(2_000);
        rig.secondary_edge(500, Edge::at(0).with_levels(true, false, false));
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 13);
        assert_eq!(rig.ctx.sync_loss_counter, 1);
    }

    #[test]
    fn end_teeth_move_one_pulse_earlier_with_advance() {
        let mut rig = rig_420a();
        rig.ctx.advance = 15;
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(&rig.ctx.ignition_end_teeth[..4], &[16, 4, 8, 12]);
    }

    fn rig_ngc(cylinders: u8, sequential: bool) -> Rig<ChryslerNgc> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::ChryslerNgc)
            .with_cylinders(cylinders)
            .with_sequential_fuel(sequential);
        Rig::new(ChryslerNgc::default(), config)
    }

    /// One crank pulse: low for `low`, then high for `high`, counted on the falling edge.
    fn crank_pulse(rig: &mut Rig<ChryslerNgc>, low: u32, high: u32) {
        rig.primary_edge(low, Edge::at(0).with_levels(true, false, false));
        rig.primary_edge(high, Edge::at(0).with_levels(false, false, false));
    }

    fn crank_teeth(rig: &mut Rig<ChryslerNgc>, count: usize) {
        for _ in 0..count {
            crank_pulse(rig, 500, 500);
        }
    }

    fn cam_pulse(rig: &mut Rig<ChryslerNgc>, low: u32, high: u32) {
        rig.secondary_edge(low, Edge::at(0).with_levels(false, true, false));
        rig.secondary_edge(high, Edge::at(0).with_levels(false, false, false));
    }

    #[test]
    fn gap_polarity_picks_tooth_one_or_nineteen() {
        let mut rig = rig_ngc(4, false);
        crank_teeth(&mut rig, 4);
        // Long high.
        crank_pulse(&mut rig, 500, 2_500);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert!(!rig.ctx.tooth_angle_correct);

        crank_teeth(&mut rig, 15);
        assert_eq!(rig.ctx.tooth_current_count, 16);
        // Long low.
        crank_pulse(&mut rig, 2_500, 500);
        assert_eq!(rig.ctx.tooth_current_count, 19);
        assert_eq!(rig.angle(), 180);

        crank_teeth(&mut rig, 15);
        crank_pulse(&mut rig, 500, 2_500);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        assert_eq!(rig.ctx.sync_loss_counter, 0);
    }

    #[test]
    fn missing_gap_where_due_loses_sync() {
        let mut rig = rig_ngc(4, false);
        crank_teeth(&mut rig, 4);
        crank_pulse(&mut rig, 500, 2_500);
        crank_teeth(&mut rig, 16);
        assert!(!rig.ctx.has_sync());
        assert_eq!(rig.ctx.sync_loss_counter, 1);
    }

    #[test]
    fn gap_keeps_regular_tooth_length() {
        let mut rig = rig_ngc(4, false);
        crank_teeth(&mut rig, 4);
        crank_pulse(&mut rig, 500, 2_500);
        let gap = rig.ctx.tooth_last_tooth_time - rig.ctx.tooth_last_minus_one_tooth_time;
        assert_eq!(gap, 1_000);
    }

    #[test]
    fn sequential_without_cam_is_half_sync() {
        let mut rig = rig_ngc(4, true);
        crank_teeth(&mut rig, 4);
        crank_pulse(&mut rig, 500, 2_500);
        assert!(rig.ctx.is_half_sync());
        assert_eq!(rig.ctx.sync_loss_counter, 0);
    }

    #[test]
    fn four_cylinder_cam_long_high_then_crank_gap_syncs() {
        let mut rig = rig_ngc(4, true);
        for _ in 0..3 {
            cam_pulse(&mut rig, 2_000, 2_000);
        }
        cam_pulse(&mut rig, 2_000, 6_000);
        assert_eq!(rig.ctx.secondary_tooth_count, 1);
        cam_pulse(&mut rig, 2_000, 2_000);
        assert_eq!(rig.ctx.secondary_tooth_count, 2);
        assert_eq!(rig.ctx.sec_filter_time, 1_000);

        crank_teeth(&mut rig, 4);
        crank_pulse(&mut rig, 500, 2_500);
        assert!(rig.ctx.has_sync());
        assert!(!rig.ctx.revolution_one);
    }

    #[test]
    fn cam_group_sequence_identifies_group() {
        assert_eq!(ChryslerNgc::find_group(6, 1, 3), 2);
        assert_eq!(ChryslerNgc::find_group(6, 2, 1), 3);
        assert_eq!(ChryslerNgc::find_group(8, 1, 3), 1);
        assert_eq!(ChryslerNgc::find_group(8, 2, 2), 6);
        assert_eq!(ChryslerNgc::find_group(6, 3, 3), 0);
    }

    #[test]
    fn six_cylinder_cam_groups_track_position() {
        let mut rig = rig_ngc(6, true);
        // Crank reference gap of 1000us.
        crank_teeth(&mut rig, 3);
        rig.secondary(5_000);
        // Group of three.
        rig.secondary(5_000);
        rig.secondary(1_000);
        rig.secondary(1_000);
        assert_eq!(rig.ctx.secondary_tooth_count, 3);
        // Group of one.
        rig.secondary(5_000);
        rig.secondary(5_000);
        assert_eq!(rig.ctx.tooth_system_count, 2);
        // Group of two.
        rig.secondary(1_000);
        rig.secondary(5_000);
        assert_eq!(rig.ctx.tooth_system_count, 3);
    }

    #[test]
    fn end_teeth_skip_missing_teeth() {
        let mut rig = rig_ngc(4, false);
        rig.ctx.ignition_end_angles[..4].copy_from_slice(&[180, 360, 90, 0]);
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(&rig.ctx.ignition_end_teeth[..4], &[16, 34, 8, 34]);
    }
}
