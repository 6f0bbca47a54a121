//! Rover MEMS flywheels: 36 tooth positions with four or two missing teeth
//! in one of five layouts.
//!
//! Every tooth shifts a history word left, one bit for a regular tooth and
//! two bits (a zero then a one) for a tooth after a gap. Once a revolution
//! has been counted the history is compared against the known layouts;
//! the match identifies both the layout and tooth one.

use crate::config::{SecondaryPattern, SparkMode, TriggerSpeed};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros};

use super::{Decoder, DecoderContext, DualWheel, Edge, EdgeSelection, MissingTooth, ToothHooks};

const POSITIONS: u16 = 36;
/// Half the flywheel, for patterns repeated every 180 degrees.
const HALF_POSITIONS: u16 = 18;
const CHANNELS: usize = 4;

/// One flywheel layout: the tooth history seen at tooth one and the teeth
/// that directly follow a gap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct Layout {
    id: u8,
    history: u32,
    after_gap: [u16; 4],
    missing_teeth: u8,
}

const LAYOUTS: [Layout; 5] = [
    // 9-7-10-6
    Layout { id: 5, history: 0b1111_1101_1111_1101_1111_1111_1011_1111, after_gap: [1, 11, 19, 30], missing_teeth: 4 },
    // 3-14-2-13
    Layout { id: 4, history: 0b1101_1101_1111_1111_1111_1011_0111_1111, after_gap: [8, 11, 25, 27], missing_teeth: 4 },
    // 2-14-3-13
    Layout { id: 3, history: 0b1101_1011_1111_1111_1111_0111_0111_1111, after_gap: [8, 10, 24, 27], missing_teeth: 4 },
    // 11-5-12-4
    Layout { id: 2, history: 0b1111_1101_1111_0111_1111_1111_1011_1101, after_gap: [1, 12, 17, 29], missing_teeth: 4 },
    // 17-17
    Layout { id: 1, history: 0b1111_1111_1111_0111_1111_1111_1111_1101, after_gap: [1, 18, 0, 0], missing_teeth: 2 },
];

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoverMems {
    teeth_seen: u32,
    layout: Option<Layout>,
    /// Shortest cam gap that counts as a missing cam tooth.
    cam_target_gap: u32,
}

impl RoverMems {
    fn after_gap(&self) -> [u16; 4] {
        self.layout.map_or([0; 4], |layout| layout.after_gap)
    }

    fn match_layout(&mut self, ctx: &mut DecoderContext) -> bool {
        let Some(layout) = LAYOUTS.iter().find(|layout| layout.history == self.teeth_seen) else {
            return false;
        };
        if self.layout.map(|known| known.id) != Some(layout.id) {
            info!("rover flywheel layout {}", layout.id);
            self.layout = Some(*layout);
            ctx.config.missing_teeth = layout.missing_teeth;
        }
        true
    }

    fn tooth_one(ctx: &mut DecoderContext, now: Micros) {
        // Layouts that repeat each half turn match at tooth 18 as well.
        if ctx.tooth_current_count > HALF_POSITIONS {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.revolution_one = !ctx.revolution_one;
        }

        let config = ctx.config;
        if config.is_sequential() {
            if ctx.secondary_tooth_count > 0 || config.is_cam_speed() {
                ctx.declare_sync();
                if config.secondary == SecondaryPattern::Single {
                    ctx.secondary_tooth_count = 0;
                }
            } else if !ctx.has_sync() {
                ctx.declare_half_sync();
            }
        } else {
            ctx.declare_half_sync();
        }
        ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
    }

    fn end_tooth(ctx: &DecoderContext, end_angle: Degrees, tooth_adder: u16, after_gap: [u16; 4]) -> u16 {
        let range = Degrees::from(POSITIONS + tooth_adder);
        let mut tooth =
            (end_angle - Degrees::from(ctx.config.trigger_angle)) / Degrees::from(ctx.trigger_tooth_angle) - 1;
        if tooth > range {
            tooth -= range;
        }
        if tooth <= 0 {
            tooth += range;
        }
        let mut tooth = tooth.min(range) as u16;

        // A tooth straight after a gap does not exist; use the one before it.
        let checked = if ctx.config.spark_mode == SparkMode::Sequential { 4 } else { 2 };
        let missing = after_gap[..checked]
            .iter()
            .filter(|&&after| after != 0)
            .any(|&after| tooth == after || tooth == POSITIONS + after);
        if missing {
            tooth -= 1;
            if tooth == 0 {
                tooth = POSITIONS + tooth_adder;
            }
        }
        tooth
    }
}

impl Decoder for RoverMems {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        *self = Self::default();
        ctx.config = ctx.config.with_teeth(POSITIONS, ctx.config.missing_teeth);
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * u32::from(POSITIONS));
        ctx.sec_filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60);
        ctx.trigger_tooth_angle = 360 / POSITIONS;
        // Fixed before the layout is known so the first turn can be identified.
        ctx.trigger_actual_teeth = POSITIONS;
        ctx.tooth_last_minus_one_tooth_time = 0;
        ctx.tooth_current_count = 0;
        ctx.secondary_tooth_count = 0;
        ctx.tooth_one_time = 0;
        ctx.tooth_one_minus_one_time = 0;
        ctx.revolution_one = false;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle) * 2;
        ctx.is_sequential = false;
        ctx.has_secondary = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.valid_trigger = true;

        if ctx.tooth_last_tooth_time > 0 && ctx.tooth_last_minus_one_tooth_time > 0 {
            let last_gap = ctx
                .tooth_last_tooth_time
                .wrapping_sub(ctx.tooth_last_minus_one_tooth_time);
            let target_gap = last_gap.wrapping_mul(3) >> 1;
            if ctx.cur_gap > target_gap {
                // The gap and the tooth after it; the filter would be wrong here.
                self.teeth_seen = (self.teeth_seen << 2) | 1;
                ctx.tooth_current_count += 2;
            } else {
                self.teeth_seen = (self.teeth_seen << 1) | 1;
                ctx.tooth_current_count += 1;
                ctx.set_filter(ctx.cur_gap);
            }

            if ctx.tooth_current_count >= ctx.trigger_actual_teeth {
                if self.match_layout(ctx) {
                    Self::tooth_one(ctx, now);
                } else if ctx.tooth_current_count > ctx.trigger_actual_teeth + 1 && ctx.has_any_sync() {
                    // A full turn without a known layout.
                    ctx.lose_sync();
                }
            }
        }

        ctx.shift_tooth_times(now);
        DualWheel::per_tooth_timing(ctx, hooks);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.tooth_last_sec_tooth_time == 0 {
            self.cam_target_gap = ctx.cur_gap.wrapping_mul(2);
            ctx.cur_gap2 = 0;
            ctx.tooth_last_sec_tooth_time = now;
        }
        if ctx.cur_gap2 < ctx.sec_filter_time {
            return;
        }
        ctx.secondary_tooth_count = ctx.secondary_tooth_count.saturating_add(1);
        ctx.tooth_last_sec_tooth_time = now;

        let pattern = ctx.config.secondary;
        if ctx.config.vvt.enabled
            && (pattern == SecondaryPattern::Single
                || (pattern == SecondaryPattern::FiveThreeTwo && ctx.secondary_tooth_count == 6))
        {
            // Whole degrees, unfiltered.
            let crank_angle = self.crank_angle(ctx, now);
            ctx.vvt1_angle = ctx.vvt_offset(crank_angle, ctx.config.vvt.cl_min_angle) as i16;
        }

        match pattern {
            SecondaryPattern::Single => {
                ctx.revolution_one = true;
                ctx.sec_filter_time = ctx.cur_gap2 >> 1;
            }
            SecondaryPattern::FiveThreeTwo if ctx.cur_gap2 < self.cam_target_gap => {
                ctx.sec_filter_time = ctx.cur_gap2 >> 1;
                self.cam_target_gap = ctx.cur_gap2.wrapping_mul(3) >> 1;
            }
            SecondaryPattern::FiveThreeTwo => {
                // First cam tooth after a gap; the group before it places the crank.
                match ctx.secondary_tooth_count {
                    6 => {
                        ctx.revolution_one = false;
                        if ctx.tooth_current_count <= HALF_POSITIONS {
                            ctx.tooth_current_count += HALF_POSITIONS;
                        }
                    }
                    4 => {
                        ctx.revolution_one = true;
                        if ctx.tooth_current_count >= HALF_POSITIONS {
                            ctx.tooth_current_count -= HALF_POSITIONS;
                        }
                    }
                    3 => {
                        ctx.revolution_one = true;
                        if ctx.tooth_current_count <= HALF_POSITIONS {
                            ctx.tooth_current_count += HALF_POSITIONS;
                        }
                    }
                    _ => {}
                }
                ctx.secondary_tooth_count = 1;
            }
            _ => {}
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.rpm < ctx.config.crank_rpm {
            if self.after_gap().contains(&ctx.tooth_current_count) {
                // The gap before this tooth would read as a slow tooth.
                ctx.rpm
            } else {
                ctx.cranking_rpm(POSITIONS, false)
            }
        } else {
            ctx.std_rpm(false)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        MissingTooth.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let tooth_adder = if ctx.config.spark_mode == SparkMode::Sequential && ctx.config.speed == TriggerSpeed::Crank {
            POSITIONS
        } else {
            0
        };
        let after_gap = self.after_gap();
        for channel in 0..CHANNELS {
            ctx.ignition_end_teeth[channel] =
                Self::end_tooth(ctx, ctx.ignition_end_angles[channel], tooth_adder, after_gap);
        }
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    const GAP: u32 = 1_000;

    fn rig(config: TriggerConfig) -> Rig<RoverMems> {
        Rig::new(RoverMems::default(), config.with_pattern(DecoderKind::RoverMems))
    }

    /// Seventeen teeth: sixteen regular ones then the tooth after the gap.
    fn half_turn(rig: &mut Rig<RoverMems>) {
        for _ in 0..16 {
            rig.primary(GAP);
        }
        rig.primary(2 * GAP);
    }

    fn prime(rig: &mut Rig<RoverMems>) {
        rig.primary(GAP);
        rig.primary(GAP);
    }

    #[test]
    fn seventeen_seventeen_layout_is_found_after_a_turn() {
        let mut rig = rig(TriggerConfig::new());
        prime(&mut rig);
        half_turn(&mut rig);
        assert_eq!(rig.ctx.tooth_current_count, 18);
        assert!(rig.decoder.layout.is_none());
        half_turn(&mut rig);

        let layout = rig.decoder.layout.map(|layout| layout.id);
        assert_eq!(layout, Some(1));
        assert_eq!(rig.ctx.config.missing_teeth, 2);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        // Batch outputs only need the crank position.
        assert!(rig.ctx.is_half_sync());
    }

    #[test]
    fn sequential_needs_the_cam_for_full_sync() {
        let config = TriggerConfig::new()
            .with_sequential_fuel(true)
            .with_secondary(SecondaryPattern::Single);
        let mut rig = rig(config);
        prime(&mut rig);
        rig.secondary(0);
        half_turn(&mut rig);
        rig.secondary(0);
        assert_eq!(rig.ctx.secondary_tooth_count, 1);
        half_turn(&mut rig);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.secondary_tooth_count, 0);
    }

    #[test]
    fn cam_edge_records_whole_degree_vvt_angle() {
        let mut vvt = TriggerConfig::new().vvt;
        vvt.enabled = true;
        vvt.angle_filter = 200;
        let config = TriggerConfig::new()
            .with_secondary(SecondaryPattern::Single)
            .with_trigger_angle(10)
            .with_vvt(vvt);
        let mut rig = rig(config);
        prime(&mut rig);
        rig.secondary(0);
        half_turn(&mut rig);
        half_turn(&mut rig);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        for _ in 0..5 {
            rig.primary(GAP);
        }
        assert_eq!(rig.angle(), 60);

        rig.secondary(0);
        // Neither doubled nor filtered towards the previous sample.
        assert_eq!(rig.ctx.vvt1_angle, 50);
    }

    #[test]
    fn cranking_rpm_skips_tooth_after_gap() {
        let mut rig = rig(TriggerConfig::new());
        prime(&mut rig);
        half_turn(&mut rig);
        half_turn(&mut rig);
        assert_eq!(rig.update_rpm(), 0);
        rig.primary(GAP);
        assert_eq!(rig.update_rpm(), 1667);
    }

    #[test]
    fn end_teeth_avoid_missing_positions() {
        let mut rig = rig(TriggerConfig::new());
        prime(&mut rig);
        half_turn(&mut rig);
        half_turn(&mut rig);
        rig.ctx.ignition_end_angles[..3].copy_from_slice(&[190, 350, 20]);
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(rig.ctx.ignition_end_teeth[..3], [17, 34, 36]);
    }
}
