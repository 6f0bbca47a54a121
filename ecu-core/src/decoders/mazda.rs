//! Mazda cam-speed patterns.
//!
//! The Miata 99-05 uses four 70 degree windows on the crank with the same
//! edge angles as the 4G63, both edges decoded, plus a cam wheel with a
//! single and a double tooth. The AU has four crank teeth alternating 72/108
//! degrees apart and a cam wheel with one single and one close pair.

use crate::config::{SparkMode, TriggerEdge, TriggerFilter};
use crate::crank_maths::{Degrees, MICROS_PER_DEG_1_RPM, Micros, low_pass_filter};

use super::mitsubishi::Mitsubishi4G63;
use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

/// Stall time floor, 50rpm.
const MIN_STALL_TIME: u32 = 366_667;
const STARTUP_FILTER_TIME: u32 = 1_500;
const UNSYNCED_TOOTH_COUNT: u16 = 99;
/// Coil lock stays on slightly past cranking so a dwell started under fixed
/// timing is not ended by normal timing.
const CRANK_LOCK_MARGIN_RPM: u16 = 30;

const MIATA_TOOTH_ANGLES: [i16; 8] = [710, 100, 170, 280, 350, 460, 530, 640];
const MIATA_TEETH: u16 = 8;
/// Tooth one sits 10 degrees BTDC; cam angles are measured back from there.
const MIATA_CAM_REFERENCE: Degrees = 370;

fn table_angle(table: &[i16], tooth: u16) -> Degrees {
    usize::from(tooth)
        .checked_sub(1)
        .and_then(|index| table.get(index))
        .map_or(0, |&angle| Degrees::from(angle))
}

/// Miata 99-05. `last_vvt_time` is the delay from tooth one to the single cam tooth.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Miata9905 {
    last_vvt_time: u32,
}

impl Decoder for Miata9905 {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        ctx.trigger_tooth_angle = 90;
        ctx.tooth_current_count = UNSYNCED_TOOTH_COUNT;
        ctx.is_sequential = true;
        ctx.trigger_actual_teeth = MIATA_TEETH;
        ctx.secondary_tooth_count = 0;
        ctx.tooth_last_tooth_time = now;
        ctx.tooth_last_minus_one_tooth_time = 0;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
        ctx.filter_time = STARTUP_FILTER_TIME;
        ctx.sec_filter_time = 0;
        ctx.fixed_cranking = true;
        ctx.tooth_angle_correct = true;
        ctx.has_secondary = true;
        self.last_vvt_time = 0;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time && ctx.start_revolutions != 0 {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        if ctx.tooth_current_count == MIATA_TEETH + 1 {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        } else if (!ctx.has_sync() || ctx.config.use_resync) && ctx.secondary_tooth_count == 2 {
            // First crank edge after the double cam tooth.
            ctx.tooth_current_count = 6;
            ctx.declare_sync();
        }

        if ctx.has_sync() {
            Mitsubishi4G63::retune_filter(ctx, ctx.cur_gap, true);
            if ctx.config.filter == TriggerFilter::Off {
                ctx.sec_filter_time = 0;
            }

            if ctx.config.per_tooth_ign && ctx.config.trigger_angle == 0 && ctx.advance > 0 {
                let angle = ctx.ignition_limits(table_angle(&MIATA_TOOTH_ANGLES, ctx.tooth_current_count));
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

        ctx.shift_tooth_times(now);

        if ctx.config.ign_cranklock && ctx.rpm < ctx.config.crank_rpm.saturating_add(CRANK_LOCK_MARGIN_RPM) {
            let channels: &[usize] = match ctx.tooth_current_count {
                1 | 5 => &[0, 2],
                3 | 7 => &[1, 3],
                _ => &[],
            };
            for &channel in channels {
                hooks.end_coil_charge(channel);
            }
        }
        ctx.secondary_tooth_count = 0;
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.engine_cranking || !ctx.has_sync() {
            ctx.filter_time = STARTUP_FILTER_TIME;
        }
        if ctx.cur_gap2 < ctx.sec_filter_time {
            return;
        }
        ctx.tooth_last_sec_tooth_time = now;
        ctx.secondary_tooth_count = ctx.secondary_tooth_count.saturating_add(1);

        if ctx.tooth_current_count == 1 && now > ctx.tooth_last_tooth_time {
            self.last_vvt_time = now - ctx.tooth_last_tooth_time;
            if ctx.config.vvt.enabled {
                let advance = ctx.angle.time_to_angle(self.last_vvt_time) as Degrees;
                let angle = MIATA_CAM_REFERENCE - advance - Degrees::from(ctx.config.vvt.cl0_duty_angle);
                ctx.vvt1_angle =
                    low_pass_filter(angle << 1, ctx.config.vvt.angle_filter, Degrees::from(ctx.vvt1_angle)) as i16;
            }
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if ctx.rpm < ctx.config.crank_rpm && ctx.has_sync() {
            let rpm = ctx.tooth_angle_rpm();
            ctx.stall_time = MIN_STALL_TIME;
            rpm
        } else {
            let rpm = ctx.std_rpm(true);
            ctx.stall_time = (ctx.revolution_time() << 1).max(MIN_STALL_TIME);
            rpm
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let angle = table_angle(&MIATA_TOOTH_ANGLES, ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let sequential = ctx.config.spark_mode == SparkMode::Sequential;
        let teeth: [u16; 4] = match (sequential, ctx.advance) {
            (true, 10..=i16::MAX) => [8, 2, 4, 6],
            (true, 1..=9) => [1, 3, 5, 7],
            (false, 10..=i16::MAX) => [4, 2, 4, 2],
            (false, 1..=9) => [1, 3, 1, 3],
            // No advance: keep the previous end teeth.
            _ => return,
        };
        ctx.ignition_end_teeth[..4].copy_from_slice(&teeth);
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }
}

const AU_TOOTH_ANGLES: [i16; 4] = [348, 96, 168, 276];

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MazdaAu;

impl Decoder for MazdaAu {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.trigger_tooth_angle = 108;
        ctx.tooth_current_count = UNSYNCED_TOOTH_COUNT;
        ctx.secondary_tooth_count = 0;
        ctx.is_sequential = true;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
        ctx.filter_time = STARTUP_FILTER_TIME;
        ctx.sec_filter_time = 833;
        ctx.fixed_cranking = true;
        ctx.has_secondary = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.valid_trigger = true;
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        if ctx.tooth_current_count == 1 || ctx.tooth_current_count == 5 {
            ctx.tooth_current_count = 1;
            ctx.shift_tooth_one(now);
            ctx.declare_sync();
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }
        if !ctx.has_sync() {
            return;
        }

        // Locked cranking timing fires at 12 degrees BTDC.
        if ctx.cranking_coil_lock() {
            match ctx.tooth_current_count {
                1 => hooks.end_coil_charge(0),
                3 => hooks.end_coil_charge(1),
                _ => {}
            }
        }

        if ctx.tooth_current_count == 1 || ctx.tooth_current_count == 3 {
            ctx.trigger_tooth_angle = 72;
            ctx.filter_time = ctx.cur_gap;
        } else {
            ctx.trigger_tooth_angle = 108;
            ctx.filter_time = ctx.cur_gap.wrapping_mul(3) >> 3;
        }
        ctx.shift_tooth_times(now);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        let last_gap = ctx.cur_gap2;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        ctx.tooth_last_sec_tooth_time = now;
        if ctx.has_sync() {
            return;
        }

        if ctx.secondary_tooth_count == 2 {
            ctx.tooth_current_count = 1;
            ctx.declare_sync();
        } else {
            ctx.filter_time = STARTUP_FILTER_TIME;
            // Under half the previous gap: the second tooth of the pair.
            if ctx.cur_gap2 < last_gap >> 1 {
                ctx.secondary_tooth_count = 2;
            }
        }
        ctx.secondary_tooth_count = ctx.secondary_tooth_count.saturating_add(1);
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() {
            0
        } else if ctx.rpm < ctx.config.crank_rpm {
            ctx.tooth_angle_rpm()
        } else {
            ctx.std_rpm(false)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        if !ctx.has_sync() {
            return 0;
        }
        let angle = table_angle(&AU_TOOTH_ANGLES, ctx.tooth_current_count)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge).with_secondary(TriggerEdge::Falling)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TriggerConfig, VvtConfig};
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    fn miata() -> Rig<Miata9905> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Miata9905)
            .with_sequential_fuel(true);
        Rig::new(Miata9905::default(), config)
    }

    #[test]
    fn miata_syncs_after_double_cam_tooth() {
        let mut rig = miata();
        rig.primary(5_000);
        rig.secondary(0);
        rig.secondary(500);
        rig.primary(4_500);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 6);
        assert_eq!(rig.ctx.trigger_tooth_angle, 110);
        assert_eq!(rig.angle(), 460);

        for (gap, tooth, angle) in [(7_000, 7, 530), (11_000, 8, 640), (7_000, 1, 710)] {
            rig.primary(gap);
            assert_eq!(rig.ctx.tooth_current_count, tooth);
            assert_eq!(rig.angle(), angle);
        }
        assert_eq!(rig.ctx.secondary_tooth_count, 0);
    }

    #[test]
    fn miata_cam_delay_after_tooth_one_gives_vvt_angle() {
        let mut rig = miata();
        rig.ctx.config.vvt = VvtConfig {
            enabled: true,
            ..VvtConfig::default()
        };
        rig.ctx.set_revolution_time(36_000);
        rig.ctx.tooth_current_count = 1;
        rig.ctx.tooth_last_tooth_time = rig.now;
        rig.secondary(2_000);
        // 20 degrees after tooth one, stored doubled.
        assert_eq!(rig.ctx.vvt1_angle, 700);
    }

    #[test]
    fn miata_end_teeth_follow_advance() {
        let mut rig = miata();
        rig.ctx.advance = 15;
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(&rig.ctx.ignition_end_teeth[..4], &[4, 2, 4, 2]);
        rig.ctx.config.spark_mode = SparkMode::Sequential;
        rig.ctx.advance = 5;
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(&rig.ctx.ignition_end_teeth[..4], &[1, 3, 5, 7]);
        rig.ctx.advance = 0;
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(&rig.ctx.ignition_end_teeth[..4], &[1, 3, 5, 7]);
    }

    fn synced_au() -> Rig<MazdaAu> {
        let mut rig = Rig::new(MazdaAu, TriggerConfig::new().with_pattern(DecoderKind::MazdaAu));
        rig.secondary(0);
        rig.secondary(5_000);
        assert!(!rig.ctx.has_sync());
        rig.secondary(5_000);
        assert!(rig.ctx.has_sync());
        rig
    }

    #[test]
    fn au_tooth_after_cam_sync_is_tooth_one() {
        let mut rig = synced_au();
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.angle(), 348);

        rig.primary(10_800);
        assert_eq!(rig.angle(), 96);
        assert_eq!(rig.ctx.trigger_tooth_angle, 108);
        rig.primary(10_800);
        assert_eq!(rig.ctx.trigger_tooth_angle, 72);
        assert_eq!(rig.ctx.filter_time, 10_800);
    }

    #[test]
    fn au_cranking_rpm_from_uneven_gap() {
        let mut rig = synced_au();
        for gap in [10_800, 10_800, 10_800, 7_200] {
            rig.primary(gap);
        }
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        assert_eq!(rig.update_rpm(), 1666);
    }
}
