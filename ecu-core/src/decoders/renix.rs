//! Renix 44-2-2 (four cylinder) and 66-2-2-2 (six cylinder) crank wheels.
//!
//! Neither tooth count divides 360, so every eleven physical tooth slots
//! become one virtual tooth of 90 or 60 degrees. The double gaps only
//! confirm that the slot count is aligned; everything downstream sees the
//! virtual wheel.

use crate::config::{SparkMode, TriggerSpeed};
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros, nudge};

use super::{Decoder, DecoderContext, DualWheel, Edge, IGN_CHANNELS, MissingTooth, ToothHooks};

/// Physical slots per virtual tooth, counting the first as one.
const SLOTS_PER_TOOTH: u16 = 12;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Renix {
    /// Physical tooth times, independent of the virtual teeth.
    system_last: Micros,
    system_last_minus_one: Micros,
}

impl Renix {
    fn end_tooth(ctx: &DecoderContext, end_angle: Degrees, tooth_adder: u16) -> u16 {
        let tooth = (end_angle - Degrees::from(ctx.config.trigger_angle)) / Degrees::from(ctx.trigger_tooth_angle) - 1;
        let range = Degrees::from(ctx.config.teeth) + Degrees::from(tooth_adder);
        let tooth = nudge(1, range, tooth, range) as u16;
        tooth.min(ctx.trigger_actual_teeth + tooth_adder)
    }
}

impl Decoder for Renix {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        *self = Self::default();
        let (virtual_teeth, physical_teeth) = if ctx.config.cylinders == 6 { (6, 66) } else { (4, 44) };
        ctx.config = ctx.config.with_teeth(virtual_teeth, 0);
        ctx.trigger_tooth_angle = 360 / virtual_teeth;
        ctx.trigger_actual_teeth = virtual_teeth;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * physical_teeth);
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.tooth_system_count = 1;
        ctx.tooth_current_count = 1;
        ctx.tooth_last_tooth_time = 0;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(self.system_last);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_system_count += 1;

        // A double gap is in practice closer to two and a half teeth.
        let target_gap = if self.system_last != 0 && self.system_last_minus_one != 0 {
            self.system_last.wrapping_sub(self.system_last_minus_one).wrapping_mul(2)
        } else {
            u32::MAX
        };
        if ctx.cur_gap >= target_gap {
            // The two missing slots.
            ctx.tooth_system_count += 2;
            if ctx.tooth_system_count != SLOTS_PER_TOOTH {
                if ctx.has_sync() {
                    ctx.lose_sync();
                }
                ctx.tooth_system_count = 1;
                ctx.tooth_current_count = 1;
            }
        } else {
            ctx.set_filter(ctx.cur_gap);
        }
        self.system_last_minus_one = self.system_last;
        self.system_last = now;

        if ctx.tooth_system_count == SLOTS_PER_TOOTH || ctx.tooth_last_tooth_time == 0 {
            ctx.tooth_current_count += 1;
            if ctx.tooth_current_count > ctx.trigger_actual_teeth {
                ctx.tooth_current_count = 1;
                ctx.shift_tooth_one(now);
                ctx.declare_sync();
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
                ctx.revolution_one = !ctx.revolution_one;
            }
            ctx.tooth_system_count = 1;
            ctx.valid_trigger = true;
            ctx.shift_tooth_times(now);
            DualWheel::per_tooth_timing(ctx, hooks);
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, now: Micros) -> u16 {
        MissingTooth.rpm(ctx, now)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        MissingTooth.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        let tooth_adder = if ctx.config.spark_mode == SparkMode::Sequential && ctx.config.speed == TriggerSpeed::Crank {
            ctx.config.teeth
        } else {
            0
        };
        for channel in 0..IGN_CHANNELS {
            ctx.ignition_end_teeth[channel] = Self::end_tooth(ctx, ctx.ignition_end_angles[channel], tooth_adder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    const GAP: u32 = 1_000;

    fn rig(cylinders: u8) -> Rig<Renix> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Renix)
            .with_cylinders(cylinders);
        Rig::new(Renix::default(), config)
    }

    fn regular_tooth(rig: &mut Rig<Renix>) {
        for _ in 0..11 {
            rig.primary(GAP);
        }
    }

    fn gap_tooth(rig: &mut Rig<Renix>) {
        for _ in 0..8 {
            rig.primary(GAP);
        }
        rig.primary(3 * GAP);
    }

    fn synced() -> Rig<Renix> {
        let mut rig = rig(4);
        rig.primary(GAP);
        for _ in 0..3 {
            regular_tooth(&mut rig);
        }
        rig
    }

    #[test]
    fn setup_uses_virtual_wheel() {
        let six = rig(6);
        assert_eq!(six.ctx.config.teeth, 6);
        assert_eq!(six.ctx.trigger_tooth_angle, 60);
        assert_eq!(six.ctx.filter_time, 50);
        let four = rig(4);
        assert_eq!(four.ctx.config.teeth, 4);
        assert_eq!(four.ctx.trigger_tooth_angle, 90);
        assert_eq!(four.ctx.filter_time, 75);
    }

    #[test]
    fn eleven_slots_make_a_virtual_tooth() {
        let mut rig = synced();
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        assert_eq!(rig.angle(), 0);

        gap_tooth(&mut rig);
        assert_eq!(rig.ctx.tooth_current_count, 2);
        assert_eq!(rig.ctx.sync_loss_counter, 0);
        assert_eq!(rig.angle(), 90);
        assert_eq!(rig.update_rpm(), 1364);
    }

    #[test]
    fn misaligned_gap_loses_sync() {
        let mut rig = synced();
        for _ in 0..5 {
            rig.primary(GAP);
        }
        rig.primary(3 * GAP);
        assert!(!rig.ctx.has_sync());
        assert_eq!(rig.ctx.sync_loss_counter, 1);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.tooth_system_count, 1);
    }

    #[test]
    fn end_teeth_are_one_tooth_early() {
        let mut rig = rig(4);
        rig.ctx.ignition_end_angles[..3].copy_from_slice(&[350, 0, 180]);
        rig.decoder.set_end_teeth(&mut rig.ctx);
        assert_eq!(rig.ctx.ignition_end_teeth[..3], [2, 3, 1]);
    }
}
