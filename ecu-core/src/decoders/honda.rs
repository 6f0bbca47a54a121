//! Honda crank patterns.
//!
//! The D17 has 12 even teeth plus a 13th reference tooth close behind tooth
//! 12. The J32 wheel is nominally 24 teeth with two missing, leaving runs of
//! seven and fifteen teeth; the tooth before each gap is 18 degrees wide.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_DEG_1_RPM, MICROS_PER_SEC, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

const D17_TEETH: u16 = 12;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HondaD17;

impl Decoder for HondaD17 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.trigger_tooth_angle = 360 / D17_TEETH;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * u32::from(ctx.trigger_tooth_angle);
        ctx.is_sequential = false;
        ctx.has_secondary = false;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        let last_gap = ctx.cur_gap;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        ctx.valid_trigger = true;

        if ctx.tooth_current_count == D17_TEETH + 1 && ctx.has_sync() {
            ctx.tooth_current_count = 0;
        } else if ctx.tooth_current_count == 1 && ctx.has_sync() {
            ctx.shift_tooth_one(now);
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            ctx.shift_tooth_times(now);
        } else if ctx.cur_gap < last_gap >> 1 {
            // The reference tooth. Its time is kept out of the tooth history.
            ctx.tooth_current_count = 0;
            ctx.declare_sync();
        } else {
            ctx.shift_tooth_times(now);
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.std_rpm(false)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        // After the reference tooth, count from tooth 12.
        let tooth = if ctx.tooth_current_count == 0 {
            D17_TEETH
        } else {
            ctx.tooth_current_count
        };
        let angle = (Degrees::from(tooth) - 1) * Degrees::from(ctx.trigger_tooth_angle)
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        D17_TEETH
    }
}

const J32_TEETH: u16 = 24;
/// Teeth whose gap is 18 degrees instead of 15.
const J32_WIDE_TEETH: [u16; 2] = [14, 22];
/// First tooth after each missing tooth.
const J32_AFTER_GAP: [u16; 2] = [15, 23];

/// Honda J32. `last_gap` tracks the last regular tooth gap so the 18 degree
/// teeth and the gaps do not disturb gap detection.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HondaJ32 {
    last_gap: u32,
}

impl HondaJ32 {
    /// A gap at least one and a half regular gaps wide.
    const fn is_missing_tooth_gap(&self, gap: u32) -> bool {
        gap >= (self.last_gap >> 1) * 3
    }
}

impl Decoder for HondaJ32 {
    fn setup(&mut self, ctx: &mut DecoderContext, _now: Micros) {
        ctx.trigger_tooth_angle = 360 / J32_TEETH;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 10) * u32::from(ctx.trigger_tooth_angle);
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * u32::from(J32_TEETH));
        ctx.tooth_last_tooth_time = 0;
        ctx.tooth_current_count = 0;
        ctx.tooth_one_time = 0;
        ctx.tooth_one_minus_one_time = 0;
        ctx.revolution_one = false;
        self.last_gap = 0;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        ctx.tooth_last_tooth_time = now;
        ctx.valid_trigger = true;

        if ctx.has_sync() {
            ctx.tooth_current_count += 1;
            if ctx.tooth_current_count == J32_TEETH + 1 {
                ctx.tooth_current_count = 1;
                ctx.shift_tooth_one(now);
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
                ctx.set_revolution_time(ctx.tooth_one_time.wrapping_sub(ctx.tooth_one_minus_one_time));
            } else if J32_AFTER_GAP.contains(&ctx.tooth_current_count) {
                // Skip the missing tooth, which must show as a wide gap.
                ctx.tooth_current_count += 1;
                if !self.is_missing_tooth_gap(ctx.cur_gap) {
                    ctx.lose_sync();
                    ctx.tooth_current_count = 1;
                }
            } else if !J32_WIDE_TEETH.contains(&ctx.tooth_current_count) {
                self.last_gap = ctx.cur_gap;
            }
            return;
        }

        // While searching, the wide teeth count as regular ones.
        if self.last_gap == 0 || !self.is_missing_tooth_gap(ctx.cur_gap) {
            ctx.tooth_current_count = ctx.tooth_current_count.saturating_add(1);
            self.last_gap = ctx.cur_gap;
        } else if ctx.tooth_current_count == 15 {
            // Fifteen teeth since the other gap: this is the first of the run of seven.
            ctx.declare_sync();
            ctx.tooth_current_count = 16;
            ctx.tooth_one_time = now.wrapping_sub(15 * self.last_gap);
            ctx.tooth_one_minus_one_time = ctx.tooth_one_time.wrapping_sub(u32::from(J32_TEETH) * self.last_gap);
        } else {
            ctx.tooth_current_count = 1;
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        ctx.rpm_from_revolution_time()
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let base = match ctx.tooth_current_count {
            14 => 13 * 15 + 18,
            22 => 21 * 15 + 18,
            tooth => Degrees::from(ctx.trigger_tooth_angle) * Degrees::from(tooth),
        };
        let angle =
            base + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time) + Degrees::from(ctx.config.trigger_angle);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, _ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(TriggerEdge::Rising)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        J32_TEETH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    #[test]
    fn d17_syncs_on_reference_tooth() {
        let mut rig = Rig::new(HondaD17, TriggerConfig::new().with_pattern(DecoderKind::HondaD17));
        for _ in 0..3 {
            rig.primary(3_000);
        }
        assert!(!rig.ctx.has_sync());
        rig.primary(1_000);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 0);
        assert_eq!(rig.angle(), 330);

        rig.primary(2_000);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.angle(), 0);
        for _ in 0..11 {
            rig.primary(3_000);
        }
        assert_eq!(rig.ctx.tooth_current_count, 12);
        assert_eq!(rig.angle(), 330);

        rig.primary(1_000);
        assert_eq!(rig.ctx.tooth_current_count, 0);
        rig.primary(2_000);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 2);
    }

    fn j32_rig() -> Rig<HondaJ32> {
        Rig::new(HondaJ32::default(), TriggerConfig::new().with_pattern(DecoderKind::HondaJ32))
    }

    /// Fifteen regular teeth then the gap before the run of seven.
    fn j32_sync(rig: &mut Rig<HondaJ32>) {
        for _ in 0..15 {
            rig.primary(1_500);
        }
        rig.primary(3_000);
    }

    #[test]
    fn j32_syncs_after_run_of_fifteen() {
        let mut rig = j32_rig();
        j32_sync(&mut rig);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 16);
        assert_eq!(rig.ctx.tooth_one_time, rig.now - 15 * 1_500);
    }

    #[test]
    fn j32_revolution_time_from_tooth_one() {
        let mut rig = j32_rig();
        j32_sync(&mut rig);
        for _ in 0..6 {
            rig.primary(1_500);
        }
        assert_eq!(rig.ctx.tooth_current_count, 22);
        rig.primary(3_000);
        assert_eq!(rig.ctx.tooth_current_count, 24);
        assert!(rig.ctx.has_sync());
        rig.primary(1_500);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.revolution_time(), 36_000);
        assert_eq!(rig.update_rpm(), 1667);
        assert_eq!(rig.angle(), 15);
    }

    #[test]
    fn j32_short_gap_loses_sync() {
        let mut rig = j32_rig();
        j32_sync(&mut rig);
        for _ in 0..7 {
            rig.primary(1_500);
        }
        assert!(!rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.sync_loss_counter, 1);
    }
}
