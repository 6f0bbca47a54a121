//! Suzuki DRZ400: a dual wheel whose cam tooth re-anchors the count on
//! every cycle instead of checking it.

use crate::crank_maths::{Degrees, MAX_RPM, MICROS_PER_MIN, MICROS_PER_SEC, Micros};

use super::{Decoder, DecoderContext, DualWheel, Edge, EdgeSelection, ToothHooks};

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Drz400;

impl Decoder for Drz400 {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        DualWheel.setup(ctx, now);
        ctx.sec_filter_time = MICROS_PER_SEC / (u32::from(MAX_RPM) / 60 * 2);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        DualWheel.on_primary(ctx, edge, hooks);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 >= ctx.sec_filter_time {
            ctx.tooth_last_sec_tooth_time = now;
            let teeth = ctx.config.teeth;
            if !ctx.has_sync() {
                // 10rpm until a revolution has been timed.
                ctx.tooth_last_tooth_time = now;
                ctx.tooth_last_minus_one_tooth_time = now.wrapping_sub((MICROS_PER_MIN / 10) / u32::from(teeth));
                ctx.declare_sync();
            }
            // The next primary tooth is tooth one.
            ctx.tooth_current_count = teeth;
        }
        // Half a crank revolution.
        ctx.sec_filter_time = ctx.tooth_one_time.wrapping_sub(ctx.tooth_one_minus_one_time) >> 1;
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, now: Micros) -> u16 {
        DualWheel.rpm(ctx, now)
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        DualWheel.crank_angle(ctx, now)
    }

    fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
        DualWheel.set_end_teeth(ctx);
    }

    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::configured(&ctx.config)
    }

    fn last_tooth(&self, ctx: &DecoderContext) -> u16 {
        ctx.config.teeth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    const GAP: u32 = 10_000;

    fn rig() -> Rig<Drz400> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Drz400)
            .with_teeth(6, 0);
        Rig::new(Drz400, config)
    }

    #[test]
    fn secondary_filter_covers_two_teeth() {
        let rig = rig();
        assert_eq!(rig.ctx.trigger_tooth_angle, 60);
        assert_eq!(rig.ctx.sec_filter_time, 1_666);
    }

    #[test]
    fn cam_tooth_syncs_and_next_tooth_is_one() {
        let mut rig = rig();
        rig.secondary(GAP);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 6);
        assert_eq!(rig.ctx.sync_loss_counter, 0);
        assert_eq!(rig.ctx.sec_filter_time, 0);

        rig.primary(GAP);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        assert_eq!(rig.angle(), 0);
        rig.primary(GAP);
        assert_eq!(rig.angle(), 60);
    }

    #[test]
    fn later_cam_tooth_re_anchors_count() {
        let mut rig = rig();
        rig.secondary(GAP);
        for _ in 0..4 {
            rig.primary(GAP);
        }
        assert_eq!(rig.ctx.tooth_current_count, 4);
        rig.secondary(GAP / 2);
        assert_eq!(rig.ctx.tooth_current_count, 6);
        assert_eq!(rig.ctx.sync_loss_counter, 0);
        assert!(rig.ctx.has_sync());
    }
}
