//! Weber-Marelli: four crank teeth 90 degrees apart and two cam teeth 90
//! degrees apart.
//!
//! The wheels are decoded as a dual wheel; only the edge handlers differ,
//! counting crank teeth between cam teeth to place the cam pair.

use crate::crank_maths::{Degrees, MICROS_PER_MIN, Micros};

use super::{Decoder, DecoderContext, DualWheel, Edge, EdgeSelection, ToothHooks};

/// Initial gap that pins the speed at 10rpm until a revolution has been timed.
const STARTUP_GAP: u32 = MICROS_PER_MIN / 40;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Weber;

impl Weber {
    /// One and a half crank teeth.
    const fn cam_window(crank_gap: u32) -> u32 {
        crank_gap + (crank_gap >> 1)
    }

    fn pin_startup_speed(ctx: &mut DecoderContext, now: Micros) {
        ctx.tooth_last_tooth_time = now;
        ctx.tooth_last_minus_one_tooth_time = now.wrapping_sub(STARTUP_GAP);
    }
}

impl Decoder for Weber {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        DualWheel.setup(ctx, now);
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            return;
        }
        ctx.tooth_current_count = ctx.tooth_current_count.wrapping_add(1);
        // Crank teeth since the last cam tooth.
        if ctx.check_sync_tooth_count > 0 {
            ctx.check_sync_tooth_count += 1;
        }
        if ctx.sec_filter_time <= ctx.cur_gap {
            ctx.sec_filter_time = Self::cam_window(ctx.cur_gap);
        }
        ctx.valid_trigger = true;
        ctx.shift_tooth_times(now);

        if ctx.has_sync() {
            if ctx.tooth_current_count == 1 || ctx.tooth_current_count > ctx.config.teeth {
                ctx.tooth_current_count = 1;
                ctx.revolution_one = !ctx.revolution_one;
                ctx.shift_tooth_one(now);
                ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
            }
            ctx.set_filter(ctx.cur_gap);
        } else if ctx.secondary_tooth_count == 1 && ctx.check_sync_tooth_count == 4 {
            ctx.tooth_current_count = 2;
            ctx.revolution_one = false;
            ctx.declare_sync();
        }

        DualWheel::per_tooth_timing(ctx, hooks);
    }

    fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let now = edge.time;
        ctx.cur_gap2 = now.wrapping_sub(ctx.tooth_last_sec_tooth_time);
        if ctx.cur_gap2 < ctx.sec_filter_time {
            // Too close to the last cam tooth: restart the crank tooth count.
            ctx.sec_filter_time = Self::cam_window(ctx.cur_gap);
            ctx.check_sync_tooth_count = 1;
            return;
        }
        ctx.tooth_last_sec_tooth_time = now;

        let last_tooth = ctx.config.teeth.saturating_sub(1);
        if ctx.secondary_tooth_count == 2 && ctx.check_sync_tooth_count == 3 {
            if !ctx.has_sync() {
                Self::pin_startup_speed(ctx, now);
                ctx.tooth_current_count = last_tooth;
                ctx.declare_sync();
            } else {
                if ctx.tooth_current_count != last_tooth && ctx.start_revolutions > 2 {
                    ctx.record_resync();
                    warn!("weber cam pair at tooth {}", ctx.tooth_current_count);
                }
                if ctx.config.use_resync {
                    ctx.tooth_current_count = last_tooth;
                }
            }
            ctx.revolution_one = true;
            // Four crank teeth.
            ctx.sec_filter_time = ctx.cur_gap << 2;
            ctx.secondary_tooth_count = 1;
        } else if !ctx.has_sync() && ctx.tooth_current_count >= 3 && ctx.secondary_tooth_count == 0 {
            // First start: sync on the first cam tooth once three crank teeth have passed.
            Self::pin_startup_speed(ctx, now);
            ctx.tooth_current_count = 1;
            ctx.revolution_one = true;
            ctx.declare_sync();
        } else {
            ctx.sec_filter_time = Self::cam_window(ctx.cur_gap);
            ctx.secondary_tooth_count = ctx.secondary_tooth_count.saturating_add(1);
            // The current crank tooth counts as seen.
            ctx.check_sync_tooth_count = 1;
        }
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

    const CRANK_GAP: u32 = 10_000;

    fn rig() -> Rig<Weber> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Weber)
            .with_teeth(4, 0);
        Rig::new(Weber, config)
    }

    #[test]
    fn first_cam_tooth_after_three_crank_teeth_is_tooth_one() {
        let mut rig = rig();
        for _ in 0..3 {
            rig.primary(CRANK_GAP);
        }
        rig.secondary(5_000);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert!(rig.ctx.revolution_one);
        assert_eq!(
            rig.ctx
                .tooth_last_tooth_time
                .wrapping_sub(rig.ctx.tooth_last_minus_one_tooth_time),
            STARTUP_GAP
        );
    }

    #[test]
    fn cam_tooth_inside_window_restarts_tooth_count() {
        let mut rig = rig();
        for _ in 0..3 {
            rig.primary(CRANK_GAP);
        }
        rig.secondary(5_000);
        rig.primary(CRANK_GAP);
        rig.secondary(2_000);
        assert_eq!(rig.ctx.check_sync_tooth_count, 1);
        assert_eq!(rig.ctx.sec_filter_time, 15_000);
        assert_eq!(rig.ctx.secondary_tooth_count, 0);
    }

    #[test]
    fn cam_pair_confirms_last_tooth() {
        let mut rig = rig();
        for _ in 0..3 {
            rig.primary(CRANK_GAP);
        }
        rig.secondary(5_000);
        rig.ctx.start_revolutions = 5;
        rig.ctx.secondary_tooth_count = 2;
        rig.ctx.check_sync_tooth_count = 3;
        rig.ctx.tooth_current_count = 2;
        rig.secondary(20_000);
        assert_eq!(rig.ctx.sync_loss_counter, 1);
        assert_eq!(rig.ctx.tooth_current_count, 2);
        assert_eq!(rig.ctx.secondary_tooth_count, 1);
        assert_eq!(rig.ctx.sec_filter_time, CRANK_GAP << 2);
    }

    #[test]
    fn crank_teeth_after_single_cam_tooth_sync_at_tooth_two() {
        let mut rig = rig();
        rig.ctx.tooth_current_count = 0;
        rig.ctx.secondary_tooth_count = 1;
        rig.ctx.check_sync_tooth_count = 1;
        for _ in 0..3 {
            rig.primary(CRANK_GAP);
        }
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 2);
        assert!(!rig.ctx.revolution_one);
    }
}
