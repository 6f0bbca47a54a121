//! Yamaha Vmax: six lobes per crank revolution, one of them wide.
//!
//! Both edges of every lobe are seen. The leading edge is the tooth; the
//! trailing edge measures the lobe width, and a lobe more than twice as
//! wide as the one before marks the end of the revolution.

use crate::config::TriggerEdge;
use crate::crank_maths::{Degrees, MICROS_PER_DEG_1_RPM, Micros};

use super::{Decoder, DecoderContext, Edge, EdgeSelection, ToothHooks};

const TOOTH_ANGLES: [i16; 6] = [0, 40, 110, 180, 220, 290];
const LOBES: u16 = 6;
const STARTUP_FILTER_TIME: u32 = 1_500;
/// A filter this long can only come from the first lobe after startup.
const STARTUP_FILTER_LIMIT: u32 = 50_000;

#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vmax {
    lobe_start: Micros,
    lobe_width: u32,
}

impl Vmax {
    /// Angle to the next tooth and the filter for it, scaled from the gap
    /// that ended at `tooth`.
    const fn next_tooth(tooth: u16, gap: u32) -> Option<(u16, u32)> {
        match tooth {
            1 | 4 => Some((70, gap * 4 / 7)),
            2 | 5 => Some((40, gap * 7 / 4)),
            3 | 6 => Some((70, gap)),
            _ => None,
        }
    }

    fn on_leading_edge(&mut self, ctx: &mut DecoderContext, now: Micros) {
        self.lobe_start = now;
        ctx.cur_gap = now.wrapping_sub(ctx.tooth_last_tooth_time);
        if ctx.cur_gap < ctx.filter_time {
            // The trailing edge of a filtered lobe is not measured.
            ctx.valid_trigger = false;
            return;
        }
        ctx.valid_trigger = true;
        if ctx.tooth_current_count == 0 {
            ctx.filter_time = 0;
            return;
        }

        let tooth = ctx.tooth_current_count;
        ctx.secondary_tooth_count = tooth;
        if let Some((angle, filter_gap)) = Self::next_tooth(tooth, ctx.cur_gap) {
            ctx.trigger_tooth_angle = angle;
            ctx.set_filter(filter_gap);
        }
        if tooth == 1 {
            ctx.shift_tooth_one(now);
            ctx.declare_sync();
            ctx.start_revolutions = ctx.start_revolutions.wrapping_add(1);
        }
        ctx.shift_tooth_times(now);
        if ctx.filter_time > STARTUP_FILTER_LIMIT {
            ctx.filter_time = 0;
        }
    }

    fn on_trailing_edge(&mut self, ctx: &mut DecoderContext, now: Micros) {
        let width = now.wrapping_sub(self.lobe_start);
        if self.lobe_width == 0 {
            // Nothing to compare the first lobe against.
            self.lobe_width = width;
            return;
        }
        if width > self.lobe_width.saturating_mul(2) {
            if ctx.tooth_current_count == 0 || ctx.tooth_current_count == LOBES {
                ctx.declare_sync();
            } else {
                ctx.record_resync();
                warn!("vmax wide lobe at tooth {}", ctx.tooth_current_count);
            }
            ctx.tooth_current_count = 1;
        } else if ctx.tooth_current_count == LOBES {
            ctx.record_resync();
            warn!("vmax missed the wide lobe");
            ctx.tooth_current_count = 1;
        } else if ctx.tooth_current_count > 0 {
            ctx.tooth_current_count += 1;
        }
        self.lobe_width = width;
    }
}

impl Decoder for Vmax {
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
        *self = Self::default();
        ctx.trigger_tooth_angle = 0;
        ctx.is_sequential = false;
        ctx.has_secondary = false;
        ctx.stall_time = (MICROS_PER_DEG_1_RPM / 50) * 60;
        ctx.tooth_last_tooth_time = now;
        ctx.filter_time = STARTUP_FILTER_TIME;
        // The first trailing edge must be measured.
        ctx.valid_trigger = true;
    }

    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, _hooks: &mut H) {
        let leading_high = ctx.config.primary_edge != TriggerEdge::Falling;
        if edge.primary_high == leading_high {
            self.on_leading_edge(ctx, edge.time);
        } else if ctx.valid_trigger {
            self.on_trailing_edge(ctx, edge.time);
        } else {
            ctx.valid_trigger = true;
        }
    }

    fn rpm(&mut self, ctx: &mut DecoderContext, _now: Micros) -> u16 {
        if !ctx.has_sync() {
            return 0;
        }
        if ctx.rpm < ctx.config.crank_rpm {
            ctx.tooth_angle_rpm()
        } else {
            ctx.std_rpm(false)
        }
    }

    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
        let tooth_angle = usize::from(ctx.secondary_tooth_count)
            .checked_sub(1)
            .and_then(|index| TOOTH_ANGLES.get(index))
            .map_or(0, |&angle| Degrees::from(angle));
        let angle = tooth_angle
            + Degrees::from(ctx.config.trigger_angle)
            + ctx.elapsed_angle(now, ctx.tooth_last_tooth_time);
        ctx.wrap_crank_angle(angle)
    }

    fn set_end_teeth(&mut self, _ctx: &mut DecoderContext) {}

    fn edges(&self, _ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(TriggerEdge::Both)
    }

    fn last_tooth(&self, _ctx: &DecoderContext) -> u16 {
        LOBES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerConfig;
    use crate::decoders::DecoderKind;
    use crate::decoders::testing::Rig;

    const US_PER_DEG: u32 = 100;

    fn rig() -> Rig<Vmax> {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Vmax)
            .with_cylinders(4);
        Rig::new(Vmax::default(), config)
    }

    fn lead(rig: &mut Rig<Vmax>, degrees: u32) {
        rig.primary_edge(degrees * US_PER_DEG, Edge::at(0).with_levels(true, false, false));
    }

    fn trail(rig: &mut Rig<Vmax>, degrees: u32) {
        rig.primary_edge(degrees * US_PER_DEG, Edge::at(0).with_levels(false, false, false));
    }

    /// Lobe six then the wide lobe, leaving tooth one next.
    fn find_wide_lobe(rig: &mut Rig<Vmax>) {
        lead(rig, 20);
        trail(rig, 5);
        lead(rig, 65);
        trail(rig, 45);
    }

    #[test]
    fn wide_lobe_gives_sync_and_tooth_one() {
        let mut rig = rig();
        find_wide_lobe(&mut rig);
        assert!(rig.ctx.has_sync());
        assert_eq!(rig.ctx.tooth_current_count, 1);

        lead(&mut rig, 25);
        assert_eq!(rig.ctx.secondary_tooth_count, 1);
        assert_eq!(rig.ctx.start_revolutions, 1);
        assert_eq!(rig.angle(), 0);
        trail(&mut rig, 5);
        lead(&mut rig, 35);
        assert_eq!(rig.ctx.secondary_tooth_count, 2);
        assert_eq!(rig.ctx.trigger_tooth_angle, 40);
        assert_eq!(rig.angle(), 40);
    }

    #[test]
    fn misplaced_wide_lobe_counts_sync_loss() {
        let mut rig = rig();
        find_wide_lobe(&mut rig);
        lead(&mut rig, 25);
        trail(&mut rig, 5);
        lead(&mut rig, 35);
        trail(&mut rig, 45);
        assert_eq!(rig.ctx.sync_loss_counter, 1);
        assert_eq!(rig.ctx.tooth_current_count, 1);
        assert!(rig.ctx.has_sync());
    }

    #[test]
    fn small_lobes_before_sync_do_not_count() {
        let mut rig = rig();
        for _ in 0..3 {
            lead(&mut rig, 20);
            trail(&mut rig, 5);
        }
        assert_eq!(rig.ctx.tooth_current_count, 0);
        assert!(!rig.ctx.has_sync());
    }

    #[test]
    fn cranking_rpm_from_last_tooth_angle() {
        let mut rig = rig();
        find_wide_lobe(&mut rig);
        lead(&mut rig, 25);
        trail(&mut rig, 5);
        lead(&mut rig, 35);
        assert_eq!(rig.update_rpm(), 1666);
    }
}
