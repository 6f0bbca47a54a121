use ecu_core::config::{SparkMode, TriggerConfig};
use ecu_core::decoders::{Decoder, NoHooks};
use ecu_core::{DecoderKind, Edge, Micros, TriggerSystem};

/// Deterministic tooth gaps between 300us and 3300us.
struct Gaps(u32);

impl Iterator for Gaps {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        Some(300 + (self.0 >> 16) % 3_000)
    }
}

/// One crank edge per gap, with a cam edge inside every ninth crank
/// interval and a second cam edge inside every seventeenth. `check` runs
/// three quarters of the way to the next crank edge.
fn drive(system: &TriggerSystem, edges: usize, gaps: impl Iterator<Item = u32>, mut check: impl FnMut(Micros)) {
    let mut now: Micros = 5_000;
    for (index, gap) in gaps.take(edges).enumerate() {
        let level = index % 2 == 0;
        let edge = Edge::at(now).with_levels(level, index % 18 < 9, index % 34 < 17);
        system.primary_edge(edge, &mut NoHooks);
        system.update_rpm(now);
        if index % 9 == 4 {
            system.secondary_edge(Edge::at(now + gap / 3).with_levels(level, true, false), &mut NoHooks);
        }
        if index % 17 == 8 {
            system.tertiary_edge(Edge::at(now + gap / 2).with_levels(level, false, true), &mut NoHooks);
        }
        check(now + gap * 3 / 4);
        now += gap;
    }
}

/// Crank edges with a cam edge every `cam_every` teeth and a second cam
/// edge every `2 * cam_every - 1`. `after_edge` runs after every single
/// edge, so a check sees what each decoder call left behind.
fn drive_edges(
    system: &TriggerSystem,
    edges: usize,
    gaps: impl Iterator<Item = u32>,
    cam_every: usize,
    mut after_edge: impl FnMut(),
) {
    let mut now: Micros = 5_000;
    for (index, gap) in gaps.take(edges).enumerate() {
        let level = index % 2 == 0;
        system.primary_edge(Edge::at(now).with_levels(level, false, false), &mut NoHooks);
        system.update_rpm(now);
        after_edge();
        if index % cam_every == cam_every / 2 {
            system.secondary_edge(Edge::at(now + gap / 3).with_levels(level, true, false), &mut NoHooks);
            after_edge();
        }
        if index % (2 * cam_every - 1) == cam_every - 1 {
            system.tertiary_edge(Edge::at(now + gap / 2).with_levels(level, false, true), &mut NoHooks);
            after_edge();
        }
        now += gap;
    }
}

#[derive(Clone, Copy)]
struct SyncSnapshot {
    synced: bool,
    tooth: u16,
    losses: u8,
}

fn sync_snapshot(system: &TriggerSystem) -> SyncSnapshot {
    system.with_state(|state| SyncSnapshot {
        synced: state.ctx.has_any_sync(),
        tooth: state.ctx.tooth_current_count,
        losses: state.ctx.sync_loss_counter,
    })
}

/// Well past the last edge `drive` delivers.
const LONG_AFTER: Micros = 100_000_000;

fn configs() -> impl Iterator<Item = TriggerConfig> {
    DecoderKind::ALL.iter().flat_map(|&kind| {
        [SparkMode::Wasted, SparkMode::Sequential]
            .into_iter()
            .map(move |mode| TriggerConfig::new().with_pattern(kind).with_spark_mode(mode))
    })
}

fn assert_angle_in_range(system: &TriggerSystem, config: &TriggerConfig, now: Micros) {
    let max = config.max_crank_angle();
    let angle = system.crank_angle(now);
    assert!(
        (0..max).contains(&angle),
        "{} ({:?}) reported {angle} outside [0, {max})",
        config.pattern,
        config.spark_mode
    );
    assert_eq!(system.crank_angle(now), angle, "{} angle query is not repeatable", config.pattern);
}

#[test]
fn every_decoder_accepts_a_four_cylinder_engine() {
    for &kind in DecoderKind::ALL {
        let config = TriggerConfig::new().with_pattern(kind);
        assert!(TriggerSystem::new(config).is_ok(), "{kind} rejected 4 cylinders");
    }
}

#[test]
fn crank_angle_stays_in_range_on_a_steady_wheel() {
    for config in configs() {
        let system = TriggerSystem::new(config).expect("valid config");
        drive(&system, 400, core::iter::repeat(1_000), |now| {
            assert_angle_in_range(&system, &config, now);
        });
    }
}

#[test]
fn crank_angle_stays_in_range_on_noisy_input() {
    for (seed, config) in configs().enumerate() {
        let system = TriggerSystem::new(config).expect("valid config");
        drive(&system, 400, Gaps(seed as u32), |now| {
            assert_angle_in_range(&system, &config, now);
        });
        let status = system.status(LONG_AFTER);
        assert!(!status.running, "{} still running long after the last edge", config.pattern);
    }
}

#[test]
fn stall_check_clears_every_decoder() {
    for config in configs() {
        let system = TriggerSystem::new(config).expect("valid config");
        drive(&system, 200, core::iter::repeat(800), |_| {});
        system.check_stall(LONG_AFTER);
        let status = system.status(LONG_AFTER + 1);
        assert!(!status.sync.has_any(), "{} kept sync after a stall", config.pattern);
        assert_eq!(system.rpm(), 0);
    }
}

#[test]
fn end_teeth_are_recomputed_for_new_targets() {
    let system = TriggerSystem::new(TriggerConfig::new().with_spark_mode(SparkMode::Sequential)).expect("valid config");
    system.set_ignition_targets(&[350, 530, 710, 170], 0);
    let teeth = system.with_state(|state| state.ctx.ignition_end_teeth);
    // Sequential 36-1 counts teeth across both revolutions.
    assert_eq!(&teeth[..4], &[34, 52, 70, 16]);
}

#[test]
fn synced_tooth_count_and_losses_hold_after_every_edge() {
    for (seed, config) in configs().enumerate() {
        // Regular cam teeth, then cam teeth so sparse that cam-anchored
        // patterns overrun their wheel.
        for cam_every in [9, 61] {
            let system = TriggerSystem::new(config).expect("valid config");
            let last_tooth = system.with_state(|state| state.decoder.last_tooth(&state.ctx));
            let mut before = sync_snapshot(&system);
            let mut edges = 0;
            drive_edges(&system, 600, Gaps(seed as u32 ^ 0x5A5A), cam_every, || {
                edges += 1;
                let after = sync_snapshot(&system);
                if after.synced {
                    assert!(
                        after.tooth <= last_tooth,
                        "{} ({:?}) synced at tooth {} of {last_tooth} after edge {edges}",
                        config.pattern,
                        config.spark_mode,
                        after.tooth
                    );
                }
                let lost = after.losses.wrapping_sub(before.losses);
                assert!(lost <= 1, "{} counted {lost} losses on edge {edges}", config.pattern);
                if lost == 1 {
                    assert!(
                        before.synced,
                        "{} counted a loss on edge {edges} without holding sync",
                        config.pattern
                    );
                }
                before = after;
            });
        }
    }
}
