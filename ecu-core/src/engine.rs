//! Interrupt-facing owner of the active decoder.
//!
//! [`TriggerSystem`] keeps the selected [`AnyDecoder`], its
//! [`DecoderContext`] and the tooth log in one [`Shared`] cell. Edge
//! handlers lock the cell for the length of one decoder call; main-loop
//! queries copy what they need out under the lock and do their arithmetic
//! afterwards.

use crate::config::{ConfigError, TriggerConfig};
use crate::crank_maths::{Degrees, Micros};
use crate::decoders::{AnyDecoder, Decoder, DecoderContext, DecoderKind, Edge, EdgeSelection, IGN_CHANNELS, ToothHooks};
use crate::shared::Shared;
use crate::status::EngineStatus;
use crate::tooth_log::{CompositeSample, LogMode, ToothLog, ToothLogBuffer, ToothSource};

/// Everything an edge handler touches.
#[derive(Clone, Debug)]
pub struct TriggerState {
    pub decoder: AnyDecoder,
    pub ctx: DecoderContext,
    pub log: ToothLog,
}

impl TriggerState {
    fn new(config: TriggerConfig, now: Micros) -> Self {
        let mut decoder = AnyDecoder::new(config.pattern);
        let mut ctx = DecoderContext::new(config);
        decoder.setup(&mut ctx, now);
        decoder.set_end_teeth(&mut ctx);
        Self {
            decoder,
            ctx,
            log: ToothLog::new(),
        }
    }

    /// A synced count past the pattern's last tooth means teeth were gained
    /// somewhere, so the position can no longer be trusted.
    fn check_tooth_range(&mut self) {
        let last = self.decoder.last_tooth(&self.ctx);
        if self.ctx.has_any_sync() && self.ctx.tooth_current_count > last {
            self.ctx.lose_sync();
        }
    }

    fn sample(&self, edge: Edge) -> CompositeSample {
        CompositeSample {
            primary: edge.primary_high,
            secondary: edge.secondary_high,
            tertiary: edge.tertiary_high,
            synced: self.ctx.has_any_sync(),
            revolution_one: self.ctx.revolution_one,
        }
    }
}

/// The selected trigger decoder, shared between interrupt handlers and the
/// main loop.
pub struct TriggerSystem {
    state: Shared<TriggerState>,
}

impl TriggerSystem {
    /// Validates `config` and sets up its decoder.
    ///
    /// # Errors
    ///
    /// Returns the first invalid configuration field.
    pub fn new(config: TriggerConfig) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        info!("decoder {} selected", config.pattern);
        Ok(Self {
            state: Shared::new(TriggerState::new(config, 0)),
        })
    }

    /// Replaces the decoder with the one `config` names. Sync and counters
    /// start over and the tooth log restarts in its current mode.
    ///
    /// # Errors
    ///
    /// Returns the first invalid configuration field. The running decoder is
    /// left untouched.
    pub fn select(&self, config: TriggerConfig, now: Micros) -> Result<EdgeSelection, ConfigError> {
        let config = config.validate()?;
        let state = TriggerState::new(config, now);
        let edges = state.decoder.edges(&state.ctx);
        self.state.lock(|current| {
            let mode = current.log.mode();
            *current = state;
            current.log.set_mode(mode);
        });
        info!("decoder {} selected", config.pattern);
        Ok(edges)
    }

    #[must_use]
    pub fn config(&self) -> TriggerConfig {
        self.state.lock(|state| state.ctx.config)
    }

    #[must_use]
    pub fn kind(&self) -> DecoderKind {
        self.state.lock(|state| state.decoder.kind())
    }

    /// Interrupt edges the active decoder wants.
    #[must_use]
    pub fn edges(&self) -> EdgeSelection {
        self.state.lock(|state| state.decoder.edges(&state.ctx))
    }

    /// Primary input interrupt.
    pub fn primary_edge<H: ToothHooks>(&self, edge: Edge, hooks: &mut H) {
        self.state.lock(|state| {
            let last = state.ctx.tooth_last_tooth_time;
            state.decoder.on_primary(&mut state.ctx, edge, hooks);
            state.check_tooth_range();
            let valid = state.ctx.tooth_last_tooth_time != last;
            let sample = state.sample(edge);
            state.log.record(ToothSource::Crank, state.ctx.cur_gap, valid, edge.time, sample);
        });
    }

    /// Secondary input interrupt.
    pub fn secondary_edge<H: ToothHooks>(&self, edge: Edge, hooks: &mut H) {
        self.state.lock(|state| {
            let last = state.ctx.tooth_last_sec_tooth_time;
            let count = state.ctx.secondary_tooth_count;
            state.decoder.on_secondary(&mut state.ctx, edge, hooks);
            state.check_tooth_range();
            let valid = state.ctx.tooth_last_sec_tooth_time != last || state.ctx.secondary_tooth_count != count;
            let sample = state.sample(edge);
            let gap = edge.time.wrapping_sub(last);
            state.log.record(ToothSource::Cam, gap, valid, edge.time, sample);
        });
    }

    /// Tertiary input interrupt.
    pub fn tertiary_edge<H: ToothHooks>(&self, edge: Edge, hooks: &mut H) {
        self.state.lock(|state| {
            let last = state.ctx.tooth_last_third_tooth_time;
            state.decoder.on_tertiary(&mut state.ctx, edge, hooks);
            state.check_tooth_range();
            let valid = state.ctx.tooth_last_third_tooth_time != last;
            let sample = state.sample(edge);
            let gap = edge.time.wrapping_sub(last);
            state.log.record(ToothSource::SecondCam, gap, valid, edge.time, sample);
        });
    }

    /// Recomputes engine speed. Call from the housekeeping loop.
    pub fn update_rpm(&self, now: Micros) -> u16 {
        self.state.lock(|state| {
            let rpm = state.decoder.rpm(&mut state.ctx, now);
            state.ctx.rpm = rpm;
            state.ctx.engine_cranking = rpm > 0 && rpm < state.ctx.config.crank_rpm;
            rpm
        })
    }

    /// Last computed engine speed.
    #[must_use]
    pub fn rpm(&self) -> u16 {
        self.state.lock(|state| state.ctx.rpm)
    }

    /// Crank angle at `now`.
    #[must_use]
    pub fn crank_angle(&self, now: Micros) -> Degrees {
        let (decoder, ctx) = self.state.lock(|state| (state.decoder.clone(), state.ctx.clone()));
        decoder.crank_angle(&ctx, now)
    }

    #[must_use]
    pub fn status(&self, now: Micros) -> EngineStatus {
        let (decoder, ctx) = self.state.lock(|state| (state.decoder.clone(), state.ctx.clone()));
        let angle = if ctx.has_any_sync() {
            decoder.crank_angle(&ctx, now)
        } else {
            0
        };
        ctx.status(angle, now)
    }

    /// Resets the decoder when no tooth has arrived within its stall time.
    /// Returns `true` on the call that detects the stall.
    pub fn check_stall(&self, now: Micros) -> bool {
        let stalled = self.state.lock(|state| {
            let ctx = &mut state.ctx;
            if ctx.tooth_last_tooth_time == 0 || ctx.engine_is_running(now) {
                return false;
            }
            ctx.reset();
            ctx.clear_sync();
            ctx.rpm = 0;
            ctx.start_revolutions = 0;
            ctx.engine_cranking = false;
            true
        });
        if stalled {
            info!("engine stalled");
        }
        stalled
    }

    /// Sets the spark angles used for per-tooth timing and recomputes the
    /// tooth each channel is re-timed on.
    pub fn set_ignition_targets(&self, end_angles: &[Degrees], advance: i16) {
        self.state.lock(|state| {
            let count = end_angles.len().min(IGN_CHANNELS);
            state.ctx.ignition_end_angles[..count].copy_from_slice(&end_angles[..count]);
            state.ctx.advance = advance;
            state.decoder.set_end_teeth(&mut state.ctx);
        });
    }

    /// Suspends per-tooth timing while the decoder holds fixed cranking
    /// timing, and reports whether it is held.
    pub fn update_fixed_cranking(&self) -> bool {
        self.state.lock(|state| {
            let active = state.ctx.fixed_cranking && state.ctx.cranking_coil_lock();
            state.ctx.fixed_cranking_override = active;
            active
        })
    }

    pub fn set_log_mode(&self, mode: LogMode) {
        self.state.lock(|state| state.log.set_mode(mode));
    }

    /// Copies out the tooth log once it is full and restarts capture.
    pub fn take_log(&self) -> Option<ToothLogBuffer> {
        self.state.lock(|state| {
            if !state.log.is_ready() {
                return None;
            }
            let entries = ToothLogBuffer::from_slice(state.log.entries()).ok();
            state.log.clear();
            entries
        })
    }

    /// Runs `f` against the decoder state under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut TriggerState) -> R) -> R {
        self.state.lock(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::NoHooks;
    use crate::status::SyncStatus;

    /// 1_667 rpm on a 36-1 wheel.
    const GAP: u32 = 1_000;

    fn system() -> TriggerSystem {
        TriggerSystem::new(TriggerConfig::new()).expect("default config is valid")
    }

    fn revolution(system: &TriggerSystem, now: &mut Micros) {
        for _ in 1..35 {
            *now += GAP;
            system.primary_edge(Edge::at(*now), &mut NoHooks);
        }
        *now += GAP * 2;
        system.primary_edge(Edge::at(*now), &mut NoHooks);
    }

    #[test]
    fn invalid_selection_keeps_running_decoder() {
        let system = system();
        let bad = TriggerConfig::new().with_teeth(0, 0);
        assert_eq!(system.select(bad, 0), Err(ConfigError::NoTeeth));
        assert_eq!(system.kind(), DecoderKind::MissingTooth);
    }

    #[test]
    fn missing_tooth_wheel_syncs_and_reports_speed() {
        let system = system();
        let mut now = 10_000;
        revolution(&system, &mut now);
        revolution(&system, &mut now);
        revolution(&system, &mut now);
        for _ in 0..5 {
            now += GAP;
            system.primary_edge(Edge::at(now), &mut NoHooks);
        }
        assert_eq!(system.status(now).sync, SyncStatus::Full);
        assert_eq!(system.update_rpm(now), 1_667);
        assert_eq!(system.crank_angle(now), 50);
        assert_eq!(system.crank_angle(now + GAP / 2), 55);
    }

    #[test]
    fn stall_resets_sync_once() {
        let system = system();
        let mut now = 10_000;
        revolution(&system, &mut now);
        revolution(&system, &mut now);
        system.update_rpm(now);
        assert!(!system.check_stall(now + 1_000));
        assert!(system.check_stall(now + 2_000_000));
        assert!(!system.check_stall(now + 2_000_100));
        let status = system.status(now + 2_000_100);
        assert_eq!(status.sync, SyncStatus::None);
        assert_eq!(status.rpm, 0);
        assert_eq!(status.sync_loss_counter, 0);
    }

    #[test]
    fn fixed_cranking_holds_only_on_capable_decoders() {
        let mut config = TriggerConfig::new().with_pattern(DecoderKind::BasicDistributor);
        config.ign_cranklock = true;
        let system = TriggerSystem::new(config).expect("distributor config is valid");
        system.with_state(|state| state.ctx.engine_cranking = true);
        assert!(system.update_fixed_cranking());
        system.with_state(|state| state.ctx.engine_cranking = false);
        assert!(!system.update_fixed_cranking());

        let mut config = TriggerConfig::new();
        config.ign_cranklock = true;
        let system = TriggerSystem::new(config).expect("default config is valid");
        system.with_state(|state| state.ctx.engine_cranking = true);
        assert!(!system.update_fixed_cranking());
    }

    #[test]
    fn tooth_log_captures_gaps_until_full() {
        let system = system();
        system.set_log_mode(LogMode::Tooth);
        let mut now = 10_000;
        for _ in 0..4 {
            revolution(&system, &mut now);
        }
        let log = system.take_log().expect("log fills after 140 teeth");
        assert_eq!(log.len(), crate::tooth_log::TOOTH_LOG_SIZE);
        assert!(log.iter().skip(1).all(|entry| entry.value == GAP || entry.value == 2 * GAP));
        assert!(system.take_log().is_none());
    }
}
