//! Synthetic edge trains for decoder unit tests.

use crate::config::TriggerConfig;
use crate::crank_maths::{Degrees, Micros};

use super::{Decoder, DecoderContext, Edge, NoHooks};

pub(crate) struct Rig<D> {
    pub decoder: D,
    pub ctx: DecoderContext,
    pub now: Micros,
}

impl<D: Decoder> Rig<D> {
    pub fn new(mut decoder: D, config: TriggerConfig) -> Self {
        let mut ctx = DecoderContext::new(config);
        let now = 1_000;
        decoder.setup(&mut ctx, now);
        Self { decoder, ctx, now }
    }

    pub fn advance(&mut self, gap: u32) {
        self.now = self.now.wrapping_add(gap);
    }

    pub fn primary(&mut self, gap: u32) {
        self.primary_edge(gap, Edge::at(0));
    }

    pub fn primary_edge(&mut self, gap: u32, levels: Edge) {
        self.advance(gap);
        let edge = Edge { time: self.now, ..levels };
        self.decoder.on_primary(&mut self.ctx, edge, &mut NoHooks);
    }

    pub fn secondary(&mut self, gap: u32) {
        self.secondary_edge(gap, Edge::at(0));
    }

    pub fn secondary_edge(&mut self, gap: u32, levels: Edge) {
        self.advance(gap);
        let edge = Edge { time: self.now, ..levels };
        self.decoder.on_secondary(&mut self.ctx, edge, &mut NoHooks);
    }

    pub fn tertiary(&mut self, gap: u32) {
        self.advance(gap);
        self.decoder.on_tertiary(&mut self.ctx, Edge::at(self.now), &mut NoHooks);
    }

    /// Runs the speed calculation the way the housekeeping loop does.
    pub fn update_rpm(&mut self) -> u16 {
        let rpm = self.decoder.rpm(&mut self.ctx, self.now);
        self.ctx.rpm = rpm;
        self.ctx.engine_cranking = rpm < self.ctx.config.crank_rpm;
        rpm
    }

    pub fn angle(&self) -> Degrees {
        self.decoder.crank_angle(&self.ctx, self.now)
    }

    pub fn angle_after(&self, elapsed: u32) -> Degrees {
        self.decoder.crank_angle(&self.ctx, self.now.wrapping_add(elapsed))
    }

    /// One revolution of a missing-tooth wheel: teeth two to the last
    /// physical tooth, then tooth one after the gap.
    pub fn missing_tooth_revolution(&mut self, teeth: u16, missing: u16, gap: u32) {
        for _ in 1..(teeth - missing) {
            self.primary(gap);
        }
        self.primary(gap * u32::from(missing + 1));
    }
}
