//! Trigger-wheel decoders.
//!
//! Each supported wheel geometry is a state machine implementing
//! [`Decoder`]. Edge handlers run in interrupt context, take the shared
//! [`DecoderContext`] by mutable reference and never block. The only way a
//! decoder reaches the output scheduler is through [`ToothHooks`].
//!
//! [`AnyDecoder`] is the tagged union of all patterns, selected once from the
//! configuration and dispatched with a plain `match`.

use core::fmt;

use crate::config::{TriggerConfig, TriggerEdge};
use crate::crank_maths::{Degrees, Micros};

mod audi;
mod chrysler;
mod context;
mod daihatsu;
mod distributor;
mod drz400;
mod dual_wheel;
mod ford;
mod gm;
mod harley;
mod honda;
mod jeep;
mod mazda;
mod missing_tooth;
mod mitsubishi;
mod nissan;
mod renix;
mod rover;
mod subaru;
mod suzuki;
#[cfg(test)]
mod testing;
mod thirty_six;
mod vmax;
mod weber;

pub use audi::Audi135;
pub use chrysler::{Chrysler420a, ChryslerNgc};
pub use context::{DEFAULT_STALL_TIME, DecoderContext, IGN_CHANNELS, MIN_CYCLES_FOR_END_COMPARE};
pub use daihatsu::Daihatsu;
pub use distributor::BasicDistributor;
pub use drz400::Drz400;
pub use dual_wheel::{DualWheel, NonThreeSixty};
pub use ford::{FordSt170, FordTfi};
pub use gm::{Gm24x, Gm7x};
pub use harley::Harley;
pub use honda::{HondaD17, HondaJ32};
pub use jeep::Jeep2000;
pub use mazda::{MazdaAu, Miata9905};
pub use missing_tooth::MissingTooth;
pub use mitsubishi::Mitsubishi4G63;
pub use nissan::Nissan360;
pub use renix::Renix;
pub use rover::RoverMems;
pub use subaru::{Subaru67, Subaru7CrankOnly};
pub use suzuki::SuzukiK6a;
pub use thirty_six::{ThirtySixMinus21, ThirtySixMinus222};
pub use vmax::Vmax;
pub use weber::Weber;

/// A sensor edge delivered to a decoder handler.
///
/// Input levels are sampled in the same interrupt as the timestamp so
/// patterns that look at the other inputs see a consistent picture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Edge {
    pub time: Micros,
    pub primary_high: bool,
    pub secondary_high: bool,
    pub tertiary_high: bool,
}

impl Edge {
    #[must_use]
    pub const fn at(time: Micros) -> Self {
        Self {
            time,
            primary_high: false,
            secondary_high: false,
            tertiary_high: false,
        }
    }

    #[must_use]
    pub const fn with_levels(mut self, primary: bool, secondary: bool, tertiary: bool) -> Self {
        self.primary_high = primary;
        self.secondary_high = secondary;
        self.tertiary_high = tertiary;
        self
    }
}

/// Interrupt edges a decoder wants on each input. `None` leaves the input detached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EdgeSelection {
    pub primary: Option<TriggerEdge>,
    pub secondary: Option<TriggerEdge>,
    pub tertiary: Option<TriggerEdge>,
}

impl EdgeSelection {
    #[must_use]
    pub const fn primary(edge: TriggerEdge) -> Self {
        Self {
            primary: Some(edge),
            secondary: None,
            tertiary: None,
        }
    }

    #[must_use]
    pub const fn with_secondary(mut self, edge: TriggerEdge) -> Self {
        self.secondary = Some(edge);
        self
    }

    #[must_use]
    pub const fn with_tertiary(mut self, edge: TriggerEdge) -> Self {
        self.tertiary = Some(edge);
        self
    }

    /// Primary and secondary on their configured edges.
    #[must_use]
    pub const fn configured(config: &TriggerConfig) -> Self {
        Self::primary(config.primary_edge).with_secondary(config.secondary_edge)
    }
}

/// Write path from decoder interrupt handlers into the ignition outputs.
pub trait ToothHooks {
    /// Moves the end of `channel`'s dwell to `time_to_end` microseconds from
    /// now if it is running. When it has not started yet and
    /// `allow_end_compare` is set, the end is pre-set for when it starts.
    fn retime_ignition_end(&mut self, channel: usize, time_to_end: u32, allow_end_compare: bool);

    /// Fires `channel`'s coil immediately (cranking lock).
    fn end_coil_charge(&mut self, channel: usize);
}

/// Hooks that ignore every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl ToothHooks for NoHooks {
    fn retime_ignition_end(&mut self, _channel: usize, _time_to_end: u32, _allow: bool) {}

    fn end_coil_charge(&mut self, _channel: usize) {}
}

/// Operations every trigger pattern provides.
pub trait Decoder {
    /// Computes the pattern constants and resets the tooth state.
    fn setup(&mut self, ctx: &mut DecoderContext, now: Micros);

    /// Primary (crank) edge handler.
    fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H);

    /// Secondary (cam) edge handler.
    fn on_secondary<H: ToothHooks>(
        &mut self,
        _ctx: &mut DecoderContext,
        _edge: Edge,
        _hooks: &mut H,
    ) {
    }

    /// Tertiary (second cam) edge handler.
    fn on_tertiary<H: ToothHooks>(
        &mut self,
        _ctx: &mut DecoderContext,
        _edge: Edge,
        _hooks: &mut H,
    ) {
    }

    /// Current engine speed. `ctx.rpm` holds the previous value.
    fn rpm(&mut self, ctx: &mut DecoderContext, now: Micros) -> u16;

    /// Crank angle at `now`, within `[0, ctx.max_crank_angle())`.
    fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees;

    /// Recomputes `ctx.ignition_end_teeth` from `ctx.ignition_end_angles`.
    fn set_end_teeth(&mut self, ctx: &mut DecoderContext);

    /// Highest tooth number the pattern counts to in one cycle.
    fn last_tooth(&self, ctx: &DecoderContext) -> u16 {
        ctx.trigger_actual_teeth
    }

    /// Interrupt edges to attach, valid after [`Decoder::setup`].
    fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
        EdgeSelection::primary(ctx.config.primary_edge)
    }
}

macro_rules! decoder_kinds {
    ($($variant:ident = $id:literal => $ty:ident, $name:literal;)*) => {
        /// Supported trigger patterns with their persisted numeric ids.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[repr(u8)]
        pub enum DecoderKind {
            #[default]
            $($variant = $id,)*
        }

        impl DecoderKind {
            pub const ALL: &'static [DecoderKind] = &[$(DecoderKind::$variant,)*];

            #[must_use]
            pub const fn id(self) -> u8 {
                self as u8
            }

            #[must_use]
            pub const fn from_id(id: u8) -> Option<Self> {
                match id {
                    $($id => Some(DecoderKind::$variant),)*
                    _ => None,
                }
            }

            /// Short name used by the console.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(DecoderKind::$variant => $name,)*
                }
            }

            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|kind| kind.name().eq_ignore_ascii_case(name))
            }
        }

        /// One decoder of any supported pattern.
        #[derive(Clone, Debug)]
        pub enum AnyDecoder {
            $($variant($ty),)*
        }

        impl AnyDecoder {
            /// Fresh decoder for `kind`. Call [`Decoder::setup`] before use.
            #[must_use]
            pub fn new(kind: DecoderKind) -> Self {
                match kind {
                    $(DecoderKind::$variant => AnyDecoder::$variant($ty::default()),)*
                }
            }

            #[must_use]
            pub const fn kind(&self) -> DecoderKind {
                match self {
                    $(AnyDecoder::$variant(_) => DecoderKind::$variant,)*
                }
            }
        }

        impl Decoder for AnyDecoder {
            fn setup(&mut self, ctx: &mut DecoderContext, now: Micros) {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.setup(ctx, now),)*
                }
            }

            fn on_primary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.on_primary(ctx, edge, hooks),)*
                }
            }

            fn on_secondary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.on_secondary(ctx, edge, hooks),)*
                }
            }

            fn on_tertiary<H: ToothHooks>(&mut self, ctx: &mut DecoderContext, edge: Edge, hooks: &mut H) {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.on_tertiary(ctx, edge, hooks),)*
                }
            }

            fn rpm(&mut self, ctx: &mut DecoderContext, now: Micros) -> u16 {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.rpm(ctx, now),)*
                }
            }

            fn crank_angle(&self, ctx: &DecoderContext, now: Micros) -> Degrees {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.crank_angle(ctx, now),)*
                }
            }

            fn set_end_teeth(&mut self, ctx: &mut DecoderContext) {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.set_end_teeth(ctx),)*
                }
            }

            fn last_tooth(&self, ctx: &DecoderContext) -> u16 {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.last_tooth(ctx),)*
                }
            }

            fn edges(&self, ctx: &DecoderContext) -> EdgeSelection {
                match self {
                    $(AnyDecoder::$variant(decoder) => decoder.edges(ctx),)*
                }
            }
        }
    };
}

decoder_kinds! {
    MissingTooth = 0 => MissingTooth, "missing-tooth";
    BasicDistributor = 1 => BasicDistributor, "distributor";
    DualWheel = 2 => DualWheel, "dual-wheel";
    Gm7x = 3 => Gm7x, "gm-7x";
    Mitsubishi4G63 = 4 => Mitsubishi4G63, "4g63";
    Gm24x = 5 => Gm24x, "gm-24x";
    Jeep2000 = 6 => Jeep2000, "jeep-2000";
    Audi135 = 7 => Audi135, "audi-135";
    HondaD17 = 8 => HondaD17, "honda-d17";
    Miata9905 = 9 => Miata9905, "miata-99-05";
    MazdaAu = 10 => MazdaAu, "mazda-au";
    NonThreeSixty = 11 => NonThreeSixty, "non-360";
    Nissan360 = 12 => Nissan360, "nissan-360";
    Subaru67 = 13 => Subaru67, "subaru-6-7";
    Daihatsu = 14 => Daihatsu, "daihatsu";
    Harley = 15 => Harley, "harley";
    ThirtySixMinus222 = 16 => ThirtySixMinus222, "36-2-2-2";
    ThirtySixMinus21 = 17 => ThirtySixMinus21, "36-2-1";
    Chrysler420a = 18 => Chrysler420a, "420a";
    Weber = 19 => Weber, "weber";
    FordSt170 = 20 => FordSt170, "st170";
    Drz400 = 21 => Drz400, "drz400";
    ChryslerNgc = 22 => ChryslerNgc, "ngc";
    Vmax = 23 => Vmax, "vmax";
    Renix = 24 => Renix, "renix";
    RoverMems = 25 => RoverMems, "rover-mems";
    SuzukiK6a = 26 => SuzukiK6a, "suzuki-k6a";
    HondaJ32 = 27 => HondaJ32, "honda-j32";
    FordTfi = 28 => FordTfi, "ford-tfi";
    Subaru7CrankOnly = 29 => Subaru7CrankOnly, "subaru-7-crank";
}

impl DecoderKind {
    /// Cylinder counts the pattern can decode.
    #[must_use]
    pub const fn supports_cylinders(self, cylinders: u8) -> bool {
        match self {
            DecoderKind::Mitsubishi4G63 => matches!(cylinders, 4 | 6),
            DecoderKind::ChryslerNgc => matches!(cylinders, 4 | 6 | 8),
            DecoderKind::Renix => matches!(cylinders, 4 | 6),
            DecoderKind::ThirtySixMinus222 => matches!(cylinders, 4 | 6),
            DecoderKind::FordSt170 | DecoderKind::SuzukiK6a => cylinders == 4 || cylinders == 3,
            DecoderKind::Harley | DecoderKind::Vmax => cylinders == 2 || cylinders == 4,
            _ => true,
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_for_every_pattern() {
        for kind in DecoderKind::ALL {
            assert_eq!(DecoderKind::from_id(kind.id()), Some(*kind));
            assert_eq!(AnyDecoder::new(*kind).kind(), *kind);
        }
        assert_eq!(DecoderKind::from_id(200), None);
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(DecoderKind::from_name("NGC"), Some(DecoderKind::ChryslerNgc));
        assert_eq!(DecoderKind::from_name("36-2-1"), Some(DecoderKind::ThirtySixMinus21));
        assert_eq!(DecoderKind::from_name("bogus"), None);
    }
}
