#![no_std]
#![allow(clippy::module_name_repetitions)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::similar_names,
    clippy::struct_excessive_bools,
    clippy::too_many_lines
)]

// Trigger decoding and output scheduling for the engine controller.
//
// The crate has no dependency on the standard library so the same decoder
// and scheduler code runs inside interrupt handlers on the MCU and inside
// host-side tests and the emulator.

#[macro_use]
mod log;

pub mod config;
pub mod console;
pub mod crank_maths;
pub mod decoders;
pub mod engine;
pub mod outputs;
pub mod schedule_calc;
pub mod scheduler;
pub mod shared;
pub mod status;
pub mod tooth_log;

pub use config::{ConfigError, TriggerConfig};
pub use crank_maths::{AngleConverter, Degrees, Micros};
pub use decoders::{AnyDecoder, Decoder, DecoderContext, DecoderKind, Edge, ToothHooks};
pub use engine::TriggerSystem;
pub use shared::Shared;
pub use status::{EngineStatus, SyncStatus};
