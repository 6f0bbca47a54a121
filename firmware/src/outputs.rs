//! Output stage of the controller board: four injector and four coil
//! drivers, each on its own compare channel.

pub use ecu_core::outputs::{Housekeeping, Outputs};

/// Output channels per bank on the controller board.
pub const CHANNELS: usize = 4;
