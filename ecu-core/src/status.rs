//! Engine status published to the rest of the controller.

use core::fmt;

use crate::crank_maths::Degrees;

/// How much of the engine cycle the decoder has locked onto.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncStatus {
    /// Angle and RPM are not valid.
    #[default]
    None,
    /// Crank position known, cam phase not yet confirmed. Sequential outputs
    /// must fall back to batch or wasted spark.
    Half,
    /// Crank and cam phase both known.
    Full,
}

impl SyncStatus {
    /// Crank position is known (half or full sync).
    #[must_use]
    pub const fn has_any(self) -> bool {
        !matches!(self, SyncStatus::None)
    }

    #[must_use]
    pub const fn is_full(self) -> bool {
        matches!(self, SyncStatus::Full)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::None => f.write_str("none"),
            SyncStatus::Half => f.write_str("half"),
            SyncStatus::Full => f.write_str("full"),
        }
    }
}

/// Point-in-time copy of the decoder outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineStatus {
    pub rpm: u16,
    pub crank_angle: Degrees,
    pub sync: SyncStatus,
    pub sync_loss_counter: u8,
    pub start_revolutions: u16,
    pub tooth_count: u16,
    pub vvt1_angle: i16,
    pub vvt2_angle: i16,
    pub revolution_time: u32,
    pub running: bool,
    pub cranking: bool,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rpm={} angle={} sync={} tooth={} losses={} revs={} vvt1={} vvt2={} running={}",
            self.rpm,
            self.crank_angle,
            self.sync,
            self.tooth_count,
            self.sync_loss_counter,
            self.start_revolutions,
            self.vvt1_angle,
            self.vvt2_angle,
            self.running,
        )
    }
}
