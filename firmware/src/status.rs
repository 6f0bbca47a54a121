#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Published engine status for the firmware target.
//!
//! The housekeeping task copies the decoder status into atomics once per
//! tick so the console can report it without taking the decoder lock.

use ecu_core::{EngineStatus, SyncStatus};
use portable_atomic::{AtomicBool, AtomicI16, AtomicU16, AtomicU32, AtomicU8, Ordering};

static RPM: AtomicU16 = AtomicU16::new(0);
static CRANK_ANGLE: AtomicU16 = AtomicU16::new(0);
/// 0 == none, 1 == half, 2 == full.
static SYNC: AtomicU8 = AtomicU8::new(0);
static SYNC_LOSSES: AtomicU8 = AtomicU8::new(0);
static START_REVOLUTIONS: AtomicU16 = AtomicU16::new(0);
static VVT1_ANGLE: AtomicI16 = AtomicI16::new(0);
static RUNNING: AtomicBool = AtomicBool::new(false);
static STALLS: AtomicU32 = AtomicU32::new(0);
static OVERDWELL: AtomicU32 = AtomicU32::new(0);

const fn encode_sync(sync: SyncStatus) -> u8 {
    match sync {
        SyncStatus::None => 0,
        SyncStatus::Half => 1,
        SyncStatus::Full => 2,
    }
}

const fn decode_sync(raw: u8) -> SyncStatus {
    match raw {
        1 => SyncStatus::Half,
        2 => SyncStatus::Full,
        _ => SyncStatus::None,
    }
}

/// Stores the latest decoder status.
pub fn publish(status: &EngineStatus) {
    RPM.store(status.rpm, Ordering::Relaxed);
    CRANK_ANGLE.store(u16::try_from(status.crank_angle).unwrap_or(0), Ordering::Relaxed);
    SYNC.store(encode_sync(status.sync), Ordering::Relaxed);
    SYNC_LOSSES.store(status.sync_loss_counter, Ordering::Relaxed);
    START_REVOLUTIONS.store(status.start_revolutions, Ordering::Relaxed);
    VVT1_ANGLE.store(status.vvt1_angle, Ordering::Relaxed);
    RUNNING.store(status.running, Ordering::Relaxed);
}

pub fn record_stall() {
    STALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_overdwell(count: usize) {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    OVERDWELL.fetch_add(count, Ordering::Relaxed);
}

/// Point-in-time copy of the published values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub rpm: u16,
    pub crank_angle: u16,
    pub sync: SyncStatus,
    pub sync_losses: u8,
    pub start_revolutions: u16,
    pub vvt1_angle: i16,
    pub running: bool,
    pub stalls: u32,
    pub overdwell: u32,
}

pub fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        rpm: RPM.load(Ordering::Relaxed),
        crank_angle: CRANK_ANGLE.load(Ordering::Relaxed),
        sync: decode_sync(SYNC.load(Ordering::Relaxed)),
        sync_losses: SYNC_LOSSES.load(Ordering::Relaxed),
        start_revolutions: START_REVOLUTIONS.load(Ordering::Relaxed),
        vvt1_angle: VVT1_ANGLE.load(Ordering::Relaxed),
        running: RUNNING.load(Ordering::Relaxed),
        stalls: STALLS.load(Ordering::Relaxed),
        overdwell: OVERDWELL.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_published_status() {
        let status = EngineStatus {
            rpm: 2_400,
            crank_angle: 517,
            sync: SyncStatus::Full,
            sync_loss_counter: 3,
            start_revolutions: 40,
            vvt1_angle: -12,
            running: true,
            ..EngineStatus::default()
        };
        publish(&status);
        record_stall();
        record_overdwell(2);

        let snapshot = snapshot();
        assert_eq!(snapshot.rpm, 2_400);
        assert_eq!(snapshot.crank_angle, 517);
        assert_eq!(snapshot.sync, SyncStatus::Full);
        assert_eq!(snapshot.sync_losses, 3);
        assert_eq!(snapshot.vvt1_angle, -12);
        assert!(snapshot.running);
        assert!(snapshot.stalls >= 1);
        assert!(snapshot.overdwell >= 2);
    }

    #[test]
    fn unknown_sync_code_reads_as_none() {
        assert_eq!(decode_sync(encode_sync(SyncStatus::Half)), SyncStatus::Half);
        assert_eq!(decode_sync(7), SyncStatus::None);
    }
}
