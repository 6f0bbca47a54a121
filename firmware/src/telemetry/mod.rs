//! Engine event ring buffer and logging helpers.
//!
//! The housekeeping task feeds every tick through
//! [`TelemetryRecorder::observe`], which turns status changes into
//! timestamped events: sync gained or lost, stalls and overdwell cuts.
//! Events are mirrored to defmt on the target and stdout on the host.

use ecu_core::{EngineStatus, SyncStatus};
use embassy_time::{Duration, Instant};
use heapless::{HistoryBuffer, OldestOrdered};

use crate::outputs::Housekeeping;

/// Total number of events retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

pub type TelemetryRing = HistoryBuffer<TelemetryRecord, TELEMETRY_RING_CAPACITY>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Sync level rose to the given status.
    SyncGained(SyncStatus),
    /// Sync dropped while the engine was turning; carries the loss counter.
    SyncLost(u8),
    Stall,
    /// Coils forced off by the dwell limit.
    Overdwell(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: u32,
    pub timestamp: Instant,
    pub event: EngineEvent,
    /// Time since the previous event, if any.
    pub elapsed_since_previous: Option<Duration>,
}

pub struct TelemetryRecorder {
    ring: TelemetryRing,
    last_event_at: Option<Instant>,
    last_sync: SyncStatus,
    last_losses: u8,
    next_event_id: u32,
}

impl TelemetryRecorder {
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuffer::new(),
            last_event_at: None,
            last_sync: SyncStatus::None,
            last_losses: 0,
            next_event_id: 0,
        }
    }

    /// Recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord, TELEMETRY_RING_CAPACITY> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    /// Compares one housekeeping result against the previous one and
    /// records whatever changed. Returns how many events were added.
    pub fn observe(&mut self, status: &EngineStatus, tick: Housekeeping, timestamp: Instant) -> usize {
        let mut added = 0;
        if tick.stalled {
            self.record(EngineEvent::Stall, timestamp);
            added += 1;
        } else if status.sync_loss_counter != self.last_losses {
            self.record(EngineEvent::SyncLost(status.sync_loss_counter), timestamp);
            added += 1;
        }
        if status.sync > self.last_sync {
            self.record(EngineEvent::SyncGained(status.sync), timestamp);
            added += 1;
        }
        if tick.overdwell > 0 {
            self.record(EngineEvent::Overdwell(tick.overdwell), timestamp);
            added += 1;
        }
        self.last_sync = status.sync;
        self.last_losses = status.sync_loss_counter;
        added
    }

    pub fn record(&mut self, event: EngineEvent, timestamp: Instant) -> u32 {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        let elapsed = self
            .last_event_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_event_at = Some(timestamp);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            elapsed_since_previous: elapsed,
        });
        emit_log(event_label(event), event_value(event), timestamp.as_micros());
        id
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

const fn event_label(event: EngineEvent) -> &'static str {
    match event {
        EngineEvent::SyncGained(SyncStatus::Full) => "sync-full",
        EngineEvent::SyncGained(_) => "sync-half",
        EngineEvent::SyncLost(_) => "sync-lost",
        EngineEvent::Stall => "stall",
        EngineEvent::Overdwell(_) => "overdwell",
    }
}

fn event_value(event: EngineEvent) -> Option<u32> {
    match event {
        EngineEvent::SyncLost(losses) => Some(u32::from(losses)),
        EngineEvent::Overdwell(count) => Some(u32::try_from(count).unwrap_or(u32::MAX)),
        EngineEvent::SyncGained(_) | EngineEvent::Stall => None,
    }
}

#[cfg(target_os = "none")]
fn emit_log(label: &'static str, value: Option<u32>, timestamp_us: u64) {
    if let Some(value) = value {
        defmt::info!("telemetry:engine {} {} t={}us", label, value, timestamp_us);
    } else {
        defmt::info!("telemetry:engine {} t={}us", label, timestamp_us);
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(label: &'static str, value: Option<u32>, timestamp_us: u64) {
    if let Some(value) = value {
        println!("telemetry:engine {label} {value} t={timestamp_us}us");
    } else {
        println!("telemetry:engine {label} t={timestamp_us}us");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn micros(value: u64) -> Instant {
        Instant::from_micros(value)
    }

    fn status(sync: SyncStatus, losses: u8) -> EngineStatus {
        EngineStatus {
            sync,
            sync_loss_counter: losses,
            ..EngineStatus::default()
        }
    }

    #[test]
    fn sync_progression_is_recorded_once_per_level() {
        let mut recorder = TelemetryRecorder::new();
        let tick = Housekeeping::default();

        assert_eq!(recorder.observe(&status(SyncStatus::Half, 0), tick, micros(100)), 1);
        assert_eq!(recorder.observe(&status(SyncStatus::Half, 0), tick, micros(200)), 0);
        assert_eq!(recorder.observe(&status(SyncStatus::Full, 0), tick, micros(350)), 1);

        let events: heapless::Vec<EngineEvent, 4> = recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[EngineEvent::SyncGained(SyncStatus::Half), EngineEvent::SyncGained(SyncStatus::Full)]
        );
        let latest = recorder.latest().copied().expect("event recorded");
        assert_eq!(latest.id, 1);
        assert_eq!(latest.elapsed_since_previous, Some(Duration::from_micros(250)));
    }

    #[test]
    fn stall_takes_precedence_over_loss_count() {
        let mut recorder = TelemetryRecorder::new();
        recorder.observe(&status(SyncStatus::Full, 0), Housekeeping::default(), micros(10));

        let stalled = Housekeeping {
            stalled: true,
            ..Housekeeping::default()
        };
        assert_eq!(recorder.observe(&status(SyncStatus::None, 1), stalled, micros(20)), 1);
        assert_eq!(recorder.latest().map(|record| record.event), Some(EngineEvent::Stall));

        assert_eq!(recorder.observe(&status(SyncStatus::None, 2), Housekeeping::default(), micros(30)), 1);
        assert_eq!(recorder.latest().map(|record| record.event), Some(EngineEvent::SyncLost(2)));
    }

    #[test]
    fn overdwell_cuts_are_counted() {
        let mut recorder = TelemetryRecorder::new();
        let tick = Housekeeping {
            overdwell: 2,
            ..Housekeeping::default()
        };
        recorder.observe(&EngineStatus::default(), tick, micros(5));
        assert_eq!(recorder.latest().map(|record| record.event), Some(EngineEvent::Overdwell(2)));
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn ring_keeps_the_newest_events() {
        let mut recorder = TelemetryRecorder::new();
        for index in 0..(TELEMETRY_RING_CAPACITY as u64 + 5) {
            recorder.record(EngineEvent::Stall, micros(index));
        }
        assert_eq!(recorder.len(), TELEMETRY_RING_CAPACITY);
        assert_eq!(recorder.oldest_first().next().map(|record| record.id), Some(5));
    }
}
