//! Diagnostic tooth and composite logger.
//!
//! The buffer fills once and then freezes with its `ready` flag set until the
//! consumer drains it, so a reader never sees a half-overwritten capture.

use heapless::Vec;

use crate::crank_maths::Micros;

pub const TOOTH_LOG_SIZE: usize = 128;

/// A full capture.
pub type ToothLogBuffer = Vec<ToothLogEntry, TOOTH_LOG_SIZE>;

/// Which trigger input produced a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToothSource {
    Crank,
    Cam,
    SecondCam,
}

/// Signals shown in a composite capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompositeView {
    /// Crank with the first cam.
    #[default]
    Cam1,
    /// Crank with the second cam.
    Cam2,
    /// Both cams, crank as the third trace.
    BothCams,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogMode {
    #[default]
    Off,
    /// Primary tooth gaps only.
    Tooth,
    Composite(CompositeView),
}

/// Bit set stored with each composite entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CompositeFlags(u8);

impl CompositeFlags {
    pub const PRI: u8 = 1 << 0;
    pub const SEC: u8 = 1 << 1;
    pub const TRIG: u8 = 1 << 2;
    pub const SYNC: u8 = 1 << 3;
    pub const THIRD: u8 = 1 << 4;
    pub const CYCLE: u8 = 1 << 5;

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        }
    }
}

/// Input levels and decoder state sampled alongside a composite entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositeSample {
    pub primary: bool,
    pub secondary: bool,
    pub tertiary: bool,
    pub synced: bool,
    pub revolution_one: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ToothLogEntry {
    /// Tooth gap in tooth mode, timestamp in composite mode.
    pub value: u32,
    pub flags: CompositeFlags,
}

#[derive(Clone, Debug, Default)]
pub struct ToothLog {
    mode: LogMode,
    entries: ToothLogBuffer,
    ready: bool,
}

impl ToothLog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: LogMode::Off,
            entries: Vec::new(),
            ready: false,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> LogMode {
        self.mode
    }

    /// Switches logging mode and discards any partial capture.
    pub fn set_mode(&mut self, mode: LogMode) {
        self.mode = mode;
        self.clear();
    }

    /// The buffer is full and waiting to be drained.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[ToothLogEntry] {
        &self.entries
    }

    /// Restarts capture.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ready = false;
    }

    /// Records an edge. Tooth mode keeps only valid crank teeth; composite
    /// mode keeps every primary edge and valid cam edges.
    pub fn record(
        &mut self,
        source: ToothSource,
        gap: u32,
        valid: bool,
        now: Micros,
        sample: CompositeSample,
    ) {
        if self.ready {
            return;
        }
        let entry = match self.mode {
            LogMode::Off => return,
            LogMode::Tooth => {
                if source != ToothSource::Crank || !valid {
                    return;
                }
                ToothLogEntry {
                    value: gap,
                    flags: CompositeFlags::default(),
                }
            }
            LogMode::Composite(view) => {
                if source != ToothSource::Crank && !valid {
                    return;
                }
                ToothLogEntry {
                    value: now,
                    flags: composite_flags(view, source, sample),
                }
            }
        };
        // `ready` is set the moment the buffer fills, so this push always fits.
        let _ = self.entries.push(entry);
        if self.entries.is_full() {
            self.ready = true;
        }
    }
}

fn composite_flags(view: CompositeView, source: ToothSource, sample: CompositeSample) -> CompositeFlags {
    let mut flags = CompositeFlags::default();
    match view {
        CompositeView::BothCams => {
            flags.set(CompositeFlags::PRI, sample.secondary);
            flags.set(CompositeFlags::SEC, sample.tertiary);
            flags.set(CompositeFlags::THIRD, sample.primary);
            flags.set(CompositeFlags::TRIG, source == ToothSource::SecondCam);
        }
        CompositeView::Cam2 => {
            flags.set(CompositeFlags::PRI, sample.primary);
            flags.set(CompositeFlags::SEC, sample.tertiary);
            flags.set(CompositeFlags::THIRD, sample.secondary);
            flags.set(CompositeFlags::TRIG, source != ToothSource::Crank);
        }
        CompositeView::Cam1 => {
            flags.set(CompositeFlags::PRI, sample.primary);
            flags.set(CompositeFlags::SEC, sample.secondary);
            flags.set(CompositeFlags::THIRD, sample.tertiary);
            flags.set(CompositeFlags::TRIG, source != ToothSource::Crank);
        }
    }
    flags.set(CompositeFlags::SYNC, sample.synced);
    flags.set(CompositeFlags::CYCLE, sample.revolution_one);
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tooth_mode_ignores_cam_and_filtered_edges() {
        let mut log = ToothLog::new();
        log.set_mode(LogMode::Tooth);
        log.record(ToothSource::Crank, 1000, true, 0, CompositeSample::default());
        log.record(ToothSource::Crank, 40, false, 0, CompositeSample::default());
        log.record(ToothSource::Cam, 5000, true, 0, CompositeSample::default());
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].value, 1000);
    }

    #[test]
    fn buffer_freezes_when_full_until_cleared() {
        let mut log = ToothLog::new();
        log.set_mode(LogMode::Tooth);
        for gap in 0..200_u32 {
            log.record(ToothSource::Crank, gap, true, 0, CompositeSample::default());
        }
        assert!(log.is_ready());
        assert_eq!(log.len(), TOOTH_LOG_SIZE);
        assert_eq!(log.entries()[TOOTH_LOG_SIZE - 1].value, 127);

        log.clear();
        assert!(!log.is_ready());
        assert!(log.is_empty());
    }

    #[test]
    fn composite_entry_carries_levels_and_sync() {
        let mut log = ToothLog::new();
        log.set_mode(LogMode::Composite(CompositeView::Cam1));
        let sample = CompositeSample {
            primary: true,
            secondary: false,
            tertiary: true,
            synced: true,
            revolution_one: false,
        };
        log.record(ToothSource::Cam, 0, true, 12_345, sample);
        let entry = log.entries()[0];
        assert_eq!(entry.value, 12_345);
        assert!(entry.flags.contains(CompositeFlags::PRI));
        assert!(!entry.flags.contains(CompositeFlags::SEC));
        assert!(entry.flags.contains(CompositeFlags::THIRD));
        assert!(entry.flags.contains(CompositeFlags::TRIG));
        assert!(entry.flags.contains(CompositeFlags::SYNC));
    }
}
