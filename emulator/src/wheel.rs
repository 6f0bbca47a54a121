//! Synthetic missing-tooth crank wheel with a single-tooth cam.

use ecu_core::Micros;
use ecu_core::crank_maths::MICROS_PER_MIN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    Crank,
    Cam,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WheelEdge {
    pub time: Micros,
    pub input: Input,
    /// Tooth position on the wheel, 1-based, counting missing teeth.
    pub position: u16,
    pub cam_high: bool,
}

/// Tooth positions run over two revolutions so the cam can mark the first.
#[derive(Clone, Debug)]
pub struct Wheel {
    teeth: u16,
    missing: u8,
    rpm: u16,
    /// Index of the next tooth slot in `[0, 2 * teeth)`.
    slot: u16,
    cam_pending: bool,
    last_time: Micros,
}

impl Wheel {
    pub fn new(teeth: u16, missing: u8, rpm: u16) -> Self {
        let teeth = teeth.max(1);
        Self {
            teeth,
            missing: clamp_missing(teeth, missing),
            rpm,
            slot: 0,
            cam_pending: false,
            last_time: 0,
        }
    }

    pub fn rpm(&self) -> u16 {
        self.rpm
    }

    pub fn teeth(&self) -> u16 {
        self.teeth
    }

    pub fn set_rpm(&mut self, rpm: u16) {
        self.rpm = rpm;
    }

    pub fn set_geometry(&mut self, teeth: u16, missing: u8) {
        self.teeth = teeth.max(1);
        self.missing = clamp_missing(self.teeth, missing);
        self.slot = 0;
        self.cam_pending = false;
    }

    /// Microseconds between adjacent tooth slots, `None` while stopped.
    pub fn slot_time(&self) -> Option<u32> {
        if self.rpm == 0 {
            return None;
        }
        Some(MICROS_PER_MIN / (u32::from(self.rpm) * u32::from(self.teeth)))
    }

    /// Real teeth per revolution.
    pub fn edges_per_revolution(&self) -> u32 {
        u32::from(self.teeth.saturating_sub(u16::from(self.missing)).max(1))
    }

    fn is_missing(&self, slot: u16) -> bool {
        slot % self.teeth >= self.teeth.saturating_sub(u16::from(self.missing))
    }

    /// Next edge after `now`, `None` while the wheel is stopped.
    pub fn next_edge(&mut self, now: Micros) -> Option<WheelEdge> {
        let slot_time = self.slot_time()?;
        if self.last_time == 0 || now.wrapping_sub(self.last_time) > slot_time * u32::from(self.teeth) {
            self.last_time = now;
        }

        if self.cam_pending {
            self.cam_pending = false;
            return Some(WheelEdge {
                time: self.last_time + slot_time / 2,
                input: Input::Cam,
                position: self.slot,
                cam_high: true,
            });
        }

        let mut elapsed = slot_time;
        while self.is_missing(self.slot) {
            self.slot = (self.slot + 1) % (self.teeth * 2);
            elapsed += slot_time;
        }
        let slot = self.slot;
        self.slot = (self.slot + 1) % (self.teeth * 2);
        self.last_time += elapsed;
        // The cam tooth sits half a slot after the third crank tooth of
        // the first revolution.
        self.cam_pending = slot == 2;
        Some(WheelEdge {
            time: self.last_time,
            input: Input::Crank,
            position: slot % self.teeth + 1,
            cam_high: slot < self.teeth,
        })
    }
}

/// At least one real tooth per revolution.
fn clamp_missing(teeth: u16, missing: u8) -> u8 {
    u8::try_from(teeth - 1).unwrap_or(u8::MAX).min(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crank_gaps(wheel: &mut Wheel, count: usize) -> Vec<u32> {
        let mut now = 1_000;
        let mut last_crank = now;
        let mut gaps = Vec::new();
        while gaps.len() < count {
            let edge = wheel.next_edge(now).expect("wheel turning");
            if edge.input == Input::Crank {
                gaps.push(edge.time - last_crank);
                last_crank = edge.time;
            }
            now = edge.time;
        }
        gaps
    }

    #[test]
    fn missing_tooth_doubles_one_gap() {
        let mut wheel = Wheel::new(36, 1, 1_000);
        let gaps = crank_gaps(&mut wheel, 71);
        assert_eq!(gaps.iter().filter(|&&gap| gap == 1_666).count(), 69);
        assert_eq!(gaps[35], 3_332);
        assert_eq!(gaps[70], 3_332);
    }

    #[test]
    fn cam_fires_once_per_cycle() {
        let mut wheel = Wheel::new(12, 0, 2_000);
        let mut now = 1;
        let mut cams = 0;
        for _ in 0..(24 * 3 + 3) {
            let edge = wheel.next_edge(now).expect("wheel turning");
            if edge.input == Input::Cam {
                cams += 1;
            }
            now = edge.time;
        }
        assert_eq!(cams, 3);
    }

    #[test]
    fn stopped_wheel_has_no_edges() {
        let mut wheel = Wheel::new(36, 1, 0);
        assert!(wheel.next_edge(10).is_none());
    }
}
