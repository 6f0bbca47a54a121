//! Conversion between crank degrees and microseconds.
//!
//! The converter holds two fixed-point factors derived from the most recent
//! revolution time: microseconds per degree in UQ24.8 and degrees per
//! microsecond in UQ1.31. Both are recomputed only when the revolution time
//! changes, so conversions in interrupt context are a multiply and a shift.

/// Microsecond timestamp. Wraps at 2^32.
pub type Micros = u32;

/// Crank angle in whole degrees. Signed so offsets may be negative before wrapping.
pub type Degrees = i32;

pub const MICROS_PER_SEC: u32 = 1_000_000;
pub const MICROS_PER_MIN: u32 = 60_000_000;
/// Microseconds per degree at 1 RPM.
pub const MICROS_PER_DEG_1_RPM: u32 = 166_667;
/// Highest RPM the decoders will report.
pub const MAX_RPM: u16 = 18_000;

const MICROS_PER_DEGREE_SHIFT: u32 = 8;
const DEGREES_PER_MICRO_SHIFT: u32 = 31;

/// Angle/time conversion factors for the current engine speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AngleConverter {
    revolution_time: u32,
    micros_per_degree: u32,
    degrees_per_micro: u32,
}

impl AngleConverter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            revolution_time: 0,
            micros_per_degree: 0,
            degrees_per_micro: 0,
        }
    }

    /// Time of the last full crank revolution in microseconds.
    #[must_use]
    pub const fn revolution_time(&self) -> u32 {
        self.revolution_time
    }

    /// Updates the revolution time. Returns `true` when the value changed.
    ///
    /// A zero revolution time (stalled engine) keeps the previous factors.
    pub fn set_revolution_time(&mut self, revolution_time: u32) -> bool {
        if revolution_time == 0 || revolution_time == self.revolution_time {
            return false;
        }
        self.revolution_time = revolution_time;
        let rev = u64::from(revolution_time);
        self.micros_per_degree = ((rev << MICROS_PER_DEGREE_SHIFT) / 360) as u32;
        let scaled = 360_u64 << DEGREES_PER_MICRO_SHIFT;
        self.degrees_per_micro = ((scaled + rev / 2) / rev).min(u64::from(u32::MAX)) as u32;
        true
    }

    /// Microseconds needed to rotate `angle` degrees at the current speed.
    #[must_use]
    pub fn angle_to_time(&self, angle: u32) -> u32 {
        let micros = u64::from(angle) * u64::from(self.micros_per_degree);
        round_shift(micros, MICROS_PER_DEGREE_SHIFT) as u32
    }

    /// Degrees rotated in `time` microseconds at the current speed.
    #[must_use]
    pub fn time_to_angle(&self, time: u32) -> u32 {
        let degrees = u64::from(time) * u64::from(self.degrees_per_micro);
        round_shift(degrees, DEGREES_PER_MICRO_SHIFT) as u32
    }
}

const fn round_shift(value: u64, shift: u32) -> u64 {
    (value + (1 << (shift - 1))) >> shift
}

/// Projects elapsed time onto the angle covered by the last tooth gap.
///
/// Falls back to `fallback` when the gap is zero.
#[must_use]
pub fn interval_time_to_angle(time: u32, tooth_angle: u32, tooth_gap: u32, fallback: u32) -> u32 {
    if tooth_gap == 0 {
        return fallback;
    }
    (u64::from(time) * u64::from(tooth_angle) / u64::from(tooth_gap)) as u32
}

/// Wraps `angle` into `[0, max)`.
#[must_use]
pub const fn wrap_angle(angle: Degrees, max: Degrees) -> Degrees {
    if max <= 0 {
        return angle;
    }
    angle.rem_euclid(max)
}

/// RPM for a revolution time, or `None` when the result is out of range.
#[must_use]
pub fn rpm_from_revolution_time(revolution_time: u32) -> Option<u16> {
    if revolution_time == 0 {
        return None;
    }
    let rpm = (MICROS_PER_MIN + revolution_time / 2) / revolution_time;
    if rpm >= u32::from(MAX_RPM) {
        None
    } else {
        Some(rpm as u16)
    }
}

/// Moves `value` back into `[min, max]` by adding or subtracting `offset` once.
#[must_use]
pub const fn nudge(min: i32, max: i32, value: i32, offset: i32) -> i32 {
    if value < min {
        value + offset
    } else if value > max {
        value - offset
    } else {
        value
    }
}

/// First-order low-pass filter with an 8-bit weight on the previous value.
#[must_use]
pub const fn low_pass_filter(input: i32, alpha: u8, prior: i32) -> i32 {
    let alpha = alpha as i32;
    (input * (256 - alpha) + prior * alpha) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter_for_rpm(rpm: u32) -> AngleConverter {
        let mut converter = AngleConverter::new();
        converter.set_revolution_time(MICROS_PER_MIN / rpm);
        converter
    }

    #[test]
    fn angle_to_time_at_6000_rpm() {
        let converter = converter_for_rpm(6000);
        // 10000us per revolution, 27.78us per degree.
        assert_eq!(converter.angle_to_time(360), 10_000);
        assert_eq!(converter.angle_to_time(90), 2_500);
    }

    #[test]
    fn time_to_angle_at_3000_rpm() {
        let converter = converter_for_rpm(3000);
        assert_eq!(converter.time_to_angle(20_000), 360);
        assert_eq!(converter.time_to_angle(5_000), 90);
    }

    #[test]
    fn round_trip_stays_within_one_degree() {
        for rpm in (300..=10_000).step_by(100) {
            let converter = converter_for_rpm(rpm);
            for angle in (0..720_u32).step_by(7) {
                let back = converter.time_to_angle(converter.angle_to_time(angle));
                let error = back.abs_diff(angle);
                assert!(error <= 1, "rpm {rpm} angle {angle} came back as {back}");
            }
        }
    }

    #[test]
    fn zero_revolution_time_keeps_previous_factors() {
        let mut converter = AngleConverter::new();
        converter.set_revolution_time(36_000);
        let before = converter;
        assert!(!converter.set_revolution_time(0));
        assert_eq!(converter, before);
        assert_eq!(converter.angle_to_time(360), 36_000);
    }

    #[test]
    fn unchanged_revolution_time_reports_no_update() {
        let mut converter = converter_for_rpm(1000);
        assert!(!converter.set_revolution_time(60_000));
        assert!(converter.set_revolution_time(30_000));
    }

    #[test]
    fn multi_revolution_angles_convert() {
        let mut converter = AngleConverter::new();
        converter.set_revolution_time(36_000);
        assert_eq!(converter.angle_to_time(1440), 144_000);
    }

    #[test]
    fn wrap_angle_handles_negative_and_large() {
        assert_eq!(wrap_angle(-10, 720), 710);
        assert_eq!(wrap_angle(725, 720), 5);
        assert_eq!(wrap_angle(720, 720), 0);
        assert_eq!(wrap_angle(-730, 360), 350);
    }

    #[test]
    fn rpm_clamps_above_limit() {
        assert_eq!(rpm_from_revolution_time(36_000), Some(1667));
        assert_eq!(rpm_from_revolution_time(3_000), None);
        assert_eq!(rpm_from_revolution_time(0), None);
    }

    #[test]
    fn interval_projection_guards_zero_gap() {
        assert_eq!(interval_time_to_angle(500, 10, 1000, 7), 5);
        assert_eq!(interval_time_to_angle(500, 10, 0, 7), 7);
    }
}
