//! Angle targets to scheduler timeouts.
//!
//! Everything here is pure integer maths over the current crank angle and
//! the angle converter. The main loop calls these once per tooth and hands
//! the results to the scheduler; a zero timeout means the target has already
//! passed and nothing should be scheduled.

use crate::crank_maths::{AngleConverter, Degrees, wrap_angle};
use crate::scheduler::ScheduleStatus;

/// Start and end of one coil's dwell, in crank degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IgnitionAngles {
    pub start: Degrees,
    pub end: Degrees,
}

/// Degrees covered by a pulse of `pulse_width` microseconds at the current speed.
#[must_use]
pub fn pulse_degrees(pulse_width: u32, converter: &AngleConverter) -> Degrees {
    converter.time_to_angle(pulse_width) as Degrees
}

/// Angle at which an injector must open so a pulse of `pulse_degrees`
/// closes at `injection_angle` past the channel's TDC.
#[must_use]
pub const fn injector_start_angle(
    pulse_degrees: Degrees,
    channel_degrees: Degrees,
    injection_angle: Degrees,
    max_angle: Degrees,
) -> Degrees {
    wrap_angle(injection_angle + channel_degrees - pulse_degrees, max_angle)
}

/// Microseconds until the injector should open, or zero when the start
/// angle has passed and the channel is not already running.
#[must_use]
pub fn injector_timeout(
    status: ScheduleStatus,
    channel_degrees: Degrees,
    start_angle: Degrees,
    crank_angle: Degrees,
    max_angle: Degrees,
    converter: &AngleConverter,
) -> u32 {
    timeout(status, channel_degrees, start_angle, crank_angle, max_angle, converter)
}

/// Dwell window for a channel firing `advance` degrees before its TDC at
/// `channel_degrees`.
#[must_use]
pub const fn ignition_angles(
    dwell_degrees: Degrees,
    channel_degrees: Degrees,
    advance: Degrees,
    max_angle: Degrees,
) -> IgnitionAngles {
    let end = wrap_angle(channel_degrees - advance, max_angle);
    IgnitionAngles {
        start: wrap_angle(end - dwell_degrees, max_angle),
        end,
    }
}

/// Trailing coil of a rotary, firing `split_degrees` after the leading one.
#[must_use]
pub const fn rotary_trailing_angles(
    dwell_degrees: Degrees,
    leading_end: Degrees,
    split_degrees: Degrees,
    max_angle: Degrees,
) -> IgnitionAngles {
    let end = wrap_angle(leading_end + split_degrees, max_angle);
    IgnitionAngles {
        start: wrap_angle(end - dwell_degrees, max_angle),
        end,
    }
}

/// Microseconds until the coil should start charging, or zero when the
/// start angle has passed and the channel is not already running.
#[must_use]
pub fn ignition_timeout(
    status: ScheduleStatus,
    start_angle: Degrees,
    channel_degrees: Degrees,
    crank_angle: Degrees,
    max_angle: Degrees,
    converter: &AngleConverter,
) -> u32 {
    timeout(status, channel_degrees, start_angle, crank_angle, max_angle, converter)
}

fn timeout(
    status: ScheduleStatus,
    channel_degrees: Degrees,
    start_angle: Degrees,
    crank_angle: Degrees,
    max_angle: Degrees,
    converter: &AngleConverter,
) -> u32 {
    // Measure both angles from the channel's own TDC so the comparison
    // never straddles the wrap point.
    let crank = wrap_angle(crank_angle - channel_degrees, max_angle);
    let mut start = wrap_angle(start_angle - channel_degrees, max_angle);
    // A running channel will be queued, so its next start is a cycle away.
    if start <= crank && status == ScheduleStatus::Running {
        start += max_angle;
    }
    if start > crank {
        converter.angle_to_time((start - crank) as u32)
    } else {
        0
    }
}
