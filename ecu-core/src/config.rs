//! Trigger and output configuration consumed by the decoders.
//!
//! The configuration is read when a decoder is (re)selected and copied into
//! the decoder context, so interrupt handlers never observe a half-written
//! value.

use core::fmt;

use crate::crank_maths::Degrees;
use crate::decoders::DecoderKind;

/// Debounce aggressiveness, as a fraction of the last measured tooth gap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerFilter {
    Off,
    /// 25% of the previous gap.
    #[default]
    Lite,
    /// 50% of the previous gap.
    Medium,
    /// 75% of the previous gap.
    Aggressive,
}

impl TriggerFilter {
    /// Filter time for a measured gap.
    #[must_use]
    pub const fn apply(self, gap: u32) -> u32 {
        match self {
            TriggerFilter::Off => 0,
            TriggerFilter::Lite => gap >> 2,
            TriggerFilter::Medium => gap >> 1,
            TriggerFilter::Aggressive => (gap.wrapping_mul(3)) >> 2,
        }
    }
}

/// Whether the primary wheel turns at crank or cam speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerSpeed {
    #[default]
    Crank,
    Cam,
}

/// Layout of the secondary (cam) wheel on missing-tooth and dual-wheel setups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecondaryPattern {
    #[default]
    Single,
    FourMinusOne,
    /// Cam level is sampled at tooth one instead of counting edges.
    Poll,
    FiveThreeTwo,
    Toyota3,
}

/// Sensor edge that produces a tooth event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerEdge {
    #[default]
    Rising,
    Falling,
    Both,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Strokes {
    Two,
    #[default]
    Four,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SparkMode {
    #[default]
    Wasted,
    Single,
    WastedCop,
    Sequential,
    Rotary,
}

/// Variable valve timing measurement settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VvtConfig {
    pub enabled: bool,
    /// Exhaust cam measured on the tertiary input.
    pub vvt2_enabled: bool,
    pub closed_loop: bool,
    /// Cam angle at 0% duty for VVT1, removed from the measured angle in closed loop.
    pub cl0_duty_angle: i16,
    /// As `cl0_duty_angle` for VVT2.
    pub vvt2_cl0_duty_angle: i16,
    /// Minimum closed-loop angle (used by the Rover MEMS pattern).
    pub cl_min_angle: i16,
    /// Low-pass weight applied to new VVT angle samples.
    pub angle_filter: u8,
}

/// Complete trigger configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TriggerConfig {
    pub pattern: DecoderKind,
    /// Teeth on the primary wheel including missing ones.
    pub teeth: u16,
    pub missing_teeth: u8,
    /// Crank angle ATDC of tooth one. May be negative.
    pub trigger_angle: i16,
    /// Tooth angle multiplier for the non-360 dual wheel.
    pub trigger_angle_multiplier: u8,
    pub filter: TriggerFilter,
    pub speed: TriggerSpeed,
    pub secondary: SecondaryPattern,
    /// Cam level that marks revolution one in poll mode.
    pub poll_level_high: bool,
    pub primary_edge: TriggerEdge,
    pub secondary_edge: TriggerEdge,
    pub tertiary_edge: TriggerEdge,
    pub strokes: Strokes,
    pub cylinders: u8,
    pub spark_mode: SparkMode,
    pub sequential_fuel: bool,
    /// Engine speed below which cranking algorithms are used.
    pub crank_rpm: u16,
    /// Revolutions before cranking RPM is trusted.
    pub stg_cycles: u8,
    /// Re-check cam sync on every cycle.
    pub use_resync: bool,
    pub per_tooth_ign: bool,
    /// Hold spark at tooth edges while cranking.
    pub ign_cranklock: bool,
    pub vvt: VvtConfig,
    /// Maximum dwell in milliseconds; `None` disables overdwell protection.
    pub dwell_limit_ms: Option<u8>,
}

impl TriggerConfig {
    /// 36-1 crank wheel, 4-cylinder, wasted spark.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pattern: DecoderKind::MissingTooth,
            teeth: 36,
            missing_teeth: 1,
            trigger_angle: 0,
            trigger_angle_multiplier: 1,
            filter: TriggerFilter::Lite,
            speed: TriggerSpeed::Crank,
            secondary: SecondaryPattern::Single,
            poll_level_high: true,
            primary_edge: TriggerEdge::Rising,
            secondary_edge: TriggerEdge::Rising,
            tertiary_edge: TriggerEdge::Rising,
            strokes: Strokes::Four,
            cylinders: 4,
            spark_mode: SparkMode::Wasted,
            sequential_fuel: false,
            crank_rpm: 400,
            stg_cycles: 0,
            use_resync: false,
            per_tooth_ign: false,
            ign_cranklock: false,
            vvt: VvtConfig {
                enabled: false,
                vvt2_enabled: false,
                closed_loop: false,
                cl0_duty_angle: 0,
                vvt2_cl0_duty_angle: 0,
                cl_min_angle: 0,
                angle_filter: 0,
            },
            dwell_limit_ms: None,
        }
    }

    #[must_use]
    pub const fn with_pattern(mut self, pattern: DecoderKind) -> Self {
        self.pattern = pattern;
        self
    }

    #[must_use]
    pub const fn with_teeth(mut self, teeth: u16, missing: u8) -> Self {
        self.teeth = teeth;
        self.missing_teeth = missing;
        self
    }

    #[must_use]
    pub const fn with_trigger_angle(mut self, angle: i16) -> Self {
        self.trigger_angle = angle;
        self
    }

    #[must_use]
    pub const fn with_filter(mut self, filter: TriggerFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub const fn with_speed(mut self, speed: TriggerSpeed) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub const fn with_secondary(mut self, secondary: SecondaryPattern) -> Self {
        self.secondary = secondary;
        self
    }

    #[must_use]
    pub const fn with_cylinders(mut self, cylinders: u8) -> Self {
        self.cylinders = cylinders;
        self
    }

    #[must_use]
    pub const fn with_spark_mode(mut self, mode: SparkMode) -> Self {
        self.spark_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_sequential_fuel(mut self, sequential: bool) -> Self {
        self.sequential_fuel = sequential;
        self
    }

    #[must_use]
    pub const fn with_strokes(mut self, strokes: Strokes) -> Self {
        self.strokes = strokes;
        self
    }

    #[must_use]
    pub const fn with_crank_rpm(mut self, rpm: u16) -> Self {
        self.crank_rpm = rpm;
        self
    }

    #[must_use]
    pub const fn with_per_tooth_ign(mut self, enabled: bool) -> Self {
        self.per_tooth_ign = enabled;
        self
    }

    #[must_use]
    pub const fn with_vvt(mut self, vvt: VvtConfig) -> Self {
        self.vvt = vvt;
        self
    }

    #[must_use]
    pub const fn with_dwell_limit(mut self, limit_ms: Option<u8>) -> Self {
        self.dwell_limit_ms = limit_ms;
        self
    }

    /// Either fuel or spark is fired per cylinder over a 720 degree cycle.
    #[must_use]
    pub const fn is_sequential(&self) -> bool {
        self.sequential_fuel || matches!(self.spark_mode, SparkMode::Sequential)
    }

    #[must_use]
    pub const fn is_four_stroke(&self) -> bool {
        matches!(self.strokes, Strokes::Four)
    }

    #[must_use]
    pub const fn is_cam_speed(&self) -> bool {
        matches!(self.speed, TriggerSpeed::Cam)
    }

    /// Crank angle range for ignition events.
    #[must_use]
    pub const fn max_ignition_angle(&self) -> Degrees {
        if matches!(self.spark_mode, SparkMode::Sequential) {
            720
        } else {
            360
        }
    }

    /// Crank angle range for injection events.
    #[must_use]
    pub const fn max_injection_angle(&self) -> Degrees {
        if self.sequential_fuel { 720 } else { 360 }
    }

    /// Crank angle range reported by the decoders.
    #[must_use]
    pub const fn max_crank_angle(&self) -> Degrees {
        let ign = self.max_ignition_angle();
        let inj = self.max_injection_angle();
        if ign > inj { ign } else { inj }
    }

    /// Overdwell limit in microseconds.
    #[must_use]
    pub fn dwell_limit_us(&self) -> Option<u32> {
        self.dwell_limit_ms.map(|ms| u32::from(ms) * 1_000)
    }

    /// Checks the values every decoder relies on.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.teeth == 0 {
            return Err(ConfigError::NoTeeth);
        }
        if self.teeth > MAX_TEETH {
            return Err(ConfigError::TooManyTeeth(self.teeth));
        }
        if u16::from(self.missing_teeth) >= self.teeth {
            return Err(ConfigError::TooManyMissingTeeth {
                teeth: self.teeth,
                missing: self.missing_teeth,
            });
        }
        if self.cylinders == 0 || self.cylinders > 8 {
            return Err(ConfigError::CylinderCount(self.cylinders));
        }
        if self.trigger_angle_multiplier == 0 {
            return Err(ConfigError::ZeroAngleMultiplier);
        }
        if !self.pattern.supports_cylinders(self.cylinders) {
            return Err(ConfigError::UnsupportedCylinders {
                pattern: self.pattern,
                cylinders: self.cylinders,
            });
        }
        Ok(self)
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest wheel a decoder can resolve to at least one degree per tooth.
pub const MAX_TEETH: u16 = 255;

/// Configuration rejected by [`TriggerConfig::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    NoTeeth,
    TooManyTeeth(u16),
    TooManyMissingTeeth { teeth: u16, missing: u8 },
    CylinderCount(u8),
    ZeroAngleMultiplier,
    UnsupportedCylinders { pattern: DecoderKind, cylinders: u8 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoTeeth => f.write_str("trigger wheel needs at least one tooth"),
            ConfigError::TooManyTeeth(teeth) => write!(f, "{teeth} teeth exceeds the {MAX_TEETH} tooth limit"),
            ConfigError::TooManyMissingTeeth { teeth, missing } => {
                write!(f, "{missing} missing teeth on a {teeth} tooth wheel")
            }
            ConfigError::CylinderCount(count) => write!(f, "unsupported cylinder count {count}"),
            ConfigError::ZeroAngleMultiplier => f.write_str("tooth angle multiplier is zero"),
            ConfigError::UnsupportedCylinders { pattern, cylinders } => {
                write!(f, "{pattern} does not support {cylinders} cylinders")
            }
        }
    }
}

impl core::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TriggerSystem;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(TriggerConfig::new().validate(), Ok(TriggerConfig::new()));
    }

    #[test]
    fn rejects_wheel_without_teeth() {
        let config = TriggerConfig::new().with_teeth(0, 0);
        assert_eq!(config.validate(), Err(ConfigError::NoTeeth));
    }

    #[test]
    fn rejects_wheel_finer_than_a_degree_per_tooth() {
        let config = TriggerConfig::new().with_teeth(400, 1);
        assert_eq!(config.validate(), Err(ConfigError::TooManyTeeth(400)));
        let cam = TriggerConfig::new().with_speed(TriggerSpeed::Cam).with_teeth(MAX_TEETH, 1);
        assert!(cam.validate().is_ok());
        assert!(TriggerSystem::new(cam).is_ok());
        assert!(TriggerSystem::new(TriggerConfig::new().with_teeth(MAX_TEETH, 2)).is_ok());
    }

    #[test]
    fn rejects_missing_teeth_covering_wheel() {
        let config = TriggerConfig::new().with_teeth(4, 4);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyMissingTeeth { .. })
        ));
    }

    #[test]
    fn rejects_unsupported_cylinder_count() {
        let config = TriggerConfig::new()
            .with_pattern(DecoderKind::Mitsubishi4G63)
            .with_cylinders(5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedCylinders { .. })
        ));
    }

    #[test]
    fn sequential_spark_widens_ignition_range() {
        let config = TriggerConfig::new().with_spark_mode(SparkMode::Sequential);
        assert_eq!(config.max_ignition_angle(), 720);
        assert_eq!(config.max_injection_angle(), 360);
        assert_eq!(config.max_crank_angle(), 720);
    }

    #[test]
    fn filter_levels_scale_gap() {
        assert_eq!(TriggerFilter::Off.apply(800), 0);
        assert_eq!(TriggerFilter::Lite.apply(800), 200);
        assert_eq!(TriggerFilter::Medium.apply(800), 400);
        assert_eq!(TriggerFilter::Aggressive.apply(800), 600);
    }
}
