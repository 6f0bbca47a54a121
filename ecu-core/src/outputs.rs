//! Injector and coil banks driven from the decoded crank angle.
//!
//! An arming pass runs after every crank edge and requests each channel's
//! next event from the freshest angle. The housekeeping tick refreshes RPM,
//! clears a stalled decoder and cuts coils that have dwelled past the limit.
//!
//! A sequential setup that only holds half sync falls back to 360° windows,
//! one channel per pair of cylinders, until the cam confirms the phase.

use heapless::Vec;

use crate::config::TriggerConfig;
use crate::crank_maths::{AngleConverter, Degrees, Micros};
use crate::engine::TriggerSystem;
use crate::schedule_calc;
use crate::scheduler::{Callback, CompareTimer, FuelBank, IgnitionBank, ScheduleStatus};
use crate::status::SyncStatus;

/// Crank range a half-synced engine can place events in.
const HALF_CYCLE: Degrees = 360;

/// Start and end action of one output channel.
pub type Action = (Callback, Callback);

/// Fixed fuel and spark request until a load model feeds real values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Demand {
    /// Injector open time in microseconds.
    pub pulse_width: u32,
    /// Angle after each channel's TDC at which injection ends.
    pub injection_angle: Degrees,
    /// Coil charge time in microseconds.
    pub dwell: u32,
    /// Spark advance before TDC.
    pub advance: i16,
    /// Injector pulse fired once at power-up.
    pub priming_pulse: u32,
}

impl Default for Demand {
    fn default() -> Self {
        Self {
            pulse_width: 3_000,
            injection_angle: 355,
            dwell: 3_000,
            advance: 10,
            priming_pulse: 2_000,
        }
    }
}

/// What one housekeeping pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Housekeeping {
    pub rpm: u16,
    pub stalled: bool,
    /// Coils forced off for exceeding the dwell limit.
    pub overdwell: usize,
}

/// Channel layout for a configuration at a given sync level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Phasing {
    pub injectors: usize,
    pub injection_range: Degrees,
    pub coils: usize,
    pub ignition_range: Degrees,
    /// Each injector channel drives its cylinder and the one 360° away.
    pub paired_fuel: bool,
    /// Each coil channel drives its cylinder and the one 360° away.
    pub paired_spark: bool,
}

impl Phasing {
    #[must_use]
    pub fn new(config: &TriggerConfig, sync: SyncStatus, available: usize) -> Self {
        let fallback = sync == SyncStatus::Half;
        let paired_fuel = fallback && config.sequential_fuel;
        let paired_spark = fallback && config.is_sequential();
        Self {
            injectors: channel_count(config.cylinders, config.sequential_fuel && !paired_fuel, available),
            injection_range: if paired_fuel { HALF_CYCLE } else { config.max_injection_angle() },
            coils: channel_count(config.cylinders, config.is_sequential() && !paired_spark, available),
            ignition_range: if paired_spark { HALF_CYCLE } else { config.max_ignition_angle() },
            paired_fuel,
            paired_spark,
        }
    }

    /// Channel index and TDC offset of each injector in use.
    pub fn injector_offsets(&self) -> impl Iterator<Item = (usize, Degrees)> + use<> {
        channel_offsets(self.injectors, self.injection_range)
    }

    /// Channel index and TDC offset of each coil in use.
    pub fn coil_offsets(&self) -> impl Iterator<Item = (usize, Degrees)> + use<> {
        channel_offsets(self.coils, self.ignition_range)
    }
}

/// One per cylinder when sequential, otherwise paired.
fn channel_count(cylinders: u8, sequential: bool, available: usize) -> usize {
    let cylinders = usize::from(cylinders).min(available);
    if sequential { cylinders } else { (cylinders / 2).max(1) }
}

/// Channel index and its TDC offset, spread evenly over `range`.
fn channel_offsets(channels: usize, range: Degrees) -> impl Iterator<Item = (usize, Degrees)> {
    let spacing = range / Degrees::try_from(channels.max(1)).unwrap_or(1);
    (0..channels).zip((0..).map(move |index| index * spacing))
}

/// Output actions per channel. The paired sets drive channel `i` together
/// with the output 360° away and are switched in while only half synced.
#[derive(Clone, Copy)]
pub struct Wiring<const N: usize> {
    pub injectors: [Action; N],
    pub coils: [Action; N],
    pub paired_injectors: [Action; N],
    pub paired_coils: [Action; N],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputKind {
    Injector,
    Coil,
}

/// One channel's next event, before the channel state is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub output: OutputKind,
    pub channel: usize,
    pub tdc: Degrees,
}

/// Angles for one arming pass, taken from a decoder snapshot so the output
/// banks need only be locked per request.
#[derive(Clone, Copy, Debug)]
pub struct ArmPass {
    phasing: Phasing,
    angle: Degrees,
    converter: AngleConverter,
    demand: Demand,
    pulse: Degrees,
    dwell: Degrees,
}

impl ArmPass {
    /// `None` until the decoder has sync and a speed.
    #[must_use]
    pub fn new(system: &TriggerSystem, demand: Demand, available: usize, now: Micros) -> Option<Self> {
        let status = system.status(now);
        if !status.sync.has_any() || status.rpm == 0 {
            return None;
        }
        let config = system.config();
        let converter = system.with_state(|state| state.ctx.angle);
        Some(Self {
            phasing: Phasing::new(&config, status.sync, available),
            angle: status.crank_angle,
            converter,
            demand,
            pulse: schedule_calc::pulse_degrees(demand.pulse_width, &converter),
            dwell: schedule_calc::pulse_degrees(demand.dwell, &converter),
        })
    }

    #[must_use]
    pub const fn phasing(&self) -> Phasing {
        self.phasing
    }

    pub fn requests(&self) -> impl Iterator<Item = Request> + use<> {
        let fuel = self.phasing.injector_offsets().map(|(channel, tdc)| Request {
            output: OutputKind::Injector,
            channel,
            tdc,
        });
        let spark = self.phasing.coil_offsets().map(|(channel, tdc)| Request {
            output: OutputKind::Coil,
            channel,
            tdc,
        });
        fuel.chain(spark)
    }

    /// Microseconds until the request's event starts, zero once it passed.
    fn timeout(&self, request: Request, state: ScheduleStatus) -> u32 {
        match request.output {
            OutputKind::Injector => {
                let range = self.phasing.injection_range;
                let start =
                    schedule_calc::injector_start_angle(self.pulse, request.tdc, self.demand.injection_angle, range);
                schedule_calc::injector_timeout(state, request.tdc, start, self.angle, range, &self.converter)
            }
            OutputKind::Coil => {
                let range = self.phasing.ignition_range;
                let advance = Degrees::from(self.demand.advance);
                let window = schedule_calc::ignition_angles(self.dwell, request.tdc, advance, range);
                schedule_calc::ignition_timeout(state, window.start, request.tdc, self.angle, range, &self.converter)
            }
        }
    }
}

pub struct Outputs<T, const N: usize> {
    pub fuel: FuelBank<T, N>,
    pub ignition: IgnitionBank<T, N>,
    demand: Demand,
    wiring: Option<Wiring<N>>,
    phasing: Option<Phasing>,
}

impl<T: CompareTimer, const N: usize> Outputs<T, N> {
    #[must_use]
    pub fn new(fuel: [T; N], ignition: [T; N]) -> Self {
        Self {
            fuel: FuelBank::new(fuel),
            ignition: IgnitionBank::new(ignition),
            demand: Demand::default(),
            wiring: None,
            phasing: None,
        }
    }

    /// Installs the output actions. Paired actions take over whenever the
    /// layout falls back to 360°.
    pub fn wire(&mut self, wiring: Wiring<N>) {
        self.wiring = Some(wiring);
        self.connect();
    }

    #[must_use]
    pub const fn demand(&self) -> Demand {
        self.demand
    }

    /// Layout currently in force, once an arming pass or
    /// [`Outputs::apply_targets`] has set one.
    #[must_use]
    pub const fn phasing(&self) -> Option<Phasing> {
        self.phasing
    }

    pub fn set_demand(&mut self, demand: Demand, system: &TriggerSystem) {
        self.demand = demand;
        self.apply_targets(system);
    }

    /// Hands the coil end angles for the current sync level to the decoder
    /// for per-tooth correction.
    pub fn apply_targets(&mut self, system: &TriggerSystem) {
        let sync = system.with_state(|state| state.ctx.sync);
        let phasing = Phasing::new(&system.config(), sync, N);
        self.phasing = Some(phasing);
        self.send_targets(system, phasing);
    }

    /// Switches to `phasing` if it differs from the layout in force.
    /// Returns whether anything changed.
    pub fn rephase(&mut self, system: &TriggerSystem, phasing: Phasing) -> bool {
        if self.phasing == Some(phasing) {
            return false;
        }
        let previous = self.phasing.replace(phasing);
        if previous.is_some_and(|previous| previous.paired_spark != phasing.paired_spark) {
            info!("ignition now {}", if phasing.paired_spark { "wasted spark" } else { "sequential" });
        }
        for channel in phasing.injectors..N {
            self.fuel.cancel_pending(channel);
        }
        for channel in phasing.coils..N {
            self.ignition.cancel_pending(channel);
        }
        self.connect();
        self.send_targets(system, phasing);
        true
    }

    /// Fires the power-up priming pulse on every injector in use.
    pub fn prime(&mut self, system: &TriggerSystem) -> usize {
        let phasing = Phasing::new(&system.config(), SyncStatus::Full, N);
        self.fuel.begin_priming(self.demand.priming_pulse, phasing.injectors)
    }

    /// Requests one channel's next event. Returns whether the scheduler
    /// accepted it.
    pub fn submit(&mut self, pass: &ArmPass, request: Request) -> bool {
        let (state, duration) = match request.output {
            OutputKind::Injector => (self.fuel.channel(request.channel), pass.demand.pulse_width),
            OutputKind::Coil => (self.ignition.channel(request.channel), pass.demand.dwell),
        };
        let state = state.map_or(ScheduleStatus::Off, |schedule| schedule.status());
        let timeout = pass.timeout(request, state);
        if timeout == 0 {
            return false;
        }
        let accepted = match request.output {
            OutputKind::Injector => self.fuel.set(request.channel, timeout, duration, true),
            OutputKind::Coil => self.ignition.set(request.channel, timeout, duration, true),
        };
        accepted.is_ok()
    }

    /// Requests the next injection and dwell on every active channel.
    /// Returns how many requests the scheduler accepted.
    pub fn arm(&mut self, system: &TriggerSystem, now: Micros) -> usize {
        let Some(pass) = ArmPass::new(system, self.demand, N, now) else {
            return 0;
        };
        self.rephase(system, pass.phasing());
        pass.requests().filter(|request| self.submit(&pass, *request)).count()
    }

    /// Millisecond tick.
    pub fn housekeeping(&mut self, system: &TriggerSystem, now: Micros) -> Housekeeping {
        let rpm = system.update_rpm(now);
        system.update_fixed_cranking();
        let stalled = system.check_stall(now);
        let overdwell = system
            .config()
            .dwell_limit_us()
            .map_or(0, |limit| self.ignition.sweep_overdwell(now, limit));
        Housekeeping {
            rpm,
            stalled,
            overdwell,
        }
    }

    fn connect(&mut self) {
        let Some(wiring) = self.wiring else {
            return;
        };
        let phasing = self.phasing;
        let paired_fuel = phasing.is_some_and(|p| p.paired_fuel);
        let paired_spark = phasing.is_some_and(|p| p.paired_spark);
        let injectors = if paired_fuel { wiring.paired_injectors } else { wiring.injectors };
        let coils = if paired_spark { wiring.paired_coils } else { wiring.coils };
        for (channel, (start, end)) in injectors.into_iter().enumerate() {
            let _ = self.fuel.set_callbacks(channel, start, end);
        }
        for (channel, (start, end)) in coils.into_iter().enumerate() {
            let _ = self.ignition.set_callbacks(channel, start, end);
        }
    }

    fn send_targets(&self, system: &TriggerSystem, phasing: Phasing) {
        let range = phasing.ignition_range;
        let advance = Degrees::from(self.demand.advance);
        let ends: Vec<Degrees, N> = phasing
            .coil_offsets()
            .map(|(_, tdc)| schedule_calc::ignition_angles(0, tdc, advance, range).end)
            .collect();
        system.set_ignition_targets(&ends, self.demand.advance);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::SparkMode;
    use crate::decoders::{Edge, NoHooks};
    use crate::scheduler::{Schedule, SimTimer};

    const CHANNELS: usize = 4;
    const GAP: u32 = 1_000;

    fn outputs() -> Outputs<SimTimer, CHANNELS> {
        Outputs::new([SimTimer::new(); CHANNELS], [SimTimer::new(); CHANNELS])
    }

    /// Four revolutions of a 36-1 wheel at 1667rpm with no cam. Returns the
    /// last edge time.
    fn spin(system: &TriggerSystem) -> Micros {
        let mut now = 10_000;
        for revolution in 0..4 {
            for tooth in 0..35 {
                let gap = if tooth == 0 && revolution > 0 { GAP * 2 } else { GAP };
                now += gap;
                system.primary_edge(Edge::at(now), &mut NoHooks);
                system.update_rpm(now);
            }
        }
        now
    }

    fn settle(outputs: &mut Outputs<SimTimer, CHANNELS>, now: Micros) {
        for schedule in outputs.fuel.channels_mut() {
            schedule.timer_mut().advance_to(now);
        }
        for schedule in outputs.ignition.channels_mut() {
            schedule.timer_mut().advance_to(now);
        }
    }

    fn pending(bank: &[Schedule<SimTimer>]) -> usize {
        bank.iter().filter(|s| s.status() == ScheduleStatus::Pending).count()
    }

    #[test]
    fn nothing_is_armed_without_sync() {
        let system = TriggerSystem::new(TriggerConfig::new()).expect("valid config");
        let mut outputs = outputs();
        assert_eq!(outputs.arm(&system, 50_000), 0);
        assert!(outputs.fuel.channels().iter().all(|s| s.status() == ScheduleStatus::Off));
    }

    #[test]
    fn wasted_spark_arms_paired_channels() {
        let system = TriggerSystem::new(TriggerConfig::new()).expect("valid config");
        let mut outputs = outputs();
        let now = spin(&system);
        settle(&mut outputs, now);

        assert_eq!(outputs.arm(&system, now), 4);
        assert_eq!(pending(outputs.fuel.channels()), 2);
        assert_eq!(pending(outputs.ignition.channels()), 2);
    }

    #[test]
    fn request_by_request_arming_matches_a_single_pass() {
        let system = TriggerSystem::new(TriggerConfig::new()).expect("valid config");
        let now = spin(&system);
        let mut whole = outputs();
        let mut split = outputs();
        settle(&mut whole, now);
        settle(&mut split, now);

        let armed = whole.arm(&system, now);
        let pass = ArmPass::new(&system, split.demand(), CHANNELS, now).expect("synced and turning");
        split.rephase(&system, pass.phasing());
        let accepted = pass.requests().filter(|request| split.submit(&pass, *request)).count();

        assert_eq!(accepted, armed);
        let banks = [
            (whole.fuel.channels(), split.fuel.channels()),
            (whole.ignition.channels(), split.ignition.channels()),
        ];
        for (whole, split) in banks {
            for (a, b) in whole.iter().zip(split) {
                assert_eq!(a.status(), b.status());
                assert_eq!(a.timer().micros_to_compare(), b.timer().micros_to_compare());
            }
        }
    }

    #[test]
    fn channel_counts_follow_mode_and_sync() {
        let config = TriggerConfig::new().with_spark_mode(SparkMode::Sequential);
        let full = Phasing::new(&config, SyncStatus::Full, CHANNELS);
        assert_eq!((full.coils, full.ignition_range, full.paired_spark), (4, 720, false));
        assert_eq!((full.injectors, full.injection_range), (2, 360));

        let half = Phasing::new(&config, SyncStatus::Half, CHANNELS);
        assert_eq!((half.coils, half.ignition_range, half.paired_spark), (2, 360, true));
        assert!(!half.paired_fuel);

        let eight = Phasing::new(&config.with_cylinders(8), SyncStatus::Full, CHANNELS);
        assert_eq!(eight.coils, 4);
        let single = Phasing::new(&TriggerConfig::new().with_cylinders(1), SyncStatus::Full, CHANNELS);
        assert_eq!(single.injectors, 1);

        let batch = TriggerConfig::new();
        assert_eq!(
            Phasing::new(&batch, SyncStatus::Half, CHANNELS),
            Phasing::new(&batch, SyncStatus::Full, CHANNELS)
        );
    }

    #[test]
    fn half_sync_falls_back_to_wasted_spark() {
        let config = TriggerConfig::new()
            .with_spark_mode(SparkMode::Sequential)
            .with_sequential_fuel(true);
        let system = TriggerSystem::new(config).expect("valid config");
        let mut outputs = outputs();
        outputs.apply_targets(&system);
        let now = spin(&system);
        settle(&mut outputs, now);

        assert_eq!(system.status(now).sync, SyncStatus::Half);
        assert_eq!(outputs.arm(&system, now), 4);
        assert_eq!(pending(outputs.ignition.channels()), 2);
        assert_eq!(pending(outputs.fuel.channels()), 2);
        assert!(outputs.ignition.channels()[2..].iter().all(|s| s.status() == ScheduleStatus::Off));

        let phasing = outputs.phasing().expect("layout chosen");
        assert!(phasing.paired_spark && phasing.paired_fuel);
        let ends = system.with_state(|state| state.ctx.ignition_end_angles);
        assert_eq!(&ends[..2], &[350, 170]);
    }

    #[test]
    fn full_sync_restores_sequential_layout() {
        let config = TriggerConfig::new().with_spark_mode(SparkMode::Sequential);
        let system = TriggerSystem::new(config).expect("valid config");
        let mut outputs = outputs();
        let half = Phasing::new(&config, SyncStatus::Half, CHANNELS);
        assert!(outputs.rephase(&system, half));
        assert!(!outputs.rephase(&system, half));

        let full = Phasing::new(&config, SyncStatus::Full, CHANNELS);
        assert!(outputs.rephase(&system, full));
        let ends = system.with_state(|state| state.ctx.ignition_end_angles);
        assert_eq!(&ends[..4], &[710, 170, 350, 530]);
    }

    static PAIRED_STARTS: AtomicUsize = AtomicUsize::new(0);
    static SINGLE_STARTS: AtomicUsize = AtomicUsize::new(0);

    fn paired_start() {
        PAIRED_STARTS.fetch_add(1, Ordering::Relaxed);
    }

    fn single_start() {
        SINGLE_STARTS.fetch_add(1, Ordering::Relaxed);
    }

    fn idle() {}

    #[test]
    fn paired_actions_drive_coils_while_half_synced() {
        let config = TriggerConfig::new().with_spark_mode(SparkMode::Sequential);
        let system = TriggerSystem::new(config).expect("valid config");
        let mut outputs = outputs();
        let single: [Action; CHANNELS] = [(single_start, idle); CHANNELS];
        outputs.wire(Wiring {
            injectors: [(idle, idle); CHANNELS],
            coils: single,
            paired_injectors: [(idle, idle); CHANNELS],
            paired_coils: [(paired_start, idle); CHANNELS],
        });
        outputs.rephase(&system, Phasing::new(&config, SyncStatus::Half, CHANNELS));

        settle(&mut outputs, 1_000);
        outputs.ignition.set(0, 100, 2_000, false).expect("accepted");
        let mut now = 1_000;
        while now < 1_200 {
            now += 4;
            if let Some(schedule) = outputs.ignition.channel_mut(0) {
                if schedule.timer_mut().advance_to(now) {
                    schedule.on_compare(now);
                }
            }
        }
        assert_eq!(PAIRED_STARTS.load(Ordering::Relaxed), 1);
        assert_eq!(SINGLE_STARTS.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn targets_follow_advance() {
        let config = TriggerConfig::new().with_spark_mode(SparkMode::Sequential);
        let system = TriggerSystem::new(config).expect("valid config");
        let mut outputs = outputs();
        let demand = Demand {
            advance: 20,
            ..Demand::default()
        };
        outputs.set_demand(demand, &system);
        assert_eq!(outputs.demand(), demand);
        let ends = system.with_state(|state| state.ctx.ignition_end_angles);
        assert_eq!(&ends[..4], &[700, 160, 340, 520]);
    }

    #[test]
    fn priming_opens_every_injector_in_use() {
        let config = TriggerConfig::new().with_sequential_fuel(true);
        let system = TriggerSystem::new(config).expect("valid config");
        let mut outputs = outputs();
        assert_eq!(outputs.prime(&system), 4);
        assert!(outputs.fuel.channels().iter().all(|s| s.status() == ScheduleStatus::Pending));
        assert!(outputs.ignition.channels().iter().all(|s| s.status() == ScheduleStatus::Off));
    }

    #[test]
    fn housekeeping_reports_a_stall_once() {
        let system = TriggerSystem::new(TriggerConfig::new()).expect("valid config");
        let mut outputs = outputs();
        let now = spin(&system);

        let tick = outputs.housekeeping(&system, now + 500);
        assert!(!tick.stalled);
        assert!(tick.rpm > 0);

        let later = now + 5_000_000;
        assert!(outputs.housekeeping(&system, later).stalled);
        let after = outputs.housekeeping(&system, later + 1_000);
        assert!(!after.stalled);
        assert_eq!(after.rpm, 0);
    }

    #[test]
    fn housekeeping_cuts_a_long_dwell() {
        let config = TriggerConfig::new().with_dwell_limit(Some(4));
        let system = TriggerSystem::new(config).expect("valid config");
        let mut outputs = outputs();
        let start = 1_000_000;
        settle(&mut outputs, start);
        outputs.ignition.set(0, 100, 30_000, false).expect("accepted");

        let mut now = start;
        while now < start + 200 {
            now += 4;
            if let Some(schedule) = outputs.ignition.channel_mut(0) {
                if schedule.timer_mut().advance_to(now) {
                    schedule.on_compare(now);
                }
            }
        }
        assert_eq!(outputs.ignition.channel(0).map(|s| s.status()), Some(ScheduleStatus::Running));
        assert_eq!(outputs.housekeeping(&system, start + 3_000).overdwell, 0);
        assert_eq!(outputs.housekeeping(&system, start + 5_000).overdwell, 1);
        assert_eq!(outputs.ignition.channel(0).map(|s| s.status()), Some(ScheduleStatus::Off));
    }
}
