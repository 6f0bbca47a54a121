use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ecu_core::config::{ConfigError, TriggerConfig};
use ecu_core::console::{self, Command, LogCommand, OutputBank, ScheduleCommand};
use ecu_core::outputs::Outputs;
use ecu_core::scheduler::{Bank, BankKind, ScheduleError, SimTimer};
use ecu_core::tooth_log::{CompositeView, LogMode, ToothLogBuffer};
use ecu_core::{Edge, Micros, TriggerSystem};

use crate::wheel::{Input, Wheel, WheelEdge};

const CHANNELS: usize = 4;
const HOUSEKEEPING_PERIOD: u32 = 1_000;
const START_TIME: Micros = 10_000;
const DEFAULT_RPM: u16 = 1_000;

const LOG_VALUES_PER_LINE: usize = 8;

#[derive(Debug)]
pub enum CommandError {
    Parse(String),
    Config(ConfigError),
    Schedule(ScheduleError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(detail) => write!(f, "syntax {detail}"),
            CommandError::Config(err) => write!(f, "config {err}"),
            CommandError::Schedule(err) => write!(f, "schedule {err}"),
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(err: ConfigError) -> Self {
        CommandError::Config(err)
    }
}

impl From<ScheduleError> for CommandError {
    fn from(err: ScheduleError) -> Self {
        CommandError::Schedule(err)
    }
}

/// Completed output events.
#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    injections: u32,
    sparks: u32,
    overdwell: u32,
    stalls: u32,
}

pub struct Session {
    config: TriggerConfig,
    trigger: TriggerSystem,
    wheel: Wheel,
    outputs: Outputs<SimTimer, CHANNELS>,
    now: Micros,
    next_housekeeping: Micros,
    counters: Counters,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(transcript: Option<&Path>) -> io::Result<Self> {
        let config = TriggerConfig::new();
        let trigger = TriggerSystem::new(config).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        let mut session = Self {
            config,
            trigger,
            wheel: Wheel::new(config.teeth, config.missing_teeth, DEFAULT_RPM),
            outputs: Outputs::new([SimTimer::new(); CHANNELS], [SimTimer::new(); CHANNELS]),
            now: START_TIME,
            next_housekeeping: START_TIME + HOUSEKEEPING_PERIOD,
            counters: Counters::default(),
            transcript,
        };
        session.sync_timers();
        session.outputs.apply_targets(&session.trigger);
        Ok(session)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(self.now, TranscriptRole::Host, trimmed)?;
        }

        let lines = match self.execute(trimmed) {
            Ok(lines) => lines,
            Err(err) => vec![format!("ERR {err}")],
        };

        if let Some(transcript) = self.transcript.as_mut() {
            for line in &lines {
                transcript.append_line(self.now, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(lines)
    }

    pub fn execute(&mut self, line: &str) -> Result<Vec<String>, CommandError> {
        let command = console::parse(line).map_err(|err| CommandError::Parse(err.to_string()))?;
        match command {
            Command::Pattern(kind) => self.select(self.config.with_pattern(kind)),
            Command::Teeth { teeth, missing } => {
                let lines = self.select(self.config.with_teeth(teeth, missing))?;
                self.wheel.set_geometry(teeth, missing);
                Ok(lines)
            }
            Command::Rpm(rpm) => {
                self.wheel.set_rpm(rpm);
                Ok(vec![match rpm {
                    0 => "wheel stopped".to_string(),
                    rpm => format!("wheel at {rpm}rpm"),
                }])
            }
            Command::Run(revolutions) => Ok(self.run(revolutions)),
            Command::Step(edges) => Ok(self.step(edges)),
            Command::Status => Ok(self.status_lines()),
            Command::Angle => {
                let status = self.trigger.status(self.now);
                Ok(vec![if status.sync.has_any() {
                    format!("angle {} at t={}us", status.crank_angle, self.now)
                } else {
                    "angle unknown, no sync".to_string()
                }])
            }
            Command::Filter(filter) => self.select(self.config.with_filter(filter)),
            Command::Schedule(request) => self.schedule(request),
            Command::Log(action) => Ok(self.log(action)),
            Command::Reset => self.reset(),
            Command::Help(topic) => {
                let mut text = String::new();
                // Writing into a String cannot fail.
                let _ = console::write_help(&mut text, topic);
                Ok(text.lines().map(str::to_string).collect())
            }
        }
    }

    fn select(&mut self, config: TriggerConfig) -> Result<Vec<String>, CommandError> {
        let edges = self.trigger.select(config, self.now)?;
        self.config = config;
        self.outputs.apply_targets(&self.trigger);
        Ok(vec![format!(
            "pattern {} teeth {}-{} filter {:?} edges {:?}",
            config.pattern, config.teeth, config.missing_teeth, config.filter, edges
        )])
    }

    fn reset(&mut self) -> Result<Vec<String>, CommandError> {
        self.trigger = TriggerSystem::new(self.config)?;
        self.outputs = Outputs::new([SimTimer::new(); CHANNELS], [SimTimer::new(); CHANNELS]);
        self.counters = Counters::default();
        self.sync_timers();
        self.outputs.apply_targets(&self.trigger);
        Ok(vec!["decoder and outputs reset".to_string()])
    }

    fn schedule(&mut self, request: ScheduleCommand) -> Result<Vec<String>, CommandError> {
        let channel = usize::from(request.channel);
        let status = match request.bank {
            OutputBank::Fuel => {
                self.outputs.fuel.set(channel, request.delay, request.duration, false)?;
                self.outputs.fuel.channel(channel).map(|s| s.status())
            }
            OutputBank::Ignition => {
                self.outputs.ignition.set(channel, request.delay, request.duration, false)?;
                self.outputs.ignition.channel(channel).map(|s| s.status())
            }
        };
        let bank = match request.bank {
            OutputBank::Fuel => "fuel",
            OutputBank::Ignition => "ign",
        };
        Ok(vec![format!(
            "{bank} {channel} {} start t={}us end t={}us",
            status.unwrap_or_default(),
            self.now + request.delay,
            self.now + request.delay + request.duration
        )])
    }

    fn log(&mut self, action: LogCommand) -> Vec<String> {
        match action {
            LogCommand::Tooth => {
                self.trigger.set_log_mode(LogMode::Tooth);
                vec!["tooth logger on".to_string()]
            }
            LogCommand::Composite => {
                self.trigger.set_log_mode(LogMode::Composite(CompositeView::Cam1));
                vec!["composite logger on".to_string()]
            }
            LogCommand::Off => {
                self.trigger.set_log_mode(LogMode::Off);
                vec!["logger off".to_string()]
            }
            LogCommand::Dump => match self.trigger.take_log() {
                Some(entries) => describe_log(&entries),
                None => vec!["capture not complete".to_string()],
            },
        }
    }

    /// Spins the wheel for `revolutions` and arms outputs from the decoded
    /// angle after every crank tooth.
    fn run(&mut self, revolutions: u16) -> Vec<String> {
        if self.wheel.slot_time().is_none() {
            return vec!["wheel stopped, set `rpm` first".to_string()];
        }
        let started = self.now;
        let before = self.counters;
        let target = u32::from(revolutions) * self.wheel.edges_per_revolution();
        let mut crank_edges = 0;
        while crank_edges < target {
            let Some(edge) = self.wheel.next_edge(self.now) else {
                break;
            };
            self.deliver(edge);
            if edge.input == Input::Crank {
                crank_edges += 1;
                self.outputs.arm(&self.trigger, self.now);
            }
        }
        let status = self.trigger.status(self.now);
        vec![
            format!(
                "{revolutions} revolutions at {}rpm in {}us",
                self.wheel.rpm(),
                self.now - started
            ),
            status.to_string(),
            format!(
                "injections={} sparks={} overdwell={} stalls={}",
                self.counters.injections - before.injections,
                self.counters.sparks - before.sparks,
                self.counters.overdwell - before.overdwell,
                self.counters.stalls - before.stalls,
            ),
        ]
    }

    fn step(&mut self, edges: u16) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..edges {
            let Some(edge) = self.wheel.next_edge(self.now) else {
                lines.push("wheel stopped, set `rpm` first".to_string());
                break;
            };
            self.deliver(edge);
            let status = self.trigger.status(self.now);
            let input = match edge.input {
                Input::Crank => "crank",
                Input::Cam => "cam",
            };
            lines.push(format!(
                "t={}us {input} slot {} tooth={} angle={} sync={}",
                edge.time, edge.position, status.tooth_count, status.crank_angle, status.sync
            ));
        }
        lines
    }

    fn status_lines(&self) -> Vec<String> {
        let status = self.trigger.status(self.now);
        vec![
            format!(
                "t={}us pattern {} wheel {}-{} at {}rpm",
                self.now,
                self.config.pattern,
                self.config.teeth,
                self.config.missing_teeth,
                self.wheel.rpm()
            ),
            status.to_string(),
            format!("fuel {}", describe_bank(&self.outputs.fuel)),
            format!("ign  {}", describe_bank(&self.outputs.ignition)),
        ]
    }

    fn deliver(&mut self, edge: WheelEdge) {
        self.advance_to(edge.time);
        match edge.input {
            Input::Crank => {
                let levels = Edge::at(edge.time).with_levels(true, edge.cam_high, false);
                self.trigger.primary_edge(levels, &mut self.outputs.ignition);
            }
            Input::Cam => {
                let levels = Edge::at(edge.time).with_levels(false, true, false);
                self.trigger.secondary_edge(levels, &mut self.outputs.ignition);
            }
        }
    }

    /// Moves simulated time to `until`, stopping at every compare match and
    /// housekeeping tick on the way.
    fn advance_to(&mut self, until: Micros) {
        while self.now < until {
            let next = self
                .outputs
                .fuel
                .channels()
                .iter()
                .chain(self.outputs.ignition.channels())
                .filter_map(|schedule| schedule.timer().micros_to_compare())
                .map(|wait| self.now + wait)
                .fold(until.min(self.next_housekeeping), Micros::min);
            self.counters.injections += service(&mut self.outputs.fuel, next);
            self.counters.sparks += service(&mut self.outputs.ignition, next);
            self.now = next;
            if next >= self.next_housekeeping {
                self.housekeeping();
                self.next_housekeeping += HOUSEKEEPING_PERIOD;
            }
        }
    }

    fn housekeeping(&mut self) {
        let tick = self.outputs.housekeeping(&self.trigger, self.now);
        if tick.stalled {
            self.counters.stalls += 1;
        }
        self.counters.overdwell += u32::try_from(tick.overdwell).unwrap_or(u32::MAX);
    }

    fn sync_timers(&mut self) {
        let now = self.now;
        for schedule in self.outputs.fuel.channels_mut() {
            schedule.timer_mut().advance_to(now);
        }
        for schedule in self.outputs.ignition.channels_mut() {
            schedule.timer_mut().advance_to(now);
        }
    }
}

/// Moves every timer in `bank` to `now` and runs matching compare
/// handlers. Returns how many outputs turned off.
fn service<K: BankKind, const N: usize>(bank: &mut Bank<SimTimer, K, N>, now: Micros) -> u32 {
    let mut ended = 0;
    for channel in 0..N {
        let Some(schedule) = bank.channel_mut(channel) else {
            continue;
        };
        let was_running = schedule.status().is_running();
        if schedule.timer_mut().advance_to(now) {
            schedule.on_compare(now);
            if was_running && !schedule.status().is_running() {
                ended += 1;
            }
        }
    }
    ended
}

fn describe_bank<K: BankKind, const N: usize>(bank: &Bank<SimTimer, K, N>) -> String {
    bank.channels()
        .iter()
        .map(|schedule| schedule.status().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_log(entries: &ToothLogBuffer) -> Vec<String> {
    let mut lines = vec![format!("{} entries", entries.len())];
    for chunk in entries.chunks(LOG_VALUES_PER_LINE) {
        let values: Vec<String> = chunk
            .iter()
            .map(|entry| match entry.flags.bits() {
                0 => entry.value.to_string(),
                flags => format!("{}/{flags:02x}", entry.value),
            })
            .collect();
        lines.push(format!("  {}", values.join(" ")));
    }
    lines
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# ECU emulator transcript")?;
        writeln!(self.writer, "# times are simulated microseconds")?;
        self.writer.flush()
    }

    fn append_line(&mut self, now: Micros, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{now:>10}us] {} {line}", role.prefix())?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
