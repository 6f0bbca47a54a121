//! Diagnostic console over the USB serial link.
//!
//! Bytes from the host are gathered into lines by [`LineBuffer`]; each
//! complete line is parsed with the shared console grammar and answered by
//! [`respond`] against the live decoder and output banks. Wheel simulation
//! commands only exist in the emulator.

use core::fmt::{self, Write};

use ecu_core::console::{self, Command, LogCommand, OutputBank, ScheduleCommand};
use ecu_core::scheduler::CompareTimer;
use ecu_core::tooth_log::{CompositeView, LogMode};
use ecu_core::{Micros, TriggerConfig, TriggerSystem};
use heapless::Vec;

use crate::outputs::Outputs;
use crate::status;

/// Longest accepted command line.
pub const LINE_CAPACITY: usize = 96;

const LOG_VALUES_PER_LINE: usize = 8;

/// Collects input bytes until a line terminator arrives.
pub struct LineBuffer {
    bytes: Vec<u8, LINE_CAPACITY>,
    overflowed: bool,
    /// The buffer holds a line already handed out.
    complete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEvent<'a> {
    Line(&'a str),
    /// The line exceeded [`LINE_CAPACITY`] and was dropped.
    Overflow,
    /// The line was not valid UTF-8.
    Invalid,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            overflowed: false,
            complete: false,
        }
    }

    /// Feeds one byte. Returns an event when it completes a non-blank line;
    /// the line stays borrowed until the next push.
    pub fn push(&mut self, byte: u8) -> Option<LineEvent<'_>> {
        if core::mem::take(&mut self.complete) {
            self.bytes.clear();
        }
        match byte {
            b'\r' | b'\n' => {
                if core::mem::take(&mut self.overflowed) {
                    self.bytes.clear();
                    return Some(LineEvent::Overflow);
                }
                self.complete = true;
                match core::str::from_utf8(&self.bytes) {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(LineEvent::Line(line.trim())),
                    Err(_) => Some(LineEvent::Invalid),
                }
            }
            // Backspace and delete.
            0x08 | 0x7F => {
                self.bytes.pop();
                None
            }
            byte => {
                if self.bytes.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Answers one console line. Errors are reported in the reply text as
/// `ERR ...`; the result only fails when `out` runs out of room.
pub fn respond<T: CompareTimer, const N: usize>(
    line: &str,
    system: &TriggerSystem,
    outputs: &mut Outputs<T, N>,
    now: Micros,
    out: &mut impl Write,
) -> fmt::Result {
    let command = match console::parse(line) {
        Ok(command) => command,
        Err(err) => return writeln!(out, "ERR syntax {err}"),
    };
    match command {
        Command::Pattern(kind) => select(system.config().with_pattern(kind), system, outputs, now, out),
        Command::Teeth { teeth, missing } => {
            select(system.config().with_teeth(teeth, missing), system, outputs, now, out)
        }
        Command::Filter(filter) => select(system.config().with_filter(filter), system, outputs, now, out),
        Command::Reset => select(system.config(), system, outputs, now, out),
        Command::Rpm(_) | Command::Run(_) | Command::Step(_) => {
            writeln!(out, "ERR wheel simulation is emulator only")
        }
        Command::Status => {
            writeln!(out, "{}", system.status(now))?;
            let published = status::snapshot();
            writeln!(out, "stalls={} overdwell={}", published.stalls, published.overdwell)
        }
        Command::Angle => {
            let status = system.status(now);
            if status.sync.has_any() {
                writeln!(out, "angle {} at t={}us", status.crank_angle, now)
            } else {
                writeln!(out, "angle unknown, no sync")
            }
        }
        Command::Schedule(request) => schedule(request, outputs, now, out),
        Command::Log(action) => log(action, system, out),
        Command::Help(topic) => console::write_help(out, topic),
    }
}

fn select<T: CompareTimer, const N: usize>(
    config: TriggerConfig,
    system: &TriggerSystem,
    outputs: &mut Outputs<T, N>,
    now: Micros,
    out: &mut impl Write,
) -> fmt::Result {
    match system.select(config, now) {
        Ok(edges) => {
            outputs.apply_targets(system);
            writeln!(
                out,
                "pattern {} teeth {}-{} filter {:?} edges {:?}",
                config.pattern, config.teeth, config.missing_teeth, config.filter, edges
            )
        }
        Err(err) => writeln!(out, "ERR config {err}"),
    }
}

fn schedule<T: CompareTimer, const N: usize>(
    request: ScheduleCommand,
    outputs: &mut Outputs<T, N>,
    now: Micros,
    out: &mut impl Write,
) -> fmt::Result {
    let channel = usize::from(request.channel);
    let (name, result) = match request.bank {
        OutputBank::Fuel => ("fuel", outputs.fuel.set(channel, request.delay, request.duration, false)),
        OutputBank::Ignition => ("ign", outputs.ignition.set(channel, request.delay, request.duration, false)),
    };
    if let Err(err) = result {
        return writeln!(out, "ERR schedule {err}");
    }
    let status = match request.bank {
        OutputBank::Fuel => outputs.fuel.channel(channel).map(|s| s.status()),
        OutputBank::Ignition => outputs.ignition.channel(channel).map(|s| s.status()),
    };
    let start = now.wrapping_add(request.delay);
    writeln!(
        out,
        "{name} {channel} {} start t={start}us end t={}us",
        status.unwrap_or_default(),
        start.wrapping_add(request.duration)
    )
}

fn log(action: LogCommand, system: &TriggerSystem, out: &mut impl Write) -> fmt::Result {
    match action {
        LogCommand::Tooth => {
            system.set_log_mode(LogMode::Tooth);
            writeln!(out, "tooth logger on")
        }
        LogCommand::Composite => {
            system.set_log_mode(LogMode::Composite(CompositeView::Cam1));
            writeln!(out, "composite logger on")
        }
        LogCommand::Off => {
            system.set_log_mode(LogMode::Off);
            writeln!(out, "logger off")
        }
        LogCommand::Dump => {
            let Some(entries) = system.take_log() else {
                return writeln!(out, "capture not complete");
            };
            writeln!(out, "{} entries", entries.len())?;
            for chunk in entries.chunks(LOG_VALUES_PER_LINE) {
                out.write_str(" ")?;
                for entry in chunk {
                    match entry.flags.bits() {
                        0 => write!(out, " {}", entry.value)?,
                        flags => write!(out, " {}/{flags:02x}", entry.value)?,
                    }
                }
                out.write_str("\n")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecu_core::scheduler::{ScheduleStatus, SimTimer};
    use ecu_core::tooth_log::TOOTH_LOG_SIZE;
    use ecu_core::decoders::NoHooks;
    use ecu_core::{DecoderKind, Edge};
    use heapless::String;

    use crate::outputs::CHANNELS;

    fn fixture() -> (TriggerSystem, Outputs<SimTimer, CHANNELS>) {
        let system = TriggerSystem::new(TriggerConfig::new()).expect("valid config");
        let outputs = Outputs::new([SimTimer::new(); CHANNELS], [SimTimer::new(); CHANNELS]);
        (system, outputs)
    }

    fn reply(line: &str, system: &TriggerSystem, outputs: &mut Outputs<SimTimer, CHANNELS>) -> String<4096> {
        let mut out = String::new();
        respond(line, system, outputs, 20_000, &mut out).expect("reply fits");
        out
    }

    fn feed<'a>(buffer: &'a mut LineBuffer, input: &[u8]) -> Option<LineEvent<'a>> {
        let (last, rest) = input.split_last()?;
        for &byte in rest {
            assert!(buffer.push(byte).is_none());
        }
        buffer.push(*last)
    }

    #[test]
    fn line_buffer_yields_trimmed_lines() {
        let mut buffer = LineBuffer::new();
        assert_eq!(feed(&mut buffer, b"  status \r"), Some(LineEvent::Line("status")));
        assert_eq!(buffer.push(b'\n'), None);
        assert_eq!(feed(&mut buffer, b"   \n"), None);
        assert_eq!(feed(&mut buffer, b"angx\x08le\n"), Some(LineEvent::Line("angle")));
    }

    #[test]
    fn line_buffer_drops_overlong_input() {
        let mut buffer = LineBuffer::new();
        let long = [b'a'; LINE_CAPACITY + 4];
        for &byte in &long {
            assert!(buffer.push(byte).is_none());
        }
        assert_eq!(buffer.push(b'\n'), Some(LineEvent::Overflow));
        assert_eq!(feed(&mut buffer, b"help\n"), Some(LineEvent::Line("help")));
    }

    #[test]
    fn pattern_change_reselects_the_decoder() {
        let (system, mut outputs) = fixture();
        let text = reply("pattern gm-24x", &system, &mut outputs);
        assert!(text.starts_with("pattern gm-24x"), "{text}");
        assert_eq!(system.kind(), DecoderKind::Gm24x);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let (system, mut outputs) = fixture();
        let text = reply("teeth 36 40", &system, &mut outputs);
        assert!(text.starts_with("ERR config"), "{text}");
        assert_eq!(system.config().missing_teeth, 1);
    }

    #[test]
    fn simulation_commands_are_refused() {
        let (system, mut outputs) = fixture();
        assert!(reply("run 3", &system, &mut outputs).starts_with("ERR wheel simulation"));
        assert!(reply("bogus", &system, &mut outputs).starts_with("ERR syntax"));
    }

    #[test]
    fn schedule_arms_the_requested_channel() {
        let (system, mut outputs) = fixture();
        let text = reply("schedule ign 1 500 2000", &system, &mut outputs);
        assert!(text.starts_with("ign 1 pending start t=20500us end t=22500us"), "{text}");
        assert_eq!(outputs.ignition.channel(1).map(|s| s.status()), Some(ScheduleStatus::Pending));

        let text = reply("schedule fuel 9 500 2000", &system, &mut outputs);
        assert!(text.starts_with("ERR schedule"), "{text}");
    }

    #[test]
    fn log_dump_waits_for_a_full_capture() {
        let (system, mut outputs) = fixture();
        assert_eq!(reply("log on", &system, &mut outputs).as_str(), "tooth logger on\n");
        assert_eq!(reply("log dump", &system, &mut outputs).as_str(), "capture not complete\n");

        let mut now = 1_000;
        for _ in 0..TOOTH_LOG_SIZE + 8 {
            now += 1_000;
            system.primary_edge(Edge::at(now), &mut NoHooks);
        }
        let text = reply("log dump", &system, &mut outputs);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("128 entries"));
        assert_eq!(lines.count(), TOOTH_LOG_SIZE / LOG_VALUES_PER_LINE);
    }

    #[test]
    fn status_includes_fault_counters() {
        let (system, mut outputs) = fixture();
        let text = reply("status", &system, &mut outputs);
        let mut lines = text.lines();
        assert!(lines.next().is_some_and(|line| line.starts_with("rpm=0 angle=0 sync=none")), "{text}");
        assert!(lines.next().is_some_and(|line| line.starts_with("stalls=")), "{text}");
    }

    #[test]
    fn angle_needs_sync() {
        let (system, mut outputs) = fixture();
        assert_eq!(reply("angle", &system, &mut outputs).as_str(), "angle unknown, no sync\n");
    }
}
