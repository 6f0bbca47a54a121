//! Console command table.
//!
//! The parser looks commands up here by keyword and `help` prints from the
//! same table, so the two never disagree on names or arguments.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Pattern,
    Teeth,
    Rpm,
    Run,
    Step,
    Status,
    Angle,
    Filter,
    Schedule,
    Log,
    Reset,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<36} {}", self.usage, self.summary)
    }
}

const COMMANDS: [CommandSpec; 12] = [
    CommandSpec {
        name: "pattern",
        tag: CommandTag::Pattern,
        usage: "pattern <name|id>",
        summary: "select the trigger decoder",
    },
    CommandSpec {
        name: "teeth",
        tag: CommandTag::Teeth,
        usage: "teeth <count> <missing>",
        summary: "set the primary wheel geometry",
    },
    CommandSpec {
        name: "rpm",
        tag: CommandTag::Rpm,
        usage: "rpm <speed>",
        summary: "set the simulated engine speed",
    },
    CommandSpec {
        name: "run",
        tag: CommandTag::Run,
        usage: "run <revolutions>",
        summary: "spin the wheel and service outputs",
    },
    CommandSpec {
        name: "step",
        tag: CommandTag::Step,
        usage: "step [edges]",
        summary: "deliver the next edges one at a time",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status",
        summary: "print sync, speed and counters",
    },
    CommandSpec {
        name: "angle",
        tag: CommandTag::Angle,
        usage: "angle",
        summary: "print the current crank angle",
    },
    CommandSpec {
        name: "filter",
        tag: CommandTag::Filter,
        usage: "filter off|lite|medium|aggressive",
        summary: "set the primary noise filter",
    },
    CommandSpec {
        name: "schedule",
        tag: CommandTag::Schedule,
        usage: "schedule fuel|ign <ch> <delay> <duration>",
        summary: "request an output event in microseconds",
    },
    CommandSpec {
        name: "log",
        tag: CommandTag::Log,
        usage: "log on|composite|off|dump",
        summary: "control the tooth logger",
    },
    CommandSpec {
        name: "reset",
        tag: CommandTag::Reset,
        usage: "reset",
        summary: "re-initialise the decoder and outputs",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [command]",
        summary: "list commands",
    },
];

#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Writes the usage of `topic`, or of every command.
///
/// # Errors
///
/// Propagates errors from `out`.
pub fn write_help(out: &mut impl fmt::Write, topic: Option<&str>) -> fmt::Result {
    match topic {
        Some(name) => match find(name) {
            Some(spec) => writeln!(out, "{spec}"),
            None => writeln!(out, "no command named `{name}`"),
        },
        None => COMMANDS.iter().try_for_each(|spec| writeln!(out, "{spec}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Lines = heapless::String<2048>;

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(find("SCHEDULE").map(|spec| spec.tag), Some(CommandTag::Schedule));
        assert!(find("reboot").is_none());
    }

    #[test]
    fn help_lists_every_command() {
        let mut out = Lines::new();
        write_help(&mut out, None).expect("help fits");
        assert_eq!(out.lines().count(), commands().len());
    }

    #[test]
    fn help_topic_prints_usage() {
        let mut out = Lines::new();
        write_help(&mut out, Some("teeth")).expect("help fits");
        assert!(out.starts_with("teeth <count> <missing>"));
    }
}
