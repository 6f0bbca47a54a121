//! Diagnostic console shared by the firmware debug link and the emulator.

pub mod catalog;
pub mod grammar;

pub use catalog::write_help;
pub use grammar::{Command, LogCommand, OutputBank, ParseError, ScheduleCommand, parse};
