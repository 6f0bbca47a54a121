use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../wheel.rs"]
mod wheel;

use session::Session;

const TRANSCRIPT_DIR: &str = "transcripts";

fn main() -> io::Result<()> {
    record("missing-tooth-sync.log", &[
        "help",
        "log on",
        "step 5",
        "run 4",
        "status",
        "angle",
        "log dump",
    ])?;
    record("output-scheduling.log", &[
        "rpm 0",
        "schedule ign 0 1000 3000",
        "schedule ign 0 500 3000",
        "schedule fuel 1 200 0",
        "rpm 3000",
        "run 20",
        "status",
    ])?;
    record("pattern-change.log", &[
        "teeth 60 2",
        "rpm 2500",
        "run 3",
        "filter aggressive",
        "run 3",
        "pattern gm-24x",
        "status",
    ])?;
    Ok(())
}

fn record(name: &str, script: &[&str]) -> io::Result<()> {
    let path = Path::new(TRANSCRIPT_DIR).join(name);
    let mut session = Session::new(Some(&path))?;
    for line in script {
        session.handle_command(line)?;
    }
    Ok(())
}
