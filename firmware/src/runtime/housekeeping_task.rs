use ecu_core::TriggerSystem;
use embassy_time::{Duration, Instant, Ticker};

use super::{OUTPUTS, TELEMETRY, micros};
use crate::status;

const PERIOD: Duration = Duration::from_millis(1);

/// Millisecond tick: RPM, stall and overdwell checks, then publishes the
/// status and records any engine events.
#[embassy_executor::task]
pub async fn run(system: &'static TriggerSystem) -> ! {
    let mut ticker = Ticker::every(PERIOD);
    loop {
        ticker.next().await;
        let now = micros();
        let tick = OUTPUTS
            .lock(|outputs| outputs.as_mut().map(|outputs| outputs.housekeeping(system, now)))
            .unwrap_or_default();

        let engine = system.status(now);
        status::publish(&engine);
        if tick.stalled {
            status::record_stall();
        }
        if tick.overdwell > 0 {
            status::record_overdwell(tick.overdwell);
        }
        let timestamp = Instant::now();
        TELEMETRY.lock(|recorder| recorder.borrow_mut().observe(&engine, tick, timestamp));
    }
}
