use ecu_core::TriggerSystem;
use ecu_core::outputs::{ArmPass, Outputs};

use super::{ARM, OUTPUTS, micros};
use crate::outputs::CHANNELS;

/// Requests the next injection and spark after each crank edge. The banks
/// are locked once per channel so compare interrupts are never held off
/// for a whole pass.
#[embassy_executor::task]
pub async fn run(system: &'static TriggerSystem) -> ! {
    loop {
        ARM.wait().await;
        let Some(demand) = OUTPUTS.lock(|outputs| outputs.as_ref().map(Outputs::demand)) else {
            continue;
        };
        let Some(pass) = ArmPass::new(system, demand, CHANNELS, micros()) else {
            continue;
        };
        OUTPUTS.lock(|outputs| {
            if let Some(outputs) = outputs.as_mut() {
                outputs.rephase(system, pass.phasing());
            }
        });
        for request in pass.requests() {
            OUTPUTS.lock(|outputs| {
                if let Some(outputs) = outputs.as_mut() {
                    outputs.submit(&pass, request);
                }
            });
        }
    }
}
