use embassy_stm32::interrupt;

use super::{OUTPUTS, micros};
use crate::outputs::CHANNELS;

/// TIM3 (injectors) and TIM4 (coils) share one vector.
#[interrupt]
unsafe fn TIM3_TIM4() {
    let now = micros();
    OUTPUTS.lock(|outputs| {
        let Some(outputs) = outputs else {
            return;
        };
        for channel in 0..CHANNELS {
            if outputs.fuel.channel(channel).is_some_and(|s| s.timer().take_match()) {
                outputs.fuel.on_compare(channel, now);
            }
            if outputs.ignition.channel(channel).is_some_and(|s| s.timer().take_match()) {
                outputs.ignition.on_compare(channel, now);
            }
        }
    });
}
