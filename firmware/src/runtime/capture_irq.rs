use ecu_core::decoders::{NoHooks, ToothHooks};
use ecu_core::{Edge, TriggerSystem};
use embassy_stm32::interrupt;

use super::{ARM, OUTPUTS, SYSTEM};
use crate::hw::capture::{self, TriggerInput};

/// Trigger edges, already timestamped by the capture unit. Decoding runs
/// here; arming the outputs is left to the arm task.
#[interrupt]
unsafe fn TIM2() {
    let Some(system) = SYSTEM.snapshot() else {
        return;
    };
    let (crank, cam, second_cam) = capture::levels();
    OUTPUTS.lock(|outputs| {
        for input in TriggerInput::ALL {
            let Some(time) = capture::take(input) else {
                continue;
            };
            let edge = Edge::at(time).with_levels(crank, cam, second_cam);
            match outputs.as_mut() {
                Some(outputs) => decode(system, input, edge, &mut outputs.ignition),
                None => decode(system, input, edge, &mut NoHooks),
            }
            if input == TriggerInput::Crank {
                ARM.signal(());
            }
        }
    });
}

fn decode(system: &TriggerSystem, input: TriggerInput, edge: Edge, hooks: &mut impl ToothHooks) {
    match input {
        TriggerInput::Crank => system.primary_edge(edge, hooks),
        TriggerInput::Cam => system.secondary_edge(edge, hooks),
        TriggerInput::SecondCam => system.tertiary_edge(edge, hooks),
    }
}
