use core::panic::PanicInfo;

use defmt::error;

use crate::hw::{COIL_ACTIONS, INJECTOR_ACTIONS};

/// Drops every injector and coil driver before trapping so a fault never
/// leaves an output energised.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    cortex_m::interrupt::disable();
    for (_, release) in INJECTOR_ACTIONS.iter().chain(COIL_ACTIONS.iter()) {
        release();
    }
    error!("PANIC: {}", defmt::Display2Format(info));
    cortex_m::asm::udf();
}
