use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use ecu_core::{Micros, Shared, TriggerConfig, TriggerSystem};
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::timer::low_level::Timer;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;

use crate::hw::{CompareUnit, HwTimer, WIRING, capture};
use crate::outputs::{CHANNELS, Outputs};
use crate::telemetry::TelemetryRecorder;
use crate::usb::UsbDeviceStorage;

mod arm_task;
mod capture_irq;
mod compare_irq;
mod console_task;
mod housekeeping_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Injector and coil banks, shared by the capture and compare interrupts,
/// the arm and housekeeping tasks and the console.
pub(super) static OUTPUTS: Shared<Option<Outputs<HwTimer, CHANNELS>>> = Shared::new(None);
pub(super) static TELEMETRY: Mutex<CriticalSectionRawMutex, RefCell<TelemetryRecorder>> =
    Mutex::new(RefCell::new(TelemetryRecorder::new()));
/// Decoder reached from the capture interrupt.
pub(super) static SYSTEM: Shared<Option<&'static TriggerSystem>> = Shared::new(None);
/// Raised by the capture interrupt after each crank edge.
pub(super) static ARM: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static TRIGGER: StaticCell<TriggerSystem> = StaticCell::new();
static USB_STORAGE: StaticCell<UsbDeviceStorage> = StaticCell::new();

/// Decoder clock, read from the capture timer.
pub(super) fn micros() -> Micros {
    capture::now()
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA4,
        PA5,
        PA6,
        PA7,
        PB4,
        PB5,
        PB6,
        PB7,
        TIM2,
        TIM3,
        TIM4,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    // Output drivers stay owned here; the compare callbacks drive them
    // through the port set/reset registers.
    let _injectors = [
        Output::new(PB4, Level::Low, Speed::VeryHigh),
        Output::new(PB5, Level::Low, Speed::VeryHigh),
        Output::new(PB6, Level::Low, Speed::VeryHigh),
        Output::new(PB7, Level::Low, Speed::VeryHigh),
    ];
    let _coils = [
        Output::new(PA4, Level::Low, Speed::VeryHigh),
        Output::new(PA5, Level::Low, Speed::VeryHigh),
        Output::new(PA6, Level::Low, Speed::VeryHigh),
        Output::new(PA7, Level::Low, Speed::VeryHigh),
    ];

    let capture_timer = Timer::new(TIM2);
    let fuel_timer = Timer::new(TIM3);
    let ignition_timer = Timer::new(TIM4);
    CompareUnit::Fuel.start(fuel_timer.get_clock_frequency().0);
    CompareUnit::Ignition.start(ignition_timer.get_clock_frequency().0);
    capture::start(capture_timer.get_clock_frequency().0);

    let Ok(system) = TriggerSystem::new(TriggerConfig::new()) else {
        defmt::panic!("default trigger configuration rejected");
    };
    let system: &'static TriggerSystem = TRIGGER.init(system);

    let mut outputs = Outputs::new(CompareUnit::Fuel.timers(), CompareUnit::Ignition.timers());
    outputs.wire(WIRING);
    outputs.apply_targets(system);
    let primed = outputs.prime(system);
    OUTPUTS.replace(Some(outputs));
    SYSTEM.replace(Some(system));
    capture::configure(system.edges());

    hal::interrupt::TIM3_TIM4.set_priority(Priority::P0);
    hal::interrupt::TIM2.set_priority(Priority::P1);
    unsafe {
        hal::interrupt::TIM3_TIM4.enable();
        hal::interrupt::TIM2.enable();
    }

    defmt::info!("runtime: decoder {} ready, {} injectors primed", system.kind(), primed);

    spawner
        .spawn(arm_task::run(system))
        .expect("failed to spawn arm task");
    spawner
        .spawn(housekeeping_task::run(system))
        .expect("failed to spawn housekeeping task");
    spawner
        .spawn(console_task::run(system, USB_STORAGE.init(UsbDeviceStorage::new()), USB, PA12, PA11))
        .expect("failed to spawn console task");

    core::future::pending::<()>().await;
}
