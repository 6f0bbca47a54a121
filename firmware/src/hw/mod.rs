//! Board wiring: compare timers and output pins.
//!
//! Injectors run from TIM3 and coils from TIM4, one capture/compare channel
//! per output. Both timers tick every 4us over a free-running 16-bit
//! counter, matching the scheduler's simulated timer.
//!
//! | Signal        | Pin                |
//! |---------------|--------------------|
//! | crank         | PA0 (TIM2_CH1)     |
//! | cam 1         | PA1 (TIM2_CH2)     |
//! | cam 2         | PA3 (TIM2_CH4)     |
//! | injectors 1-4 | PB4, PB5, PB6, PB7 |
//! | coils 1-4     | PA4, PA5, PA6, PA7 |

use ecu_core::outputs::{Action, Wiring};
use ecu_core::scheduler::CompareTimer;
use embassy_stm32::pac;
use embassy_stm32::pac::timer::TimGp16;

use crate::outputs::CHANNELS;

pub mod capture;

/// Compare timer tick rate.
pub const TICK_HZ: u32 = 250_000;
const TICK_SHIFT: u32 = 2;
const COUNTER_MASK: u32 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareUnit {
    Fuel,
    Ignition,
}

impl CompareUnit {
    const fn regs(self) -> TimGp16 {
        match self {
            CompareUnit::Fuel => pac::TIM3,
            CompareUnit::Ignition => pac::TIM4,
        }
    }

    /// One timer per channel of this unit.
    pub fn timers(self) -> [HwTimer; CHANNELS] {
        core::array::from_fn(|channel| HwTimer { unit: self, channel })
    }

    /// Sets the 4us tick from the timer's input clock and starts counting.
    pub fn start(self, clock_hz: u32) {
        let regs = self.regs();
        let prescaler = (clock_hz / TICK_HZ).saturating_sub(1);
        regs.cr1().modify(|w| w.set_cen(false));
        regs.psc().write_value(u16::try_from(prescaler).unwrap_or(u16::MAX));
        regs.arr().write(|w| w.set_arr(0xFFFF));
        regs.dier().write(|_| {});
        // Latch the prescaler.
        regs.egr().write(|w| w.set_ug(true));
        regs.sr().write(|_| {});
        regs.cr1().modify(|w| w.set_cen(true));
    }
}

/// One capture/compare channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwTimer {
    unit: CompareUnit,
    channel: usize,
}

impl HwTimer {
    /// Clears and reports a compare match while the interrupt is enabled.
    pub fn take_match(&self) -> bool {
        let regs = self.unit.regs();
        let pending = regs.sr().read().ccif(self.channel) && regs.dier().read().ccie(self.channel);
        if pending {
            self.clear_flag();
        }
        pending
    }

    fn clear_flag(&self) {
        // Status flags are write-zero-to-clear; ones leave the others alone.
        self.unit.regs().sr().write(|w| {
            w.0 = u32::MAX;
            w.set_ccif(self.channel, false);
        });
    }
}

impl CompareTimer for HwTimer {
    const MAX_PERIOD_US: u32 = COUNTER_MASK << TICK_SHIFT;
    const COUNTER_MASK: u32 = COUNTER_MASK;

    fn counter(&self) -> u32 {
        u32::from(self.unit.regs().cnt().read().cnt())
    }

    fn set_compare(&mut self, compare: u32) {
        let value = u16::try_from(compare & COUNTER_MASK).unwrap_or(0);
        self.unit.regs().ccr(self.channel).write(|w| w.set_ccr(value.into()));
    }

    fn compare(&self) -> u32 {
        u32::from(self.unit.regs().ccr(self.channel).read().ccr())
    }

    fn enable(&mut self) {
        self.clear_flag();
        self.unit.regs().dier().modify(|w| w.set_ccie(self.channel, true));
    }

    fn disable(&mut self) {
        self.unit.regs().dier().modify(|w| w.set_ccie(self.channel, false));
    }

    fn us_to_ticks(micros: u32) -> u32 {
        micros >> TICK_SHIFT
    }
}

macro_rules! output_pins {
    ($($on:ident, $off:ident => $port:ident, $pin:literal;)*) => {
        $(
            fn $on() {
                pac::$port.bsrr().write(|w| w.set_bs($pin, true));
            }

            fn $off() {
                pac::$port.bsrr().write(|w| w.set_br($pin, true));
            }
        )*
    };
}

output_pins! {
    injector1_open, injector1_close => GPIOB, 4;
    injector2_open, injector2_close => GPIOB, 5;
    injector3_open, injector3_close => GPIOB, 6;
    injector4_open, injector4_close => GPIOB, 7;
    coil1_charge, coil1_fire => GPIOA, 4;
    coil2_charge, coil2_fire => GPIOA, 5;
    coil3_charge, coil3_fire => GPIOA, 6;
    coil4_charge, coil4_fire => GPIOA, 7;
}

/// Two outputs 360° apart switched together.
macro_rules! paired_pins {
    ($($on:ident, $off:ident => $port:ident, $first:literal, $second:literal;)*) => {
        $(
            fn $on() {
                pac::$port.bsrr().write(|w| {
                    w.set_bs($first, true);
                    w.set_bs($second, true);
                });
            }

            fn $off() {
                pac::$port.bsrr().write(|w| {
                    w.set_br($first, true);
                    w.set_br($second, true);
                });
            }
        )*
    };
}

paired_pins! {
    injectors13_open, injectors13_close => GPIOB, 4, 6;
    injectors24_open, injectors24_close => GPIOB, 5, 7;
    coils13_charge, coils13_fire => GPIOA, 4, 6;
    coils24_charge, coils24_fire => GPIOA, 5, 7;
}

/// Start and end actions per injector channel.
pub const INJECTOR_ACTIONS: [Action; CHANNELS] = [
    (injector1_open, injector1_close),
    (injector2_open, injector2_close),
    (injector3_open, injector3_close),
    (injector4_open, injector4_close),
];

/// Start and end actions per coil channel.
pub const COIL_ACTIONS: [Action; CHANNELS] = [
    (coil1_charge, coil1_fire),
    (coil2_charge, coil2_fire),
    (coil3_charge, coil3_fire),
    (coil4_charge, coil4_fire),
];

/// Board wiring for a four cylinder engine. While half synced channels 1
/// and 2 drive their own output and the one 360° later; channels 3 and 4
/// stay idle.
pub const WIRING: Wiring<CHANNELS> = Wiring {
    injectors: INJECTOR_ACTIONS,
    coils: COIL_ACTIONS,
    paired_injectors: [
        (injectors13_open, injectors13_close),
        (injectors24_open, injectors24_close),
        (injector3_open, injector3_close),
        (injector4_open, injector4_close),
    ],
    paired_coils: [
        (coils13_charge, coils13_fire),
        (coils24_charge, coils24_fire),
        (coil3_charge, coil3_fire),
        (coil4_charge, coil4_fire),
    ],
};
