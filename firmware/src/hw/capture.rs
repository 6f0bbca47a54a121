//! Trigger inputs on TIM2 input capture.
//!
//! TIM2 free-runs as a 32-bit microsecond counter and doubles as the
//! decoder clock. Crank, cam 1 and cam 2 sit on capture channels 1, 2 and
//! 4, so every edge is stamped by the timer before the interrupt runs.

use ecu_core::Micros;
use ecu_core::config::TriggerEdge;
use ecu_core::decoders::EdgeSelection;
use embassy_stm32::pac;
use embassy_stm32::pac::gpio::vals::{Idr, Moder};

/// Decoder clock rate.
pub const CLOCK_HZ: u32 = 1_000_000;
/// TIM2_CH1/CH2/CH4 on PA0, PA1 and PA3.
const TIM2_AF: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerInput {
    Crank,
    Cam,
    SecondCam,
}

impl TriggerInput {
    pub const ALL: [Self; 3] = [TriggerInput::Crank, TriggerInput::Cam, TriggerInput::SecondCam];

    const fn channel(self) -> usize {
        match self {
            TriggerInput::Crank => 0,
            TriggerInput::Cam => 1,
            TriggerInput::SecondCam => 3,
        }
    }

    const fn pin(self) -> usize {
        match self {
            TriggerInput::Crank => 0,
            TriggerInput::Cam => 1,
            TriggerInput::SecondCam => 3,
        }
    }

    const fn wanted(self, selection: EdgeSelection) -> Option<TriggerEdge> {
        match self {
            TriggerInput::Crank => selection.primary,
            TriggerInput::Cam => selection.secondary,
            TriggerInput::SecondCam => selection.tertiary,
        }
    }
}

/// Current decoder time.
pub fn now() -> Micros {
    pac::TIM2.cnt().read().cnt()
}

/// Routes the trigger pins to TIM2, maps each capture channel onto its own
/// input and starts the counter at [`CLOCK_HZ`].
pub fn start(clock_hz: u32) {
    let regs = pac::TIM2;
    let prescaler = (clock_hz / CLOCK_HZ).saturating_sub(1);
    regs.cr1().modify(|w| w.set_cen(false));
    regs.psc().write_value(u16::try_from(prescaler).unwrap_or(u16::MAX));
    regs.arr().write(|w| w.set_arr(u32::MAX));
    regs.dier().write(|_| {});
    for input in TriggerInput::ALL {
        let pin = input.pin();
        pac::GPIOA.moder().modify(|w| w.set_moder(pin, Moder::ALTERNATE));
        pac::GPIOA.afr(pin / 8).modify(|w| w.set_afr(pin % 8, TIM2_AF));

        let channel = input.channel();
        let shift = 8 * (channel % 2);
        // CCxS = 01 selects TIx, no input filter or prescaler.
        regs.ccmr_input(channel / 2)
            .modify(|w| w.0 = (w.0 & !(0xFF << shift)) | (0b01 << shift));
    }
    regs.egr().write(|w| w.set_ug(true));
    regs.sr().write(|_| {});
    regs.cr1().modify(|w| w.set_cen(true));
}

/// Captures the edges each input's decoder wants. Inputs the decoder
/// ignores stop interrupting.
pub fn configure(selection: EdgeSelection) {
    let regs = pac::TIM2;
    for input in TriggerInput::ALL {
        let channel = input.channel();
        // CCxP/CCxNP: 00 rising, 10 falling, 11 both.
        let (enabled, inverted, both) = match input.wanted(selection) {
            None => (false, false, false),
            Some(TriggerEdge::Rising) => (true, false, false),
            Some(TriggerEdge::Falling) => (true, true, false),
            Some(TriggerEdge::Both) => (true, true, true),
        };
        regs.ccer().modify(|w| {
            w.set_cce(channel, enabled);
            w.set_ccp(channel, inverted);
            w.set_ccnp(channel, both);
        });
        regs.dier().modify(|w| w.set_ccie(channel, enabled));
    }
}

/// Timestamp of the edge `input` latched, if one is waiting. Reading the
/// capture register clears the flag.
pub fn take(input: TriggerInput) -> Option<Micros> {
    let regs = pac::TIM2;
    let channel = input.channel();
    if !regs.sr().read().ccif(channel) {
        return None;
    }
    Some(regs.ccr(channel).read().ccr())
}

/// Crank, cam 1 and cam 2 pin levels.
pub fn levels() -> (bool, bool, bool) {
    let idr = pac::GPIOA.idr().read();
    let high = |input: TriggerInput| idr.idr(input.pin()) == Idr::HIGH;
    (
        high(TriggerInput::Crank),
        high(TriggerInput::Cam),
        high(TriggerInput::SecondCam),
    )
}
