use core::fmt::Write;

use ecu_core::TriggerSystem;
use embassy_futures::join::join;
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::{Driver, EndpointError};
use heapless::String;
use static_cell::StaticCell;

use super::{OUTPUTS, micros};
use crate::console::{self, LineBuffer, LineEvent};
use crate::hw::capture;
use crate::usb::{self, UsbConsole, UsbDeviceStorage, UsbDeviceStrings};

/// Room for a full tooth log dump.
const REPLY_CAPACITY: usize = 3072;

static REPLY: StaticCell<String<REPLY_CAPACITY>> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    system: &'static TriggerSystem,
    storage: &'static mut UsbDeviceStorage,
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let UsbConsole {
        mut device,
        sender,
        receiver,
        control,
    } = UsbConsole::new(driver, storage, UsbDeviceStrings::default());
    let reply = REPLY.init(String::new());

    join(device.run(), serve(system, sender, receiver, control, reply)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn serve<D>(
    system: &'static TriggerSystem,
    mut sender: Sender<'static, D>,
    mut receiver: embassy_usb::class::cdc_acm::Receiver<'static, D>,
    control: ControlChanged<'static>,
    reply: &mut String<REPLY_CAPACITY>,
) -> !
where
    D: Driver<'static>,
{
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut lines = LineBuffer::new();

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        defmt::info!("usb: console connected");

        'session: loop {
            let count = match select(receiver.read_packet(&mut ingress), control.control_changed()).await {
                Either::First(Ok(count)) => count,
                Either::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console disabled");
                    break;
                }
                Either::First(Err(_)) => {
                    defmt::warn!("usb: console read error");
                    continue;
                }
                Either::Second(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: console host dropped DTR");
                        break;
                    }
                    continue;
                }
            };

            for &byte in &ingress[..count] {
                reply.clear();
                match lines.push(byte) {
                    None => continue,
                    Some(LineEvent::Overflow) => {
                        let _ = reply.push_str("ERR line too long\n");
                    }
                    Some(LineEvent::Invalid) => {
                        let _ = reply.push_str("ERR line is not UTF-8\n");
                    }
                    Some(LineEvent::Line(line)) => {
                        let now = micros();
                        let answered = OUTPUTS.lock(|outputs| match outputs.as_mut() {
                            Some(outputs) => console::respond(line, system, outputs, now, reply),
                            None => writeln!(reply, "ERR outputs not ready"),
                        });
                        if answered.is_err() {
                            reply.clear();
                            let _ = reply.push_str("ERR reply too long\n");
                        }
                        // A new pattern may listen to different edges.
                        capture::configure(system.edges());
                    }
                }
                if let Err(EndpointError::Disabled) = write_reply(&mut sender, reply).await {
                    break 'session;
                }
            }
        }
    }
}

/// Sends `reply` in packet-sized pieces, ending with a short packet.
async fn write_reply<D>(sender: &mut Sender<'static, D>, reply: &str) -> Result<(), EndpointError>
where
    D: Driver<'static>,
{
    let mut last = 0;
    for chunk in reply.as_bytes().chunks(usb::MAX_PACKET_SIZE as usize) {
        sender.write_packet(chunk).await?;
        last = chunk.len();
    }
    if last == usb::MAX_PACKET_SIZE as usize {
        sender.write_packet(&[]).await?;
    }
    Ok(())
}

async fn wait_for_dtr<D>(control: &ControlChanged<'static>, sender: &Sender<'static, D>)
where
    D: Driver<'static>,
{
    while !sender.dtr() {
        control.control_changed().await;
    }
}
