//! Arrowpad firmware for the ATtiny85.
//!
//! A tiny USB keyboard with three input lines, reporting arrow keys and
//! Enter:
//! - Software USB via V-USB, clocked from the internal RC oscillator
//! - Oscillator calibration against the host's frame timing on every bus
//!   reset, persisted to EEPROM
//! - HID idle rate support for repeating held keys

#![no_std]
#![no_main]

mod board;
mod vusb;

use avr_device::attiny85::Peripherals;

use arrowpad_core::config::CALIBRATION_EEPROM_ADDR;
use arrowpad_core::hal::Delay;
use arrowpad_core::{Device, MainLoop};

use board::{BusyDelay, EepromByte, Keys, Osccal, Timer1, Wdt};
use vusb::Vusb;

/// Panic handler: spin until the watchdog resets the chip.
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

/// Main entry point.
#[no_mangle]
pub extern "C" fn main() -> ! {
    let dp = unsafe { Peripherals::steal() };

    let device = Device::new(
        Keys::new(&dp.PORTB),
        Osccal::new(&dp.CPU),
        EepromByte::new(&dp.EEPROM, CALIBRATION_EEPROM_ADDR),
    );
    let timer = Timer1::new(&dp.TC1, &dp.TC0);
    // A watchdog reset leaves the watchdog running, so arm it now and feed
    // it through the reconnect wait.
    let mut wdt = Wdt::new(&dp.WDT);
    wdt.enable();

    let mut main_loop = MainLoop::new(Vusb::new(&dp.PORTB), timer, wdt, device);
    main_loop.boot(&mut FedDelay(BusyDelay));

    main_loop.usb_mut().init();
    unsafe { avr_device::interrupt::enable() };

    main_loop.run()
}

/// Busy delay that keeps the watchdog fed.
struct FedDelay(BusyDelay);

impl Delay for FedDelay {
    fn delay_ms(&mut self, ms: u16) {
        avr_device::asm::wdr();
        self.0.delay_ms(ms);
    }
}
