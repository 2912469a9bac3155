//! ATtiny85 peripherals behind the engine's collaborator traits.
//!
//! Pin mapping:
//!   PB0 → USB D-        PB2 → USB D+ (INT0)
//!   PB1, PB3, PB4 → key lines (inputs with pull-up, active low)

use avr_device::attiny85::{CPU, EEPROM, PORTB, TC0, TC1, WDT};

use arrowpad_core::config::{KEY_LINE_BITS, WATCHDOG_PRESCALER};
use arrowpad_core::hal::{CalibrationStore, Delay, KeySampler, Oscillator, TickTimer, Watchdog};
use arrowpad_core::KeyCode;

/// TIFR: Timer/Counter1 overflow flag.
const TOV1: u8 = 2;

/// EECR bits.
const EERE: u8 = 0;
const EEPE: u8 = 1;
const EEMPE: u8 = 2;

/// WDTCR bits.
const WDE: u8 = 3;
const WDCE: u8 = 4;

/// Key input lines on port B.
pub struct Keys<'a> {
    port: &'a PORTB,
}

impl<'a> Keys<'a> {
    /// Enable the pull-ups on the key lines. All pins stay inputs.
    pub fn new(port: &'a PORTB) -> Self {
        let mask = KEY_LINE_BITS.iter().fold(0u8, |m, &bit| m | (1 << bit));
        port.portb.modify(|r, w| unsafe { w.bits(r.bits() | mask) });
        Self { port }
    }
}

impl KeySampler for Keys<'_> {
    fn poll(&self) -> KeyCode {
        KeyCode::from_port(self.port.pinb.read().bits())
    }
}

/// Timer/Counter1 free-running at CK/1024: overflows every ~15.9 ms at
/// 16.5 MHz. Only the overflow flag is used, no interrupt.
pub struct Timer1<'a> {
    flags: &'a TC0,
}

impl<'a> Timer1<'a> {
    pub fn new(tc1: &TC1, flags: &'a TC0) -> Self {
        // CS13 | CS11 | CS10: clock / 1024
        tc1.tccr1.write(|w| unsafe { w.bits(0x0B) });
        Self { flags }
    }
}

impl TickTimer for Timer1<'_> {
    fn take_overflow(&mut self) -> bool {
        if self.flags.tifr.read().bits() & (1 << TOV1) == 0 {
            return false;
        }
        // Flags clear by writing a one.
        self.flags.tifr.write(|w| unsafe { w.bits(1 << TOV1) });
        true
    }
}

/// The OSCCAL register.
pub struct Osccal<'a> {
    cpu: &'a CPU,
}

impl<'a> Osccal<'a> {
    pub fn new(cpu: &'a CPU) -> Self {
        Self { cpu }
    }
}

impl Oscillator for Osccal<'_> {
    fn trim(&self) -> u8 {
        self.cpu.osccal.read().bits()
    }

    fn set_trim(&mut self, value: u8) {
        self.cpu.osccal.write(|w| unsafe { w.bits(value) });
    }
}

/// One EEPROM byte at a fixed address.
pub struct EepromByte<'a> {
    eeprom: &'a EEPROM,
    addr: u16,
}

impl<'a> EepromByte<'a> {
    pub fn new(eeprom: &'a EEPROM, addr: u16) -> Self {
        Self { eeprom, addr }
    }

    fn wait_ready(&self) {
        while self.eeprom.eecr.read().bits() & (1 << EEPE) != 0 {}
    }

    fn read_byte(&self) -> u8 {
        self.wait_ready();
        self.eeprom.eear.write(|w| unsafe { w.bits(self.addr) });
        self.eeprom.eecr.write(|w| unsafe { w.bits(1 << EERE) });
        self.eeprom.eedr.read().bits()
    }
}

impl CalibrationStore for EepromByte<'_> {
    fn load(&self) -> u8 {
        self.read_byte()
    }

    /// Skips the write when the byte already holds `value`.
    fn store(&mut self, value: u8) {
        if self.read_byte() == value {
            return;
        }
        self.wait_ready();
        avr_device::interrupt::free(|_| {
            self.eeprom.eear.write(|w| unsafe { w.bits(self.addr) });
            self.eeprom.eedr.write(|w| unsafe { w.bits(value) });
            // Atomic erase + write; EEPE must follow EEMPE within 4 cycles.
            self.eeprom.eecr.write(|w| unsafe { w.bits(1 << EEMPE) });
            self.eeprom.eecr.write(|w| unsafe { w.bits((1 << EEMPE) | (1 << EEPE)) });
        });
    }
}

/// Watchdog in reset mode.
pub struct Wdt<'a> {
    wdt: &'a WDT,
}

impl<'a> Wdt<'a> {
    pub fn new(wdt: &'a WDT) -> Self {
        Self { wdt }
    }

    /// Start the watchdog with the configured timeout.
    pub fn enable(&mut self) {
        avr_device::interrupt::free(|_| {
            avr_device::asm::wdr();
            // Timed sequence: change enable, then the new value within 4 cycles.
            self.wdt
                .wdtcr
                .write(|w| unsafe { w.bits((1 << WDCE) | (1 << WDE)) });
            self.wdt
                .wdtcr
                .write(|w| unsafe { w.bits((1 << WDE) | WATCHDOG_PRESCALER) });
        });
    }
}

impl Watchdog for Wdt<'_> {
    fn feed(&mut self) {
        avr_device::asm::wdr();
    }
}

/// Busy-wait delay, approximate, at the nominal core clock.
pub struct BusyDelay;

impl Delay for BusyDelay {
    fn delay_ms(&mut self, ms: u16) {
        // ~4 cycles per iteration
        const LOOPS_PER_MS: u16 = (arrowpad_core::config::CORE_CLOCK_HZ / 4000) as u16;
        for _ in 0..ms {
            for _ in 0..LOOPS_PER_MS {
                avr_device::asm::nop();
            }
        }
    }
}
