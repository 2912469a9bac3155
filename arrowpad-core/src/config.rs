//! Compile-time configuration.
//!
//! Pin assignments, timing parameters and protocol constants live here so
//! they can be tuned in one place.

// Clock

/// Core clock in Hz. The RC oscillator is calibrated so that the core runs at
/// this rate; the software USB transceiver is built for the same value.
#[cfg(not(feature = "clock-12m8"))]
pub const CORE_CLOCK_HZ: u32 = 16_500_000;
#[cfg(feature = "clock-12m8")]
pub const CORE_CLOCK_HZ: u32 = 12_800_000;

/// Frame length count the transceiver reports at exactly `CORE_CLOCK_HZ`.
pub const CALIBRATION_TARGET: u16 = calibration_target(CORE_CLOCK_HZ);

/// Expected frame length count for a core clock of `clock_hz`.
///
/// The transceiver counts 1499 units per frame at 10.5 MHz; the count scales
/// linearly with the clock. Rounded half up, integer arithmetic only.
pub const fn calibration_target(clock_hz: u32) -> u16 {
    const COUNT_AT_REFERENCE: u64 = 1499;
    const REFERENCE_HZ: u64 = 10_500_000;
    ((COUNT_AT_REFERENCE * clock_hz as u64 + REFERENCE_HZ / 2) / REFERENCE_HZ) as u16
}

/// First step of the trim binary search (half the 8-bit trim range).
pub const CALIBRATION_FIRST_STEP: u8 = 128;

// Persistent storage

/// EEPROM address of the persisted trim value.
pub const CALIBRATION_EEPROM_ADDR: u16 = 0;

/// Erased EEPROM byte: the device has never been calibrated.
pub const CALIBRATION_UNSET: u8 = 0xFF;

// Keys
//
//   Line 0 → PB1
//   Line 1 → PB3
//   Line 2 → PB4
//
// PB0 and PB2 carry USB D- and D+.

/// Port B bit for each key input line, in key code bit order.
pub const KEY_LINE_BITS: [u8; 3] = [1, 3, 4];

// Timing

/// Period of the free-running timer overflow (ms, approximate).
/// 16.5 MHz / 1024 prescaler / 256 counts ≈ 62.9 Hz.
pub const TICK_PERIOD_MS: u16 = 16;

/// Idle rate unit (ms) as defined by the HID class.
pub const IDLE_RATE_UNIT_MS: u16 = 4;

/// Idle rate units consumed by one timer tick.
pub const IDLE_UNITS_PER_TICK: u8 = (TICK_PERIOD_MS / IDLE_RATE_UNIT_MS) as u8;

/// The device holds the bus disconnected for this many slices before
/// connecting, so the host sees a clean detach/attach.
pub const DISCONNECT_SLICES: u8 = 20;
pub const DISCONNECT_SLICE_MS: u16 = 15;

/// Watchdog timeout (ms). The main loop must feed it faster than this.
pub const WATCHDOG_TIMEOUT_MS: u16 = 1000;

/// WDP3..WDP0 bits of WDTCR for `WATCHDOG_TIMEOUT_MS`.
pub const WATCHDOG_PRESCALER: u8 = watchdog_prescaler(WATCHDOG_TIMEOUT_MS);

/// Prescaler bits for the shortest watchdog period of at least `timeout_ms`.
///
/// Periods are 16 ms << n for n in 0..=9; n above 7 sets WDP3 (bit 5).
/// Longer requests get the 8 s maximum.
pub const fn watchdog_prescaler(timeout_ms: u16) -> u8 {
    let mut n = 0u8;
    while n < 9 && (16u32 << n) < timeout_ms as u32 {
        n += 1;
    }
    ((n & 0x08) << 2) | (n & 0x07)
}

// USB

/// Shared V-USB keyboard VID/PID pair (obdev.at).
pub const USB_VID: u16 = 0x16C0;
pub const USB_PID: u16 = 0x27DB;

/// Interrupt IN endpoint carrying input reports.
pub const INTERRUPT_IN_ENDPOINT: u8 = 0x81;

/// Default host-side timeout for control and interrupt transfers (ms).
pub const HOST_TRANSFER_TIMEOUT_MS: u64 = 2000;
