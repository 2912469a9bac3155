//! HID input reports.
//!
//! The arrowpad sends a short 2-byte report: a modifier bitmask followed by a
//! single usage code. Only one non-modifier key can be reported at a time.
//! The report descriptor below does not support the boot protocol and
//! declares no output report, so there are no LEDs to set.

use crate::keys::{KeyCode, NUM_KEY_CODES};

/// Length of an input report in bytes.
pub const REPORT_LEN: usize = 2;

/// Keyboard/Keypad page usages used by the arrowpad.
/// See USB HID Usage Tables, Section 10 (Keyboard/Keypad Page 0x07).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Usage {
    None = 0x00,
    Enter = 0x28,
    Right = 0x4F,
    Left = 0x50,
    Down = 0x51,
    Up = 0x52,
}

impl Usage {
    pub fn from_code(code: u8) -> Option<Usage> {
        match code {
            0x00 => Some(Usage::None),
            0x28 => Some(Usage::Enter),
            0x4F => Some(Usage::Right),
            0x50 => Some(Usage::Left),
            0x51 => Some(Usage::Down),
            0x52 => Some(Usage::Up),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Usage::None => "-",
            Usage::Enter => "Enter",
            Usage::Right => "Right",
            Usage::Left => "Left",
            Usage::Down => "Down",
            Usage::Up => "Up",
        }
    }
}

/// A 2-byte input report.
/// Byte 0: modifier keys bitmask
/// Byte 1: usage code of the single pressed key (0 = none)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub modifiers: u8,
    pub usage: u8,
}

impl Report {
    pub const fn empty() -> Self {
        Self {
            modifiers: 0,
            usage: 0,
        }
    }

    const fn key(usage: Usage) -> Self {
        Self {
            modifiers: 0,
            usage: usage as u8,
        }
    }

    pub const fn to_bytes(self) -> [u8; REPORT_LEN] {
        [self.modifiers, self.usage]
    }

    /// Parse a report received from the device. Longer buffers are accepted
    /// and trailing bytes ignored.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match data {
            [modifiers, usage, ..] => Some(Self {
                modifiers: *modifiers,
                usage: *usage,
            }),
            _ => None,
        }
    }
}

/// Report for every key code, indexed by the code.
///
/// Codes 3 and 5 are wired so that they cannot be told apart reliably from
/// neighbouring combinations and deliberately report nothing.
pub static REPORT_TABLE: [Report; NUM_KEY_CODES] = [
    Report::empty(),           // 0: no key
    Report::key(Usage::Left),  // 1
    Report::key(Usage::Right), // 2
    Report::empty(),           // 3: broken
    Report::key(Usage::Down),  // 4
    Report::empty(),           // 5: broken
    Report::key(Usage::Up),    // 6
    Report::key(Usage::Enter), // 7
];

/// Build the input report for a key code.
pub fn build_report(key: KeyCode) -> Report {
    REPORT_TABLE[key.index()]
}

/// HID report descriptor: 8 modifier bits and one usage byte (0..101).
pub const REPORT_DESCRIPTOR: [u8; 35] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    // Modifier keys (8 bits)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224) - LCtrl
    0x29, 0xE7, //   Usage Maximum (231) - RGui
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Single keycode (1 byte)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x25, 0x65, //   Logical Maximum (101)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];
