//! Key sampling.
//!
//! The arrowpad has three input lines, each pulled high and pulled low by a
//! key. The combination of lines that are low is the key code: bit i is set
//! when line i reads low. There is no debouncing; the main loop samples fast
//! enough that a bouncing contact only causes an extra report or two.

use crate::config::KEY_LINE_BITS;

/// Number of input lines.
pub const NUM_LINES: usize = 3;

/// Number of distinct key codes, including "no key".
pub const NUM_KEY_CODES: usize = 1 << NUM_LINES;

/// A combination of pressed input lines, in `0..8`. Zero means no key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyCode(u8);

impl KeyCode {
    /// No line is pressed.
    pub const NONE: KeyCode = KeyCode(0);

    /// Key code for a raw value, if it is in range.
    pub const fn new(raw: u8) -> Option<KeyCode> {
        if (raw as usize) < NUM_KEY_CODES {
            Some(KeyCode(raw))
        } else {
            None
        }
    }

    /// Decode the key code from a port input register snapshot.
    ///
    /// Lines are active low: a line reading 0 is pressed.
    pub fn from_port(pins: u8) -> KeyCode {
        let mut code = 0;
        for (line, &bit) in KEY_LINE_BITS.iter().enumerate() {
            if pins & (1 << bit) == 0 {
                code |= 1 << line;
            }
        }
        KeyCode(code)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether input line `line` is pressed in this combination.
    pub const fn line(self, line: usize) -> bool {
        line < NUM_LINES && self.0 & (1 << line) != 0
    }

    /// All key codes in ascending order.
    pub fn all() -> impl Iterator<Item = KeyCode> {
        (0..NUM_KEY_CODES as u8).map(KeyCode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RELEASED: u8 = (1 << 1) | (1 << 3) | (1 << 4);

    #[test]
    fn released_lines_read_as_no_key() {
        assert_eq!(KeyCode::from_port(0xFF), KeyCode::NONE);
        assert_eq!(KeyCode::from_port(ALL_RELEASED), KeyCode::NONE);
    }

    #[test]
    fn each_line_maps_to_its_bit() {
        assert_eq!(KeyCode::from_port(ALL_RELEASED & !(1 << 1)).bits(), 0b001);
        assert_eq!(KeyCode::from_port(ALL_RELEASED & !(1 << 3)).bits(), 0b010);
        assert_eq!(KeyCode::from_port(ALL_RELEASED & !(1 << 4)).bits(), 0b100);
        assert_eq!(KeyCode::from_port(0x00).bits(), 0b111);
    }

    #[test]
    fn usb_and_unused_pins_are_ignored() {
        // PB0, PB2, PB5 toggling must not change the code.
        let noise = (1 << 0) | (1 << 2) | (1 << 5);
        let pressed = ALL_RELEASED & !(1 << 3);
        assert_eq!(KeyCode::from_port(pressed), KeyCode::from_port(pressed ^ noise));
    }

    #[test]
    fn sampling_is_idempotent() {
        let pins = ALL_RELEASED & !(1 << 4);
        assert_eq!(KeyCode::from_port(pins), KeyCode::from_port(pins));
    }

    #[test]
    fn new_rejects_out_of_range() {
        assert_eq!(KeyCode::new(7).map(KeyCode::bits), Some(7));
        assert!(KeyCode::new(8).is_none());
    }

    #[test]
    fn line_accessor() {
        let code = KeyCode::from_port(ALL_RELEASED & !(1 << 3) & !(1 << 4));
        assert!(!code.line(0));
        assert!(code.line(1));
        assert!(code.line(2));
        assert!(!code.line(3));
    }
}
