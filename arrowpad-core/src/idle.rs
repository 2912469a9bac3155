//! HID idle rate handling.
//!
//! The host may ask the device to repeat its current report every
//! `rate × 4 ms` even if nothing changed. We only get a timer tick every
//! ~16 ms, so each tick consumes four idle units. The repeat period is
//! therefore quantized to whole ticks: a resend is due every
//! `rate / 4 + 1` ticks (integer division).

use log::debug;

use crate::config::IDLE_UNITS_PER_TICK;

/// Idle rate (in 4 ms units) and the countdown to the next forced resend.
/// Lives for one USB session; nothing is persisted.
#[derive(Clone, Debug, Default)]
pub struct IdleTimer {
    /// 0 disables idle repeat.
    rate: u8,
    /// Remaining idle units before a resend.
    counter: u8,
}

impl IdleTimer {
    pub const fn new() -> Self {
        Self {
            rate: 0,
            counter: 0,
        }
    }

    pub fn rate(&self) -> u8 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: u8) {
        if rate != self.rate {
            debug!("idle rate {} -> {} (x4 ms)", self.rate, rate);
        }
        self.rate = rate;
    }

    /// Advance by one timer tick. Returns true when the current report must
    /// be sent again.
    pub fn tick(&mut self) -> bool {
        if self.rate == 0 {
            return false;
        }
        if self.counter >= IDLE_UNITS_PER_TICK {
            self.counter -= IDLE_UNITS_PER_TICK;
            false
        } else {
            self.counter = self.rate;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tick indices (0-based) at which a resend fires over `ticks` ticks.
    fn fire_ticks(rate: u8, ticks: usize) -> std::vec::Vec<usize> {
        let mut timer = IdleTimer::new();
        timer.set_rate(rate);
        (0..ticks).filter(|_| timer.tick()).collect()
    }

    #[test]
    fn disabled_never_fires() {
        assert!(fire_ticks(0, 1000).is_empty());
    }

    #[test]
    fn small_rates_fire_every_tick() {
        for rate in 1..=3 {
            assert_eq!(fire_ticks(rate, 5), [0, 1, 2, 3, 4], "rate {rate}");
        }
    }

    #[test]
    fn period_is_rate_over_four_plus_one() {
        for rate in 1..=255u8 {
            let period = rate as usize / 4 + 1;
            let fired = fire_ticks(rate, period * 5);
            let expected: std::vec::Vec<usize> = (0..5).map(|n| n * period).collect();
            assert_eq!(fired, expected, "rate {rate}");
        }
    }

    #[test]
    fn default_hid_idle_rate() {
        // 500 ms is the HID default for keyboards: 125 units, 32 ticks.
        let fired = fire_ticks(125, 100);
        assert_eq!(fired, [0, 32, 64, 96]);
    }

    #[test]
    fn disabling_stops_resends_immediately() {
        let mut timer = IdleTimer::new();
        timer.set_rate(4);
        assert!(timer.tick());
        timer.set_rate(0);
        assert!((0..50).all(|_| !timer.tick()));
        assert_eq!(timer.rate(), 0);
    }

    #[test]
    fn countdown_survives_rate_change() {
        let mut timer = IdleTimer::new();
        timer.set_rate(40);
        assert!(timer.tick());
        timer.set_rate(8);
        // The pending countdown of 40 units still has to drain first.
        let next = (1..).find(|_| timer.tick()).unwrap();
        assert_eq!(next, 11);
    }
}
