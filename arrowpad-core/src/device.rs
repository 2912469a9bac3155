//! The device state machine and the main loop around it.
//!
//! [`Device`] owns everything the control responder and the main loop share:
//! the last observed key code, the pending-change flag and the idle timer.
//! [`MainLoop`] owns the device plus the transceiver, tick timer and
//! watchdog, and drives one cooperative iteration at a time. Control
//! requests arrive as callbacks from inside the transceiver's poll, on the
//! same call stack, so no locking is involved.

use log::{info, trace};

use crate::calibrate::{calibrate, Calibration};
use crate::config::{
    CALIBRATION_TARGET, CALIBRATION_UNSET, DISCONNECT_SLICES, DISCONNECT_SLICE_MS,
};
use crate::control::{respond, Reply, SetupPacket};
use crate::hal::{
    CalibrationStore, Delay, FrameMeter, KeySampler, Oscillator, TickTimer, Transceiver,
    UsbHandler, Watchdog,
};
use crate::idle::IdleTimer;
use crate::keys::KeyCode;
use crate::report::{build_report, Report};

/// Session state and the hardware it reads.
pub struct Device<K, O, S> {
    keys: K,
    osc: O,
    store: S,
    idle: IdleTimer,
    last_key: KeyCode,
    /// Set when a report must go out; cleared once one has been submitted.
    pending: bool,
}

impl<K, O, S> Device<K, O, S>
where
    K: KeySampler,
    O: Oscillator,
    S: CalibrationStore,
{
    pub fn new(keys: K, osc: O, store: S) -> Self {
        Self {
            keys,
            osc,
            store,
            idle: IdleTimer::new(),
            last_key: KeyCode::NONE,
            pending: false,
        }
    }

    /// Seed the trim register from the value persisted by the last
    /// calibration, if there is one. Returns the value applied.
    pub fn restore_calibration(&mut self) -> Option<u8> {
        let saved = self.store.load();
        if saved == CALIBRATION_UNSET {
            info!("no stored calibration, trim stays at {}", self.osc.trim());
            return None;
        }
        self.osc.set_trim(saved);
        info!("restored oscillator trim {}", saved);
        Some(saved)
    }

    /// Sample the keys and flag a report if the code changed.
    pub fn scan(&mut self) {
        let key = self.keys.poll();
        if key != self.last_key {
            trace!("key {} -> {}", self.last_key.bits(), key.bits());
            self.last_key = key;
            self.pending = true;
        }
    }

    /// Handle one timer tick.
    pub fn tick(&mut self) {
        // Second sample per tick; the value is not used.
        let _ = self.keys.poll();
        if self.idle.tick() {
            self.pending = true;
        }
    }

    /// If a report is pending, clear the flag and return the report for the
    /// last observed key. Call only when the transceiver can take a report.
    ///
    /// Using the key captured at detection time rather than sampling again
    /// means the most recent observed state is always what goes out, without
    /// queueing intermediate states.
    pub fn take_report(&mut self) -> Option<Report> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(build_report(self.last_key))
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn last_key(&self) -> KeyCode {
        self.last_key
    }

    pub fn idle_rate(&self) -> u8 {
        self.idle.rate()
    }

    pub fn oscillator(&self) -> &O {
        &self.osc
    }
}

impl<K, O, S> UsbHandler for Device<K, O, S>
where
    K: KeySampler,
    O: Oscillator,
    S: CalibrationStore,
{
    fn setup(&mut self, packet: &SetupPacket) -> Reply {
        respond(packet, &self.keys, &mut self.idle)
    }

    fn bus_reset<M: FrameMeter>(&mut self, meter: &mut M) {
        let Calibration { trim, .. } = calibrate(&mut self.osc, meter, CALIBRATION_TARGET);
        self.store.store(trim);
    }
}

/// The device plus the collaborators only the main loop touches.
pub struct MainLoop<U, T, W, K, O, S> {
    usb: U,
    timer: T,
    watchdog: W,
    device: Device<K, O, S>,
}

impl<U, T, W, K, O, S> MainLoop<U, T, W, K, O, S>
where
    U: Transceiver,
    T: TickTimer,
    W: Watchdog,
    K: KeySampler,
    O: Oscillator,
    S: CalibrationStore,
{
    pub fn new(usb: U, timer: T, watchdog: W, device: Device<K, O, S>) -> Self {
        Self {
            usb,
            timer,
            watchdog,
            device,
        }
    }

    /// Restore the stored calibration and (re)attach to the bus.
    pub fn boot<D: Delay>(&mut self, delay: &mut D) {
        self.device.restore_calibration();
        self.attach(delay);
    }

    /// Hold the bus disconnected long enough for the host to notice, then
    /// connect.
    pub fn attach<D: Delay>(&mut self, delay: &mut D) {
        self.usb.disconnect();
        for _ in 0..DISCONNECT_SLICES {
            delay.delay_ms(DISCONNECT_SLICE_MS);
        }
        self.usb.connect();
    }

    /// One iteration of the main loop. Never blocks.
    pub fn step(&mut self) {
        self.watchdog.feed();
        self.usb.poll(&mut self.device);

        self.device.scan();

        if self.timer.take_overflow() {
            self.device.tick();
        }

        if self.device.pending() && self.usb.interrupt_ready() {
            if let Some(report) = self.device.take_report() {
                trace!("report {:?}", report);
                self.usb.submit_interrupt(&report.to_bytes());
            }
        }
    }

    /// Run forever. The watchdog is the only way out.
    pub fn run(&mut self) -> ! {
        loop {
            self.step();
        }
    }

    pub fn device(&self) -> &Device<K, O, S> {
        &self.device
    }

    pub fn usb(&self) -> &U {
        &self.usb
    }

    pub fn usb_mut(&mut self) -> &mut U {
        &mut self.usb
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimKeys, SimStore};

    fn key(raw: u8) -> KeyCode {
        KeyCode::new(raw).unwrap()
    }

    #[test]
    fn scan_flags_only_changes() {
        let keys = SimKeys::new();
        let clock = SimClock::new(0, 1);
        let store = SimStore::new();
        let mut device = Device::new(&keys, &clock, &store);

        device.scan();
        assert!(!device.pending());

        keys.press(key(4));
        device.scan();
        assert!(device.pending());
        assert_eq!(device.take_report().map(|r| r.usage), Some(0x51));
        assert!(!device.pending());

        device.scan();
        assert!(!device.pending());
        assert_eq!(device.take_report(), None);
    }

    #[test]
    fn tick_samples_keys_without_flagging() {
        let keys = SimKeys::new();
        let clock = SimClock::new(0, 1);
        let store = SimStore::new();
        let mut device = Device::new(&keys, &clock, &store);

        keys.press(key(2));
        device.tick();
        assert_eq!(keys.polls(), 1);
        // The tick sample is discarded: neither the flag nor the key moves.
        assert!(!device.pending());
        assert_eq!(device.last_key(), KeyCode::NONE);
    }

    #[test]
    fn restore_skips_unset_value() {
        let keys = SimKeys::new();
        let clock = SimClock::new(0, 1);
        let store = SimStore::new();
        let mut device = Device::new(&keys, &clock, &store);
        assert_eq!(device.restore_calibration(), None);
        assert_eq!(clock.trim_writes(), 0);
    }

    #[test]
    fn restore_applies_saved_trim() {
        let keys = SimKeys::new();
        let clock = SimClock::new(0, 1);
        let store = SimStore::with_value(0x9C);
        let mut device = Device::new(&keys, &clock, &store);
        assert_eq!(device.restore_calibration(), Some(0x9C));
        assert_eq!(device.oscillator().trim(), 0x9C);
    }
}
