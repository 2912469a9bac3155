//! Scripted collaborators for running the engine off-target.
//!
//! Everything here is `no_std` and allocation-free so it works in unit
//! tests, integration tests and the host CLI alike. The stateful pieces use
//! `Cell` and are implemented for shared references, so a test can keep a
//! handle on them while a [`MainLoop`](crate::MainLoop) owns the references.

use core::cell::Cell;

use heapless::{Deque, HistoryBuffer};

use crate::config::CALIBRATION_UNSET;
use crate::control::{Reply, SetupPacket};
use crate::hal::{
    CalibrationStore, Delay, FrameMeter, KeySampler, Oscillator, TickTimer, Transceiver,
    UsbHandler, Watchdog,
};
use crate::keys::KeyCode;
use crate::report::Report;

/// RC oscillator whose frame length count grows linearly with the trim.
pub struct SimClock {
    trim: Cell<u8>,
    /// Count at trim 0.
    offset: u16,
    /// Counts per trim step.
    slope: u16,
    measurements: Cell<u32>,
    trim_writes: Cell<u32>,
}

impl SimClock {
    pub const fn new(offset: u16, slope: u16) -> Self {
        Self {
            trim: Cell::new(0),
            offset,
            slope,
            measurements: Cell::new(0),
            trim_writes: Cell::new(0),
        }
    }

    pub fn current_trim(&self) -> u8 {
        self.trim.get()
    }

    /// Frame length count at the current trim.
    pub fn frame_length(&self) -> u16 {
        self.frame_length_at(self.trim.get())
    }

    pub fn frame_length_at(&self, trim: u8) -> u16 {
        self.offset.saturating_add(self.slope.saturating_mul(trim as u16))
    }

    pub fn measurements(&self) -> u32 {
        self.measurements.get()
    }

    pub fn trim_writes(&self) -> u32 {
        self.trim_writes.get()
    }

    fn measure(&self) -> u16 {
        self.measurements.set(self.measurements.get() + 1);
        self.frame_length()
    }
}

impl Oscillator for &SimClock {
    fn trim(&self) -> u8 {
        self.trim.get()
    }

    fn set_trim(&mut self, value: u8) {
        self.trim_writes.set(self.trim_writes.get() + 1);
        self.trim.set(value);
    }
}

/// Key lines set by the test.
#[derive(Default)]
pub struct SimKeys {
    code: Cell<KeyCode>,
    polls: Cell<u32>,
}

impl SimKeys {
    pub const fn new() -> Self {
        Self {
            code: Cell::new(KeyCode::NONE),
            polls: Cell::new(0),
        }
    }

    pub fn press(&self, code: KeyCode) {
        self.code.set(code);
    }

    pub fn release(&self) {
        self.code.set(KeyCode::NONE);
    }

    pub fn polls(&self) -> u32 {
        self.polls.get()
    }
}

impl KeySampler for &SimKeys {
    fn poll(&self) -> KeyCode {
        self.polls.set(self.polls.get() + 1);
        self.code.get()
    }
}

/// Timer overflow flag raised by the test.
#[derive(Default)]
pub struct SimTick {
    overflow: Cell<bool>,
}

impl SimTick {
    pub const fn new() -> Self {
        Self {
            overflow: Cell::new(false),
        }
    }

    pub fn overflow(&self) {
        self.overflow.set(true);
    }

    pub fn is_set(&self) -> bool {
        self.overflow.get()
    }
}

impl TickTimer for &SimTick {
    fn take_overflow(&mut self) -> bool {
        self.overflow.replace(false)
    }
}

/// Counts watchdog feeds.
#[derive(Default)]
pub struct SimWatchdog {
    feeds: Cell<u32>,
}

impl SimWatchdog {
    pub const fn new() -> Self {
        Self {
            feeds: Cell::new(0),
        }
    }

    pub fn feeds(&self) -> u32 {
        self.feeds.get()
    }
}

impl Watchdog for &SimWatchdog {
    fn feed(&mut self) {
        self.feeds.set(self.feeds.get() + 1);
    }
}

/// One EEPROM byte. Starts erased unless told otherwise.
pub struct SimStore {
    value: Cell<u8>,
    writes: Cell<u32>,
}

impl SimStore {
    pub const fn new() -> Self {
        Self::with_value(CALIBRATION_UNSET)
    }

    pub const fn with_value(value: u8) -> Self {
        Self {
            value: Cell::new(value),
            writes: Cell::new(0),
        }
    }

    pub fn value(&self) -> u8 {
        self.value.get()
    }

    pub fn writes(&self) -> u32 {
        self.writes.get()
    }
}

impl Default for SimStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationStore for &SimStore {
    fn load(&self) -> u8 {
        self.value.get()
    }

    fn store(&mut self, value: u8) {
        self.writes.set(self.writes.get() + 1);
        self.value.set(value);
    }
}

/// Accumulates requested delays instead of sleeping.
#[derive(Default)]
pub struct SimDelay {
    pub total_ms: u32,
    pub calls: u32,
}

impl Delay for SimDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.total_ms += ms as u32;
        self.calls += 1;
    }
}

/// Something the simulated host does on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Reset,
    Setup(SetupPacket),
}

/// Maximum bus events queued between two polls.
pub const MAX_QUEUED_EVENTS: usize = 8;
/// Submitted reports kept for inspection (most recent).
pub const REPORT_HISTORY: usize = 32;

/// Software USB transceiver driven by the test.
///
/// Queued bus events are dispatched on the next [`Transceiver::poll`]. The
/// interrupt endpoint becomes busy when a report is submitted and ready
/// again when the simulated host polls it.
pub struct SimUsb<'a> {
    clock: &'a SimClock,
    events: Deque<BusEvent, MAX_QUEUED_EVENTS>,
    ready: bool,
    connected: bool,
    connects: u32,
    disconnects: u32,
    sent: HistoryBuffer<Report, REPORT_HISTORY>,
    sent_count: u32,
    last_reply: Option<Reply>,
}

impl<'a> SimUsb<'a> {
    pub fn new(clock: &'a SimClock) -> Self {
        Self {
            clock,
            events: Deque::new(),
            ready: true,
            connected: false,
            connects: 0,
            disconnects: 0,
            sent: HistoryBuffer::new(),
            sent_count: 0,
            last_reply: None,
        }
    }

    /// Queue a bus event. Returns false if the queue is full.
    pub fn queue(&mut self, event: BusEvent) -> bool {
        self.events.push_back(event).is_ok()
    }

    /// The host read the interrupt endpoint; a new report may be submitted.
    pub fn host_poll(&mut self) {
        self.ready = true;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects
    }

    /// Number of reports submitted since creation.
    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }

    pub fn last_sent(&self) -> Option<Report> {
        self.sent.recent().copied()
    }

    /// Recently submitted reports, oldest first.
    pub fn sent(&self) -> impl Iterator<Item = &Report> {
        self.sent.oldest_ordered()
    }

    /// Reply to the most recent control request.
    pub fn last_reply(&self) -> Option<Reply> {
        self.last_reply
    }
}

impl FrameMeter for SimUsb<'_> {
    fn measure_frame_length(&mut self) -> u16 {
        self.clock.measure()
    }
}

impl Transceiver for SimUsb<'_> {
    fn poll<H: UsbHandler>(&mut self, handler: &mut H) {
        while let Some(event) = self.events.pop_front() {
            match event {
                BusEvent::Reset => handler.bus_reset(self),
                BusEvent::Setup(packet) => self.last_reply = Some(handler.setup(&packet)),
            }
        }
    }

    fn connect(&mut self) {
        self.connected = true;
        self.connects += 1;
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }

    fn interrupt_ready(&self) -> bool {
        self.ready
    }

    fn submit_interrupt(&mut self, data: &[u8]) {
        if let Some(report) = Report::from_bytes(data) {
            self.sent.write(report);
            self.sent_count += 1;
        }
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_model_is_monotonic() {
        let clock = SimClock::new(1000, 9);
        assert_eq!(clock.frame_length_at(0), 1000);
        assert_eq!(clock.frame_length_at(10), 1090);
        assert!((1..=255u8).all(|t| clock.frame_length_at(t) >= clock.frame_length_at(t - 1)));
    }

    #[test]
    fn tick_flag_is_taken_once() {
        let tick = SimTick::new();
        let mut timer = &tick;
        assert!(!timer.take_overflow());
        tick.overflow();
        assert!(timer.take_overflow());
        assert!(!timer.take_overflow());
    }

    #[test]
    fn submit_makes_endpoint_busy_until_host_polls() {
        let clock = SimClock::new(0, 1);
        let mut usb = SimUsb::new(&clock);
        assert!(usb.interrupt_ready());
        usb.submit_interrupt(&[0, 0x50]);
        assert!(!usb.interrupt_ready());
        usb.host_poll();
        assert!(usb.interrupt_ready());
        assert_eq!(usb.sent_count(), 1);
        assert_eq!(usb.last_sent().map(|r| r.usage), Some(0x50));
    }

    #[test]
    fn event_queue_is_bounded() {
        let clock = SimClock::new(0, 1);
        let mut usb = SimUsb::new(&clock);
        for _ in 0..MAX_QUEUED_EVENTS {
            assert!(usb.queue(BusEvent::Reset));
        }
        assert!(!usb.queue(BusEvent::Reset));
    }
}
