//! Collaborators the engine runs against.
//!
//! The firmware implements these on top of the ATtiny85 registers and the
//! software USB transceiver; [`crate::sim`] implements them for the host.
//! Everything runs on one call stack, so none of these need to be `Sync`.

use crate::control::{Reply, SetupPacket};
use crate::keys::KeyCode;

/// Reads the key input lines. Must not have side effects: the main loop and
/// the control responder both sample at will.
pub trait KeySampler {
    fn poll(&self) -> KeyCode;
}

/// Free-running timer whose overflow marks one idle tick.
pub trait TickTimer {
    /// Returns true and clears the flag if the timer overflowed since the
    /// last call.
    fn take_overflow(&mut self) -> bool;
}

/// Liveness watchdog. Starving it resets the chip.
pub trait Watchdog {
    fn feed(&mut self);
}

/// RC oscillator trim register.
pub trait Oscillator {
    fn trim(&self) -> u8;
    fn set_trim(&mut self, value: u8);
}

/// One byte of non-volatile storage for the oscillator trim.
/// An erased byte reads as [`crate::config::CALIBRATION_UNSET`].
pub trait CalibrationStore {
    fn load(&self) -> u8;
    fn store(&mut self, value: u8);
}

/// Frame length measurement provided by the transceiver. The result is
/// proportional to the real core clock and is only meaningful right after a
/// bus reset.
pub trait FrameMeter {
    fn measure_frame_length(&mut self) -> u16;
}

/// Blocking millisecond delay, used only before the device connects.
pub trait Delay {
    fn delay_ms(&mut self, ms: u16);
}

/// Callbacks the transceiver makes from inside [`Transceiver::poll`].
pub trait UsbHandler {
    /// Answer a control request. [`Reply::Empty`] means "not handled".
    fn setup(&mut self, packet: &SetupPacket) -> Reply;

    /// The host reset the bus; the next frame is a usable timing reference.
    fn bus_reset<M: FrameMeter>(&mut self, meter: &mut M);
}

/// The software USB transceiver.
pub trait Transceiver {
    /// Give the protocol stack a processing slice. Pending control requests
    /// and bus resets are dispatched to `handler` before this returns.
    fn poll<H: UsbHandler>(&mut self, handler: &mut H);

    /// Start signaling presence to the host.
    fn connect(&mut self);

    /// Stop signaling presence to the host.
    fn disconnect(&mut self);

    /// True if a new interrupt report can be submitted now.
    fn interrupt_ready(&self) -> bool;

    /// Hand a report over for asynchronous transmission.
    fn submit_interrupt(&mut self, data: &[u8]);
}
