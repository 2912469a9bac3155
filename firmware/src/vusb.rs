//! Binding to the V-USB software transceiver.
//!
//! V-USB is linked in as a C object built with a `usbconfig.h` for this
//! board (D- on PB0, D+ on PB2, frame length measurement enabled, one
//! interrupt IN endpoint, 35-byte HID report descriptor). It calls back into
//! us through `usbFunctionSetup` and `usbEventResetReady`, both from inside
//! `usbPoll`, so the handler for the current poll is parked in `DISPATCH`
//! for exactly the duration of that call.

#![allow(non_upper_case_globals)]

use core::cell::Cell;
use core::ptr::{addr_of, addr_of_mut};

use avr_device::attiny85::PORTB;
use avr_device::interrupt::{self, Mutex};

use arrowpad_core::control::{Reply, SetupPacket};
use arrowpad_core::hal::{FrameMeter, Transceiver, UsbHandler};
use arrowpad_core::report::{REPORT_DESCRIPTOR, REPORT_LEN};

/// D- line on port B.
const USB_MINUS: u8 = 0;

/// Bit of `usbTxStatus1.len` meaning "endpoint 1 buffer is free" (USBPID_NAK).
const TX_LEN_NAK: u8 = 0x10;

extern "C" {
    fn usbInit();
    fn usbPoll();
    fn usbSetInterrupt(data: *mut u8, len: u8);
    fn usbMeasureFrameLength() -> u16;

    static mut usbMsgPtr: *mut u8;
    /// `usbTxStatus_t usbTxStatus1`. Only its first byte, `len`, is read.
    static usbTxStatus1: u8;
}

#[no_mangle]
#[link_section = ".progmem.data"]
pub static usbHidReportDescriptor: [u8; REPORT_DESCRIPTOR.len()] = REPORT_DESCRIPTOR;

/// Reply data for the current control transfer. V-USB reads it after
/// `usbFunctionSetup` returns.
static mut REPLY: [u8; REPORT_LEN] = [0; REPORT_LEN];

/// Type-erased handler for the poll in progress.
#[derive(Copy, Clone)]
struct Dispatch {
    handler: *mut (),
    setup: unsafe fn(*mut (), &SetupPacket) -> Reply,
    reset: unsafe fn(*mut ()),
}

// Only ever touched from the main context, with interrupts off.
unsafe impl Send for Dispatch {}

static DISPATCH: Mutex<Cell<Option<Dispatch>>> = Mutex::new(Cell::new(None));

unsafe fn setup_trampoline<H: UsbHandler>(handler: *mut (), packet: &SetupPacket) -> Reply {
    (*(handler as *mut H)).setup(packet)
}

unsafe fn reset_trampoline<H: UsbHandler>(handler: *mut ()) {
    (*(handler as *mut H)).bus_reset(&mut FrameTimer);
}

fn current() -> Option<Dispatch> {
    interrupt::free(|cs| DISPATCH.borrow(cs).get())
}

/// Frame length measurement. Valid right after a bus reset.
pub struct FrameTimer;

impl FrameMeter for FrameTimer {
    fn measure_frame_length(&mut self) -> u16 {
        unsafe { usbMeasureFrameLength() }
    }
}

/// The V-USB driver. Owns the D- data direction bit for connect/disconnect.
pub struct Vusb<'a> {
    port: &'a PORTB,
}

impl<'a> Vusb<'a> {
    pub fn new(port: &'a PORTB) -> Self {
        Self { port }
    }

    /// Initialize the driver. Interrupts must be enabled afterwards.
    pub fn init(&mut self) {
        unsafe { usbInit() };
    }
}

impl Transceiver for Vusb<'_> {
    fn poll<H: UsbHandler>(&mut self, handler: &mut H) {
        let dispatch = Dispatch {
            handler: handler as *mut H as *mut (),
            setup: setup_trampoline::<H>,
            reset: reset_trampoline::<H>,
        };
        interrupt::free(|cs| DISPATCH.borrow(cs).set(Some(dispatch)));
        unsafe { usbPoll() };
        interrupt::free(|cs| DISPATCH.borrow(cs).set(None));
    }

    fn connect(&mut self) {
        self.port
            .ddrb
            .modify(|r, w| unsafe { w.bits(r.bits() & !(1 << USB_MINUS)) });
    }

    /// Drive D- low so the host sees SE0, i.e. no device.
    fn disconnect(&mut self) {
        self.port
            .ddrb
            .modify(|r, w| unsafe { w.bits(r.bits() | (1 << USB_MINUS)) });
    }

    fn interrupt_ready(&self) -> bool {
        // What usbInterruptIsReady() expands to: usbTxLen1 & 0x10.
        unsafe { core::ptr::read_volatile(addr_of!(usbTxStatus1)) & TX_LEN_NAK != 0 }
    }

    fn submit_interrupt(&mut self, data: &[u8]) {
        let mut buf = [0u8; REPORT_LEN];
        let len = data.len().min(REPORT_LEN);
        buf[..len].copy_from_slice(&data[..len]);
        // usbSetInterrupt copies the data into its own buffer.
        unsafe { usbSetInterrupt(buf.as_mut_ptr(), len as u8) };
    }
}

/// SETUP packets V-USB does not handle itself.
#[no_mangle]
pub extern "C" fn usbFunctionSetup(data: *mut u8) -> u8 {
    let raw = unsafe { core::slice::from_raw_parts(data, 8) };
    let (Some(packet), Some(dispatch)) = (SetupPacket::parse(raw), current()) else {
        return 0;
    };
    let reply = unsafe { (dispatch.setup)(dispatch.handler, &packet) };
    unsafe {
        let len = reply.write_to(&mut *addr_of_mut!(REPLY), packet.length);
        usbMsgPtr = addr_of_mut!(REPLY) as *mut u8;
        len
    }
}

/// Called by the reset hook once the bus reset has ended.
#[no_mangle]
pub extern "C" fn usbEventResetReady() {
    if let Some(dispatch) = current() {
        // Frame length measurement needs interrupts off.
        interrupt::free(|_| unsafe { (dispatch.reset)(dispatch.handler) });
    }
}
