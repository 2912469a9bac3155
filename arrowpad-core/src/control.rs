//! HID class control requests.
//!
//! The transceiver hands us every SETUP packet it does not handle itself
//! (descriptors, addressing and configuration are its business). We answer
//! Get_Report, Get_Idle and Set_Idle; everything else gets an empty reply,
//! which the transceiver turns into the appropriate protocol-level response.

use log::debug;

use crate::hal::KeySampler;
use crate::idle::IdleTimer;
use crate::report::{build_report, Report, REPORT_LEN};

/// bmRequestType type field.
pub const REQUEST_TYPE_MASK: u8 = 0x60;
pub const REQUEST_TYPE_CLASS: u8 = 0x20;

/// HID class requests (bRequest).
pub const HID_GET_REPORT: u8 = 0x01;
pub const HID_GET_IDLE: u8 = 0x02;
pub const HID_GET_PROTOCOL: u8 = 0x03;
pub const HID_SET_REPORT: u8 = 0x09;
pub const HID_SET_IDLE: u8 = 0x0A;
pub const HID_SET_PROTOCOL: u8 = 0x0B;

/// HID report types (high byte of wValue in Get_Report/Set_Report).
pub const REPORT_TYPE_INPUT: u8 = 0x01;
pub const REPORT_TYPE_OUTPUT: u8 = 0x02;
pub const REPORT_TYPE_FEATURE: u8 = 0x03;

/// An 8-byte USB SETUP packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Decode a SETUP packet. Words are little-endian on the wire.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let data: &[u8; 8] = data.get(..8)?.try_into().ok()?;
        Some(Self {
            request_type: data[0],
            request: data[1],
            value: u16::from_le_bytes([data[2], data[3]]),
            index: u16::from_le_bytes([data[4], data[5]]),
            length: u16::from_le_bytes([data[6], data[7]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let [v0, v1] = self.value.to_le_bytes();
        let [i0, i1] = self.index.to_le_bytes();
        let [l0, l1] = self.length.to_le_bytes();
        [self.request_type, self.request, v0, v1, i0, i1, l0, l1]
    }

    /// Device-to-host class request addressed to interface 0.
    pub const fn class_in(request: u8, value: u16, length: u16) -> Self {
        Self {
            request_type: 0xA1,
            request,
            value,
            index: 0,
            length,
        }
    }

    /// Host-to-device class request addressed to interface 0.
    pub const fn class_out(request: u8, value: u16) -> Self {
        Self {
            request_type: 0x21,
            request,
            value,
            index: 0,
            length: 0,
        }
    }

    pub fn kind(&self) -> u8 {
        self.request_type & REQUEST_TYPE_MASK
    }

    pub fn value_high(&self) -> u8 {
        (self.value >> 8) as u8
    }
}

/// Answer to a control request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Not handled, or handled without a data stage.
    Empty,
    Report(Report),
    IdleRate(u8),
}

impl Reply {
    /// Copy the reply into `buf`, truncated to what the host asked for.
    /// Returns the number of bytes written.
    pub fn write_to(&self, buf: &mut [u8; REPORT_LEN], max_len: u16) -> u8 {
        let len = match self {
            Reply::Empty => 0,
            Reply::Report(report) => {
                *buf = report.to_bytes();
                REPORT_LEN
            }
            Reply::IdleRate(rate) => {
                buf[0] = *rate;
                1
            }
        };
        len.min(max_len as usize) as u8
    }
}

/// Answer one control request.
///
/// Get_Report samples the keys at request time instead of reusing the main
/// loop's last observed key: the host may poll out of step with the loop.
pub fn respond<K: KeySampler>(packet: &SetupPacket, keys: &K, idle: &mut IdleTimer) -> Reply {
    if packet.kind() != REQUEST_TYPE_CLASS {
        // No vendor requests; standard requests belong to the transceiver.
        debug!(
            "unhandled request type {:#04x} request {:#04x}",
            packet.request_type, packet.request
        );
        return Reply::Empty;
    }

    match packet.request {
        HID_GET_REPORT if packet.value_high() == REPORT_TYPE_INPUT => {
            Reply::Report(build_report(keys.poll()))
        }
        HID_GET_IDLE => Reply::IdleRate(idle.rate()),
        HID_SET_IDLE => {
            idle.set_rate(packet.value_high());
            Reply::Empty
        }
        other => {
            debug!("unsupported HID request {:#04x} (wValue {:#06x})", other, packet.value);
            Reply::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyCode;
    use crate::report::Usage;
    use core::cell::Cell;

    struct Keys(Cell<KeyCode>);

    impl KeySampler for Keys {
        fn poll(&self) -> KeyCode {
            self.0.get()
        }
    }

    fn keys(raw: u8) -> Keys {
        Keys(Cell::new(KeyCode::new(raw).unwrap()))
    }

    fn get_report() -> SetupPacket {
        SetupPacket::class_in(HID_GET_REPORT, (REPORT_TYPE_INPUT as u16) << 8, 2)
    }

    #[test]
    fn parse_setup_packet() {
        let raw = [0x21, 0x0A, 0x00, 0x7D, 0x00, 0x00, 0x00, 0x00];
        let packet = SetupPacket::parse(&raw).unwrap();
        assert_eq!(packet.kind(), REQUEST_TYPE_CLASS);
        assert_eq!(packet.request, HID_SET_IDLE);
        assert_eq!(packet.value_high(), 125);
        assert_eq!(packet.to_bytes(), raw);
    }

    #[test]
    fn parse_rejects_short_packet() {
        assert!(SetupPacket::parse(&[0xA1, 0x01, 0x00]).is_none());
    }

    #[test]
    fn get_report_samples_keys_now() {
        let keys = keys(6);
        let mut idle = IdleTimer::new();
        let reply = respond(&get_report(), &keys, &mut idle);
        assert_eq!(reply, Reply::Report(Report { modifiers: 0, usage: Usage::Up as u8 }));

        keys.0.set(KeyCode::new(7).unwrap());
        let reply = respond(&get_report(), &keys, &mut idle);
        assert_eq!(reply, Reply::Report(Report { modifiers: 0, usage: Usage::Enter as u8 }));
    }

    #[test]
    fn get_report_for_other_report_types_is_empty() {
        let keys = keys(1);
        let mut idle = IdleTimer::new();
        for report_type in [REPORT_TYPE_OUTPUT, REPORT_TYPE_FEATURE] {
            let packet = SetupPacket::class_in(HID_GET_REPORT, (report_type as u16) << 8, 2);
            assert_eq!(respond(&packet, &keys, &mut idle), Reply::Empty);
        }
    }

    #[test]
    fn set_idle_then_get_idle() {
        let keys = keys(0);
        let mut idle = IdleTimer::new();
        for rate in [0u8, 1, 125, 255] {
            let set = SetupPacket::class_out(HID_SET_IDLE, (rate as u16) << 8);
            assert_eq!(respond(&set, &keys, &mut idle), Reply::Empty);
            let get = SetupPacket::class_in(HID_GET_IDLE, 0, 1);
            assert_eq!(respond(&get, &keys, &mut idle), Reply::IdleRate(rate));
        }
    }

    #[test]
    fn set_idle_ignores_report_id_byte() {
        let mut idle = IdleTimer::new();
        let set = SetupPacket::class_out(HID_SET_IDLE, 0x2A07);
        respond(&set, &keys(0), &mut idle);
        assert_eq!(idle.rate(), 0x2A);
    }

    #[test]
    fn vendor_and_standard_requests_are_empty() {
        let mut idle = IdleTimer::new();
        let vendor = SetupPacket {
            request_type: 0xC0,
            request: HID_GET_IDLE,
            value: 0,
            index: 0,
            length: 1,
        };
        assert_eq!(respond(&vendor, &keys(0), &mut idle), Reply::Empty);

        let standard = SetupPacket {
            request_type: 0x80,
            request: 0x06,
            value: 0x0100,
            index: 0,
            length: 18,
        };
        assert_eq!(respond(&standard, &keys(0), &mut idle), Reply::Empty);
    }

    #[test]
    fn unsupported_class_requests_are_empty() {
        let mut idle = IdleTimer::new();
        for request in [HID_GET_PROTOCOL, HID_SET_REPORT, HID_SET_PROTOCOL] {
            let packet = SetupPacket::class_in(request, 0, 1);
            assert_eq!(respond(&packet, &keys(2), &mut idle), Reply::Empty);
        }
    }

    #[test]
    fn reply_bytes_are_truncated_to_w_length() {
        let mut buf = [0u8; REPORT_LEN];
        let reply = Reply::Report(Report { modifiers: 0, usage: Usage::Left as u8 });
        assert_eq!(reply.write_to(&mut buf, 8), 2);
        assert_eq!(buf, [0x00, 0x50]);
        assert_eq!(reply.write_to(&mut buf, 1), 1);

        assert_eq!(Reply::IdleRate(9).write_to(&mut buf, 1), 1);
        assert_eq!(buf[0], 9);
        assert_eq!(Reply::Empty.write_to(&mut buf, 64), 0);
    }
}
