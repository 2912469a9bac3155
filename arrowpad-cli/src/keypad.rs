use anyhow::{bail, Context, Result};
use arrowpad_core::config::INTERRUPT_IN_ENDPOINT;
use arrowpad_core::control::{HID_GET_IDLE, HID_GET_REPORT, HID_SET_IDLE, REPORT_TYPE_INPUT};
use arrowpad_core::report::REPORT_LEN;
use arrowpad_core::{Report, SetupPacket};
use rusb::{Device, DeviceHandle, GlobalContext};
use std::time::Duration;
use tracing::debug;

/// HID interface number. The keypad has only one.
const INTERFACE: u8 = 0;

/// Which device to talk to, and how patiently.
#[derive(Clone, Copy, Debug)]
pub struct Target {
    pub vid: u16,
    pub pid: u16,
    pub timeout: Duration,
}

/// A connected keypad as seen on the bus.
pub struct Found {
    pub bus: u8,
    pub address: u8,
    pub product: Option<String>,
}

fn matching(target: &Target) -> Result<Vec<Device<GlobalContext>>> {
    let devices = rusb::devices().context("failed to enumerate USB devices")?;
    let mut found = Vec::new();
    for device in devices.iter() {
        let desc = device
            .device_descriptor()
            .context("failed to read device descriptor")?;
        if desc.vendor_id() == target.vid && desc.product_id() == target.pid {
            found.push(device);
        }
    }
    Ok(found)
}

/// List every device with the target's VID/PID.
pub fn detect(target: &Target) -> Result<Vec<Found>> {
    let mut found = Vec::new();
    for device in matching(target)? {
        // Reading the product string needs the device opened; that may
        // fail without permissions, which is fine for a listing.
        let product = device.open().ok().and_then(|handle| {
            let desc = device.device_descriptor().ok()?;
            handle.read_product_string_ascii(&desc).ok()
        });
        found.push(Found {
            bus: device.bus_number(),
            address: device.address(),
            product,
        });
    }
    Ok(found)
}

fn decode_report(data: &[u8]) -> Result<Report> {
    match Report::from_bytes(data) {
        Some(report) => Ok(report),
        None => bail!("short report: got {} of {} bytes", data.len(), REPORT_LEN),
    }
}

/// An opened keypad.
pub struct Keypad {
    handle: DeviceHandle<GlobalContext>,
    timeout: Duration,
    claimed: bool,
}

impl Keypad {
    /// Open the first device matching `target`.
    pub fn open(target: &Target) -> Result<Self> {
        let Some(device) = matching(target)?.into_iter().next() else {
            bail!(
                "no keypad with ID {:04x}:{:04x} found. Is it plugged in?",
                target.vid,
                target.pid
            );
        };
        let handle = device
            .open()
            .context("failed to open keypad (may need root/sudo or udev rules)")?;
        debug!(
            bus = device.bus_number(),
            address = device.address(),
            "opened keypad"
        );
        Ok(Self {
            handle,
            timeout: target.timeout,
            claimed: false,
        })
    }

    fn read_class(&self, packet: SetupPacket, buf: &mut [u8]) -> Result<usize> {
        self.handle
            .read_control(
                packet.request_type,
                packet.request,
                packet.value,
                packet.index,
                buf,
                self.timeout,
            )
            .context("USB control transfer failed")
    }

    /// Get_Report for the input report. The device samples its keys when it
    /// answers.
    pub fn get_report(&self) -> Result<Report> {
        let packet = SetupPacket::class_in(
            HID_GET_REPORT,
            (REPORT_TYPE_INPUT as u16) << 8,
            REPORT_LEN as u16,
        );
        let mut buf = [0u8; REPORT_LEN];
        let len = self.read_class(packet, &mut buf)?;
        decode_report(&buf[..len])
    }

    /// Get_Idle. Returns the rate in 4 ms units, 0 meaning indefinite.
    pub fn get_idle(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        let len = self.read_class(SetupPacket::class_in(HID_GET_IDLE, 0, 1), &mut buf)?;
        if len != 1 {
            bail!("Get_Idle returned {} bytes", len);
        }
        Ok(buf[0])
    }

    /// Set_Idle. The rate goes in the high byte of wValue.
    pub fn set_idle(&self, rate: u8) -> Result<()> {
        let packet = SetupPacket::class_out(HID_SET_IDLE, (rate as u16) << 8);
        self.handle
            .write_control(
                packet.request_type,
                packet.request,
                packet.value,
                packet.index,
                &[],
                self.timeout,
            )
            .context("USB control transfer failed")?;
        Ok(())
    }

    /// Take the HID interface away from the kernel so the interrupt endpoint
    /// can be read.
    pub fn claim(&mut self) -> Result<()> {
        if self.claimed {
            return Ok(());
        }
        // Not supported everywhere; claiming below reports the real problem.
        if let Err(e) = self.handle.set_auto_detach_kernel_driver(true) {
            debug!("auto-detach unavailable: {e}");
        }
        self.handle
            .claim_interface(INTERFACE)
            .context("failed to claim HID interface")?;
        self.claimed = true;
        Ok(())
    }

    /// Wait up to `wait` for the next interrupt report. `None` on timeout.
    pub fn read_report(&self, wait: Duration) -> Result<Option<Report>> {
        let mut buf = [0u8; REPORT_LEN];
        match self.handle.read_interrupt(INTERRUPT_IN_ENDPOINT, &mut buf, wait) {
            Ok(len) => decode_report(&buf[..len]).map(Some),
            Err(rusb::Error::Timeout) => Ok(None),
            Err(e) => Err(e).context("interrupt transfer failed"),
        }
    }
}

impl Drop for Keypad {
    fn drop(&mut self) {
        if self.claimed {
            let _ = self.handle.release_interface(INTERFACE);
        }
    }
}
