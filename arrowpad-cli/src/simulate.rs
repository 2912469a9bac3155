//! Run the firmware engine against simulated hardware.

use anyhow::{bail, Context, Result};
use arrowpad_core::control::HID_SET_IDLE;
use arrowpad_core::hal::FrameMeter;
use arrowpad_core::sim::{
    BusEvent, SimClock, SimDelay, SimKeys, SimStore, SimTick, SimUsb, SimWatchdog,
};
use arrowpad_core::{calibrate, Calibration, Device, KeyCode, MainLoop, Report, SetupPacket};

/// Frame meter that remembers every probe.
struct Recorder<'a> {
    clock: &'a SimClock,
    probes: Vec<Probe>,
}

impl FrameMeter for Recorder<'_> {
    fn measure_frame_length(&mut self) -> u16 {
        let probe = Probe {
            trim: self.clock.current_trim(),
            length: self.clock.frame_length(),
        };
        self.probes.push(probe);
        probe.length
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub trim: u8,
    pub length: u16,
}

/// Calibrate a linear oscillator model (`offset + slope * trim`) and return
/// the probes taken along the way.
pub fn calibration_trace(offset: u16, slope: u16, target: u16) -> (Calibration, Vec<Probe>) {
    let clock = SimClock::new(offset, slope);
    let mut osc = &clock;
    let mut recorder = Recorder {
        clock: &clock,
        probes: Vec::new(),
    };
    let result = calibrate(&mut osc, &mut recorder, target);
    (result, recorder.probes)
}

/// Parse a key script: comma-separated key codes, one per tick, with
/// optional `*n` repeats. `"6*3,0"` holds Up for three ticks then releases.
pub fn parse_script(script: &str) -> Result<Vec<KeyCode>> {
    let mut codes = Vec::new();
    for item in script.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (code, count) = match item.split_once('*') {
            Some((code, count)) => {
                let count: usize = count
                    .trim()
                    .parse()
                    .with_context(|| format!("bad repeat count in {:?}", item))?;
                (code.trim(), count)
            }
            None => (item, 1),
        };
        let raw: u8 = code
            .parse()
            .with_context(|| format!("bad key code {:?}", code))?;
        let Some(key) = KeyCode::new(raw) else {
            bail!("key code {} out of range (0..=7)", raw);
        };
        codes.extend(std::iter::repeat(key).take(count));
    }
    Ok(codes)
}

/// A report the simulated device sent, and the tick it went out on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sent {
    pub tick: usize,
    pub report: Report,
}

/// Boot a simulated keypad, set the idle rate over the bus, then play the
/// script one timer tick per entry. The host polls the interrupt endpoint
/// after every tick.
pub fn run_script(script: &[KeyCode], idle_rate: u8) -> Vec<Sent> {
    let clock = SimClock::new(1040, 9);
    let keys = SimKeys::new();
    let tick = SimTick::new();
    let watchdog = SimWatchdog::new();
    let store = SimStore::new();

    let device = Device::new(&keys, &clock, &store);
    let mut main_loop = MainLoop::new(SimUsb::new(&clock), &tick, &watchdog, device);
    main_loop.boot(&mut SimDelay::default());

    main_loop.usb_mut().queue(BusEvent::Reset);
    main_loop.usb_mut().queue(BusEvent::Setup(SetupPacket::class_out(
        HID_SET_IDLE,
        (idle_rate as u16) << 8,
    )));
    main_loop.step();

    let mut sent = Vec::new();
    for (n, &key) in script.iter().enumerate() {
        keys.press(key);
        tick.overflow();
        let before = main_loop.usb().sent_count();
        main_loop.step();
        if main_loop.usb().sent_count() != before {
            if let Some(report) = main_loop.usb().last_sent() {
                sent.push(Sent { tick: n, report });
            }
        }
        main_loop.usb_mut().host_poll();
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrowpad_core::config::CALIBRATION_TARGET;
    use arrowpad_core::Usage;

    fn key(raw: u8) -> KeyCode {
        KeyCode::new(raw).unwrap()
    }

    #[test]
    fn script_parsing() {
        assert_eq!(parse_script("6, 2,0").unwrap(), vec![key(6), key(2), key(0)]);
        assert_eq!(parse_script("7*3,0").unwrap(), vec![key(7), key(7), key(7), key(0)]);
        assert!(parse_script("").unwrap().is_empty());
        assert!(parse_script("8").is_err());
        assert!(parse_script("x").is_err());
        assert!(parse_script("1*y").is_err());
    }

    #[test]
    fn trace_ends_on_best_trim() {
        let (result, probes) = calibration_trace(1040, 9, CALIBRATION_TARGET);
        assert_eq!(result.trim, 146);
        assert_eq!(result.deviation, 2);
        assert_eq!(probes.len(), 11);
        assert_eq!(probes[0], Probe { trim: 128, length: 1040 + 9 * 128 });
    }

    #[test]
    fn press_and_release_without_repeat() {
        let sent = run_script(&parse_script("6*3,0*2").unwrap(), 0);
        let usages: Vec<_> = sent.iter().map(|s| (s.tick, s.report.usage)).collect();
        assert_eq!(usages, vec![(0, Usage::Up as u8), (3, 0)]);
    }

    #[test]
    fn held_key_repeats_at_idle_rate() {
        // Rate 8 = 32 ms: resend every third tick.
        let sent = run_script(&parse_script("1*7").unwrap(), 8);
        let ticks: Vec<_> = sent.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![0, 3, 6]);
        assert!(sent.iter().all(|s| s.report.usage == Usage::Left as u8));
    }
}
