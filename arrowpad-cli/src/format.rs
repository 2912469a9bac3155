use anyhow::{bail, Result};
use arrowpad_core::config::IDLE_RATE_UNIT_MS;
use arrowpad_core::keys::NUM_LINES;
use arrowpad_core::{build_report, KeyCode, Report, Usage};

/// Idle rate for a repeat interval in milliseconds. Intervals that are not a
/// multiple of the 4 ms unit round down.
pub fn rate_from_ms(ms: u32) -> Result<u8> {
    let rate = ms / IDLE_RATE_UNIT_MS as u32;
    if rate > u8::MAX as u32 {
        bail!(
            "{} ms is longer than the maximum idle interval of {} ms",
            ms,
            u8::MAX as u32 * IDLE_RATE_UNIT_MS as u32
        );
    }
    if ms % IDLE_RATE_UNIT_MS as u32 != 0 {
        tracing::warn!(
            "{} ms is not a multiple of {} ms, using {} ms",
            ms,
            IDLE_RATE_UNIT_MS,
            rate as u32 * IDLE_RATE_UNIT_MS as u32
        );
    }
    Ok(rate as u8)
}

pub fn describe_rate(rate: u8) -> String {
    if rate == 0 {
        "0 (report on change only)".to_string()
    } else {
        format!("{} ({} ms)", rate, rate as u32 * IDLE_RATE_UNIT_MS as u32)
    }
}

/// Human-readable name for the key in a report.
pub fn describe_report(report: &Report) -> String {
    let key = match Usage::from_code(report.usage) {
        Some(usage) => usage.display_name().to_string(),
        None => format!("usage 0x{:02X}", report.usage),
    };
    if report.modifiers == 0 {
        key
    } else {
        format!("{} + modifiers 0x{:02X}", key, report.modifiers)
    }
}

/// Passes a report through only when it differs from the previous one, so
/// idle-rate repeats of a held key are not shown again.
#[derive(Default)]
pub struct Transitions {
    last: Option<Report>,
}

impl Transitions {
    pub fn accept(&mut self, report: Report) -> bool {
        if self.last == Some(report) {
            return false;
        }
        self.last = Some(report);
        true
    }
}

pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One row of the key table: code, input lines (`x` = pulled low), report.
pub fn table_row(code: KeyCode) -> String {
    let lines: String = (0..NUM_LINES)
        .map(|n| if code.line(n) { 'x' } else { '.' })
        .collect();
    let report = build_report(code);
    format!(
        "{:>4}  {:>5}  {}  {}",
        code.bits(),
        lines,
        hex_bytes(&report.to_bytes()),
        describe_report(&report)
    )
}

pub fn table_header() -> String {
    format!("{:>4}  {:>5}  {:<5}  {}", "code", "lines", "bytes", "key")
}
