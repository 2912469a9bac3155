mod format;
mod keypad;
mod simulate;

use anyhow::{bail, Result};
use arrowpad_core::config::{CALIBRATION_TARGET, HOST_TRANSFER_TIMEOUT_MS};
use arrowpad_core::KeyCode;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use keypad::{Keypad, Target};
use std::time::Duration;

/// How long one interrupt read waits before the spinner gets a turn.
const WATCH_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "arrowpad-cli")]
#[command(about = "Inspect and configure an arrowpad USB keypad")]
struct Cli {
    /// USB vendor ID (hex)
    #[arg(long, value_parser = parse_hex_u16, default_value = "16c0")]
    vid: u16,
    /// USB product ID (hex)
    #[arg(long, value_parser = parse_hex_u16, default_value = "27db")]
    pid: u16,
    /// Timeout for USB transfers in milliseconds
    #[arg(long, default_value_t = HOST_TRANSFER_TIMEOUT_MS)]
    timeout_ms: u64,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected keypads
    Detect,
    /// Read the current input report (Get_Report)
    Report,
    /// Read or change the idle rate
    Idle {
        #[command(subcommand)]
        action: IdleAction,
    },
    /// Print key transitions as the keypad reports them
    Watch {
        /// Stop after this many key transitions
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print how key line combinations map to reports
    Table,
    /// Run the keypad engine against simulated hardware
    Simulate {
        /// Oscillator model: frame length count at trim 0
        #[arg(long, default_value_t = 1040)]
        offset: u16,
        /// Oscillator model: counts per trim step
        #[arg(long, default_value_t = 9)]
        slope: u16,
        /// Idle rate to set before the script runs (4 ms units)
        #[arg(long, default_value_t = 0)]
        rate: u8,
        /// Key codes, one per 16 ms tick, e.g. "6*4,0,2*10,0"
        #[arg(long, default_value = "6*4,0*2,2*10,0")]
        script: String,
    },
}

#[derive(Subcommand)]
enum IdleAction {
    /// Read the idle rate (Get_Idle)
    Get,
    /// Set the idle rate (Set_Idle)
    Set {
        /// Rate in 4 ms units, 0 = report on change only
        #[arg(required_unless_present = "ms", conflicts_with = "ms")]
        rate: Option<u8>,
        /// Repeat interval in milliseconds instead of a raw rate
        #[arg(long)]
        ms: Option<u32>,
    },
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex ID {:?}: {}", s, e))
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let target = Target {
        vid: cli.vid,
        pid: cli.pid,
        timeout: Duration::from_millis(cli.timeout_ms),
    };

    match cli.command {
        Command::Detect => {
            let found = keypad::detect(&target)?;
            if found.is_empty() {
                println!("No keypad with ID {:04x}:{:04x} found.", target.vid, target.pid);
            }
            for dev in found {
                println!(
                    "Bus {:03} Device {:03}: ID {:04x}:{:04x} {}",
                    dev.bus,
                    dev.address,
                    target.vid,
                    target.pid,
                    dev.product.as_deref().unwrap_or("(product name unavailable)")
                );
            }
        }
        Command::Report => {
            let keypad = Keypad::open(&target)?;
            let report = keypad.get_report()?;
            println!(
                "{}  {}",
                format::hex_bytes(&report.to_bytes()),
                format::describe_report(&report)
            );
        }
        Command::Idle { action } => {
            let keypad = Keypad::open(&target)?;
            match action {
                IdleAction::Get => {
                    println!("Idle rate: {}", format::describe_rate(keypad.get_idle()?));
                }
                IdleAction::Set { rate, ms } => {
                    let rate = match (rate, ms) {
                        (Some(rate), _) => rate,
                        (None, Some(ms)) => format::rate_from_ms(ms)?,
                        (None, None) => bail!("give a rate or --ms"),
                    };
                    keypad.set_idle(rate)?;
                    println!("Idle rate set to {}", format::describe_rate(rate));
                }
            }
        }
        Command::Watch { count } => watch(&target, count)?,
        Command::Table => {
            println!("{}", format::table_header());
            for code in KeyCode::all() {
                println!("{}", format::table_row(code));
            }
        }
        Command::Simulate {
            offset,
            slope,
            rate,
            script,
        } => {
            let script = simulate::parse_script(&script)?;

            let (result, probes) = simulate::calibration_trace(offset, slope, CALIBRATION_TARGET);
            println!("Calibration toward {} counts per frame:", CALIBRATION_TARGET);
            for probe in &probes {
                println!("  trim {:>3} -> {:>5}", probe.trim, probe.length);
            }
            println!(
                "Chose trim {} (off by {} counts, {} measurements)",
                result.trim,
                result.deviation,
                probes.len()
            );

            println!();
            println!(
                "Script: {} ticks, idle rate {}",
                script.len(),
                format::describe_rate(rate)
            );
            for sent in simulate::run_script(&script, rate) {
                println!(
                    "  tick {:>4}: {}  {}",
                    sent.tick,
                    format::hex_bytes(&sent.report.to_bytes()),
                    format::describe_report(&sent.report)
                );
            }
        }
    }

    Ok(())
}

fn watch(target: &Target, count: Option<usize>) -> Result<()> {
    let mut keypad = Keypad::open(target)?;
    keypad.claim()?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    pb.set_message("Waiting for reports (Ctrl-C to stop)");
    pb.enable_steady_tick(WATCH_POLL);

    let mut transitions = format::Transitions::default();
    let mut seen = 0;
    while count.map_or(true, |n| seen < n) {
        let Some(report) = keypad.read_report(WATCH_POLL)? else {
            continue;
        };
        if !transitions.accept(report) {
            continue;
        }
        seen += 1;
        pb.println(format!(
            "{}  {}",
            format::hex_bytes(&report.to_bytes()),
            format::describe_report(&report)
        ));
    }

    pb.finish_and_clear();
    Ok(())
}
