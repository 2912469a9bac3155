//! Device behavior engine for the arrowpad: a seven-combination USB HID
//! keyboard on a microcontroller whose USB signaling is done in software.
//!
//! This crate is `no_std` so it can be used by both the AVR firmware and the
//! native CLI tool. Hardware and the software USB transceiver are reached only
//! through the traits in [`hal`], which lets the whole engine run on the host
//! against the scripted collaborators in [`sim`].

#![cfg_attr(not(test), no_std)]

pub mod calibrate;
pub mod config;
pub mod control;
pub mod device;
pub mod hal;
pub mod idle;
pub mod keys;
pub mod report;
pub mod sim;

pub use calibrate::{calibrate, Calibration};
pub use control::{Reply, SetupPacket};
pub use device::{Device, MainLoop};
pub use idle::IdleTimer;
pub use keys::KeyCode;
pub use report::{build_report, Report, Usage, REPORT_TABLE};
