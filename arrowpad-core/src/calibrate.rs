//! RC oscillator calibration against the USB frame timing.
//!
//! Right after a bus reset the host's frame timing is a precise reference.
//! The transceiver's frame length measurement is proportional to the real
//! core clock, so we tune the trim register until the measurement matches the
//! count expected at the nominal clock: first a binary search over the 8-bit
//! trim range, then a search of the immediate neighbourhood of the result.
//!
//! The binary search probes trim values up to 192 even when the optimum is
//! far below that. Those probes may overclock the core, which is only safe at
//! nominal supply voltage.

use log::{info, trace};

use crate::config::CALIBRATION_FIRST_STEP;
use crate::hal::{FrameMeter, Oscillator};

/// Outcome of a calibration run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Calibration {
    /// Trim value left in the oscillator register.
    pub trim: u8,
    /// |measured - target| at that trim value.
    pub deviation: u16,
}

/// Tune `osc` so that `meter` reads as close to `target` as possible.
///
/// Takes at most 8 + 3 measurements. The winning value is written to the
/// trim register before returning.
pub fn calibrate<O, M>(osc: &mut O, meter: &mut M, target: u16) -> Calibration
where
    O: Oscillator,
    M: FrameMeter,
{
    // Binary search: keep each step whose trial still runs too slow.
    let mut base: u8 = 0;
    let mut step = CALIBRATION_FIRST_STEP;
    while step > 0 {
        let trial = base + step;
        osc.set_trim(trial);
        let measured = meter.measure_frame_length();
        trace!("calibrate: trim {} -> {}", trial, measured);
        if measured < target {
            base = trial;
        }
        step >>= 1;
    }

    // Neighbourhood search. The binary search result is within +-1 of the
    // optimum; first minimum wins on ties.
    let mut best = Calibration {
        trim: base,
        deviation: u16::MAX,
    };
    for trial in base.saturating_sub(1)..=base.saturating_add(1) {
        osc.set_trim(trial);
        let deviation = meter.measure_frame_length().abs_diff(target);
        trace!("calibrate: trim {} -> deviation {}", trial, deviation);
        if deviation < best.deviation {
            best = Calibration {
                trim: trial,
                deviation,
            };
        }
    }

    osc.set_trim(best.trim);
    info!(
        "oscillator calibrated: trim {} (deviation {})",
        best.trim, best.deviation
    );
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// Oscillator whose measured frame length is `f(trim)`.
    struct Model<F: Fn(u8) -> u16> {
        trim: Cell<u8>,
        curve: F,
        measurements: Cell<u32>,
    }

    impl<F: Fn(u8) -> u16> Model<F> {
        fn new(curve: F) -> Self {
            Self {
                trim: Cell::new(0),
                curve,
                measurements: Cell::new(0),
            }
        }
    }

    struct Trim<'a, F: Fn(u8) -> u16>(&'a Model<F>);
    struct Meter<'a, F: Fn(u8) -> u16>(&'a Model<F>);

    impl<F: Fn(u8) -> u16> Oscillator for Trim<'_, F> {
        fn trim(&self) -> u8 {
            self.0.trim.get()
        }
        fn set_trim(&mut self, value: u8) {
            self.0.trim.set(value);
        }
    }

    impl<F: Fn(u8) -> u16> FrameMeter for Meter<'_, F> {
        fn measure_frame_length(&mut self) -> u16 {
            self.0.measurements.set(self.0.measurements.get() + 1);
            (self.0.curve)(self.0.trim.get())
        }
    }

    fn run<F: Fn(u8) -> u16>(model: &Model<F>, target: u16) -> Calibration {
        calibrate(&mut Trim(model), &mut Meter(model), target)
    }

    /// Best trim by exhaustive search, first minimum wins.
    fn exhaustive<F: Fn(u8) -> u16>(curve: &F, target: u16) -> u8 {
        (0..=255u8)
            .min_by_key(|&t| curve(t).abs_diff(target))
            .unwrap()
    }

    #[test]
    fn converges_on_linear_oscillator() {
        // 9 counts per trim step, crossing 2356 between 146 and 147.
        let model = Model::new(|t: u8| 1040 + 9 * t as u16);
        let cal = run(&model, 2356);
        assert_eq!(cal.trim, exhaustive(&model.curve, 2356));
        assert_eq!(cal.trim, 146);
        assert_eq!(cal.deviation, 2);
        assert_eq!(model.trim.get(), 146);
    }

    #[test]
    fn bounded_measurement_count() {
        let model = Model::new(|t: u8| 2000 + t as u16 * 3);
        run(&model, 2356);
        assert!(model.measurements.get() <= 11);
    }

    #[test]
    fn matches_exhaustive_search_for_steep_and_flat_curves() {
        for slope in [1u16, 2, 5, 13, 20] {
            for offset in [0u16, 700, 1500, 2300] {
                let curve = move |t: u8| offset + slope * t as u16;
                let model = Model::new(curve);
                let cal = run(&model, 2356);
                let expected = exhaustive(&curve, 2356);
                assert_eq!(
                    curve(cal.trim).abs_diff(2356),
                    curve(expected).abs_diff(2356),
                    "slope {slope} offset {offset}"
                );
            }
        }
    }

    #[test]
    fn tie_keeps_the_lower_trim() {
        // 2350 and 2362 are both 6 away from 2356.
        let model = Model::new(|t: u8| 2350 - 12 * 100 + 12 * t as u16);
        let cal = run(&model, 2356);
        assert_eq!(cal.trim, 100);
        assert_eq!(cal.deviation, 6);
    }

    #[test]
    fn clock_always_too_fast_settles_at_zero() {
        let model = Model::new(|t: u8| 3000 + t as u16);
        let cal = run(&model, 2356);
        assert_eq!(cal.trim, 0);
        // No wrap below zero: 8 probes + trims 0 and 1.
        assert_eq!(model.measurements.get(), 10);
    }

    #[test]
    fn clock_always_too_slow_settles_at_top() {
        let model = Model::new(|t: u8| 100 + t as u16);
        let cal = run(&model, 2356);
        assert_eq!(cal.trim, 255);
        assert_eq!(model.measurements.get(), 10);
    }

    #[test]
    fn binary_search_probe_sequence() {
        let probes = core::cell::RefCell::new(std::vec::Vec::new());
        let model = Model::new(|t: u8| {
            probes.borrow_mut().push(t);
            1040 + 9 * t as u16
        });
        run(&model, 2356);
        assert_eq!(
            &probes.borrow()[..8],
            &[128, 192, 160, 144, 152, 148, 146, 147]
        );
        assert_eq!(&probes.borrow()[8..], &[145, 146, 147]);
    }
}
