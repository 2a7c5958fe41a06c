// Shared helpers for the CLI integration tests.
#![allow(dead_code)]

use std::{fmt::Write as _, fs, path::Path};

pub const PERIOD: usize = 100;
pub const RISE: usize = 5;
pub const CYCLES: usize = 4;
pub const DT: f64 = 0.02;
const AMPLITUDE: f64 = 10.0;
const BASELINE: f64 = 2.0;
const RATE: f64 = 0.8;

/// Linear upstroke then exponential decay, repeated every `PERIOD` samples.
pub fn transient() -> Vec<f64> {
    let lead = PERIOD / 4;
    let n = lead + CYCLES * PERIOD + PERIOD / 2;
    let decay = |steps: usize| BASELINE + AMPLITUDE * (-RATE * steps as f64 * DT).exp();
    let trough = decay(PERIOD - RISE);
    let peak = BASELINE + AMPLITUDE;
    (0..n)
        .map(|i| {
            let p = (i + PERIOD - lead) % PERIOD;
            if p == 0 {
                trough
            } else if p < RISE {
                trough + (peak - trough) * p as f64 / RISE as f64
            } else {
                decay(p - RISE)
            }
        })
        .collect()
}

/// A worksheet with two cell lines and a background column. "Cell A" carries
/// the transient on its even rows, "Cell B" on its odd rows.
pub fn write_sheet(path: &Path) {
    let signal = transient();
    let mut text = String::from("Frame,Time,Wavelength,Exposure,Note,Cell A,Cell B,Background\n");
    for (i, v) in signal.iter().enumerate() {
        let t = i as f64 * DT;
        let even = (2 * i, t, 2.0 * v + 0.5, 2.5, 0.5);
        let odd = (2 * i + 1, t + DT / 2.0, 2.25, 2.0 * v + 0.25, 0.25);
        for (frame, time, a, b, bg) in [even, odd] {
            writeln!(text, "{frame},{time},340,100,,{a},{b},{bg}").unwrap();
        }
    }
    fs::write(path, text).unwrap();
}

pub fn write_narrow_sheet(path: &Path) {
    fs::write(path, "Frame,Time,A,B,C,D\n1,0.0,1,2,3,4\n2,0.01,1,2,3,4\n").unwrap();
}

pub fn assert_close(actual: f64, expected: f64, tol: f64) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tol,
        "expected {expected}, got {actual} (diff {diff} > tol {tol})"
    );
}
