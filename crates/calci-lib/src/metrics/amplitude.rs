//! Locating where each decay reaches a given fraction of its peak.
//!
//! Decay-time offsets (CTD25, CTD75, ...) are expressed as the relative
//! amplitude left in the signal: CTD75 is the point where 25% remains.

use crate::signal::{finite_or_zero, span, Cycle};

/// Fraction of the initial amplitude left after one time constant (1/e).
pub const TAU_FRACTION: f64 = 0.367_879_441_171_442;

/// Index within `segment` whose value is closest to `max(segment) * fraction`.
///
/// With `normalize`, non-finite samples are zeroed and the segment minimum is
/// subtracted first, so `fraction` is relative to the height above baseline.
/// An empty segment gives 0.
pub fn locate_index(segment: &[f64], fraction: f64, normalize: bool) -> usize {
    if segment.is_empty() {
        return 0;
    }
    let values: Vec<f64> = if normalize {
        let cleaned: Vec<f64> = segment.iter().map(|&v| finite_or_zero(v)).collect();
        let floor = cleaned.iter().copied().fold(f64::INFINITY, f64::min);
        cleaned.into_iter().map(|v| v - floor).collect()
    } else {
        segment.to_vec()
    };
    let target = values.iter().copied().fold(f64::NEG_INFINITY, f64::max) * fraction;

    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, v) in values.iter().enumerate() {
        let distance = (v - target).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

/// Absolute index per cycle where the decay reaches `fraction`. `[0]` without cycles.
pub fn locate_indices_at_amplitude(
    data: &[f64],
    cycles: &[Cycle],
    fraction: f64,
    normalize: bool,
) -> Vec<usize> {
    let indices: Vec<usize> = cycles
        .iter()
        .map(|c| c.max + locate_index(span(data, c.max, c.min), fraction, normalize))
        .collect();
    if indices.is_empty() {
        vec![0]
    } else {
        indices
    }
}

/// Time stamp per cycle at which the decay reaches `fraction`. `[0.0]` without cycles.
pub fn locate_times_at_amplitude(
    data: &[f64],
    time: &[f64],
    cycles: &[Cycle],
    fraction: f64,
    normalize: bool,
) -> Vec<f64> {
    times_at_amplitude(data, time, cycles, fraction, normalize, false)
}

/// Like [`locate_times_at_amplitude`] but measured from each cycle's peak.
pub fn locate_elapsed_times_at_amplitude(
    data: &[f64],
    time: &[f64],
    cycles: &[Cycle],
    fraction: f64,
    normalize: bool,
) -> Vec<f64> {
    times_at_amplitude(data, time, cycles, fraction, normalize, true)
}

fn times_at_amplitude(
    data: &[f64],
    time: &[f64],
    cycles: &[Cycle],
    fraction: f64,
    normalize: bool,
    since_peak: bool,
) -> Vec<f64> {
    let at = |i: usize| time.get(i).copied().unwrap_or(0.0);
    let times: Vec<f64> = cycles
        .iter()
        .map(|c| {
            let index = c.max + locate_index(span(data, c.max, c.min), fraction, normalize);
            if since_peak {
                at(index) - at(c.max)
            } else {
                at(index)
            }
        })
        .collect();
    if times.is_empty() {
        vec![0.0]
    } else {
        times
    }
}

/// Nominal value per cycle at `fraction` of the peak: `peak * fraction`, with
/// the cycle minimum subtracted from the peak first when `normalize` is set.
///
/// This is the computed target, not the nearest sampled value.
pub fn locate_values_at_amplitude(
    data: &[f64],
    cycles: &[Cycle],
    fraction: f64,
    normalize: bool,
) -> Vec<f64> {
    let at = |i: usize| data.get(i).copied().unwrap_or(f64::NAN);
    let values: Vec<f64> = cycles
        .iter()
        .map(|c| {
            let peak = if normalize {
                finite_or_zero(at(c.max)) - finite_or_zero(at(c.min))
            } else {
                at(c.max)
            };
            finite_or_zero(peak * fraction)
        })
        .collect();
    if values.is_empty() {
        vec![0.0]
    } else {
        values
    }
}
