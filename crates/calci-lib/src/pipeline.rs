use crate::{
    config::AnalysisConfig,
    detectors::{
        peaks::detect_extrema,
        ratio::{choose_ratio, RatioChoice},
    },
    fit::{fit_decay_curves, goodness_of_fit, reconstruct_decay_curve, DecayFit},
    metrics::{
        amplitude::{
            locate_elapsed_times_at_amplitude, locate_indices_at_amplitude,
            locate_values_at_amplitude, TAU_FRACTION,
        },
        kinetics::{aggregate, ColumnMetrics, CycleKinetics},
    },
    signal::{ChannelPair, Cycle, Extrema},
    smoothing::smooth_between_peaks,
};
use log::debug;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("raw column has {0} rows; interleaved channels need an even count")]
    OddLength(usize),
    #[error("time vector has {time} samples but the ratio series has {ratio}")]
    Misaligned { time: usize, ratio: usize },
}

/// Everything computed for one column: the summary record plus the arrays a
/// chart needs.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnAnalysis {
    pub metrics: ColumnMetrics,
    pub ratio_choice: RatioChoice,
    pub time: Vec<f64>,
    pub ratio: Vec<f64>,
    pub smoothed: Vec<f64>,
    /// Fitted decays, NaN outside fitted spans.
    pub fitted_curve: Vec<f64>,
    pub extrema: Extrema,
    /// Spans between the configured decay start and end amplitudes.
    pub decay_cycles: Vec<Cycle>,
    pub fits: Vec<DecayFit>,
    pub goodness_of_fit: Vec<f64>,
    pub tau_markers: Vec<usize>,
    pub tau_values: Vec<f64>,
}

/// Analyze one cell-line column.
///
/// `raw` holds the two light channels interleaved row by row (background
/// already removed). `time` is aligned with the ratio series, i.e. it has one
/// entry per pair of raw rows.
pub fn analyze_column(
    raw: &[f64],
    time: &[f64],
    cfg: &AnalysisConfig,
) -> Result<ColumnAnalysis, AnalysisError> {
    if raw.len() % 2 != 0 {
        return Err(AnalysisError::OddLength(raw.len()));
    }
    let channels = ChannelPair::from_interleaved(raw);
    let forward = channels.forward_ratio();
    if time.len() != forward.len() {
        return Err(AnalysisError::Misaligned {
            time: time.len(),
            ratio: forward.len(),
        });
    }
    let reverse = channels.reverse_ratio();

    let ratio_choice = choose_ratio(&forward, time, cfg);
    let ratio = ratio_choice.pick(&forward, &reverse).to_vec();

    let extrema = detect_extrema(&ratio, cfg);
    let smoothed = smooth_between_peaks(&ratio, &extrema);
    let decay_cycles = decay_window(&smoothed, &extrema.cycles(), cfg);

    let decay_time_36 =
        locate_elapsed_times_at_amplitude(&smoothed, time, &decay_cycles, TAU_FRACTION, true);
    let fits = fit_decay_curves(&ratio, time, &decay_cycles, &decay_time_36, cfg);
    let fitted_curve = reconstruct_decay_curve(time, &decay_cycles, &fits);
    let goodness = goodness_of_fit(&ratio, &fitted_curve, &decay_cycles);

    let tau_markers =
        locate_indices_at_amplitude(&fitted_curve, &decay_cycles, TAU_FRACTION, true);
    let tau_values = locate_values_at_amplitude(&fitted_curve, &decay_cycles, TAU_FRACTION, true);
    let curve_fit_decay_time_36 =
        locate_elapsed_times_at_amplitude(&fitted_curve, time, &decay_cycles, TAU_FRACTION, true);

    debug!(
        "{} cycles, ratio {:?}, decay spans {:?}",
        extrema.len(),
        ratio_choice,
        decay_cycles
    );

    let kinetics = CycleKinetics {
        decay_time_36,
        fits,
        goodness_of_fit: goodness,
        curve_fit_decay_time_36,
        curve_fit_decay_value_36: tau_values.clone(),
    };
    let metrics = aggregate(&ratio, time, &extrema, &kinetics, cfg.range_limit);

    Ok(ColumnAnalysis {
        metrics,
        ratio_choice,
        time: time.to_vec(),
        ratio,
        smoothed,
        fitted_curve,
        extrema,
        decay_cycles,
        fits: kinetics.fits,
        goodness_of_fit: kinetics.goodness_of_fit,
        tau_markers,
        tau_values,
    })
}

/// Narrow every cycle to where the smoothed decay passes the configured start
/// and end amplitudes.
fn decay_window(smoothed: &[f64], cycles: &[Cycle], cfg: &AnalysisConfig) -> Vec<Cycle> {
    if cycles.is_empty() {
        return Vec::new();
    }
    let starts = locate_indices_at_amplitude(smoothed, cycles, cfg.decay_start, true);
    let ends = locate_indices_at_amplitude(smoothed, cycles, cfg.decay_end, true);
    starts
        .into_iter()
        .zip(ends)
        .map(|(max, min)| Cycle::new(max, min))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Transient;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        let diff = (actual - expected).abs();
        assert!(
            diff <= tol,
            "expected {expected}, got {actual} (diff {diff} > tol {tol})"
        );
    }

    /// Channel A carries twice the transient, channel B is a flat 2.0.
    fn interleaved(values: &[f64]) -> Vec<f64> {
        values.iter().flat_map(|v| [2.0 * v, 2.0]).collect()
    }

    #[test]
    fn four_transients_end_to_end() {
        let (time, values) = Transient::default().sample();
        let raw = interleaved(&values);
        let analysis = analyze_column(&raw, &time, &AnalysisConfig::default()).unwrap();

        assert_eq!(analysis.ratio_choice, RatioChoice::First);
        assert_eq!(analysis.extrema.maxima, vec![30, 130, 230, 330]);
        assert_eq!(analysis.extrema.minima, vec![125, 225, 325, 425]);
        assert_eq!(analysis.decay_cycles.len(), 4);
        assert_eq!(analysis.fits.len(), 4);
        assert_eq!(analysis.goodness_of_fit.len(), 4);
        assert_eq!(analysis.tau_markers.len(), 4);
        assert_eq!(analysis.tau_values.len(), 4);

        let m = analysis.metrics;
        assert_close(m.beat_rate, 30.0, 1e-9);
        assert_close(m.beat_variation, 0.0, 1e-9);
        assert_close(m.tau, 1.25, 0.01);
        assert_close(m.rc, 0.8, 0.01);
        assert_close(m.y0, 2.0, 0.05);
        assert_close(m.a, 10.0, 0.05);
        assert!(m.goodness_of_fit > 0.999, "r2 {}", m.goodness_of_fit);
        assert_close(m.rise_time, 0.1, 1e-9);
        assert_close(m.decay_time, 1.9, 1e-9);
        assert_close(m.maxima_mean, 12.0, 1e-9);
        assert_close(m.minima_mean, 2.0 + 10.0 * (-1.52_f64).exp(), 1e-9);
        assert_close(m.curve_fit_decay_time_36, 0.85, 0.02);

        for (cycle, &marker) in analysis.decay_cycles.iter().zip(&analysis.tau_markers) {
            assert!(marker > cycle.max && marker < cycle.min);
        }
        assert!(analysis.fitted_curve[..30].iter().all(|v| v.is_nan()));
        assert!(analysis.fitted_curve[30..=125].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn range_limit_restricts_averaging() {
        let (time, values) = Transient::default().sample();
        let raw = interleaved(&values);
        let cfg = AnalysisConfig {
            range_limit: Some(2),
            ..AnalysisConfig::default()
        };
        let limited = analyze_column(&raw, &time, &cfg).unwrap();
        assert_eq!(limited.fits.len(), 4);
        assert_close(limited.metrics.beat_rate, 30.0, 1e-9);
        assert_close(limited.metrics.tau, 1.25, 0.01);

        let cfg = AnalysisConfig {
            range_limit: Some(0),
            ..AnalysisConfig::default()
        };
        let none = analyze_column(&raw, &time, &cfg).unwrap();
        assert_eq!(none.metrics.rc, 0.0);
        assert_eq!(none.metrics.tau, 0.0);
        assert_eq!(none.metrics.amplitude, 0.0);
    }

    #[test]
    fn swapped_channels_give_the_same_ratio() {
        let (time, values) = Transient::default().sample();
        let swapped: Vec<f64> = values.iter().flat_map(|v| [2.0, 2.0 * v]).collect();
        let analysis = analyze_column(&swapped, &time, &AnalysisConfig::default()).unwrap();
        assert_eq!(analysis.ratio_choice, RatioChoice::Second);
        assert_close(analysis.metrics.tau, 1.25, 0.01);
    }

    #[test]
    fn flat_column_degrades_to_zeroed_metrics() {
        let time: Vec<f64> = (0..200).map(|i| i as f64 * 0.02).collect();
        let raw = vec![1.0; 400];
        let analysis = analyze_column(&raw, &time, &AnalysisConfig::default()).unwrap();
        assert!(analysis.extrema.is_empty());
        assert!(analysis.decay_cycles.is_empty());
        assert!(analysis.fits.is_empty());
        assert_eq!(analysis.goodness_of_fit, vec![0.0]);
        assert_eq!(analysis.tau_markers, vec![0]);
        assert_eq!(analysis.metrics, ColumnMetrics::default());
        assert!(analysis.fitted_curve.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rejects_malformed_input() {
        let cfg = AnalysisConfig::default();
        assert_eq!(
            analyze_column(&[1.0, 2.0, 3.0], &[0.0], &cfg).unwrap_err(),
            AnalysisError::OddLength(3)
        );
        assert_eq!(
            analyze_column(&[1.0, 2.0, 3.0, 4.0], &[0.0], &cfg).unwrap_err(),
            AnalysisError::Misaligned { time: 1, ratio: 2 }
        );
    }
}
