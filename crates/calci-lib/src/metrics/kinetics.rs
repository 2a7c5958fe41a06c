use crate::{
    fit::DecayFit,
    signal::{mean, Extrema},
};
use serde::{Deserialize, Serialize};

/// Summary kinetics of one cell-line column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetrics {
    pub minima_mean: f64,
    pub maxima_mean: f64,
    pub amplitude: f64,
    /// Beats per minute.
    pub beat_rate: f64,
    /// Standard deviation of the instantaneous rate (beats per time unit).
    pub beat_variation: f64,
    pub rise_time: f64,
    pub rise_velocity: f64,
    pub y0: f64,
    pub a: f64,
    pub rc: f64,
    pub tau: f64,
    pub rc_1d: f64,
    pub rc_2d: f64,
    pub goodness_of_fit: f64,
    pub decay_time: f64,
    /// Mean time from peak to 1/e of the (smoothed) signal.
    pub decay_time_36: f64,
    /// Mean time from peak to 1/e of the fitted curve.
    pub curve_fit_decay_time_36: f64,
    /// Mean nominal fitted value at 1/e.
    pub curve_fit_decay_value_36: f64,
}

/// Per-cycle quantities produced by the earlier stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleKinetics {
    pub decay_time_36: Vec<f64>,
    pub fits: Vec<DecayFit>,
    pub goodness_of_fit: Vec<f64>,
    pub curve_fit_decay_time_36: Vec<f64>,
    pub curve_fit_decay_value_36: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatRate {
    pub rate: f64,
    pub variation: f64,
}

/// Resolve a configured range limit against the number of detected cycles.
pub fn effective_range_limit(limit: Option<usize>, cycles: usize) -> usize {
    match limit {
        Some(limit) if limit <= cycles => limit,
        _ => cycles,
    }
}

/// Mean of the first `limit` entries (all when `None` or larger than the
/// slice), ignoring NaN entries. Returns 0 when nothing is left to average.
pub fn range_limited_mean(values: &[f64], limit: Option<usize>) -> f64 {
    let take = limit.map_or(values.len(), |l| l.min(values.len()));
    let (sum, count) = values[..take]
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Minimum-to-next-maximum durations. `[0.0]` when there is no complete rise.
pub fn rise_times(time: &[f64], extrema: &Extrema) -> Vec<f64> {
    let rises: Vec<f64> = extrema
        .minima
        .iter()
        .zip(extrema.maxima.iter().skip(1))
        .map(|(&min, &next_max)| time[next_max] - time[min])
        .collect();
    or_zero(rises)
}

/// Maximum-to-minimum durations. `[0.0]` when there are no cycles.
pub fn decay_times(time: &[f64], extrema: &Extrema) -> Vec<f64> {
    let decays: Vec<f64> = extrema
        .maxima
        .iter()
        .zip(&extrema.minima)
        .map(|(&max, &min)| time[min] - time[max])
        .collect();
    or_zero(decays)
}

/// Beats per minute from the mean spacing of the maxima, plus the spread of
/// the instantaneous rate. Both 0 with fewer than two maxima or a zero mean interval.
pub fn beat_rate(time: &[f64], maxima: &[usize]) -> BeatRate {
    if maxima.len() < 2 {
        return BeatRate::default();
    }
    let intervals: Vec<f64> = maxima
        .windows(2)
        .map(|w| time[w[1]] - time[w[0]])
        .collect();
    let interval = mean(&intervals);
    if interval == 0.0 {
        return BeatRate::default();
    }
    let rates: Vec<f64> = intervals.iter().map(|dt| 1.0 / dt).collect();
    let rate_mean = mean(&rates);
    let variance = rates.iter().map(|r| (r - rate_mean).powi(2)).sum::<f64>() / rates.len() as f64;
    BeatRate {
        rate: 60.0 / interval,
        variation: variance.sqrt(),
    }
}

/// Fold the per-cycle arrays of one column into its summary record.
pub fn aggregate(
    ratio: &[f64],
    time: &[f64],
    extrema: &Extrema,
    cycles: &CycleKinetics,
    range_limit: Option<usize>,
) -> ColumnMetrics {
    let limit = Some(effective_range_limit(range_limit, extrema.len()));

    let at = |indices: &[usize]| -> Vec<f64> { indices.iter().map(|&i| ratio[i]).collect() };
    let minima_mean = range_limited_mean(&at(&extrema.minima), limit);
    let maxima_mean = range_limited_mean(&at(&extrema.maxima), limit);
    let amplitude = maxima_mean - minima_mean;

    let beats = beat_rate(time, &extrema.maxima);

    let rise_time = range_limited_mean(&rise_times(time, extrema), limit);
    let rise_velocity = if rise_time != 0.0 {
        amplitude / rise_time
    } else {
        0.0
    };

    let fit_mean = |field: fn(&DecayFit) -> f64| -> f64 {
        let values: Vec<f64> = cycles.fits.iter().map(field).collect();
        range_limited_mean(&values, limit)
    };
    let rc = fit_mean(|f| f.rc);
    let tau = if rc != 0.0 { 1.0 / rc } else { 0.0 };

    ColumnMetrics {
        minima_mean,
        maxima_mean,
        amplitude,
        beat_rate: beats.rate,
        beat_variation: beats.variation,
        rise_time,
        rise_velocity,
        y0: fit_mean(|f| f.y0),
        a: fit_mean(|f| f.a),
        rc,
        tau,
        rc_1d: rc * 3.0,
        rc_2d: rc / 2.0,
        goodness_of_fit: range_limited_mean(&cycles.goodness_of_fit, limit),
        decay_time: range_limited_mean(&decay_times(time, extrema), limit),
        decay_time_36: range_limited_mean(&cycles.decay_time_36, limit),
        curve_fit_decay_time_36: range_limited_mean(&cycles.curve_fit_decay_time_36, limit),
        curve_fit_decay_value_36: range_limited_mean(&cycles.curve_fit_decay_value_36, limit),
    }
}

fn or_zero(values: Vec<f64>) -> Vec<f64> {
    if values.is_empty() {
        vec![0.0]
    } else {
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        let diff = (actual - expected).abs();
        assert!(
            diff <= tol,
            "expected {expected}, got {actual} (diff {diff} > tol {tol})"
        );
    }

    #[test]
    fn range_limited_mean_defaults_to_zero() {
        assert_eq!(range_limited_mean(&[], Some(3)), 0.0);
        assert_eq!(range_limited_mean(&[], None), 0.0);
        assert_eq!(range_limited_mean(&[f64::NAN, f64::NAN], Some(2)), 0.0);
        assert_eq!(range_limited_mean(&[1.0, 2.0], Some(0)), 0.0);
    }

    #[test]
    fn range_limited_mean_skips_nan_and_honours_limit() {
        let values = [1.0, f64::NAN, 3.0, 10.0];
        assert_close(range_limited_mean(&values, Some(3)), 2.0, 1e-12);
        assert_close(range_limited_mean(&values, None), 14.0 / 3.0, 1e-12);
        assert_close(range_limited_mean(&values, Some(40)), 14.0 / 3.0, 1e-12);
    }

    #[test]
    fn effective_limit_clamps_to_cycle_count() {
        assert_eq!(effective_range_limit(None, 4), 4);
        assert_eq!(effective_range_limit(Some(2), 4), 2);
        assert_eq!(effective_range_limit(Some(9), 4), 4);
        assert_eq!(effective_range_limit(Some(3), 0), 0);
    }

    #[test]
    fn rise_and_decay_times_follow_the_pairing() {
        let time: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let extrema = Extrema::paired(vec![3, 7], vec![1, 5]);
        assert_eq!(rise_times(&time, &extrema), vec![1.0]);
        assert_eq!(decay_times(&time, &extrema), vec![1.0, 1.0]);

        let empty = Extrema::default();
        assert_eq!(rise_times(&time, &empty), vec![0.0]);
        assert_eq!(decay_times(&time, &empty), vec![0.0]);
    }

    #[test]
    fn beat_rate_from_regular_maxima() {
        let time: Vec<f64> = (0..1000).map(|i| i as f64 * 0.01).collect();
        let beats = beat_rate(&time, &[100, 300, 500, 700]);
        assert_close(beats.rate, 30.0, 1e-9);
        assert_close(beats.variation, 0.0, 1e-9);
        assert_eq!(beat_rate(&time, &[100]), BeatRate::default());
    }

    #[test]
    fn empty_column_aggregates_to_zero() {
        let cycles = CycleKinetics {
            decay_time_36: vec![0.0],
            fits: vec![DecayFit::NAN],
            goodness_of_fit: vec![0.0],
            curve_fit_decay_time_36: vec![0.0],
            curve_fit_decay_value_36: vec![0.0],
        };
        let metrics = aggregate(&[1.0; 8], &[0.0; 8], &Extrema::default(), &cycles, None);
        assert_eq!(metrics, ColumnMetrics::default());
    }

    #[test]
    fn fit_parameters_are_averaged_over_the_range() {
        let time: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let ratio: Vec<f64> = (0..40).map(|i| if i % 10 == 2 { 5.0 } else { 1.0 }).collect();
        let extrema = Extrema::paired(vec![9, 19, 29], vec![2, 12, 22]);
        let cycles = CycleKinetics {
            decay_time_36: vec![0.2, 0.4, 9.0],
            fits: vec![
                DecayFit { a: 4.0, rc: 2.0, y0: 1.0 },
                DecayFit::NAN,
                DecayFit { a: 8.0, rc: 6.0, y0: 3.0 },
            ],
            goodness_of_fit: vec![0.9, 0.0, 0.5],
            curve_fit_decay_time_36: vec![0.5, 0.0, 0.5],
            curve_fit_decay_value_36: vec![1.5, 0.0, 1.5],
        };
        let metrics = aggregate(&ratio, &time, &extrema, &cycles, Some(2));
        assert_close(metrics.rc, 2.0, 1e-12);
        assert_close(metrics.tau, 0.5, 1e-12);
        assert_close(metrics.rc_1d, 6.0, 1e-12);
        assert_close(metrics.rc_2d, 1.0, 1e-12);
        assert_close(metrics.a, 4.0, 1e-12);
        assert_close(metrics.goodness_of_fit, 0.45, 1e-12);
        assert_close(metrics.decay_time_36, 0.3, 1e-12);
        assert_close(metrics.amplitude, 4.0, 1e-12);
        assert_close(metrics.rise_time, 0.3, 1e-12);
        assert_close(metrics.rise_velocity, 4.0 / 0.3, 1e-9);
        assert_close(metrics.decay_time, 0.7, 1e-12);
        assert_close(metrics.beat_rate, 60.0, 1e-9);
    }
}
