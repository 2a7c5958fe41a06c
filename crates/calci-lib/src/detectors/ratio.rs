use crate::{
    config::{AnalysisConfig, RatioSelection},
    detectors::peaks::detect_extrema,
    metrics::kinetics::{decay_times, effective_range_limit, range_limited_mean, rise_times},
};
use serde::{Deserialize, Serialize};

/// Which of the two candidate ratio series was judged physiological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioChoice {
    First,
    Second,
}

impl RatioChoice {
    fn flipped(self, invert: bool) -> Self {
        match (self, invert) {
            (choice, false) => choice,
            (RatioChoice::First, true) => RatioChoice::Second,
            (RatioChoice::Second, true) => RatioChoice::First,
        }
    }

    pub fn pick<'a>(self, first: &'a [f64], second: &'a [f64]) -> &'a [f64] {
        match self {
            RatioChoice::First => first,
            RatioChoice::Second => second,
        }
    }
}

/// Pick between two reciprocal ratio series, returning the chosen one.
pub fn select_ratio<'a>(
    first: &'a [f64],
    second: &'a [f64],
    time: &[f64],
    cfg: &AnalysisConfig,
) -> &'a [f64] {
    choose_ratio(first, time, cfg).pick(first, second)
}

/// Decide from `first` alone whether it (or its reciprocal) is the calcium signal.
///
/// Only `first` is inspected: the two candidates are reciprocals, so the shape
/// of one determines the shape of the other.
pub fn choose_ratio(first: &[f64], time: &[f64], cfg: &AnalysisConfig) -> RatioChoice {
    let looks_physiological = match cfg.ratio_selection {
        RatioSelection::Time => rises_faster_than_it_decays(first, time, cfg),
        RatioSelection::Amplitude => dwells_near_minimum(first),
    };
    let choice = if looks_physiological {
        RatioChoice::First
    } else {
        RatioChoice::Second
    };
    choice.flipped(cfg.invert)
}

/// A calcium transient has a sharp upstroke and a slow decay. With no cycles
/// both means are 0, the comparison is false and the second series wins.
fn rises_faster_than_it_decays(data: &[f64], time: &[f64], cfg: &AnalysisConfig) -> bool {
    let extrema = detect_extrema(data, cfg);
    let limit = Some(effective_range_limit(cfg.range_limit, extrema.len()));
    let rise = range_limited_mean(&rise_times(time, &extrema), limit);
    let decay = range_limited_mean(&decay_times(time, &extrema), limit);
    log::debug!("ratio by time: mean rise {rise:.4}, mean decay {decay:.4}");
    rise < decay
}

/// An exponential decay spends most of its time near baseline, so more than
/// half of the samples should be closer to the global minimum than to the maximum.
fn dwells_near_minimum(data: &[f64]) -> bool {
    let lo = data.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let near_floor = data
        .iter()
        .filter(|&&v| (v - lo).abs() < (v - hi).abs())
        .count();
    log::debug!("ratio by amplitude: {near_floor}/{} samples near minimum", data.len());
    near_floor as f64 > data.len() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{calcium_trace, Transient};

    fn reciprocal(data: &[f64]) -> Vec<f64> {
        data.iter().map(|v| 1.0 / v).collect()
    }

    fn config(selection: RatioSelection, invert: bool) -> AnalysisConfig {
        AnalysisConfig {
            ratio_selection: selection,
            invert,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn time_heuristic_prefers_fast_upstroke() {
        let (time, trace) = calcium_trace(100, 5, 4, 0.02);
        let flipped = reciprocal(&trace);
        let cfg = config(RatioSelection::Time, false);
        assert_eq!(choose_ratio(&trace, &time, &cfg), RatioChoice::First);
        assert_eq!(choose_ratio(&flipped, &time, &cfg), RatioChoice::Second);
    }

    #[test]
    fn argument_order_does_not_change_the_selected_series() {
        let (time, trace) = calcium_trace(100, 5, 4, 0.02);
        let flipped = reciprocal(&trace);
        let cfg = config(RatioSelection::Time, false);
        let a = select_ratio(&trace, &flipped, &time, &cfg);
        let b = select_ratio(&flipped, &trace, &time, &cfg);
        assert_eq!(a, b);
        assert_eq!(a, trace.as_slice());
    }

    #[test]
    fn invert_selects_the_other_series() {
        let (time, trace) = calcium_trace(100, 5, 4, 0.02);
        let flipped = reciprocal(&trace);
        for selection in [RatioSelection::Time, RatioSelection::Amplitude] {
            let plain = select_ratio(&trace, &flipped, &time, &config(selection, false));
            let inverted = select_ratio(&trace, &flipped, &time, &config(selection, true));
            assert_eq!(plain, trace.as_slice());
            assert_eq!(inverted, flipped.as_slice());
        }
        let swapped = select_ratio(
            &flipped,
            &trace,
            &time,
            &config(RatioSelection::Time, true),
        );
        assert_eq!(swapped, flipped.as_slice());
    }

    #[test]
    fn amplitude_heuristic_only_reads_the_first_series() {
        let (time, trace) = calcium_trace(100, 5, 4, 0.02);
        let cfg = config(RatioSelection::Amplitude, false);
        let unrelated = vec![f64::NAN; trace.len()];
        let chosen = select_ratio(&trace, &unrelated, &time, &cfg);
        assert_eq!(chosen, trace.as_slice());
    }

    #[test]
    fn amplitude_heuristic_is_not_symmetric_for_slow_decays() {
        // A slow decay over a raised baseline leaves both the trace and its
        // reciprocal with most samples near their minimum.
        let (time, slow) = calcium_trace(100, 5, 4, 0.02);
        let cfg = config(RatioSelection::Amplitude, false);
        assert_eq!(choose_ratio(&slow, &time, &cfg), RatioChoice::First);
        assert_eq!(
            choose_ratio(&reciprocal(&slow), &time, &cfg),
            RatioChoice::First
        );

        // A fast decay settles at baseline, so the reciprocal sits near its maximum.
        let (time, fast) = Transient {
            rate: 5.0,
            ..Transient::default()
        }
        .sample();
        assert_eq!(choose_ratio(&fast, &time, &cfg), RatioChoice::First);
        assert_eq!(
            choose_ratio(&reciprocal(&fast), &time, &cfg),
            RatioChoice::Second
        );
    }

    #[test]
    fn no_cycles_falls_back_to_second_series() {
        let flat = vec![1.0; 200];
        let other = vec![2.0; 200];
        let time: Vec<f64> = (0..200).map(|i| i as f64 * 0.02).collect();
        let cfg = config(RatioSelection::Time, false);
        assert_eq!(select_ratio(&flat, &other, &time, &cfg), other.as_slice());
        let cfg = config(RatioSelection::Time, true);
        assert_eq!(select_ratio(&flat, &other, &time, &cfg), flat.as_slice());
    }
}
