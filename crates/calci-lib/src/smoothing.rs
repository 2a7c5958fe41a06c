use crate::signal::Extrema;

pub const SMOOTHING_WINDOW: usize = 5;
pub const SMOOTHING_PASSES: usize = 2;

/// Smooth each rise and each decay span separately, leaving every detected
/// maximum and minimum at its original value.
pub fn smooth_between_peaks(data: &[f64], extrema: &Extrema) -> Vec<f64> {
    let mut smoothed = data.to_vec();
    let Extrema { minima, maxima } = extrema;

    for (&min, &next_max) in minima.iter().zip(maxima.iter().skip(1)) {
        smooth_span(data, &mut smoothed, min, next_max);
    }
    for (&max, &min) in maxima.iter().zip(minima) {
        smooth_span(data, &mut smoothed, max, min);
    }
    smoothed
}

fn smooth_span(original: &[f64], out: &mut [f64], start: usize, end: usize) {
    let end = if end >= original.len() { start } else { end };
    if end <= start + 1 {
        return;
    }
    let averaged =
        centered_moving_average(&original[start..=end], SMOOTHING_WINDOW, SMOOTHING_PASSES);
    out[start..=end].copy_from_slice(&averaged);
    out[start] = original[start];
    out[end] = original[end];
}

/// Repeated centered moving average that keeps the first and last samples.
/// Near the edges the window shrinks to the samples that exist.
pub fn centered_moving_average(data: &[f64], window: usize, passes: usize) -> Vec<f64> {
    let mut smoothed = data.to_vec();
    if data.len() < 3 {
        return smoothed;
    }
    let half = window / 2;
    let last = data.len() - 1;
    for _ in 0..passes {
        let previous = smoothed.clone();
        for k in 1..last {
            let lo = k.saturating_sub(half);
            let hi = (k + half).min(last);
            let window = &previous[lo..=hi];
            smoothed[k] = window.iter().sum::<f64>() / window.len() as f64;
        }
    }
    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AnalysisConfig, detectors::peaks::detect_extrema, testing::calcium_trace};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn extrema_keep_their_original_values() {
        let (_, clean) = calcium_trace(100, 5, 4, 0.02);
        let mut rng = StdRng::seed_from_u64(7);
        let noisy: Vec<f64> = clean
            .iter()
            .map(|v| v + rng.gen_range(-0.05..0.05))
            .collect();
        let extrema = detect_extrema(&noisy, &AnalysisConfig::default());
        assert!(!extrema.is_empty());
        let smoothed = smooth_between_peaks(&noisy, &extrema);
        assert_eq!(smoothed.len(), noisy.len());
        for cycle in extrema.cycles() {
            assert_eq!(smoothed[cycle.max], noisy[cycle.max]);
            assert_eq!(smoothed[cycle.min], noisy[cycle.min]);
        }
        let changed = smoothed.iter().zip(&noisy).filter(|(a, b)| a != b).count();
        assert!(changed > 0, "interior samples should be smoothed");
    }

    #[test]
    fn input_is_left_untouched() {
        let data = vec![0.0, 5.0, 1.0, 4.0, 2.0, 3.0, 0.0, 6.0];
        let before = data.clone();
        let extrema = Extrema::paired(vec![6], vec![1]);
        let _ = smooth_between_peaks(&data, &extrema);
        assert_eq!(data, before);
    }

    #[test]
    fn moving_average_shrinks_window_at_edges() {
        let data = [0.0, 3.0, 6.0, 9.0, 12.0];
        let out = centered_moving_average(&data, 5, 1);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[4], 12.0);
        // k = 1 averages indices 0..=3.
        assert_eq!(out[1], 4.5);
        assert_eq!(out[2], 6.0);
        assert_eq!(out[3], 7.5);
    }

    #[test]
    fn span_ending_past_the_series_is_left_alone() {
        let data = vec![0.0, 5.0, 1.0, 4.0, 2.0, 3.0, 0.0, 6.0];
        let extrema = Extrema::paired(vec![20], vec![1]);
        assert_eq!(extrema.minima, vec![20]);
        assert_eq!(smooth_between_peaks(&data, &extrema), data);
    }

    #[test]
    fn no_extrema_means_no_change() {
        let data = vec![1.0, 3.0, 2.0, 5.0];
        assert_eq!(smooth_between_peaks(&data, &Extrema::default()), data);
    }
}
