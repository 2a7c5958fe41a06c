use crate::{config::AnalysisConfig, signal::Extrema};

/// Unpaired peak positions, in the order they were confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peaks {
    pub maxima: Vec<usize>,
    pub minima: Vec<usize>,
}

/// Detect and pair the extrema of `data` using the configured lookahead and delta.
pub fn detect_extrema(data: &[f64], cfg: &AnalysisConfig) -> Extrema {
    let peaks = find_peaks(data, cfg.lookahead, cfg.delta);
    Extrema::paired(peaks.minima, peaks.maxima)
}

/// Lookahead peak picker.
///
/// A running maximum is confirmed once the signal has dropped more than
/// `delta` below it and nothing in the next `lookahead` samples exceeds it;
/// minima are confirmed symmetrically. After a maximum the search switches to
/// minima and vice versa. The last `lookahead` samples are never scanned.
pub fn find_peaks(data: &[f64], lookahead: usize, delta: f64) -> Peaks {
    let mut peaks = Peaks::default();
    let lookahead = lookahead.max(1);
    if data.len() <= lookahead {
        return peaks;
    }

    let mut mx = f64::NEG_INFINITY;
    let mut mn = f64::INFINITY;
    let mut mx_pos = 0usize;
    let mut mn_pos = 0usize;
    let mut first_was_max = None;

    for index in 0..data.len() - lookahead {
        let y = data[index];
        if y > mx {
            mx = y;
            mx_pos = index;
        }
        if y < mn {
            mn = y;
            mn_pos = index;
        }
        let ahead = &data[index..index + lookahead];

        if y < mx - delta && mx != f64::INFINITY && window_max(ahead) < mx {
            peaks.maxima.push(mx_pos);
            first_was_max.get_or_insert(true);
            mx = f64::INFINITY;
            mn = f64::INFINITY;
            continue;
        }

        if y > mn + delta && mn != f64::NEG_INFINITY && window_min(ahead) > mn {
            peaks.minima.push(mn_pos);
            first_was_max.get_or_insert(false);
            mn = f64::NEG_INFINITY;
            mx = f64::NEG_INFINITY;
        }
    }

    // The very first confirmation is an artefact of starting the scan mid-slope.
    match first_was_max {
        Some(true) => {
            peaks.maxima.remove(0);
        }
        Some(false) => {
            peaks.minima.remove(0);
        }
        None => {}
    }
    peaks
}

fn window_max(window: &[f64]) -> f64 {
    window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn window_min(window: &[f64]) -> f64 {
    window.iter().copied().fold(f64::INFINITY, f64::min)
}
