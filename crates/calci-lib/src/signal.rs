use serde::{Deserialize, Serialize};

/// One decay span of a waveform: the maximum and the minimum that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub max: usize,
    pub min: usize,
}

impl Cycle {
    pub fn new(max: usize, min: usize) -> Self {
        Self { max, min }
    }

    /// Number of sample steps between the maximum and the minimum (0 when reversed).
    pub fn width(&self) -> usize {
        self.min.saturating_sub(self.max)
    }
}

/// Paired peak positions of a series.
///
/// Always holds as many minima as maxima, and the first minimum never
/// precedes the first maximum, so `minima[j]` closes the decay that starts
/// at `maxima[j]` and `maxima[j + 1]` closes the rise that starts at `minima[j]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extrema {
    pub minima: Vec<usize>,
    pub maxima: Vec<usize>,
}

impl Extrema {
    /// Pair raw detector output: drop leading minima that come before the first
    /// maximum, then truncate the longer list from the end.
    pub fn paired(mut minima: Vec<usize>, mut maxima: Vec<usize>) -> Self {
        if let Some(&first_max) = maxima.first() {
            let leading = minima.iter().take_while(|&&m| m < first_max).count();
            minima.drain(..leading);
        }
        let len = minima.len().min(maxima.len());
        minima.truncate(len);
        maxima.truncate(len);
        Self { minima, maxima }
    }

    pub fn len(&self) -> usize {
        self.maxima.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maxima.is_empty()
    }

    /// Decay spans in order.
    pub fn cycles(&self) -> Vec<Cycle> {
        self.maxima
            .iter()
            .zip(&self.minima)
            .map(|(&max, &min)| Cycle::new(max, min))
            .collect()
    }
}

/// The two raw light channels of one cell-line column.
///
/// Acquisition interleaves the channels row by row (even rows, odd rows), and
/// which of them is the numerator is not recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPair {
    pub even: Vec<f64>,
    pub odd: Vec<f64>,
}

impl ChannelPair {
    pub fn from_interleaved(raw: &[f64]) -> Self {
        let even = raw.iter().step_by(2).copied().collect();
        let odd = raw.iter().skip(1).step_by(2).copied().collect();
        Self { even, odd }
    }

    /// `even / odd` elementwise.
    pub fn forward_ratio(&self) -> Vec<f64> {
        self.even.iter().zip(&self.odd).map(|(a, b)| a / b).collect()
    }

    /// `odd / even` elementwise.
    pub fn reverse_ratio(&self) -> Vec<f64> {
        self.odd.iter().zip(&self.even).map(|(b, a)| b / a).collect()
    }
}

/// Inclusive `start..=end` view of `data`, clipped to its length.
/// Reversed or out-of-range bounds give an empty slice.
pub fn span(data: &[f64], start: usize, end: usize) -> &[f64] {
    if start > end || start >= data.len() {
        return &[];
    }
    let stop = end.saturating_add(1).min(data.len());
    &data[start..stop]
}

/// Map NaN and infinities to zero.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Mean of a slice; 0 for an empty one.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        0.0
    } else {
        data.iter().sum::<f64>() / data.len() as f64
    }
}
