use crate::fit::FitOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the physiologically meaningful ratio is picked from the two candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioSelection {
    /// Rise time must be shorter than decay time.
    #[default]
    Time,
    /// Most samples must sit closer to the minimum than to the maximum.
    Amplitude,
}

/// Settings shared by every stage of a column analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples the peak detector looks ahead before confirming a peak.
    pub lookahead: usize,
    /// Minimum prominence of a detected peak.
    pub delta: f64,
    /// Pick the other ratio than the heuristic suggests.
    pub invert: bool,
    pub ratio_selection: RatioSelection,
    /// Relative amplitude (of the peak) where the fitted decay begins.
    pub decay_start: f64,
    /// Relative amplitude (of the peak) where the fitted decay ends.
    pub decay_end: f64,
    /// Constrain fit parameters to non-negative values around the segment ends.
    pub use_bounds: bool,
    /// Only the first N cycles feed averaged metrics. `None` uses all of them.
    pub range_limit: Option<usize>,
    pub fit: FitOptions,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lookahead: 30,
            delta: 0.0,
            invert: false,
            ratio_selection: RatioSelection::Time,
            decay_start: 1.0,
            decay_end: 0.0,
            use_bounds: false,
            range_limit: None,
            fit: FitOptions::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("lookahead must be at least 1 sample")]
    Lookahead,
    #[error("delta must be a non-negative number, got {0}")]
    Delta(f64),
    #[error("{name} must be between 0.0 and 1.0, got {value}")]
    FractionRange { name: &'static str, value: f64 },
    #[error("decay start ({start}) must be greater than decay end ({end})")]
    DecayOrder { start: f64, end: f64 },
    #[error("fit evaluation budget must be positive")]
    FitBudget,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookahead < 1 {
            return Err(ConfigError::Lookahead);
        }
        if !(self.delta.is_finite() && self.delta >= 0.0) {
            return Err(ConfigError::Delta(self.delta));
        }
        for (name, value) in [("decay start", self.decay_start), ("decay end", self.decay_end)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::FractionRange { name, value });
            }
        }
        if self.decay_start <= self.decay_end {
            return Err(ConfigError::DecayOrder {
                start: self.decay_start,
                end: self.decay_end,
            });
        }
        if self.fit.max_evaluations == 0 {
            return Err(ConfigError::FitBudget);
        }
        Ok(())
    }
}
