use crate::{
    config::AnalysisConfig,
    fit::least_squares::least_squares,
    signal::{span, Cycle},
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// A decay span must cover more than this many sample steps to be fitted.
pub const MIN_FIT_STEPS: usize = 6;

/// Parameters of `y(x) = a * exp(-rc * x) + y0` for one cycle, with `x` the
/// time since the start of the decay. All NaN when the cycle was not fitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayFit {
    /// Initial amplitude above baseline.
    pub a: f64,
    /// Rate constant (1 / time unit).
    pub rc: f64,
    /// Baseline.
    pub y0: f64,
}

impl DecayFit {
    pub const NAN: DecayFit = DecayFit {
        a: f64::NAN,
        rc: f64::NAN,
        y0: f64::NAN,
    };

    pub fn tau(&self) -> f64 {
        1.0 / self.rc
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        exponential_decay(x, self.a, self.rc, self.y0)
    }

    fn from_params(p: &[f64]) -> Self {
        Self {
            a: p[0],
            rc: p[1],
            y0: p[2],
        }
    }
}

pub fn exponential_decay(x: f64, a: f64, rc: f64, y0: f64) -> f64 {
    a * (-rc * x).exp() + y0
}

/// Whether a cycle's decay span is long enough, and inside `len` samples, to fit.
pub fn is_fittable(cycle: &Cycle, len: usize) -> bool {
    cycle.width() > MIN_FIT_STEPS && cycle.min < len
}

/// Fit every cycle's decay span of `data`.
///
/// `decay_time_36` holds, per cycle, the time from the peak to 1/e of the
/// smoothed signal and seeds the rate constant. Spans too short to fit give
/// [`DecayFit::NAN`]; a fit that fails reports its initial guess.
pub fn fit_decay_curves(
    data: &[f64],
    time: &[f64],
    cycles: &[Cycle],
    decay_time_36: &[f64],
    cfg: &AnalysisConfig,
) -> Vec<DecayFit> {
    let len = data.len().min(time.len());
    cycles
        .iter()
        .enumerate()
        .map(|(j, cycle)| {
            if !is_fittable(cycle, len) {
                return DecayFit::NAN;
            }
            let seed_time = decay_time_36.get(j).copied().unwrap_or(0.0);
            fit_cycle(data, time, cycle, seed_time, cfg)
        })
        .collect()
}

fn fit_cycle(
    data: &[f64],
    time: &[f64],
    cycle: &Cycle,
    seed_time: f64,
    cfg: &AnalysisConfig,
) -> DecayFit {
    let (start, end) = (cycle.max, cycle.min);
    let t0 = time[start];
    let xs: Vec<f64> = span(time, start, end).iter().map(|t| t - t0).collect();
    let ys = span(data, start, end);

    let guess = [data[start] - data[end], 1.0 / seed_time, data[end]];
    let lower = [0.0, 0.0, 0.0];
    let upper = [data[start] * 1.4, guess[1] * 10.0, data[end] * 1.4];
    let bounds = cfg.use_bounds.then_some((&lower[..], &upper[..]));

    let residuals = |p: &[f64]| -> Vec<f64> {
        xs.iter()
            .zip(ys)
            .map(|(&x, &y)| exponential_decay(x, p[0], p[1], p[2]) - y)
            .collect()
    };

    let fit = match least_squares(residuals, &guess, bounds, &cfg.fit) {
        Ok(result) => DecayFit::from_params(&result.x),
        Err(err) => {
            warn!("decay fit failed for samples {start}..={end}: {err}; keeping initial guess");
            DecayFit::from_params(&guess)
        }
    };
    debug!(
        "decay fit {start}..={end}: guess {guess:?}, bounds {:?}, a {}, rc {}, y0 {}, tau {}",
        bounds.map(|_| (lower, upper)),
        fit.a,
        fit.rc,
        fit.y0,
        fit.tau()
    );
    fit
}

/// Evaluate each cycle's fit over its decay span. Samples outside fitted spans are NaN.
pub fn reconstruct_decay_curve(time: &[f64], cycles: &[Cycle], fits: &[DecayFit]) -> Vec<f64> {
    let mut curve = vec![f64::NAN; time.len()];
    for (cycle, fit) in cycles.iter().zip(fits) {
        if !is_fittable(cycle, time.len()) {
            continue;
        }
        let t0 = time[cycle.max];
        for i in cycle.max..=cycle.min {
            curve[i] = fit.evaluate(time[i] - t0);
        }
    }
    curve
}

/// Coefficient of determination per cycle:
/// `1 - sum((y - fit)^2) / sum((y - mean(fit))^2)` over the decay span.
/// Cycles that were not fitted score 0; `[0.0]` without cycles.
pub fn goodness_of_fit(data: &[f64], curve: &[f64], cycles: &[Cycle]) -> Vec<f64> {
    let scores: Vec<f64> = cycles
        .iter()
        .map(|cycle| {
            if !is_fittable(cycle, data.len()) {
                return 0.0;
            }
            let observed = span(data, cycle.max, cycle.min);
            let fitted = span(curve, cycle.max, cycle.min);
            let fitted_mean = fitted.iter().sum::<f64>() / fitted.len() as f64;
            let residual: f64 = observed
                .iter()
                .zip(fitted)
                .map(|(y, f)| (y - f).powi(2))
                .sum();
            let total: f64 = observed.iter().map(|y| (y - fitted_mean).powi(2)).sum();
            1.0 - residual / total
        })
        .collect();
    if scores.is_empty() {
        vec![0.0]
    } else {
        scores
    }
}
