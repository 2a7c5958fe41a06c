//! Levenberg-Marquardt for small nonlinear least-squares problems.
//!
//! Minimizes `sum(f_i(x)^2)` for a residual function `f: R^n -> R^m` with a
//! forward-difference Jacobian. Box bounds are handled by projecting every
//! trial point back into the feasible region. The starting point itself must
//! already be feasible.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SINGULAR_THRESHOLD: f64 = 1e-300;
const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Iteration budget and tolerances for [`least_squares`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Maximum number of residual evaluations, Jacobian columns included.
    pub max_evaluations: usize,
    /// Relative reduction of the cost below which an accepted step ends the search.
    pub f_tol: f64,
    /// Relative step size below which the search ends.
    pub x_tol: f64,
    /// Gradient infinity norm below which the search ends.
    pub g_tol: f64,
    /// Relative finite-difference step.
    pub eps: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 20_000,
            f_tol: 1.49012e-8,
            x_tol: 1.49012e-8,
            g_tol: 1e-12,
            eps: 1.49012e-8,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("empty parameter vector")]
    NoParameters,
    #[error("{residuals} residuals cannot determine {parameters} parameters")]
    Underdetermined { residuals: usize, parameters: usize },
    #[error("bounds do not match the {0} parameters")]
    BoundsShape(usize),
    #[error("lower bound {lower} exceeds upper bound {upper} for parameter {index}")]
    InvertedBounds { index: usize, lower: f64, upper: f64 },
    #[error("starting value {value} for parameter {index} lies outside its bounds")]
    InfeasibleStart { index: usize, value: f64 },
    #[error("residuals are not finite at {0:?}")]
    NonFinite(Vec<f64>),
    #[error("no convergence within {0} evaluations")]
    NotConverged(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresResult {
    pub x: Vec<f64>,
    /// Sum of squared residuals at `x`.
    pub cost: f64,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Run Levenberg-Marquardt from `x0`, optionally inside `(lower, upper)` bounds.
pub fn least_squares<F>(
    residuals: F,
    x0: &[f64],
    bounds: Option<(&[f64], &[f64])>,
    options: &FitOptions,
) -> Result<LeastSquaresResult, FitError>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = x0.len();
    if n == 0 {
        return Err(FitError::NoParameters);
    }
    if let Some((lower, upper)) = bounds {
        if lower.len() != n || upper.len() != n {
            return Err(FitError::BoundsShape(n));
        }
        if let Some(index) = (0..n).find(|&i| !(lower[i] <= upper[i])) {
            return Err(FitError::InvertedBounds {
                index,
                lower: lower[index],
                upper: upper[index],
            });
        }
        if let Some(index) = (0..n).find(|&i| !(lower[i] <= x0[i] && x0[i] <= upper[i])) {
            return Err(FitError::InfeasibleStart {
                index,
                value: x0[index],
            });
        }
    }
    let project = |x: &mut [f64]| {
        if let Some((lower, upper)) = bounds {
            for i in 0..n {
                x[i] = x[i].clamp(lower[i], upper[i]);
            }
        }
    };

    let mut x = x0.to_vec();
    let mut fx = residuals(&x);
    let mut evaluations = 1;
    let m = fx.len();
    if m < n {
        return Err(FitError::Underdetermined {
            residuals: m,
            parameters: n,
        });
    }
    if !all_finite(&fx) {
        return Err(FitError::NonFinite(x));
    }
    let mut cost = sum_of_squares(&fx);
    let mut lambda = LAMBDA_INITIAL;
    let mut iterations = 0;

    while evaluations < options.max_evaluations {
        iterations += 1;
        if cost == 0.0 {
            return Ok(finished(x, cost, iterations, evaluations));
        }

        let jacobian = forward_difference_jacobian(&residuals, &x, &fx, bounds, options.eps);
        evaluations += n;
        if jacobian.iter().any(|row| !all_finite(row)) {
            return Err(FitError::NonFinite(x));
        }

        // Normal equations: (J^T J + lambda * diag(J^T J)) dx = -J^T f
        let mut jtj = vec![vec![0.0; n]; n];
        let mut jtf = vec![0.0; n];
        for (row, &f) in jacobian.iter().zip(&fx) {
            for a in 0..n {
                jtf[a] += row[a] * f;
                for b in 0..n {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }
        let gradient = jtf.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
        if gradient <= options.g_tol {
            return Ok(finished(x, cost, iterations, evaluations));
        }

        let mut damped = jtj.clone();
        for i in 0..n {
            damped[i][i] += lambda * jtj[i][i].max(SINGULAR_THRESHOLD);
        }
        let rhs: Vec<f64> = jtf.iter().map(|g| -g).collect();
        let Some(dx) = solve_linear_system(&damped, &rhs) else {
            lambda = (lambda * LAMBDA_UP).min(LAMBDA_MAX);
            continue;
        };

        let mut trial: Vec<f64> = x.iter().zip(&dx).map(|(a, d)| a + d).collect();
        project(&mut trial);
        let step = norm(&trial.iter().zip(&x).map(|(t, a)| t - a).collect::<Vec<_>>());
        if step <= options.x_tol * (norm(&x) + options.x_tol) {
            return Ok(finished(x, cost, iterations, evaluations));
        }

        let f_trial = residuals(&trial);
        evaluations += 1;
        let trial_cost = sum_of_squares(&f_trial);

        if trial_cost.is_finite() && trial_cost < cost {
            let reduction = (cost - trial_cost) / cost;
            x = trial;
            fx = f_trial;
            cost = trial_cost;
            if reduction <= options.f_tol {
                return Ok(finished(x, cost, iterations, evaluations));
            }
            lambda = (lambda * LAMBDA_DOWN).max(LAMBDA_MIN);
        } else {
            lambda = (lambda * LAMBDA_UP).min(LAMBDA_MAX);
        }
    }

    Err(FitError::NotConverged(evaluations))
}

fn finished(x: Vec<f64>, cost: f64, iterations: usize, evaluations: usize) -> LeastSquaresResult {
    LeastSquaresResult {
        x,
        cost,
        iterations,
        evaluations,
    }
}

fn forward_difference_jacobian<F>(
    residuals: &F,
    x: &[f64],
    fx: &[f64],
    bounds: Option<(&[f64], &[f64])>,
    eps: f64,
) -> Vec<Vec<f64>>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = x.len();
    let mut jacobian = vec![vec![0.0; n]; fx.len()];
    let mut probe = x.to_vec();
    for j in 0..n {
        let mut h = eps * x[j].abs().max(1.0);
        // Step backwards when the forward probe would leave the feasible box.
        if let Some((_, upper)) = bounds {
            if x[j] + h > upper[j] {
                h = -h;
            }
        }
        probe[j] = x[j] + h;
        let shifted = residuals(&probe);
        probe[j] = x[j];
        for (i, row) in jacobian.iter_mut().enumerate() {
            row[j] = (shifted[i] - fx[i]) / h;
        }
    }
    jacobian
}

/// Gaussian elimination with partial pivoting. `None` when the system is singular.
fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = b.len();
    let mut aug: Vec<Vec<f64>> = a
        .iter()
        .zip(b)
        .map(|(row, &rhs)| {
            let mut r = row.clone();
            r.push(rhs);
            r
        })
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| aug[i][col].abs().total_cmp(&aug[j][col].abs()))?;
        if !(aug[pivot_row][col].abs() > SINGULAR_THRESHOLD) {
            return None;
        }
        aug.swap(col, pivot_row);
        let pivot = aug[col][col];
        for row in (col + 1)..n {
            let factor = aug[row][col] / pivot;
            for k in col..=n {
                aug[row][k] -= factor * aug[col][k];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let tail: f64 = ((i + 1)..n).map(|j| aug[i][j] * x[j]).sum();
        x[i] = (aug[i][n] - tail) / aug[i][i];
    }
    all_finite(&x).then_some(x)
}

fn sum_of_squares(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

fn norm(values: &[f64]) -> f64 {
    sum_of_squares(values).sqrt()
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
