pub mod decay;
pub mod least_squares;

pub use decay::{
    exponential_decay, fit_decay_curves, goodness_of_fit, reconstruct_decay_curve, DecayFit,
};
pub use least_squares::{least_squares, FitError, FitOptions, LeastSquaresResult};
