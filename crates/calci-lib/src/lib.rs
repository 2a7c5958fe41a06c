pub mod config;
pub mod detectors;
pub mod fit;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod signal;
pub mod smoothing;

pub use config::*;
pub use detectors::*;
pub use metrics::*;
pub use pipeline::*;
pub use signal::*;
