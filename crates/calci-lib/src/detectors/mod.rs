pub mod peaks;
pub mod ratio;
