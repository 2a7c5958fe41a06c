pub mod amplitude;
pub mod kinetics;
