#[cfg(test)]
#[macro_use]
extern crate serial_test;

pub mod config;
pub mod error;
pub mod network;
pub mod runner;
pub mod signal;
pub mod simulation;

pub use config::SimulationConfig;
pub use error::SimulationError;
pub use simulation::{Outcome, Simulation};
