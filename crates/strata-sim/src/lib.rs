//! Strata Sim - workload simulator
//!
//! Drives stories through save, cold retrieval and delete against
//! scripted backends with injected faults, then checks that every
//! operation reporting success left the tiers in the state it promised.

pub mod simulator;

pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};
