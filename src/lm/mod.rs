//! Levenberg-Marquardt solver implementation.
//!
//! This module provides the damped Gauss-Newton solver used to calibrate model
//! parameters against weighted target values, together with its configuration,
//! iteration state, step engine, termination rule and iteration observers.

// Include module declarations and re-exports
pub mod algorithm;
pub mod config;
pub mod convergence;
pub mod observer;
pub mod state;
pub mod step;

// Re-export key types
pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::{LmConfig, RegularizationMethod, DEFAULT_ERROR_TOLERANCE};
pub use convergence::{ConvergenceCriteria, ConvergenceStatus};
pub use observer::{IterationObserver, IterationReport, LogObserver};
pub use state::{weighted_error, IterationState, Transition, Trial};
pub use step::{LmStep, NormalEquations, StepResult};
