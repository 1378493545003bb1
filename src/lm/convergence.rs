//! Termination criteria for the Levenberg-Marquardt solver.
//!
//! A run ends when the iteration limit is exceeded or when the last error
//! change drops to the tolerance. Both are normal terminations.

use serde::{Deserialize, Serialize};

use super::config::LmConfig;

/// Possible states of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// The solver is still iterating.
    Running,

    /// The error change dropped to the tolerance.
    ToleranceReached,

    /// The iteration count exceeded the maximum.
    MaxIterationsReached,

    /// The run was stopped through its cancel flag.
    Cancelled,
}

impl ConvergenceStatus {
    /// Returns true if the run has terminated.
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ConvergenceStatus::Running)
    }

    /// Returns true if the run stopped because no further improvement was found.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceStatus::ToleranceReached)
    }

    /// Returns a description of the status.
    pub fn description(&self) -> &'static str {
        match self {
            ConvergenceStatus::Running => "Calibration is still running",
            ConvergenceStatus::ToleranceReached => "Converged: error change within tolerance",
            ConvergenceStatus::MaxIterationsReached => "Terminated: maximum iterations exceeded",
            ConvergenceStatus::Cancelled => "Terminated: cancelled",
        }
    }
}

/// Criteria for deciding when a run is done.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    /// Maximum number of iterations.
    pub max_iterations: usize,

    /// Tolerance on the error change.
    pub error_tolerance: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self::from(&LmConfig::default())
    }
}

impl From<&LmConfig> for ConvergenceCriteria {
    fn from(config: &LmConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            error_tolerance: config.error_tolerance,
        }
    }
}

impl ConvergenceCriteria {
    /// Creates a new set of criteria.
    pub fn new(max_iterations: usize, error_tolerance: f64) -> Self {
        Self {
            max_iterations,
            error_tolerance,
        }
    }

    /// Checks whether the run is done.
    ///
    /// # Arguments
    ///
    /// * `iterations` - The number of completed iterations
    /// * `error_change` - The improvement magnitude recorded by the last iteration
    pub fn check(&self, iterations: usize, error_change: f64) -> ConvergenceStatus {
        if iterations > self.max_iterations {
            ConvergenceStatus::MaxIterationsReached
        } else if error_change <= self.error_tolerance {
            ConvergenceStatus::ToleranceReached
        } else {
            ConvergenceStatus::Running
        }
    }
}
