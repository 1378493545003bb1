//! Configuration options for the Levenberg-Marquardt solver.
//!
//! This module defines the iteration limits, damping schedule, regularization
//! rule and worker count used by a calibration run. Configurations can be
//! loaded from JSON; missing fields take their default values.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Default tolerance on the error change. Effectively "no further improvement".
pub const DEFAULT_ERROR_TOLERANCE: f64 = 1e-130;

/// How damping is applied to the diagonal of the normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegularizationMethod {
    /// Scale each diagonal entry by `1 + lambda`. Zero entries are replaced by one.
    #[default]
    LevenbergMarquardt,

    /// Add `lambda` to each diagonal entry.
    Levenberg,
}

/// Configuration options for the Levenberg-Marquardt solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of iterations. Default: 100
    pub max_iterations: usize,

    /// Number of worker threads used for the finite-difference Jacobian. Default: 1
    pub number_of_threads: usize,

    /// The run stops once the error change drops to this value. Default: 1e-130
    pub error_tolerance: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which lambda is multiplied after a rejected step. Default: 10.0
    pub lambda_multiplier: f64,

    /// Factor by which lambda is divided after an accepted step. Default: 10.0
    pub lambda_divisor: f64,

    /// Diagonal damping rule. Default: LevenbergMarquardt
    pub regularization: RegularizationMethod,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            number_of_threads: 1,
            error_tolerance: DEFAULT_ERROR_TOLERANCE,
            initial_lambda: 1e-3,
            lambda_multiplier: 10.0,
            lambda_divisor: 10.0,
            regularization: RegularizationMethod::default(),
        }
    }
}

impl LmConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LmConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Serialize the configuration to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.number_of_threads == 0 {
            return Err(SolverError::InvalidConfig(
                "number_of_threads must be at least 1".to_string(),
            ));
        }
        if !(self.initial_lambda.is_finite() && self.initial_lambda > 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "initial_lambda must be positive and finite, got {}",
                self.initial_lambda
            )));
        }
        if !(self.lambda_multiplier.is_finite() && self.lambda_multiplier > 1.0) {
            return Err(SolverError::InvalidConfig(format!(
                "lambda_multiplier must be greater than 1, got {}",
                self.lambda_multiplier
            )));
        }
        if !(self.lambda_divisor.is_finite() && self.lambda_divisor > 1.0) {
            return Err(SolverError::InvalidConfig(format!(
                "lambda_divisor must be greater than 1, got {}",
                self.lambda_divisor
            )));
        }
        if self.error_tolerance.is_nan() {
            return Err(SolverError::InvalidConfig(
                "error_tolerance must not be NaN".to_string(),
            ));
        }
        Ok(())
    }
}
