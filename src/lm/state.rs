//! Iteration state of a calibration run.
//!
//! The state is an immutable value: every iteration produces a new state from
//! the previous one and an evaluated trial point, so the accepted point can
//! never be aliased by a rejected trial.

use ndarray::Array1;

use super::config::LmConfig;

/// Weighted sum of squared residuals: `Σ w_k (v_k - t_k)²`.
pub fn weighted_error(values: &Array1<f64>, targets: &Array1<f64>, weights: &Array1<f64>) -> f64 {
    values
        .iter()
        .zip(targets.iter())
        .zip(weights.iter())
        .map(|((v, t), w)| w * (v - t).powi(2))
        .sum()
}

/// The accepted point of a run together with its damping factor.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    /// Accepted parameter vector
    pub parameters: Array1<f64>,

    /// Objective values at the accepted parameters
    pub values: Array1<f64>,

    /// Weighted squared error at the accepted parameters
    pub error: f64,

    /// Damping factor to use for the next step
    pub lambda: f64,
}

/// A candidate point whose values and error have been evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    /// Candidate parameter vector
    pub parameters: Array1<f64>,

    /// Objective values at the candidate parameters
    pub values: Array1<f64>,

    /// Weighted squared error at the candidate parameters; may be NaN or infinite
    pub error: f64,
}

/// Outcome of comparing a trial against the accepted state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    /// Whether the trial became the new accepted point
    pub accepted: bool,

    /// Improvement magnitude used by the stopping rule
    pub error_change: f64,
}

impl IterationState {
    /// Create the starting state of a run.
    pub fn new(parameters: Array1<f64>, values: Array1<f64>, error: f64, lambda: f64) -> Self {
        Self {
            parameters,
            values,
            error,
            lambda,
        }
    }

    /// Move to the next state given a trial that was solved with damping `lambda`.
    ///
    /// `lambda` is the damping actually used for the trial step, which may be
    /// larger than `self.lambda` when the normal equations had to be re-damped.
    pub fn advance(self, trial: Trial, lambda: f64, config: &LmConfig) -> (Self, Transition) {
        if trial.error.is_finite() && trial.error < self.error {
            let error_change = self.error - trial.error;
            let next = Self {
                parameters: trial.parameters,
                values: trial.values,
                error: trial.error,
                lambda: decrease_lambda(lambda, config.lambda_divisor),
            };
            (
                next,
                Transition {
                    accepted: true,
                    error_change,
                },
            )
        } else {
            let error_change = if trial.error.is_finite() {
                trial.error - self.error
            } else {
                f64::INFINITY
            };
            let next = Self {
                lambda: increase_lambda(lambda, config.lambda_multiplier),
                ..self
            };
            (
                next,
                Transition {
                    accepted: false,
                    error_change,
                },
            )
        }
    }

    /// Move to the next state when no trial could be formed at `lambda`,
    /// because the normal equations had non-finite entries.
    ///
    /// Handled like a rejected trial: the point is kept, lambda grows, and the
    /// change is infinite so the tolerance rule does not fire.
    pub fn reject_without_trial(self, lambda: f64, config: &LmConfig) -> (Self, Transition) {
        let next = Self {
            lambda: increase_lambda(lambda, config.lambda_multiplier),
            ..self
        };
        (
            next,
            Transition {
                accepted: false,
                error_change: f64::INFINITY,
            },
        )
    }

    /// Root-mean-squared error over `n_values` targets.
    pub fn root_mean_squared_error(&self, n_values: usize) -> f64 {
        if n_values == 0 {
            return 0.0;
        }
        (self.error / n_values as f64).sqrt()
    }
}

/// Lambda after an accepted step; never reaches zero.
pub(crate) fn decrease_lambda(lambda: f64, divisor: f64) -> f64 {
    (lambda / divisor).max(f64::MIN_POSITIVE)
}

/// Lambda after a rejected step; never overflows.
pub(crate) fn increase_lambda(lambda: f64, multiplier: f64) -> f64 {
    (lambda * multiplier).min(f64::MAX)
}
