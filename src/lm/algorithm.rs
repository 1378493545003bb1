//! Implementation of the Levenberg-Marquardt calibration loop.
//!
//! This module contains the solver that fits the parameters of an
//! [`Objective`] so that its values match a set of weighted target values.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array2};

use crate::error::{Result, SolverError};
use crate::problem::{evaluate_checked, Objective};
use crate::utils::finite_difference;
use crate::utils::parallel::WorkerPool;

use super::config::{LmConfig, RegularizationMethod};
use super::convergence::{ConvergenceCriteria, ConvergenceStatus};
use super::observer::{IterationObserver, IterationReport, LogObserver};
use super::state::{weighted_error, IterationState, Trial};
use super::step::{LmStep, NormalEquations};

/// Result of a calibration run.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Best-fit parameter values (the last accepted point)
    pub best_fit_parameters: Array1<f64>,

    /// Objective values at the best-fit parameters
    pub values: Array1<f64>,

    /// Number of iterations performed
    pub iterations: usize,

    /// Weighted sum of squared residuals at the best-fit parameters
    pub error: f64,

    /// `sqrt(error / N)` over the N target values
    pub root_mean_squared_error: f64,

    /// Damping factor at termination
    pub lambda: f64,

    /// Number of objective evaluations, including finite-difference evaluations
    pub evaluations: usize,

    /// Why the run terminated
    pub status: ConvergenceStatus,
}

impl LmResult {
    /// Whether the run stopped because no further improvement was found.
    pub fn success(&self) -> bool {
        self.status.is_converged()
    }
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Calibration Result:")?;
        writeln!(f, "  Status: {}", self.status.description())?;
        writeln!(f, "  Error: {:.6e}", self.error)?;
        writeln!(f, "  RMSE: {:.6e}", self.root_mean_squared_error)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Objective evaluations: {}", self.evaluations)?;
        writeln!(f, "  Parameters: {}", self.best_fit_parameters)?;
        Ok(())
    }
}

/// The Levenberg-Marquardt calibration solver.
///
/// The solver holds the target values, weights and settings of a calibration;
/// the objective and the initial guess are supplied per run. A solver can be
/// reused for any number of runs.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,

    /// Values the objective is fitted to
    target_values: Array1<f64>,

    /// Per-target weights; all ones when not set
    weights: Option<Array1<f64>>,

    /// Per-parameter finite-difference steps
    parameter_steps: Option<Array1<f64>>,

    /// Polled once per iteration
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl LevenbergMarquardt {
    /// Create a solver for the given target values with default configuration.
    pub fn new(target_values: Array1<f64>) -> Self {
        Self {
            config: LmConfig::default(),
            target_values,
            weights: None,
            parameter_steps: None,
            cancel_flag: None,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: LmConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-target weights.
    pub fn with_weights(mut self, weights: Array1<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Set the per-parameter finite-difference steps.
    pub fn with_parameter_steps(mut self, steps: Array1<f64>) -> Self {
        self.parameter_steps = Some(steps);
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the number of threads used for the finite-difference Jacobian.
    pub fn with_number_of_threads(mut self, number_of_threads: usize) -> Self {
        self.config.number_of_threads = number_of_threads;
        self
    }

    /// Set the tolerance on the error change.
    pub fn with_error_tolerance(mut self, error_tolerance: f64) -> Self {
        self.config.error_tolerance = error_tolerance;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the diagonal damping rule.
    pub fn with_regularization(mut self, method: RegularizationMethod) -> Self {
        self.config.regularization = method;
        self
    }

    /// Stop runs early once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// A copy of this solver with different target values and the same settings.
    pub fn with_target_values(&self, target_values: Array1<f64>) -> Self {
        Self {
            target_values,
            ..self.clone()
        }
    }

    /// The configuration used by this solver.
    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// The target values.
    pub fn target_values(&self) -> &Array1<f64> {
        &self.target_values
    }

    /// The per-target weights.
    pub fn weights(&self) -> Array1<f64> {
        self.weights
            .clone()
            .unwrap_or_else(|| Array1::ones(self.target_values.len()))
    }

    /// Fit the objective to the target values, logging every iteration.
    ///
    /// # Arguments
    ///
    /// * `objective` - The model to calibrate
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The best-fit point, or the first objective failure
    pub fn minimize<O>(&self, objective: &O, initial_params: Array1<f64>) -> Result<LmResult>
    where
        O: Objective + Sync + ?Sized,
    {
        self.minimize_observed(objective, initial_params, &mut LogObserver)
    }

    /// Fit the objective to the target values, reporting every iteration to `observer`.
    pub fn minimize_observed<O, B>(
        &self,
        objective: &O,
        initial_params: Array1<f64>,
        observer: &mut B,
    ) -> Result<LmResult>
    where
        O: Objective + Sync + ?Sized,
        B: IterationObserver + ?Sized,
    {
        let weights = self.validate(&initial_params)?;

        // Lives until this function returns, on every path
        let pool = WorkerPool::new(self.config.number_of_threads)?;
        let steps = self.parameter_steps.as_ref();

        self.run(
            objective,
            initial_params,
            weights,
            observer,
            pool.threads(),
            |params, values| pool.jacobian(objective, params, values, steps),
        )
    }

    /// Fit the objective on the calling thread, logging every iteration.
    ///
    /// The objective does not have to be `Sync`, so it may cache results in a
    /// `RefCell` or similar. `number_of_threads` is ignored.
    pub fn minimize_sequential<O>(
        &self,
        objective: &O,
        initial_params: Array1<f64>,
    ) -> Result<LmResult>
    where
        O: Objective + ?Sized,
    {
        self.minimize_sequential_observed(objective, initial_params, &mut LogObserver)
    }

    /// [`minimize_sequential`](Self::minimize_sequential) with an observer.
    pub fn minimize_sequential_observed<O, B>(
        &self,
        objective: &O,
        initial_params: Array1<f64>,
        observer: &mut B,
    ) -> Result<LmResult>
    where
        O: Objective + ?Sized,
        B: IterationObserver + ?Sized,
    {
        let weights = self.validate(&initial_params)?;
        let steps = self.parameter_steps.as_ref();

        self.run(objective, initial_params, weights, observer, 1, |params, values| {
            finite_difference::jacobian(objective, params, values, steps)
        })
    }

    /// The calibration loop. `difference` estimates the Jacobian at a point
    /// from the parameters and the values there.
    fn run<O, B, D>(
        &self,
        objective: &O,
        initial_params: Array1<f64>,
        weights: Array1<f64>,
        observer: &mut B,
        threads: usize,
        mut difference: D,
    ) -> Result<LmResult>
    where
        O: Objective + ?Sized,
        B: IterationObserver + ?Sized,
        D: FnMut(&Array1<f64>, &Array1<f64>) -> Result<Array2<f64>>,
    {
        let targets = &self.target_values;
        let n_values = targets.len();
        let criteria = ConvergenceCriteria::from(&self.config);

        let values = evaluate_checked(objective, &initial_params, n_values)?;
        let mut evaluations = 1;
        let error = weighted_error(&values, targets, &weights);
        let mut state =
            IterationState::new(initial_params, values, error, self.config.initial_lambda);

        log::debug!(
            "calibrating {} parameters to {} targets on {} thread(s), initial error = {:.6e}",
            state.parameters.len(),
            n_values,
            threads,
            state.error
        );

        let mut jacobian: Option<Array2<f64>> = None;
        let mut iterations = 0;
        let mut error_change = f64::INFINITY;

        let status = loop {
            let status = criteria.check(iterations, error_change);
            if status.is_terminated() {
                break status;
            }
            if self.is_cancelled() {
                break ConvergenceStatus::Cancelled;
            }

            let jac = match jacobian.take() {
                Some(jac) => jac,
                None => {
                    let (jac, cost) = self.jacobian(objective, &state, &mut difference)?;
                    evaluations += cost;
                    jac
                }
            };
            let equations = NormalEquations::assemble(&jac, &state.values, targets, &weights)?;
            jacobian = Some(jac);

            let lambda = state.lambda;
            let (next, transition) = match LmStep::calculate_step(&equations, lambda, &self.config)
            {
                Some(step) => {
                    if step.retries > 0 {
                        log::trace!(
                            "normal equations re-damped {} time(s), lambda = {:e}",
                            step.retries,
                            step.lambda
                        );
                    }

                    let trial_parameters = &state.parameters + &step.increment;
                    let trial_values = evaluate_checked(objective, &trial_parameters, n_values)?;
                    evaluations += 1;
                    let trial_error = weighted_error(&trial_values, targets, &weights);
                    let trial = Trial {
                        parameters: trial_parameters,
                        values: trial_values,
                        error: trial_error,
                    };
                    state.advance(trial, step.lambda, &self.config)
                }
                None => {
                    log::debug!("no finite step at the accepted point (lambda = {:e})", lambda);
                    state.reject_without_trial(lambda, &self.config)
                }
            };
            state = next;
            if transition.accepted {
                // Only valid at the point where it was computed
                jacobian = None;
            }
            iterations += 1;
            error_change = transition.error_change;

            observer.on_iteration(&IterationReport {
                iteration: iterations,
                lambda: state.lambda,
                error: state.error,
                parameters: state.parameters.clone(),
                accepted: transition.accepted,
                error_change,
            });
        };

        let root_mean_squared_error = state.root_mean_squared_error(n_values);
        log::info!(
            "calibration finished after {} iterations ({}): RMSE = {:.6e}",
            iterations,
            status.description(),
            root_mean_squared_error
        );

        Ok(LmResult {
            best_fit_parameters: state.parameters,
            values: state.values,
            iterations,
            error: state.error,
            root_mean_squared_error,
            lambda: state.lambda,
            evaluations,
            status,
        })
    }

    /// Jacobian at the accepted point and the number of objective evaluations it cost.
    fn jacobian<O, D>(
        &self,
        objective: &O,
        state: &IterationState,
        difference: &mut D,
    ) -> Result<(Array2<f64>, usize)>
    where
        O: Objective + ?Sized,
        D: FnMut(&Array1<f64>, &Array1<f64>) -> Result<Array2<f64>>,
    {
        let n_params = state.parameters.len();
        let n_values = state.values.len();

        if objective.has_analytic_jacobian() {
            let jac = objective.differentiate(&state.parameters)?;
            if jac.dim() != (n_values, n_params) {
                return Err(SolverError::DimensionMismatch(format!(
                    "Expected a {}x{} Jacobian, got {}x{}",
                    n_values,
                    n_params,
                    jac.nrows(),
                    jac.ncols()
                )));
            }
            return Ok((jac, 0));
        }

        log::trace!("refreshing finite-difference Jacobian");
        let jac = difference(&state.parameters, &state.values)?;
        Ok((jac, n_params))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Check the run inputs and return the weights to use.
    fn validate(&self, initial_params: &Array1<f64>) -> Result<Array1<f64>> {
        self.config.validate()?;

        if initial_params.is_empty() {
            return Err(SolverError::InvalidConfig(
                "at least one parameter is required".to_string(),
            ));
        }
        if initial_params.iter().any(|p| !p.is_finite()) {
            return Err(SolverError::InvalidConfig(format!(
                "initial parameters must be finite, got {}",
                initial_params
            )));
        }
        if self.target_values.is_empty() {
            return Err(SolverError::InvalidConfig(
                "at least one target value is required".to_string(),
            ));
        }

        let weights = self.weights();
        if weights.len() != self.target_values.len() {
            return Err(SolverError::DimensionMismatch(format!(
                "Expected {} weights, got {}",
                self.target_values.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(SolverError::InvalidConfig(
                "weights must be finite and non-negative".to_string(),
            ));
        }

        if let Some(steps) = &self.parameter_steps {
            if steps.len() != initial_params.len() {
                return Err(SolverError::DimensionMismatch(format!(
                    "Expected {} parameter steps, got {}",
                    initial_params.len(),
                    steps.len()
                )));
            }
            if steps.iter().any(|h| !h.is_finite() || *h == 0.0) {
                return Err(SolverError::InvalidConfig(
                    "parameter steps must be finite and non-zero".to_string(),
                ));
            }
        }

        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{objective_fn, objective_with_jacobian};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn linear(p: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(array![p[0], 2.0 * p[0] + p[1]])
    }

    #[test]
    fn test_linear_system_is_recovered() {
        let solver = LevenbergMarquardt::new(array![5.0, 10.0]);
        let result = solver.minimize(&objective_fn(linear), array![0.0, 0.0]).unwrap();

        assert_relative_eq!(result.best_fit_parameters[0], 5.0, epsilon = 1e-6);
        assert_relative_eq!(result.best_fit_parameters[1], 0.0, epsilon = 1e-6);
        assert!(result.iterations <= 101);
        assert!(result.root_mean_squared_error < 1e-6);
    }

    #[test]
    fn test_analytic_jacobian_skips_finite_differences() {
        let objective = objective_with_jacobian(linear, |_p: &Array1<f64>| {
            Ok(array![[1.0, 0.0], [2.0, 1.0]])
        });
        let solver = LevenbergMarquardt::new(array![5.0, 10.0]).with_max_iterations(3);
        let result = solver.minimize(&objective, array![0.0, 0.0]).unwrap();

        // One initial evaluation plus one trial per iteration
        assert_eq!(result.evaluations, 1 + result.iterations);
        assert_relative_eq!(result.best_fit_parameters[0], 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_wrong_jacobian_shape_is_rejected() {
        let objective = objective_with_jacobian(linear, |_p: &Array1<f64>| Ok(array![[1.0, 0.0]]));
        let solver = LevenbergMarquardt::new(array![5.0, 10.0]);
        assert!(matches!(
            solver.minimize(&objective, array![0.0, 0.0]),
            Err(SolverError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_max_iterations_is_normal_termination() {
        let solver = LevenbergMarquardt::new(array![5.0, 10.0]).with_max_iterations(0);
        let result = solver.minimize(&objective_fn(linear), array![0.0, 0.0]).unwrap();

        // The check runs before each pass, so one iteration happens
        assert_eq!(result.iterations, 1);
        assert_eq!(result.status, ConvergenceStatus::MaxIterationsReached);
        assert!(!result.success());
    }

    #[test]
    fn test_validation() {
        let objective = objective_fn(linear);

        let solver = LevenbergMarquardt::new(array![5.0, 10.0]).with_weights(array![1.0]);
        assert!(matches!(
            solver.minimize(&objective, array![0.0, 0.0]),
            Err(SolverError::DimensionMismatch(_))
        ));

        let solver = LevenbergMarquardt::new(array![5.0, 10.0]).with_weights(array![1.0, -1.0]);
        assert!(matches!(
            solver.minimize(&objective, array![0.0, 0.0]),
            Err(SolverError::InvalidConfig(_))
        ));

        let solver =
            LevenbergMarquardt::new(array![5.0, 10.0]).with_parameter_steps(array![1e-6, 0.0]);
        assert!(matches!(
            solver.minimize(&objective, array![0.0, 0.0]),
            Err(SolverError::InvalidConfig(_))
        ));

        let solver = LevenbergMarquardt::new(array![5.0, 10.0]).with_number_of_threads(0);
        assert!(matches!(
            solver.minimize(&objective, array![0.0, 0.0]),
            Err(SolverError::InvalidConfig(_))
        ));

        let solver = LevenbergMarquardt::new(array![5.0, 10.0]);
        assert!(matches!(
            solver.minimize(&objective, Array1::zeros(0)),
            Err(SolverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_with_target_values_keeps_settings() {
        let solver = LevenbergMarquardt::new(array![5.0, 10.0])
            .with_max_iterations(42)
            .with_weights(array![2.0, 3.0]);
        let moved = solver.with_target_values(array![1.0, 1.0]);

        assert_eq!(moved.config().max_iterations, 42);
        assert_eq!(moved.weights(), array![2.0, 3.0]);
        assert_eq!(moved.target_values(), &array![1.0, 1.0]);
        assert_eq!(solver.target_values(), &array![5.0, 10.0]);
    }

    #[test]
    fn test_display() {
        let solver = LevenbergMarquardt::new(array![5.0, 10.0]);
        let result = solver.minimize(&objective_fn(linear), array![0.0, 0.0]).unwrap();
        let text = format!("{}", result);
        assert!(text.contains("Calibration Result"));
        assert!(text.contains("Iterations"));
    }
}
