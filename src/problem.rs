//! Objective definition trait and closure adapters.
//!
//! This module defines the `Objective` trait, which represents the model being
//! calibrated: it maps a parameter vector to a vector of values that the solver
//! fits against the target values. Analytic derivatives are optional.

use ndarray::{Array1, Array2};

use crate::error::{Result, SolverError};

/// A trait representing a model whose outputs are calibrated to target values.
///
/// When the solver runs with more than one worker thread, `evaluate` is called
/// concurrently for different parameter vectors, so
/// [`LevenbergMarquardt::minimize`](crate::lm::LevenbergMarquardt::minimize)
/// requires `Sync`. Objectives with interior mutability such as a `RefCell`
/// cache can use
/// [`minimize_sequential`](crate::lm::LevenbergMarquardt::minimize_sequential),
/// which evaluates on the calling thread only.
pub trait Objective {
    /// Evaluate the model values at the given parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate the model
    ///
    /// # Returns
    ///
    /// * One value per target, or an error if the model cannot be evaluated
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Check if this objective provides an analytic Jacobian.
    ///
    /// If this returns true, the solver calls `differentiate` instead of
    /// estimating the Jacobian by finite differences.
    fn has_analytic_jacobian(&self) -> bool {
        false
    }

    /// Evaluate the Jacobian at the given parameters.
    ///
    /// The returned matrix has one row per value and one column per parameter:
    /// `J[[k, i]] = ∂value[k]/∂param[i]`.
    fn differentiate(&self, _params: &Array1<f64>) -> Result<Array2<f64>> {
        Err(SolverError::NotImplemented(
            "objective does not provide an analytic Jacobian".to_string(),
        ))
    }
}

impl<T: Objective + ?Sized> Objective for &T {
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        (**self).evaluate(params)
    }

    fn has_analytic_jacobian(&self) -> bool {
        (**self).has_analytic_jacobian()
    }

    fn differentiate(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        (**self).differentiate(params)
    }
}

/// An objective backed by a closure.
pub struct FnObjective<F> {
    evaluate: F,
}

/// Wrap a closure as an [`Objective`] whose Jacobian is estimated numerically.
///
/// ```
/// use lm_calibrate::problem::{objective_fn, Objective};
/// use ndarray::{array, Array1};
///
/// let objective = objective_fn(|p: &Array1<f64>| Ok(array![p[0], 2.0 * p[0] + p[1]]));
/// let values = objective.evaluate(&array![1.0, 1.0]).unwrap();
/// assert_eq!(values, array![1.0, 3.0]);
/// ```
pub fn objective_fn<F>(evaluate: F) -> FnObjective<F>
where
    F: Fn(&Array1<f64>) -> Result<Array1<f64>>,
{
    FnObjective { evaluate }
}

impl<F> Objective for FnObjective<F>
where
    F: Fn(&Array1<f64>) -> Result<Array1<f64>>,
{
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        (self.evaluate)(params)
    }
}

/// An objective backed by a closure and an analytic derivative closure.
pub struct FnObjectiveWithJacobian<F, D> {
    evaluate: F,
    differentiate: D,
}

/// Wrap a value closure and its analytic Jacobian as an [`Objective`].
pub fn objective_with_jacobian<F, D>(evaluate: F, differentiate: D) -> FnObjectiveWithJacobian<F, D>
where
    F: Fn(&Array1<f64>) -> Result<Array1<f64>>,
    D: Fn(&Array1<f64>) -> Result<Array2<f64>>,
{
    FnObjectiveWithJacobian {
        evaluate,
        differentiate,
    }
}

impl<F, D> Objective for FnObjectiveWithJacobian<F, D>
where
    F: Fn(&Array1<f64>) -> Result<Array1<f64>>,
    D: Fn(&Array1<f64>) -> Result<Array2<f64>>,
{
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        (self.evaluate)(params)
    }

    fn has_analytic_jacobian(&self) -> bool {
        true
    }

    fn differentiate(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        (self.differentiate)(params)
    }
}

/// Evaluate the objective and check that it produced one value per target.
pub(crate) fn evaluate_checked<O: Objective + ?Sized>(
    objective: &O,
    params: &Array1<f64>,
    n_values: usize,
) -> Result<Array1<f64>> {
    let values = objective.evaluate(params)?;
    if values.len() != n_values {
        return Err(SolverError::DimensionMismatch(format!(
            "Expected {} values, got {}",
            n_values,
            values.len()
        )));
    }
    Ok(values)
}
