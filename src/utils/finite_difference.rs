//! Finite difference methods for numerical differentiation.
//!
//! This module computes the Jacobian of an objective by forward differences,
//! one column per parameter. The base values `f(p)` are supplied by the caller
//! so that a refresh costs exactly one evaluation per parameter.

use ndarray::{Array1, Array2};

use crate::error::{Result, SolverError};
use crate::problem::{evaluate_checked, Objective};

/// Relative step used when no explicit step is given.
pub const DEFAULT_EPSILON: f64 = 1e-8;

/// Default forward-difference step for a parameter value.
///
/// Scales with the parameter and stays non-zero near zero.
pub fn default_step(param: f64) -> f64 {
    (param.abs() + 1.0) * DEFAULT_EPSILON
}

/// Step for parameter `index`: the explicit step if one is given, otherwise
/// [`default_step`].
pub fn step_size(params: &Array1<f64>, index: usize, steps: Option<&Array1<f64>>) -> f64 {
    match steps {
        Some(steps) => steps[index],
        None => default_step(params[index]),
    }
}

/// Compute column `index` of the Jacobian: `(f(p + h e_i) - f(p)) / h`.
///
/// # Arguments
///
/// * `objective` - The objective to differentiate
/// * `params` - The point at which the Jacobian is taken
/// * `base_values` - `f(params)`
/// * `index` - The parameter to perturb
/// * `step` - The perturbation size
pub fn forward_difference_column<O: Objective + ?Sized>(
    objective: &O,
    params: &Array1<f64>,
    base_values: &Array1<f64>,
    index: usize,
    step: f64,
) -> Result<Array1<f64>> {
    let mut params_perturbed = params.clone();
    params_perturbed[index] += step;

    let values_perturbed = evaluate_checked(objective, &params_perturbed, base_values.len())?;

    Ok((&values_perturbed - base_values) / step)
}

/// Build an N×P Jacobian from its P columns.
pub fn assemble_columns(columns: &[Array1<f64>], n_values: usize) -> Result<Array2<f64>> {
    let mut jac = Array2::zeros((n_values, columns.len()));
    for (i, column) in columns.iter().enumerate() {
        if column.len() != n_values {
            return Err(SolverError::DimensionMismatch(format!(
                "Jacobian column {} has {} entries, expected {}",
                i,
                column.len(),
                n_values
            )));
        }
        jac.column_mut(i).assign(column);
    }
    Ok(jac)
}

/// Compute the Jacobian matrix using forward finite differences on the
/// calling thread.
///
/// # Arguments
///
/// * `objective` - The objective to differentiate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `base_values` - The objective values at `params`
/// * `steps` - Per-parameter steps (optional)
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The Jacobian, one row per value and one column per parameter
pub fn jacobian<O: Objective + ?Sized>(
    objective: &O,
    params: &Array1<f64>,
    base_values: &Array1<f64>,
    steps: Option<&Array1<f64>>,
) -> Result<Array2<f64>> {
    let columns = (0..params.len())
        .map(|i| {
            let step = step_size(params, i, steps);
            forward_difference_column(objective, params, base_values, i, step)
        })
        .collect::<Result<Vec<_>>>()?;

    assemble_columns(&columns, base_values.len())
}
