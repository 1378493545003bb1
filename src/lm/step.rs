//! Step calculation for the Levenberg-Marquardt solver.
//!
//! This module assembles the weighted normal equations `JᵀWJ Δp = JᵀW (t - v)`,
//! applies damping to their diagonal and solves them. A system that cannot be
//! solved is re-damped with a larger lambda until it can. Normal equations with
//! non-finite entries have no step; the solver treats them as a rejected trial.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, SolverError};
use crate::utils::matrix_convert::{
    nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra,
};

use super::config::{LmConfig, RegularizationMethod};

/// Undamped weighted normal equations at the accepted point.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    /// `H = JᵀWJ`, one row and column per parameter
    pub hessian: Array2<f64>,

    /// `β = JᵀW (t - v)`
    pub gradient: Array1<f64>,
}

impl NormalEquations {
    /// Assemble the normal equations from an N×P Jacobian.
    ///
    /// # Arguments
    ///
    /// * `jacobian` - `J[[k, i]] = ∂value[k]/∂param[i]`
    /// * `values` - The objective values at the accepted point
    /// * `targets` - The target values
    /// * `weights` - The per-target weights
    pub fn assemble(
        jacobian: &Array2<f64>,
        values: &Array1<f64>,
        targets: &Array1<f64>,
        weights: &Array1<f64>,
    ) -> Result<Self> {
        let n_values = targets.len();
        if jacobian.nrows() != n_values || values.len() != n_values || weights.len() != n_values
        {
            return Err(SolverError::DimensionMismatch(format!(
                "Jacobian has {} rows, values {}, targets {}, weights {}",
                jacobian.nrows(),
                values.len(),
                n_values,
                weights.len()
            )));
        }

        // Scale every row k of J by w_k
        let weighted_jacobian = jacobian * &weights.view().insert_axis(Axis(1));
        let hessian = jacobian.t().dot(&weighted_jacobian);
        let residuals = targets - values;
        let gradient = weighted_jacobian.t().dot(&residuals);

        Ok(Self { hessian, gradient })
    }

    /// Number of parameters in the system.
    pub fn dimension(&self) -> usize {
        self.gradient.len()
    }

    /// Whether every entry of `H` and `β` is finite.
    pub fn is_finite(&self) -> bool {
        self.hessian.iter().chain(self.gradient.iter()).all(|v| v.is_finite())
    }

    /// The normal-equation matrix with damping applied to its diagonal.
    pub fn damped(&self, lambda: f64, method: RegularizationMethod) -> Array2<f64> {
        let mut damped = self.hessian.clone();
        for i in 0..self.dimension() {
            let diagonal = damped[[i, i]];
            damped[[i, i]] = match method {
                RegularizationMethod::LevenbergMarquardt if diagonal == 0.0 => 1.0,
                RegularizationMethod::LevenbergMarquardt => diagonal * (1.0 + lambda),
                RegularizationMethod::Levenberg => diagonal + lambda,
            };
        }
        damped
    }
}

/// Result of a Levenberg-Marquardt step calculation.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The parameter increment `Δp`
    pub increment: Array1<f64>,

    /// The damping parameter the increment was solved with
    pub lambda: f64,

    /// How many times the damping had to be increased before the system was solvable
    pub retries: usize,
}

/// Handles step calculation for the Levenberg-Marquardt solver.
pub struct LmStep;

impl LmStep {
    /// Calculates the damped Gauss-Newton increment.
    ///
    /// Starts from `lambda` and multiplies it by `config.lambda_multiplier`
    /// until the damped system can be solved. Returns `None` when the normal
    /// equations contain non-finite entries, or when the damping factor can no
    /// longer grow without a solution.
    pub fn calculate_step(
        equations: &NormalEquations,
        lambda: f64,
        config: &LmConfig,
    ) -> Option<StepResult> {
        if !equations.is_finite() {
            log::trace!("normal equations contain non-finite entries, no step");
            return None;
        }

        let mut lambda = lambda;
        let mut retries = 0;

        loop {
            let damped = equations.damped(lambda, config.regularization);
            if let Some(increment) = Self::solve(&damped, &equations.gradient) {
                return Some(StepResult {
                    increment,
                    lambda,
                    retries,
                });
            }

            let next = lambda * config.lambda_multiplier;
            if !next.is_finite() {
                log::trace!(
                    "no solution after {} re-damping attempts (lambda = {:e})",
                    retries,
                    lambda
                );
                return None;
            }
            log::trace!(
                "normal equations not solvable with lambda = {:e}, retrying with {:e}",
                lambda,
                next
            );
            lambda = next;
            retries += 1;
        }
    }

    /// Solves `a x = b`, returning `None` if the system is singular or the
    /// solution is not finite.
    ///
    /// The damped normal-equation matrix is symmetric and usually positive
    /// definite, so Cholesky is tried first with LU as a fallback.
    fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
        let a_na: DMatrix<f64> = ndarray_to_nalgebra(a);
        let b_na = ndarray_vec_to_nalgebra(b);

        let x = match a_na.clone().cholesky() {
            Some(cholesky) => cholesky.solve(&b_na),
            None => a_na.lu().solve(&b_na)?,
        };

        if x.iter().all(|v| v.is_finite()) {
            Some(nalgebra_vec_to_ndarray(&x))
        } else {
            None
        }
    }
}
