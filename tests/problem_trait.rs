//! Tests for objectives implemented through the `Objective` trait.

use approx::assert_relative_eq;
use lm_calibrate::lm::{LevenbergMarquardt, LmConfig, RegularizationMethod};
use lm_calibrate::utils::{finite_difference, WorkerPool};
use lm_calibrate::{Objective, Result, SolverError};
use ndarray::{array, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Rosenbrock residuals r1 = 1 - x, r2 = 10 (y - x²), fitted to zero.
struct Rosenbrock;

impl Objective for Rosenbrock {
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != 2 {
            return Err(SolverError::DimensionMismatch(format!(
                "Expected 2 parameters, got {}",
                params.len()
            )));
        }
        let x = params[0];
        let y = params[1];
        Ok(array![1.0 - x, 10.0 * (y - x.powi(2))])
    }

    fn has_analytic_jacobian(&self) -> bool {
        true
    }

    fn differentiate(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let x = params[0];
        Ok(array![[-1.0, 0.0], [-20.0 * x, 10.0]])
    }
}

/// The same residuals without an analytic Jacobian.
struct NumericRosenbrock;

impl Objective for NumericRosenbrock {
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        Rosenbrock.evaluate(params)
    }
}

/// Nelson-Siegel zero rates at fixed maturities.
struct NelsonSiegel {
    maturities: Array1<f64>,
}

impl NelsonSiegel {
    fn new() -> Self {
        Self {
            maturities: array![0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.0, 10.0, 15.0, 20.0, 30.0],
        }
    }
}

impl Objective for NelsonSiegel {
    fn evaluate(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != 4 {
            return Err(SolverError::ObjectiveEvaluation(format!(
                "curve needs 4 parameters, got {}",
                params.len()
            )));
        }
        let (beta0, beta1, beta2, tau) = (params[0], params[1], params[2], params[3]);
        if tau <= 0.0 {
            // Not a curve; the solver rejects such trials
            return Ok(Array1::from_elem(self.maturities.len(), f64::NAN));
        }
        Ok(self.maturities.mapv(|t| {
            let x = t / tau;
            let loading = (1.0 - (-x).exp()) / x;
            beta0 + beta1 * loading + beta2 * (loading - (-x).exp())
        }))
    }
}

#[test]
fn test_analytic_and_numeric_jacobians_agree() {
    let params = array![-0.7, 1.3];
    let base = Rosenbrock.evaluate(&params).unwrap();
    let analytic = Rosenbrock.differentiate(&params).unwrap();
    let numeric = finite_difference::jacobian(&Rosenbrock, &params, &base, None).unwrap();

    assert_eq!(analytic.shape(), numeric.shape());
    for (a, n) in analytic.iter().zip(numeric.iter()) {
        assert_relative_eq!(a, n, epsilon = 1e-5);
    }
}

#[test]
fn test_rosenbrock_with_analytic_jacobian() {
    let solver = LevenbergMarquardt::new(array![0.0, 0.0]).with_max_iterations(500);
    let result = solver.minimize(&Rosenbrock, array![-1.2, 1.0]).unwrap();

    assert_relative_eq!(result.best_fit_parameters[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(result.best_fit_parameters[1], 1.0, epsilon = 1e-6);
}

#[test]
fn test_rosenbrock_with_numeric_jacobian() {
    for threads in [1, 2] {
        let solver = LevenbergMarquardt::new(array![0.0, 0.0])
            .with_max_iterations(500)
            .with_number_of_threads(threads);
        let result = solver.minimize(&NumericRosenbrock, array![-1.2, 1.0]).unwrap();

        assert_relative_eq!(result.best_fit_parameters[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.best_fit_parameters[1], 1.0, epsilon = 1e-6);
        // Two finite-difference evaluations per Jacobian refresh
        assert!(result.evaluations > result.iterations);
    }
}

#[test]
fn test_levenberg_regularization_converges() {
    let config = LmConfig {
        max_iterations: 500,
        regularization: RegularizationMethod::Levenberg,
        ..LmConfig::default()
    };
    let solver = LevenbergMarquardt::new(array![0.0, 0.0]).with_config(config);
    let result = solver.minimize(&Rosenbrock, array![-1.2, 1.0]).unwrap();

    assert_relative_eq!(result.best_fit_parameters[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(result.best_fit_parameters[1], 1.0, epsilon = 1e-6);
}

#[test]
fn test_explicit_parameter_steps() {
    let steps = array![1e-6, 1e-6];
    let params = array![0.3, 0.4];
    let base = NumericRosenbrock.evaluate(&params).unwrap();
    let jac = WorkerPool::new(2)
        .unwrap()
        .jacobian(&NumericRosenbrock, &params, &base, Some(&steps))
        .unwrap();
    assert_relative_eq!(jac[[1, 0]], -6.0, epsilon = 1e-4);

    let solver = LevenbergMarquardt::new(array![0.0, 0.0])
        .with_parameter_steps(steps)
        .with_max_iterations(500);
    let result = solver.minimize(&NumericRosenbrock, params).unwrap();
    assert_relative_eq!(result.best_fit_parameters[0], 1.0, epsilon = 1e-5);
}

#[test]
fn test_noisy_curve_calibration() {
    let curve = NelsonSiegel::new();
    let truth = array![0.04, -0.02, 0.015, 2.0];
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let targets = curve
        .evaluate(&truth)
        .unwrap()
        .mapv(|r| r + rng.gen_range(-1e-4..1e-4));

    let solver = LevenbergMarquardt::new(targets)
        .with_max_iterations(500)
        .with_number_of_threads(4);
    let result = solver
        .minimize(&curve, array![0.03, -0.01, 0.01, 1.5])
        .unwrap();

    // The fit is at least as good as the parameters the data came from
    assert!(
        result.root_mean_squared_error < 2e-4,
        "RMSE too large: {}",
        result.root_mean_squared_error
    );
    assert_relative_eq!(result.best_fit_parameters[0], 0.04, epsilon = 5e-3);
}

#[test]
fn test_objective_errors_keep_their_variant() {
    let curve = NelsonSiegel::new();
    let solver = LevenbergMarquardt::new(Array1::zeros(11));
    match solver.minimize(&curve, array![0.03, -0.01, 0.01]) {
        Err(SolverError::ObjectiveEvaluation(msg)) => assert!(msg.contains("4 parameters")),
        other => panic!("Expected ObjectiveEvaluation, got {:?}", other),
    }
}
