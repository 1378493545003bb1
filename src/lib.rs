//! # lm-calibrate
//!
//! `lm-calibrate` is a damped Gauss-Newton (Levenberg-Marquardt) solver for
//! calibrating model parameters against observed target values.
//!
//! The library provides:
//! - An [`Objective`] trait (and closure adapters) for the model being calibrated
//! - Weighted least-squares fitting with adaptive damping
//! - Forward finite-difference Jacobians, optionally evaluated on a worker pool
//! - Per-iteration observation through [`lm::IterationObserver`]
//!
//! ## Basic Usage
//!
//! ```
//! use lm_calibrate::{objective_fn, LevenbergMarquardt};
//! use ndarray::{array, Array1};
//!
//! let objective = objective_fn(|p: &Array1<f64>| Ok(array![p[0], 2.0 * p[0] + p[1]]));
//! let result = LevenbergMarquardt::new(array![5.0, 10.0])
//!     .minimize(&objective, array![0.0, 0.0])
//!     .unwrap();
//!
//! assert!((result.best_fit_parameters[0] - 5.0).abs() < 1e-6);
//! assert!(result.best_fit_parameters[1].abs() < 1e-6);
//! ```

// Public modules
pub mod error;
pub mod lm;
pub mod problem;
pub mod utils;

// Re-exports for convenience
pub use error::{Result, SolverError};
pub use lm::{LevenbergMarquardt, LmConfig, LmResult};
pub use problem::{objective_fn, objective_with_jacobian, Objective};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
