//! Utility functions and helpers for the lm-calibrate library.

pub mod finite_difference;
pub mod matrix_convert;
pub mod parallel;

// Re-export commonly used utilities
pub use finite_difference::{default_step, jacobian};
pub use parallel::{jacobian_parallel, WorkerPool};
