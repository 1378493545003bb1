//! Parallel Jacobian estimation.
//!
//! A [`WorkerPool`] is created at the start of a calibration run and dropped
//! when the run returns. With more than one thread it owns a dedicated rayon
//! pool and evaluates the perturbed objective calls of a Jacobian refresh
//! concurrently; with one thread it runs the same per-column routine on the
//! calling thread.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::Result;
use crate::problem::Objective;
use crate::utils::finite_difference::{
    self, assemble_columns, forward_difference_column, step_size,
};

/// Compute the Jacobian matrix using forward finite differences on `pool`.
///
/// Each column is computed by one task and written to its own position, so
/// the order in which tasks complete does not matter. The matrix is only
/// assembled after every task has finished; the first failure is returned and
/// no partial Jacobian is produced.
pub fn jacobian_parallel<O: Objective + Sync + ?Sized>(
    pool: &ThreadPool,
    objective: &O,
    params: &Array1<f64>,
    base_values: &Array1<f64>,
    steps: Option<&Array1<f64>>,
) -> Result<Array2<f64>> {
    let columns: Result<Vec<Array1<f64>>> = pool.install(|| {
        (0..params.len())
            .into_par_iter()
            .map(|i| {
                let step = step_size(params, i, steps);
                forward_difference_column(objective, params, base_values, i, step)
            })
            .collect()
    });

    assemble_columns(&columns?, base_values.len())
}

/// Fixed-size worker pool scoped to one calibration run.
pub struct WorkerPool {
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    /// Create a pool with `number_of_threads` workers. One thread means no
    /// pool: work runs on the calling thread.
    pub fn new(number_of_threads: usize) -> Result<Self> {
        let pool = if number_of_threads > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(number_of_threads)
                .thread_name(|i| format!("lm-jacobian-{}", i))
                .build()?;
            log::trace!("started Jacobian worker pool with {} threads", number_of_threads);
            Some(pool)
        } else {
            None
        };
        Ok(Self { pool })
    }

    /// Number of threads evaluating Jacobian columns.
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, |pool| pool.current_num_threads())
    }

    /// Forward-difference Jacobian, on the pool if there is one.
    pub fn jacobian<O: Objective + Sync + ?Sized>(
        &self,
        objective: &O,
        params: &Array1<f64>,
        base_values: &Array1<f64>,
        steps: Option<&Array1<f64>>,
    ) -> Result<Array2<f64>> {
        match &self.pool {
            Some(pool) => jacobian_parallel(pool, objective, params, base_values, steps),
            None => finite_difference::jacobian(objective, params, base_values, steps),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.pool.is_some() {
            log::trace!("shutting down Jacobian worker pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;
    use crate::problem::objective_fn;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coupled(params: &Array1<f64>) -> Result<Array1<f64>> {
        let (a, b, c, d) = (params[0], params[1], params[2], params[3]);
        Ok(array![a * b, b.sin() + c, (c * d).exp(), a + b + c + d, d.powi(3)])
    }

    #[test]
    fn test_single_thread_has_no_pool() {
        let pool = WorkerPool::new(1).unwrap();
        assert_eq!(pool.threads(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let objective = objective_fn(coupled);
        let params = array![1.5, -0.3, 0.2, 0.7];
        let base = objective.evaluate(&params).unwrap();

        let sequential = WorkerPool::new(1)
            .unwrap()
            .jacobian(&objective, &params, &base, None)
            .unwrap();
        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.threads(), 4);
        let parallel = pool.jacobian(&objective, &params, &base, None).unwrap();

        assert_eq!(sequential.shape(), &[5, 4]);
        // Every column is computed by the same arithmetic in both modes
        assert_eq!(sequential, parallel);
        assert_relative_eq!(parallel[[0, 0]], -0.3, epsilon = 1e-6);
        assert_relative_eq!(parallel[[3, 2]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_one_evaluation_per_parameter() {
        let calls = AtomicUsize::new(0);
        let objective = objective_fn(|p: &Array1<f64>| {
            calls.fetch_add(1, Ordering::SeqCst);
            coupled(p)
        });
        let params = array![1.0, 2.0, 3.0, 0.1];
        let base = coupled(&params).unwrap();

        let pool = WorkerPool::new(3).unwrap();
        pool.jacobian(&objective, &params, &base, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_worker_failure_propagates() {
        let objective = objective_fn(|p: &Array1<f64>| {
            if p[2] != 3.0 {
                Err(SolverError::ObjectiveEvaluation("no quote for bucket 2".to_string()))
            } else {
                coupled(p)
            }
        });
        let params = array![1.0, 2.0, 3.0, 0.1];
        let base = coupled(&params).unwrap();

        let pool = WorkerPool::new(2).unwrap();
        match pool.jacobian(&objective, &params, &base, None) {
            Err(SolverError::ObjectiveEvaluation(msg)) => assert!(msg.contains("bucket 2")),
            other => panic!("Expected ObjectiveEvaluation, got {:?}", other),
        }
    }
}
