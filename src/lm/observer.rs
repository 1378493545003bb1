//! Per-iteration observation of a calibration run.
//!
//! The solver reports every completed iteration to an [`IterationObserver`].
//! Closures taking an [`IterationReport`] are observers, and [`LogObserver`]
//! forwards reports to the `log` facade.

use ndarray::Array1;

/// Snapshot of the solver after one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    /// Number of completed iterations, including this one
    pub iteration: usize,

    /// Damping factor for the next step
    pub lambda: f64,

    /// Weighted squared error at the accepted parameters
    pub error: f64,

    /// Accepted parameters after this iteration
    pub parameters: Array1<f64>,

    /// Whether this iteration's trial was accepted
    pub accepted: bool,

    /// Improvement magnitude used by the stopping rule
    pub error_change: f64,
}

/// Receives one report per completed iteration.
pub trait IterationObserver {
    fn on_iteration(&mut self, report: &IterationReport);
}

impl<F> IterationObserver for F
where
    F: FnMut(&IterationReport),
{
    fn on_iteration(&mut self, report: &IterationReport) {
        self(report)
    }
}

/// Observer that writes each iteration at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl IterationObserver for LogObserver {
    fn on_iteration(&mut self, report: &IterationReport) {
        log::debug!(
            "iteration {:>4}: error = {:.6e}, lambda = {:.3e}, {} (change {:.3e}), parameters = {}",
            report.iteration,
            report.error,
            report.lambda,
            if report.accepted { "accepted" } else { "rejected" },
            report.error_change,
            report.parameters
        );
    }
}
