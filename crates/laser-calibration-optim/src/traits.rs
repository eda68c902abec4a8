use laser_calibration_core::{CalibError, Real};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Dense non-linear least squares problem.
///
/// Robust weighting is applied as IRLS row scaling: residuals and Jacobian
/// rows are multiplied by `sqrt(w_i)` computed from the unweighted residuals,
/// and the weights themselves are not differentiated.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows in the problem.
    fn num_residuals(&self) -> usize;

    /// Unweighted residuals for the current parameters.
    fn residuals_unweighted(&self, x: &DVector<Real>) -> DVector<Real>;
    /// Unweighted Jacobian for the current parameters.
    fn jacobian_unweighted(&self, x: &DVector<Real>) -> DMatrix<Real>;

    /// Per-row IRLS scales (`sqrt(w)`).
    fn robust_row_scales(&self, r_unweighted: &DVector<Real>) -> DVector<Real> {
        DVector::from_element(r_unweighted.len(), 1.0)
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let mut r = self.residuals_unweighted(x);
        let scales = self.robust_row_scales(&r);
        debug_assert_eq!(scales.len(), r.len());
        r.component_mul_assign(&scales);
        r
    }

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let scales = self.robust_row_scales(&self.residuals_unweighted(x));
        let mut j = self.jacobian_unweighted(x);
        debug_assert_eq!(scales.len(), j.nrows());
        for (mut row, scale) in j.row_iter_mut().zip(scales.iter()) {
            if *scale != 1.0 {
                row.scale_mut(*scale);
            }
        }
        j
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Iteration cap.
    ///
    /// The LM backend follows the MINPACK convention and stops after
    /// `max_iters * (n + 1)` function evaluations.
    pub max_iters: usize,
    /// Relative tolerance on the cost reduction.
    pub ftol: Real,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
    /// Log a summary of every solve at `info`.
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 500,
            ftol: 1e-12,
            gtol: 1e-12,
            xtol: 1e-12,
            verbose: false,
        }
    }
}

/// Convergence diagnostics of one solve.
///
/// `final_cost` is `0.5 * |r|^2` of the (weighted) residuals at the solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    pub final_cost: Real,
    pub converged: bool,
}

impl SolveReport {
    /// The solver stopped on its cap rather than a tolerance.
    ///
    /// This is a diagnostic; whether the result is usable is up to the caller.
    pub fn nonconvergence(&self) -> Option<CalibError> {
        (!self.converged).then_some(CalibError::SolverNonconvergence {
            iterations: self.iterations,
            final_cost: self.final_cost,
        })
    }
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonconvergence_is_a_non_fatal_diagnostic() {
        let ok = SolveReport {
            iterations: 12,
            final_cost: 1e-20,
            converged: true,
        };
        assert!(ok.nonconvergence().is_none());

        let capped = SolveReport {
            converged: false,
            ..ok
        };
        let diag = capped.nonconvergence().unwrap();
        assert!(!diag.is_fatal());
        assert_eq!(
            diag,
            CalibError::SolverNonconvergence {
                iterations: 12,
                final_cost: 1e-20
            }
        );
    }
}
