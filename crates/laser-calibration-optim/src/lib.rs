//! Non-linear refinement of the laser ray-field model.
//!
//! The crate provides a small dense least-squares interface ([`NllsProblem`],
//! [`NllsSolverBackend`]) with a Levenberg-Marquardt backend, the ray-field
//! residual with an autodiff Jacobian, and [`refine_ray_field`], which checks
//! that the problem is well posed and runs the solve.

pub mod backend;
mod backend_lm;
mod factors;
mod jacobian_ad;
pub mod problems;
mod robust;
mod traits;

pub use backend::{RayFieldBackend, TinySolverBackend};
pub use backend_lm::LmBackend;
pub use problems::ray_field::{
    RayFieldEstimate, RayFieldProblem, RayFieldSolveOptions, RayFieldStats, refine_ray_field,
};
pub use robust::RobustLoss;
pub use traits::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
