//! Residual functions shared by the solver backends.
//!
//! Residuals are generic over [`nalgebra::RealField`] so the same code is
//! evaluated with `f64` and with dual numbers for automatic differentiation.
//! Constants enter through `T::from_subset`, parameters are cloned out of
//! their slices.

pub mod ray_field;
