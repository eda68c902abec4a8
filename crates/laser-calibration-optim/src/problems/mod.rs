//! Problem builders for the non-linear refinement stages.

pub mod ray_field;
