mod camera;
mod correspondence;
mod distortion;
mod lattice;
mod ray_field;

pub use camera::*;
pub use correspondence::*;
pub use distortion::*;
pub use lattice::*;
pub use ray_field::*;
