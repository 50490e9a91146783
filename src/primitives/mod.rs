//! Geometry generators behind the `geometry/*` node types.

mod box_shape;
mod quad;
mod sphere;

pub use box_shape::create_box;
pub use quad::create_quad;
pub use sphere::{SphereOptions, create_sphere};
