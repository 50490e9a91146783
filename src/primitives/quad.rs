use glam::Vec2;

use crate::gpu::Primitive;
use crate::state::GeometryData;

/// A quad in the XY plane facing +Z, with the given half extents.
#[must_use]
pub fn create_quad(half: Vec2) -> GeometryData {
    let (x, y) = (half.x, half.y);
    GeometryData {
        primitive: Primitive::Triangles,
        positions: vec![-x, -y, 0.0, x, -y, 0.0, x, y, 0.0, -x, y, 0.0],
        normals: Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
        uv: Some(vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]),
        indices: Some(vec![0, 1, 2, 0, 2, 3]),
        ..GeometryData::default()
    }
}
