//! Pick results and the CPU side of triangle picking.

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde_json::Value;

use crate::state::GeometryData;

/// Options for one pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PickOptions {
    /// Also resolve the triangle under the cursor.
    pub ray: bool,
    /// Also resolve the region-map region under the cursor.
    pub regions: bool,
}

/// The triangle under the cursor and where on it the ray hit.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleHit {
    pub primitive_index: u32,
    pub indices: [u32; 3],
    pub barycentric: Vec3,
    /// Model-space intersection.
    pub position: Vec3,
    pub world_pos: Vec3,
    pub normal: Option<Vec3>,
    pub uv: Option<Vec2>,
}

/// A region map entry under the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionHit {
    pub color: Vec3,
    pub data: Value,
}

/// Result of a successful pick.
#[derive(Debug, Clone, PartialEq)]
pub struct PickHit {
    pub name: Option<String>,
    pub path: Vec<String>,
    pub node_id: String,
    pub canvas_pos: (u32, u32),
    pub triangle: Option<TriangleHit>,
    pub region: Option<RegionHit>,
}

/// Canvas pixel centre to normalised device coordinates.
#[must_use]
pub fn canvas_to_ndc(x: u32, y: u32, size: (u32, u32)) -> Vec2 {
    let (w, h) = (size.0.max(1) as f32, size.1.max(1) as f32);
    Vec2::new(
        (x as f32 + 0.5) / w * 2.0 - 1.0,
        1.0 - (y as f32 + 0.5) / h * 2.0,
    )
}

/// Casts the pick ray through `ndc` against triangle `primitive_index`.
///
/// The ray is unprojected into model space with the inverse of
/// `proj * view * model`, intersected with the triangle's plane, and the
/// hit is expressed in barycentric coordinates.
#[must_use]
pub fn resolve_triangle(
    data: &GeometryData,
    primitive_index: u32,
    ndc: Vec2,
    model: Mat4,
    view: Mat4,
    projection: Mat4,
) -> Option<TriangleHit> {
    let indices = data.triangle(primitive_index as usize)?;
    let [a, b, c] = [
        data.position(indices[0])?,
        data.position(indices[1])?,
        data.position(indices[2])?,
    ];

    let inverse = (projection * view * model).inverse();
    let unproject = |z: f32| {
        let p = inverse * Vec4::new(ndc.x, ndc.y, z, 1.0);
        p.truncate() / p.w
    };
    let origin = unproject(-1.0);
    let dir = (unproject(1.0) - origin).normalize_or_zero();

    let plane_normal = (b - a).cross(c - a);
    let denom = plane_normal.dot(dir);
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let t = plane_normal.dot(a - origin) / denom;
    let position = origin + dir * t;
    let barycentric = barycentric(position, a, b, c)?;

    let normal = interpolate(|i| data.normal(i), indices, barycentric).map(Vec3::normalize_or_zero);
    let uv = interpolate(|i| data.uv_at(i), indices, barycentric);

    Some(TriangleHit {
        primitive_index,
        indices,
        barycentric,
        position,
        world_pos: model.transform_point3(position),
        normal,
        uv,
    })
}

fn interpolate<T>(
    attribute: impl Fn(u32) -> Option<T>,
    indices: [u32; 3],
    weights: Vec3,
) -> Option<T>
where
    T: std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    Some(
        attribute(indices[0])? * weights.x
            + attribute(indices[1])? * weights.y
            + attribute(indices[2])? * weights.z,
    )
}

fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<Vec3> {
    let (v0, v1, v2) = (b - a, c - a, p - a);
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some(Vec3::new(1.0 - v - w, v, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::create_quad;

    #[test]
    fn ray_through_centre_hits_quad_centre() {
        let quad = create_quad(Vec2::ONE);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh_gl(45f32.to_radians(), 1.0, 0.1, 100.0);
        let model = Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0));

        let hit = (0..2)
            .find_map(|i| resolve_triangle(&quad, i, Vec2::ZERO, model, view, projection))
            .unwrap();
        let sum = hit.barycentric.x + hit.barycentric.y + hit.barycentric.z;
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(hit.position.length() < 1e-3);
        assert!((hit.world_pos - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-3);
    }

    #[test]
    fn canvas_centre_is_ndc_origin() {
        let ndc = canvas_to_ndc(49, 49, (99, 99));
        assert!(ndc.length() < 1e-6);
    }
}
