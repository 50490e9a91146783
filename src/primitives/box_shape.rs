use glam::Vec3;

use crate::gpu::Primitive;
use crate::state::GeometryData;

/// Faces as (outward normal, u axis, v axis).
const FACES: [(Vec3, Vec3, Vec3); 6] = [
    (Vec3::Z, Vec3::X, Vec3::Y),
    (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    (Vec3::Y, Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_Y, Vec3::X, Vec3::Z),
    (Vec3::X, Vec3::NEG_Z, Vec3::Y),
    (Vec3::NEG_X, Vec3::Z, Vec3::Y),
];

/// An axis-aligned box centred on the origin with the given half extents.
///
/// The solid box has 24 vertices (4 per face, so each face gets its own
/// normal) and counter-clockwise triangles. The wireframe box has the 8
/// corners joined by 12 line segments.
#[must_use]
pub fn create_box(half: Vec3, wire: bool) -> GeometryData {
    if wire {
        return wire_box(half);
    }
    let mut positions = Vec::with_capacity(24 * 3);
    let mut normals = Vec::with_capacity(24 * 3);
    let mut uv = Vec::with_capacity(24 * 2);
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

    for (normal, u_axis, v_axis) in FACES {
        for (u, v) in corners {
            let p = (normal + u_axis * u + v_axis * v) * half;
            positions.extend_from_slice(&p.to_array());
            normals.extend_from_slice(&normal.to_array());
            uv.extend_from_slice(&[(u + 1.0) / 2.0, (1.0 - v) / 2.0]);
        }
    }

    let indices = (0..6u32)
        .flat_map(|face| {
            let base = face * 4;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect();

    GeometryData {
        primitive: Primitive::Triangles,
        positions,
        normals: Some(normals),
        uv: Some(uv),
        indices: Some(indices),
        ..GeometryData::default()
    }
}

fn wire_box(half: Vec3) -> GeometryData {
    let mut positions = Vec::with_capacity(8 * 3);
    for i in 0..8u32 {
        let sign = |bit: u32| if i & bit == 0 { -1.0 } else { 1.0 };
        let p = Vec3::new(sign(1), sign(2), sign(4)) * half;
        positions.extend_from_slice(&p.to_array());
    }
    // Corners that differ in exactly one axis bit.
    let mut indices = Vec::with_capacity(24);
    for a in 0..8u32 {
        for bit in [1, 2, 4] {
            if a & bit == 0 {
                indices.extend_from_slice(&[a, a | bit]);
            }
        }
    }
    GeometryData {
        primitive: Primitive::Lines,
        positions,
        indices: Some(indices),
        ..GeometryData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_box_has_outward_ccw_faces() {
        let data = create_box(Vec3::ONE, false);
        assert_eq!(data.vertex_count(), 24);
        assert_eq!(data.element_count(), 36);
        for t in 0..12 {
            let [a, b, c] = data.triangle(t).unwrap();
            let (a, b, c) = (
                data.position(a).unwrap(),
                data.position(b).unwrap(),
                data.position(c).unwrap(),
            );
            let n = data.normal(data.triangle(t).unwrap()[0]).unwrap();
            assert!((b - a).cross(c - a).dot(n) > 0.0, "triangle {t} winds inward");
        }
    }

    #[test]
    fn wire_box_has_twelve_edges() {
        let data = create_box(Vec3::new(1.0, 2.0, 3.0), true);
        assert_eq!(data.primitive, Primitive::Lines);
        assert_eq!(data.vertex_count(), 8);
        assert_eq!(data.element_count(), 24);
        assert!(data.normals.is_none());
    }
}
