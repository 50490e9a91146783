use std::f32::consts::PI;

use serde::Deserialize;

use crate::gpu::Primitive;
use crate::state::GeometryData;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SphereOptions {
    pub radius: f32,
    pub latitude_bands: u32,
    pub longitude_bands: u32,
}

impl Default for SphereOptions {
    fn default() -> Self {
        Self {
            radius: 1.0,
            latitude_bands: 24,
            longitude_bands: 24,
        }
    }
}

/// A UV sphere centred on the origin. `v` runs from the north pole (0) to
/// the south pole (1).
#[must_use]
pub fn create_sphere(options: SphereOptions) -> GeometryData {
    let radius = options.radius;
    let lat_bands = options.latitude_bands.max(2);
    let long_bands = options.longitude_bands.max(3);

    let vertex_total = ((lat_bands + 1) * (long_bands + 1)) as usize;
    let mut positions = Vec::with_capacity(vertex_total * 3);
    let mut normals = Vec::with_capacity(vertex_total * 3);
    let mut uv = Vec::with_capacity(vertex_total * 2);

    for lat in 0..=lat_bands {
        let v = lat as f32 / lat_bands as f32;
        let (sin_theta, cos_theta) = (v * PI).sin_cos();
        for long in 0..=long_bands {
            let u = long as f32 / long_bands as f32;
            let (sin_phi, cos_phi) = (u * 2.0 * PI).sin_cos();
            let n = [cos_phi * sin_theta, cos_theta, sin_phi * sin_theta];
            normals.extend_from_slice(&n);
            positions.extend(n.iter().map(|c| c * radius));
            uv.extend_from_slice(&[1.0 - u, v]);
        }
    }

    let stride = long_bands + 1;
    let mut indices = Vec::with_capacity((lat_bands * long_bands * 6) as usize);
    for lat in 0..lat_bands {
        for long in 0..long_bands {
            let first = lat * stride + long;
            let second = first + stride;
            indices.extend_from_slice(&[first, second, first + 1, second, second + 1, first + 1]);
        }
    }

    GeometryData {
        primitive: Primitive::Triangles,
        positions,
        normals: Some(normals),
        uv: Some(uv),
        indices: Some(indices),
        ..GeometryData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertices_lie_on_the_radius() {
        let data = create_sphere(SphereOptions {
            radius: 2.0,
            latitude_bands: 4,
            longitude_bands: 6,
        });
        assert_eq!(data.vertex_count(), 5 * 7);
        for i in 0..data.vertex_count() as u32 {
            let p = data.position(i).unwrap();
            assert!((p.length() - 2.0).abs() < 1e-4);
        }
    }
}
