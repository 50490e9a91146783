//! Geometry core: vertex arrays and the GPU buffers uploaded from them.
//!
//! Vertex data stays on the CPU after upload. Picking intersects it, and
//! the buffers are re-created from it after a context loss.

use std::sync::Arc;

use glam::{Vec2, Vec3};
use serde::Deserialize;

use super::LoadState;
use crate::errors::{PrismError, Result};
use crate::gpu::{BufferData, GpuBuffer, GpuContext, Primitive};

/// Vertex arrays as written in a `geometry` node config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub primitive: Primitive,
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub uv: Option<Vec<f32>>,
    pub uv2: Option<Vec<f32>>,
    pub colors: Option<Vec<f32>>,
    pub indices: Option<Vec<u32>>,
    /// Loads the arrays asynchronously instead.
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryData {
    pub primitive: Primitive,
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub uv: Option<Vec<f32>>,
    pub uv2: Option<Vec<f32>>,
    pub colors: Option<Vec<f32>>,
    pub indices: Option<Vec<u32>>,
}

impl GeometryData {
    /// Validates array lengths and index bounds.
    pub fn new(config: GeometryConfig) -> Result<Self> {
        let data = Self {
            primitive: config.primitive,
            positions: config.positions,
            normals: config.normals,
            uv: config.uv,
            uv2: config.uv2,
            colors: config.colors,
            indices: config.indices,
        };
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<()> {
        if self.positions.len() % 3 != 0 {
            return Err(illegal("positions length is not a multiple of 3"));
        }
        let vertices = self.vertex_count();
        let check = |name: &str, array: &Option<Vec<f32>>, width: usize| match array {
            Some(a) if a.len() != vertices * width => Err(illegal(&format!(
                "{name} has {} values for {vertices} vertices",
                a.len()
            ))),
            _ => Ok(()),
        };
        check("normals", &self.normals, 3)?;
        check("uv", &self.uv, 2)?;
        check("uv2", &self.uv2, 2)?;
        check("colors", &self.colors, 4)?;
        if let Some(bad) = self
            .indices
            .iter()
            .flatten()
            .find(|i| **i as usize >= vertices)
        {
            return Err(illegal(&format!("index {bad} out of range for {vertices} vertices")));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Number of elements the draw call submits.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.indices
            .as_ref()
            .map_or_else(|| self.vertex_count(), Vec::len)
    }

    /// `{primitive}:{arrays}`, naming each optional array present.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut arrays = vec!["p"];
        if self.normals.is_some() {
            arrays.push("n");
        }
        if self.uv.is_some() {
            arrays.push("uv");
        }
        if self.uv2.is_some() {
            arrays.push("uv2");
        }
        if self.colors.is_some() {
            arrays.push("c");
        }
        format!("{}:{}", self.primitive.as_str(), arrays.join(","))
    }

    /// Vertex indices of triangle `i` for indexed or plain triangle lists.
    #[must_use]
    pub fn triangle(&self, i: usize) -> Option<[u32; 3]> {
        if self.primitive != Primitive::Triangles {
            return None;
        }
        match &self.indices {
            Some(indices) => indices
                .get(i * 3..i * 3 + 3)
                .map(|t| [t[0], t[1], t[2]]),
            None => {
                let base = (i * 3) as u32;
                ((i * 3 + 3) <= self.vertex_count()).then_some([base, base + 1, base + 2])
            }
        }
    }

    #[must_use]
    pub fn position(&self, i: u32) -> Option<Vec3> {
        let i = i as usize * 3;
        self.positions.get(i..i + 3).map(Vec3::from_slice)
    }

    #[must_use]
    pub fn normal(&self, i: u32) -> Option<Vec3> {
        let i = i as usize * 3;
        self.normals.as_ref()?.get(i..i + 3).map(Vec3::from_slice)
    }

    #[must_use]
    pub fn uv_at(&self, i: u32) -> Option<Vec2> {
        let i = i as usize * 2;
        self.uv.as_ref()?.get(i..i + 2).map(Vec2::from_slice)
    }
}

fn upload_vertex(
    gpu: &mut dyn GpuContext,
    array: Option<&[f32]>,
    created: &mut Vec<GpuBuffer>,
) -> Result<Option<GpuBuffer>> {
    let Some(values) = array else {
        return Ok(None);
    };
    let buffer = gpu.create_buffer(BufferData::Vertex(values))?;
    created.push(buffer);
    Ok(Some(buffer))
}

fn illegal(msg: &str) -> PrismError {
    PrismError::IllegalNodeConfig(format!("geometry: {msg}"))
}

/// GPU buffers uploaded from one [`GeometryData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryBuffers {
    pub position: GpuBuffer,
    pub normal: Option<GpuBuffer>,
    pub uv: Option<GpuBuffer>,
    pub uv2: Option<GpuBuffer>,
    pub color: Option<GpuBuffer>,
    pub index: Option<GpuBuffer>,
}

impl GeometryBuffers {
    pub fn upload(gpu: &mut dyn GpuContext, data: &GeometryData) -> Result<Self> {
        let mut created = Vec::new();
        let result = Self::upload_all(gpu, data, &mut created);
        if result.is_err() {
            for buffer in created {
                gpu.delete_buffer(buffer);
            }
        }
        result
    }

    fn upload_all(
        gpu: &mut dyn GpuContext,
        data: &GeometryData,
        created: &mut Vec<GpuBuffer>,
    ) -> Result<Self> {
        let position = upload_vertex(gpu, Some(data.positions.as_slice()), created)?
            .ok_or_else(|| PrismError::OutOfVram("position buffer".into()))?;
        let normal = upload_vertex(gpu, data.normals.as_deref(), created)?;
        let uv = upload_vertex(gpu, data.uv.as_deref(), created)?;
        let uv2 = upload_vertex(gpu, data.uv2.as_deref(), created)?;
        let color = upload_vertex(gpu, data.colors.as_deref(), created)?;
        let index = match &data.indices {
            Some(indices) => {
                let buffer = gpu.create_buffer(BufferData::Index(indices))?;
                created.push(buffer);
                Some(buffer)
            }
            None => None,
        };
        Ok(Self {
            position,
            normal,
            uv,
            uv2,
            color,
            index,
        })
    }

    pub fn release(self, gpu: &mut dyn GpuContext) {
        gpu.delete_buffer(self.position);
        for buffer in [self.normal, self.uv, self.uv2, self.color, self.index]
            .into_iter()
            .flatten()
        {
            gpu.delete_buffer(buffer);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeometryCore {
    pub data: Arc<GeometryData>,
    pub state: LoadState,
    /// URI the arrays are loaded from, if any.
    pub source: Option<String>,
    pub(crate) buffers: Option<GeometryBuffers>,
}

impl GeometryCore {
    #[must_use]
    pub fn ready(data: GeometryData) -> Self {
        Self {
            data: Arc::new(data),
            state: LoadState::Ready,
            source: None,
            buffers: None,
        }
    }

    #[must_use]
    pub fn pending(source: String) -> Self {
        Self {
            data: Arc::default(),
            state: LoadState::Pending,
            source: Some(source),
            buffers: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn buffers(&self) -> Option<GeometryBuffers> {
        self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> GeometryConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let err = GeometryData::new(config(json!({
            "positions": [0, 0, 0, 1, 0, 0, 0, 1, 0],
            "uv": [0, 0, 1, 0],
        })));
        assert!(matches!(err, Err(PrismError::IllegalNodeConfig(_))));

        let err = GeometryData::new(config(json!({
            "positions": [0, 0, 0, 1, 0, 0, 0, 1, 0],
            "indices": [0, 1, 3],
        })));
        assert!(err.is_err());
    }

    #[test]
    fn hash_names_present_arrays() {
        let data = GeometryData::new(config(json!({
            "primitive": "lines",
            "positions": [0, 0, 0, 1, 0, 0],
            "normals": [0, 0, 1, 0, 0, 1],
        })))
        .unwrap();
        assert_eq!(data.hash(), "lines:p,n");
        assert_eq!(data.element_count(), 2);
        assert_eq!(data.triangle(0), None);
    }
}
