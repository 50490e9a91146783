//! Surface material core.

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialCore {
    pub base_color: Vec3,
    pub specular_color: Vec3,
    pub specular: f32,
    pub shine: f32,
    pub alpha: f32,
    pub emit: f32,
}

impl Default for MaterialCore {
    fn default() -> Self {
        Self {
            base_color: Vec3::ONE,
            specular_color: Vec3::ONE,
            specular: 1.0,
            shine: 70.0,
            alpha: 1.0,
            emit: 0.0,
        }
    }
}
