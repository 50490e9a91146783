//! Viewing (`lookAt`) and projection (`camera`) cores.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::transform::normal_matrix;
use crate::errors::{PrismError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ViewCore {
    pub eye: Vec3,
    pub look: Vec3,
    pub up: Vec3,
    pub matrix: Mat4,
    pub normal_matrix: Mat4,
}

impl Default for ViewCore {
    fn default() -> Self {
        let mut core = Self {
            eye: Vec3::new(0.0, 0.0, 1.0),
            look: Vec3::ZERO,
            up: Vec3::Y,
            matrix: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
        };
        core.rebuild();
        core
    }
}

impl ViewCore {
    pub fn new(eye: Vec3, look: Vec3, up: Vec3) -> Result<Self> {
        let mut core = Self {
            eye,
            look,
            up,
            ..Self::default()
        };
        core.validate()?;
        core.rebuild();
        Ok(core)
    }

    /// Rejects an eye on the look point or an up vector along the view axis.
    pub fn validate(&self) -> Result<()> {
        let forward = self.look - self.eye;
        if forward.length_squared() < f32::EPSILON {
            return Err(PrismError::IllegalNodeConfig(
                "lookAt: eye and look coincide".into(),
            ));
        }
        if forward.cross(self.up).length_squared() < f32::EPSILON {
            return Err(PrismError::IllegalNodeConfig(
                "lookAt: up is parallel to the view direction".into(),
            ));
        }
        Ok(())
    }

    pub fn rebuild(&mut self) {
        self.matrix = Mat4::look_at_rh(self.eye, self.look, self.up);
        self.normal_matrix = normal_matrix(self.matrix);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpticsKind {
    #[default]
    Perspective,
    Ortho,
    Frustum,
}

/// Camera projection parameters. `fovy` is in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Optics {
    #[serde(rename = "type")]
    pub kind: OpticsKind,
    pub fovy: f32,
    /// Width over height. Follows the canvas when unset.
    pub aspect: Option<f32>,
    pub near: f32,
    pub far: f32,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Default for Optics {
    fn default() -> Self {
        Self {
            kind: OpticsKind::Perspective,
            fovy: 60.0,
            aspect: None,
            near: 0.1,
            far: 5000.0,
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
        }
    }
}

impl Optics {
    pub fn validate(&self) -> Result<()> {
        if self.near >= self.far || (self.kind != OpticsKind::Ortho && self.near <= 0.0) {
            return Err(PrismError::IllegalNodeConfig(format!(
                "camera: invalid clip range near={} far={}",
                self.near, self.far
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn matrix(&self, canvas_aspect: f32) -> Mat4 {
        match self.kind {
            OpticsKind::Perspective => Mat4::perspective_rh_gl(
                self.fovy.to_radians(),
                self.aspect.unwrap_or(canvas_aspect),
                self.near,
                self.far,
            ),
            OpticsKind::Ortho => Mat4::orthographic_rh_gl(
                self.left, self.right, self.bottom, self.top, self.near, self.far,
            ),
            OpticsKind::Frustum => {
                let (l, r, b, t, n, f) =
                    (self.left, self.right, self.bottom, self.top, self.near, self.far);
                Mat4::from_cols(
                    Vec4::new(2.0 * n / (r - l), 0.0, 0.0, 0.0),
                    Vec4::new(0.0, 2.0 * n / (t - b), 0.0, 0.0),
                    Vec4::new((r + l) / (r - l), (t + b) / (t - b), -(f + n) / (f - n), -1.0),
                    Vec4::new(0.0, 0.0, -2.0 * f * n / (f - n), 0.0),
                )
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionCore {
    pub optics: Optics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_look_at_is_rejected() {
        assert!(ViewCore::new(Vec3::ONE, Vec3::ONE, Vec3::Y).is_err());
        assert!(ViewCore::new(Vec3::Z, Vec3::ZERO, Vec3::Z).is_err());
    }

    #[test]
    fn frustum_matches_symmetric_perspective() {
        let optics = Optics {
            kind: OpticsKind::Frustum,
            near: 1.0,
            far: 10.0,
            ..Optics::default()
        };
        let persp = Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, 1.0, 10.0);
        assert!(optics.matrix(1.0).abs_diff_eq(persp, 1e-5));
    }
}
