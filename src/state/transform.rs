//! Modelling transforms.
//!
//! `rotate`, `translate`, `scale`, `matrix` and `quaternion` nodes all share
//! one core category. Each core holds its local contribution, the composed
//! world matrix, and a link to the core it was last composed against, so a
//! setter can recompute the world matrices of everything below it without
//! another traversal.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::CoreHandle;

/// Which side of the parent matrix the local matrix is multiplied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultOrder {
    /// `world = local * parent`
    Pre,
    /// `world = parent * local`
    #[default]
    Post,
}

/// The local contribution of one transform node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalTransform {
    Identity,
    /// Angle in degrees about a non-zero axis.
    Rotate { angle: f32, axis: Vec3 },
    Translate(Vec3),
    Scale(Vec3),
    Matrix(Mat4),
    Quaternion(Quat),
}

impl LocalTransform {
    #[must_use]
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Self::Identity => Mat4::IDENTITY,
            Self::Rotate { angle, axis } => {
                Mat4::from_axis_angle(axis.normalize(), angle.to_radians())
            }
            Self::Translate(t) => Mat4::from_translation(t),
            Self::Scale(s) => Mat4::from_scale(s),
            Self::Matrix(m) => m,
            Self::Quaternion(q) => Mat4::from_quat(q.normalize()),
        }
    }
}

/// How much of a transform's world matrix is still valid from the previous
/// compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoLevel {
    /// Recompute both the local and the world matrix.
    #[default]
    Unmemoized,
    /// The local matrix is valid; the world matrix must be recomposed.
    LocalMemoized,
    /// Both matrices are valid as long as the parent stays fixed.
    WorldMemoized,
}

/// Outcome of [`MemoLevel::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoStep {
    pub rebuild_local: bool,
    pub rebuild_world: bool,
    /// Level to store for the next compile.
    pub next: MemoLevel,
    /// Whether this core's world matrix counts as fixed for its children.
    pub fixed: bool,
}

impl MemoLevel {
    /// Decides what a compile visit must recompute.
    ///
    /// `parent_fixed` is whether the enclosing transform is itself fully
    /// memoized; `instancing` is whether the visit happens inside an
    /// `instance` placement, which reuses the subtree under other parents.
    #[must_use]
    pub fn advance(self, parent_fixed: bool, instancing: bool) -> MemoStep {
        let stable = parent_fixed && !instancing;
        match self {
            Self::Unmemoized => MemoStep {
                rebuild_local: true,
                rebuild_world: true,
                next: Self::LocalMemoized,
                fixed: false,
            },
            Self::LocalMemoized => MemoStep {
                rebuild_local: false,
                rebuild_world: true,
                next: if stable {
                    Self::WorldMemoized
                } else {
                    Self::LocalMemoized
                },
                fixed: false,
            },
            Self::WorldMemoized if stable => MemoStep {
                rebuild_local: false,
                rebuild_world: false,
                next: Self::WorldMemoized,
                fixed: true,
            },
            Self::WorldMemoized => MemoStep {
                rebuild_local: false,
                rebuild_world: true,
                next: Self::LocalMemoized,
                fixed: false,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformCore {
    pub local: LocalTransform,
    pub mult_order: MultOrder,
    pub local_matrix: Mat4,
    pub world_matrix: Mat4,
    pub normal_matrix: Mat4,
    pub memo: MemoLevel,
    pub fixed: bool,
    pub(crate) parent: Option<CoreHandle>,
    pub(crate) children: Vec<CoreHandle>,
    /// Set on cores derived for an `instance` placement.
    pub(crate) placement_of: Option<CoreHandle>,
}

impl TransformCore {
    #[must_use]
    pub fn new(local: LocalTransform, mult_order: MultOrder) -> Self {
        let local_matrix = local.matrix();
        Self {
            local,
            mult_order,
            local_matrix,
            world_matrix: local_matrix,
            normal_matrix: normal_matrix(local_matrix),
            memo: MemoLevel::Unmemoized,
            fixed: false,
            parent: None,
            children: Vec::new(),
            placement_of: None,
        }
    }

    /// The root transform: identity and permanently fixed.
    #[must_use]
    pub fn root() -> Self {
        Self {
            memo: MemoLevel::WorldMemoized,
            fixed: true,
            ..Self::new(LocalTransform::Identity, MultOrder::Post)
        }
    }

    /// Replaces the local contribution and invalidates memoization.
    pub fn set_local(&mut self, local: LocalTransform) {
        self.local = local;
        self.local_matrix = local.matrix();
        self.memo = MemoLevel::Unmemoized;
        self.fixed = false;
    }

    pub fn set_mult_order(&mut self, order: MultOrder) {
        self.mult_order = order;
        self.memo = MemoLevel::Unmemoized;
        self.fixed = false;
    }

    /// Recomposes the world and normal matrices against `parent_world`.
    pub fn compose(&mut self, parent_world: Mat4) {
        self.world_matrix = match self.mult_order {
            MultOrder::Post => parent_world * self.local_matrix,
            MultOrder::Pre => self.local_matrix * parent_world,
        };
        self.normal_matrix = normal_matrix(self.world_matrix);
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<CoreHandle> {
        self.parent
    }
}

/// `transpose(inverse(m))`, or identity for a singular matrix.
#[must_use]
pub fn normal_matrix(m: Mat4) -> Mat4 {
    if m.determinant().abs() < f32::EPSILON {
        return Mat4::IDENTITY;
    }
    m.inverse().transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_reaches_world_level_only_under_fixed_parent() {
        let step = MemoLevel::Unmemoized.advance(true, false);
        assert!(step.rebuild_local && step.rebuild_world);
        assert_eq!(step.next, MemoLevel::LocalMemoized);

        let step = MemoLevel::LocalMemoized.advance(true, false);
        assert!(!step.rebuild_local && step.rebuild_world);
        assert_eq!(step.next, MemoLevel::WorldMemoized);

        let step = MemoLevel::WorldMemoized.advance(true, false);
        assert!(!step.rebuild_world);
        assert!(step.fixed);

        let step = MemoLevel::LocalMemoized.advance(false, false);
        assert_eq!(step.next, MemoLevel::LocalMemoized);
    }

    #[test]
    fn instancing_demotes_world_memoization() {
        let step = MemoLevel::WorldMemoized.advance(true, true);
        assert!(step.rebuild_world);
        assert!(!step.fixed);
        assert_eq!(step.next, MemoLevel::LocalMemoized);
    }

    #[test]
    fn mult_order_controls_composition_side() {
        let parent = Mat4::from_translation(Vec3::X);
        let mut core = TransformCore::new(LocalTransform::Scale(Vec3::splat(2.0)), MultOrder::Post);
        core.compose(parent);
        assert_eq!(core.world_matrix.transform_point3(Vec3::ZERO), Vec3::X);

        core.set_mult_order(MultOrder::Pre);
        core.compose(parent);
        assert_eq!(core.world_matrix.transform_point3(Vec3::ZERO), Vec3::new(2.0, 0.0, 0.0));
    }
}
