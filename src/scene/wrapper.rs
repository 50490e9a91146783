//! Chainable node operation wrapper.
//!
//! [`SceneNode`] borrows a [`Scene`] mutably and offers typed setters over
//! the generic [`Scene::set`], so common edits read as one chain.
//!
//! Chained setters never panic. A stale handle or an attribute the node's
//! type does not have is logged and skipped; [`SceneNode::set`] returns the
//! error instead for callers that want it.
//!
//! # Example
//!
//! ```rust,ignore
//! scene.node(spin)
//!     .set_angle(45.0)
//!     .set_mult_order_pre();
//! scene.node(red)
//!     .set_base_color(Vec3::new(1.0, 0.0, 0.0))
//!     .set_alpha(0.5);
//! ```
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::must_use_candidate)]
use glam::Vec3;
use serde_json::{Value, json};

use crate::errors::Result;
use crate::scene::NodeHandle;
use crate::scene::scene::Scene;

/// Temporary mutable borrow of a scene node for chainable operations.
pub struct SceneNode<'a> {
    scene: &'a mut Scene,
    handle: NodeHandle,
}

impl<'a> SceneNode<'a> {
    #[inline]
    pub fn new(scene: &'a mut Scene, handle: NodeHandle) -> Self {
        Self { scene, handle }
    }

    /// Returns the underlying handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Sets one attribute, reporting failure.
    pub fn set(&mut self, attr: &str, value: &Value) -> Result<()> {
        self.scene.set(self.handle, attr, value)
    }

    pub fn get(&self, attr: &str) -> Result<Value> {
        self.scene.get(self.handle, attr)
    }

    fn apply(mut self, attr: &str, value: Value) -> Self {
        if let Err(err) = self.set(attr, &value) {
            log::warn!("Ignoring {attr} on {:?}: {err}", self.handle);
        }
        self
    }

    fn read_f32(&self, attr: &str) -> Option<f32> {
        self.get(attr).ok()?.as_f64().map(|v| v as f32)
    }

    fn read_rgb(&self, attr: &str) -> Option<Vec3> {
        let v = self.get(attr).ok()?;
        let channel = |c: &str| v.get(c).and_then(Value::as_f64).map(|x| x as f32);
        Some(Vec3::new(channel("r")?, channel("g")?, channel("b")?))
    }

    // -- Transforms --

    /// Rotation angle in degrees (`rotate`).
    #[inline]
    pub fn set_angle(self, degrees: f32) -> Self {
        self.apply("angle", json!(degrees))
    }

    /// Adds to the rotation angle (`rotate`).
    #[inline]
    pub fn inc_angle(self, degrees: f32) -> Self {
        self.apply("incAngle", json!(degrees))
    }

    /// Sets all three components (`rotate` axis, `translate`, `scale`).
    #[inline]
    pub fn set_xyz(self, v: Vec3) -> Self {
        self.apply("xyz", json!({ "x": v.x, "y": v.y, "z": v.z }))
    }

    /// Column-major elements (`matrix`).
    #[inline]
    pub fn set_elements(self, elements: [f32; 16]) -> Self {
        self.apply("elements", json!(elements))
    }

    /// World = local × parent from now on.
    #[inline]
    pub fn set_mult_order_pre(self) -> Self {
        self.apply("multOrder", json!("pre"))
    }

    /// World = parent × local from now on.
    #[inline]
    pub fn set_mult_order_post(self) -> Self {
        self.apply("multOrder", json!("post"))
    }

    #[must_use]
    pub fn get_angle(&self) -> Option<f32> {
        self.read_f32("angle")
    }

    // -- Material --

    #[inline]
    pub fn set_base_color(self, rgb: Vec3) -> Self {
        self.apply("baseColor", json!({ "r": rgb.x, "g": rgb.y, "b": rgb.z }))
    }

    #[inline]
    pub fn set_specular_color(self, rgb: Vec3) -> Self {
        self.apply("specularColor", json!({ "r": rgb.x, "g": rgb.y, "b": rgb.z }))
    }

    #[inline]
    pub fn set_alpha(self, alpha: f32) -> Self {
        self.apply("alpha", json!(alpha))
    }

    #[inline]
    pub fn set_shine(self, shine: f32) -> Self {
        self.apply("shine", json!(shine))
    }

    #[inline]
    pub fn set_emit(self, emit: f32) -> Self {
        self.apply("emit", json!(emit))
    }

    #[must_use]
    pub fn get_base_color(&self) -> Option<Vec3> {
        self.read_rgb("baseColor")
    }

    #[must_use]
    pub fn get_alpha(&self) -> Option<f32> {
        self.read_f32("alpha")
    }

    // -- Draw list membership and order --

    /// `enable.enabled`, `layer.enabled` or a `flags` field of that name.
    #[inline]
    pub fn set_enabled(self, enabled: bool) -> Self {
        self.apply("enabled", json!(enabled))
    }

    /// `layer.priority` or `stage.priority`.
    #[inline]
    pub fn set_priority(self, priority: i64) -> Self {
        self.apply("priority", json!(priority))
    }

    #[inline]
    pub fn set_pickable(self, pickable: bool) -> Self {
        self.apply("pickable", json!(pickable))
    }

    #[inline]
    pub fn set_tag(self, tag: &str) -> Self {
        self.apply("tag", json!(tag))
    }

    /// Overlays fields onto a `flags` node.
    #[inline]
    pub fn set_flags(self, flags: Value) -> Self {
        self.apply("flags", flags)
    }

    #[must_use]
    pub fn get_enabled(&self) -> Option<bool> {
        self.get("enabled").ok()?.as_bool()
    }

    #[must_use]
    pub fn get_priority(&self) -> Option<i64> {
        self.get("priority").ok()?.as_i64()
    }

    // -- Shaders --

    /// Merges uniform values into a `shader` or `shaderParams` node.
    #[inline]
    pub fn set_params(self, params: Value) -> Self {
        self.apply("params", params)
    }

    // -- Region maps --

    /// Highlights the region of the given colour.
    #[inline]
    pub fn set_highlight_region(self, color: Vec3) -> Self {
        self.apply(
            "highlightRegion",
            json!({ "color": { "r": color.x, "g": color.y, "b": color.z } }),
        )
    }

    #[inline]
    pub fn clear_highlight_region(self) -> Self {
        self.apply("highlightRegion", Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_setters_round_trip() {
        let mut scene = Scene::from_json(&json!({
            "type": "scene",
            "nodes": [
                { "type": "material", "id": "m", "baseColor": { "r": 0.1, "g": 0.2, "b": 0.3 } },
                { "type": "rotate", "id": "r", "y": 1, "angle": 10 },
            ],
        }))
        .unwrap();
        let m = scene.node_by_id("m").unwrap();
        let r = scene.node_by_id("r").unwrap();

        scene.node(m).set_base_color(Vec3::new(1.0, 0.5, 0.0)).set_alpha(0.25);
        let node = scene.node(m);
        assert_eq!(node.get_base_color(), Some(Vec3::new(1.0, 0.5, 0.0)));
        assert_eq!(node.get_alpha(), Some(0.25));

        assert_eq!(scene.node(r).inc_angle(5.0).get_angle(), Some(15.0));
    }

    #[test]
    fn attributes_a_type_lacks_are_skipped() {
        let mut scene = Scene::from_json(&json!({
            "type": "scene",
            "nodes": [{ "type": "material", "id": "m", "alpha": 0.5 }],
        }))
        .unwrap();
        let m = scene.node_by_id("m").unwrap();
        let mut node = scene.node(m).set_priority(3).set_alpha(0.75);
        assert_eq!(node.get_alpha(), Some(0.75));
        assert!(node.set("priority", &json!(3)).is_err());
    }
}
