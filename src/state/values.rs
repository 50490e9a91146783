//! JSON-facing value helpers shared by the core payloads.
//!
//! Node configs describe colours as `{r, g, b}` and vectors as `{x, y, z}`.
//! Every channel is optional: a partial update keeps the prior value of the
//! channels it leaves out.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::{PrismError, Result};

/// A colour update with optional channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorPatch {
    pub r: Option<f32>,
    pub g: Option<f32>,
    pub b: Option<f32>,
}

impl ColorPatch {
    #[must_use]
    pub fn apply(self, prior: Vec3) -> Vec3 {
        Vec3::new(
            self.r.unwrap_or(prior.x),
            self.g.unwrap_or(prior.y),
            self.b.unwrap_or(prior.z),
        )
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        parse(value, "colour")
    }
}

/// A vector update with optional components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VecPatch {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
}

impl VecPatch {
    #[must_use]
    pub fn apply(self, prior: Vec3) -> Vec3 {
        Vec3::new(
            self.x.unwrap_or(prior.x),
            self.y.unwrap_or(prior.y),
            self.z.unwrap_or(prior.z),
        )
    }

    #[must_use]
    pub fn apply2(self, prior: Vec2) -> Vec2 {
        Vec2::new(self.x.unwrap_or(prior.x), self.y.unwrap_or(prior.y))
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        parse(value, "vector")
    }
}

#[must_use]
pub fn color_json(c: Vec3) -> Value {
    json!({ "r": c.x, "g": c.y, "b": c.z })
}

#[must_use]
pub fn vec_json(v: Vec3) -> Value {
    json!({ "x": v.x, "y": v.y, "z": v.z })
}

/// Deserializes `value` into `T`, reporting failures as illegal config.
pub fn parse<T: for<'de> Deserialize<'de>>(value: &Value, what: &str) -> Result<T> {
    T::deserialize(value).map_err(|e| PrismError::IllegalNodeConfig(format!("{what}: {e}")))
}

/// Reads a number, reporting anything else as illegal config.
pub fn number(value: &Value, what: &str) -> Result<f32> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| PrismError::IllegalNodeConfig(format!("{what}: expected a number, got {value}")))
}

pub fn boolean(value: &Value, what: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| PrismError::IllegalNodeConfig(format!("{what}: expected a boolean, got {value}")))
}

pub fn integer(value: &Value, what: &str) -> Result<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v as i64))
        .ok_or_else(|| PrismError::IllegalNodeConfig(format!("{what}: expected an integer, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_channels_keep_prior_values() {
        let patch = ColorPatch::from_json(&json!({ "g": 0.5 })).unwrap();
        assert_eq!(patch.apply(Vec3::new(1.0, 1.0, 1.0)), Vec3::new(1.0, 0.5, 1.0));
    }

    #[test]
    fn wrong_types_are_illegal_config() {
        assert!(matches!(
            ColorPatch::from_json(&json!({ "r": "red" })),
            Err(PrismError::IllegalNodeConfig(_))
        ));
        assert!(number(&json!("1"), "angle").is_err());
    }
}
