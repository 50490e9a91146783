//! Engine Settings
//!
//! [`EngineConfig`] collects the knobs an [`Engine`](crate::Engine) is built
//! with. Every field has a default, so a config file only names what it
//! changes:
//!
//! ```rust,ignore
//! use prism::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "width": 640, "transparent": true }"#)?;
//! assert_eq!(config.height, EngineConfig::default().height);
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::display::PickBufferPolicy;
use crate::errors::{PrismError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Drawing buffer width in pixels.
    pub width: u32,
    /// Drawing buffer height in pixels.
    pub height: u32,
    /// Clear to transparent black instead of the ambient colour.
    pub transparent: bool,
    pub pick_buffer: PickBufferPolicy,
    /// Writes every generated shader here when set.
    pub shader_dump_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            transparent: false,
            pick_buffer: PickBufferPolicy::Keep,
            shader_dump_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// A drawing buffer without area has nothing to render into.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PrismError::CanvasNotFound(format!(
                "drawing buffer is {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "width": 640, "pickBuffer": "release" }"#).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 600);
        assert_eq!(config.pick_buffer, PickBufferPolicy::Release);
        assert!(!config.transparent);
    }

    #[test]
    fn zero_sized_canvas_is_rejected() {
        let err = EngineConfig::from_json(r#"{ "height": 0 }"#).unwrap_err();
        assert!(matches!(err, PrismError::CanvasNotFound(_)));
    }
}
