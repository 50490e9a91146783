//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`PrismError`] covers all failure modes including:
//! - Graphics context setup and loss
//! - Shader compilation and link failures
//! - Node configuration errors raised while building the scene graph
//! - Asynchronous load failures
//!
//! Every variant maps to an [`ErrorCode`]. Fatal errors are additionally
//! published on the event bus as an [`ErrorReport`], the structured
//! `{ error_name, code, exception, fatal }` record consumers subscribe to.
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism::errors::{PrismError, Result};
//!
//! fn build() -> Result<()> {
//!     Err(PrismError::IllegalNodeConfig("rotate axis is zero".into()))
//! }
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::gpu::GpuError;

/// The main error type for the Prism engine.
#[derive(Error, Debug)]
pub enum PrismError {
    // ========================================================================
    // Graphics Context Errors
    // ========================================================================
    /// The graphics context could not be created or lacks a required feature.
    #[error("Graphics context not supported: {0}")]
    ContextNotSupported(String),

    /// The drawing surface is missing or has no area.
    #[error("Canvas not found: {0}")]
    CanvasNotFound(String),

    /// The graphics context was lost. Rendering is suspended until restore.
    #[error("Graphics context lost")]
    ContextLost,

    /// A GPU allocation failed.
    #[error("Out of video memory: {0}")]
    OutOfVram(String),

    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// A generated or custom shader stage failed to compile.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Compiled shader stages failed to link.
    #[error("Shader link failed: {0}")]
    ShaderLink(String),

    /// A shader template could not be rendered.
    #[error("Shader template error: {0}")]
    Template(#[from] minijinja::Error),

    // ========================================================================
    // Scene Configuration Errors
    // ========================================================================
    /// A node configuration object was expected but something else was given.
    #[error("Node config expected: {0}")]
    NodeConfigExpected(String),

    /// A node configuration carries a missing, malformed or illegal value.
    #[error("Illegal node config: {0}")]
    IllegalNodeConfig(String),

    /// No node is registered under the given ID or handle.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No node type is registered under the given name.
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// A node ID is already used by another node in the scene.
    #[error("Node ID already in use: {0}")]
    IdClash(String),

    /// A state stack was popped more often than it was pushed.
    #[error("State stack underflow: {0}")]
    StackUnderflow(&'static str),

    // ========================================================================
    // Asset Loading Errors
    // ========================================================================
    /// An asynchronous load reported failure.
    #[error("Load failed for node '{node}': {reason}")]
    LoadFailed {
        /// ID of the node that requested the load
        node: String,
        /// Reason given by the loader
        reason: String,
    },

    // ========================================================================
    // Format & Parsing Errors
    // ========================================================================
    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Named error codes, one per failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    WebglNotSupported,
    CanvasNotFound,
    ContextLost,
    OutOfVram,
    ShaderCompilationFailure,
    ShaderLinkFailure,
    NodeConfigExpected,
    IllegalNodeConfig,
    NodeNotFound,
    NodeTypeUnknown,
    IdClash,
    StackUnderflow,
    LoadFailed,
    Error,
}

impl ErrorCode {
    /// Upper-case name used in reports and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::WebglNotSupported => "WEBGL_NOT_SUPPORTED",
            Self::CanvasNotFound => "CANVAS_NOT_FOUND",
            Self::ContextLost => "WEBGL_CONTEXT_LOST",
            Self::OutOfVram => "OUT_OF_VRAM",
            Self::ShaderCompilationFailure => "SHADER_COMPILATION_FAILURE",
            Self::ShaderLinkFailure => "SHADER_LINK_FAILURE",
            Self::NodeConfigExpected => "NODE_CONFIG_EXPECTED",
            Self::IllegalNodeConfig => "ILLEGAL_NODE_CONFIG",
            Self::NodeNotFound => "NODE_NOT_FOUND",
            Self::NodeTypeUnknown => "NODE_TYPE_UNKNOWN",
            Self::IdClash => "ID_CLASH",
            Self::StackUnderflow => "STACK_UNDERFLOW",
            Self::LoadFailed => "LOAD_FAILED",
            Self::Error => "ERROR",
        }
    }
}

/// Structured error record published through the event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub error_name: &'static str,
    pub code: ErrorCode,
    pub exception: String,
    pub fatal: bool,
}

impl PrismError {
    /// Maps this error onto its [`ErrorCode`].
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ContextNotSupported(_) => ErrorCode::WebglNotSupported,
            Self::CanvasNotFound(_) => ErrorCode::CanvasNotFound,
            Self::ContextLost => ErrorCode::ContextLost,
            Self::OutOfVram(_) => ErrorCode::OutOfVram,
            Self::ShaderCompilation(_) => ErrorCode::ShaderCompilationFailure,
            Self::ShaderLink(_) => ErrorCode::ShaderLinkFailure,
            Self::NodeConfigExpected(_) => ErrorCode::NodeConfigExpected,
            Self::IllegalNodeConfig(_) | Self::Json(_) => ErrorCode::IllegalNodeConfig,
            Self::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Self::UnknownNodeType(_) => ErrorCode::NodeTypeUnknown,
            Self::IdClash(_) => ErrorCode::IdClash,
            Self::StackUnderflow(_) => ErrorCode::StackUnderflow,
            Self::LoadFailed { .. } => ErrorCode::LoadFailed,
            Self::Template(_) => ErrorCode::Error,
        }
    }

    /// Whether the error halts the current operation.
    ///
    /// Context loss is recovered by the restore path and load failures only
    /// leave their subtree absent; everything else is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ContextLost | Self::LoadFailed { .. })
    }

    /// Builds the structured report for this error.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        let code = self.code();
        ErrorReport {
            error_name: code.name(),
            code,
            exception: self.to_string(),
            fatal: self.is_fatal(),
        }
    }
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<GpuError> for PrismError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::ContextLost => Self::ContextLost,
            GpuError::Compile { stage, log } => Self::ShaderCompilation(format!("{stage}: {log}")),
            GpuError::Link(log) => Self::ShaderLink(log),
            GpuError::OutOfMemory(what) => Self::OutOfVram(what),
            GpuError::InvalidHandle(what) => Self::ContextNotSupported(what),
        }
    }
}

/// Alias for `Result<T, PrismError>`.
pub type Result<T, E = PrismError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal_with_named_codes() {
        let err = PrismError::IllegalNodeConfig("rotate axis is zero".into());
        let report = err.report();
        assert_eq!(report.code, ErrorCode::IllegalNodeConfig);
        assert_eq!(report.error_name, "ILLEGAL_NODE_CONFIG");
        assert!(report.fatal);
        assert!(report.exception.contains("rotate axis"));
    }

    #[test]
    fn context_loss_and_load_failure_are_recoverable() {
        assert!(!PrismError::ContextLost.is_fatal());
        let load = PrismError::LoadFailed {
            node: "tex".into(),
            reason: "404".into(),
        };
        assert!(!load.is_fatal());
        assert_eq!(load.code(), ErrorCode::LoadFailed);
    }

    #[test]
    fn gpu_errors_map_to_shader_codes() {
        let err: PrismError = GpuError::Compile {
            stage: "fragment",
            log: "syntax error".into(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ShaderCompilationFailure);
        let err: PrismError = GpuError::Link("varying mismatch".into()).into();
        assert_eq!(err.code(), ErrorCode::ShaderLinkFailure);
    }
}
