//! Error types for the preview editor

use thiserror::Error;

/// Result type alias for editor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving the editor
#[derive(Error, Debug)]
pub enum Error {
    /// Layout registry or field schema is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Snapshotting the preview failed
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// A layout component failed to produce markup
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// The asset-upload collaborator rejected the capture
    #[error("Upload failed: {0}")]
    UploadError(String),

    /// The operation is not allowed while an image is being generated
    #[error("Editor is busy generating an image")]
    Busy,

    /// The editor was closed and accepts no more work
    #[error("Editor is closed")]
    Closed,

    /// No field with this path exists in the active layout
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// The field exists but cannot be edited
    #[error("Field {path} cannot be edited: {reason}")]
    UnsupportedField { path: String, reason: String },

    /// A merge patch was not an object
    #[error("Patch must be an object, got {0}")]
    InvalidPatch(String),

    /// Template layout could not be built or rendered
    #[error("Template error: {0}")]
    TemplateError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the capture pipeline.
///
/// These are recoverable: the editor returns to idle and keeps all edits.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The preview surface has been unmounted
    #[error("Preview surface is detached")]
    Detached,

    /// Sub-resources did not finish loading in time
    #[error("Timed out after {timeout_ms}ms waiting for {pending} sub-resource(s)")]
    ResourceTimeout { timeout_ms: u64, pending: usize },

    /// A sub-resource failed to load or decode
    #[error("Failed to load {url}: {reason}")]
    ResourceFailed { url: String, reason: String },

    /// A sub-resource came from an origin the loader does not trust
    #[error("Resource {0} would taint the capture")]
    Tainted(String),

    /// Painting the surface failed
    #[error("Rasterization failed: {0}")]
    Rasterize(String),

    /// The bitmap could not be encoded
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

impl CaptureError {
    pub(crate) fn failed(url: &str, reason: impl std::fmt::Display) -> Self {
        CaptureError::ResourceFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
