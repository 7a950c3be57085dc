//! ogframe: layout-driven social preview image editor
//!
//! An editor picks one of several predefined layouts, fills in a small
//! schema-driven form and exports a rendered snapshot of the layout as a PNG
//! asset.
//!
//! # Features
//!
//! - **Schema-driven forms**: layouts declare their editable fields; the
//!   resolver turns them into widget directives
//! - **Isolated preview**: layout markup and styles live in their own frame
//!   document, never in the host
//! - **Deterministic capture**: frames are laid out and rasterized in-process
//!   at exactly the layout's pixel size
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ogframe::{Editor, EditorOptions, LayoutDefinition, SourceDocument, StyleRoot};
//! use ogframe::capture::DataUriLoader;
//! use ogframe::editor::upload::MemoryUploader;
//! use ogframe::schema::FieldSpec;
//! use serde_json::json;
//!
//! # async fn run() -> ogframe::Result<()> {
//! let card = LayoutDefinition::new(
//!     "card",
//!     |data: &ogframe::LayoutData, _head: &mut StyleRoot| -> ogframe::Result<String> {
//!         Ok(format!("<h1>{}</h1>", data["title"].as_str().unwrap_or_default()))
//!     },
//!     |doc: &SourceDocument| json!({ "title": doc.get("title") }),
//! )
//! .with_fields(vec![FieldSpec::string("title", "Title")]);
//!
//! let document = SourceDocument::new("post-1").with_field("title", json!("Hello"));
//! let mut editor = Editor::new(
//!     vec![card],
//!     document,
//!     EditorOptions::default(),
//!     Arc::new(DataUriLoader),
//!     Arc::new(MemoryUploader::new()),
//! )?;
//! editor.edit("title", json!("Hello, world"))?;
//! let asset = editor.generate().await?;
//! println!("uploaded {}", asset.id);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{CaptureError, Error, Result};

pub mod schema;
pub mod resolver;
pub mod layout;
pub mod store;
pub mod preview;
pub mod rendering;
pub mod capture;
pub mod editor;
pub mod template;

pub use capture::{CaptureConfig, CapturePipeline, ResourceLoader};
pub use editor::upload::{AssetUploader, UploadedAsset};
pub use editor::{Editor, EditorEvent, EditorHost, EditorOptions, EditorState};
pub use layout::{LayoutComponent, LayoutDefinition, LayoutSelector, SourceDocument};
pub use rendering::{CaptureResult, Frame, StyleRoot};
pub use resolver::{FieldDirective, FieldPath};
pub use schema::{FieldKind, FieldSpec};
pub use store::LayoutDataStore;

/// Editable data of a layout. Always a JSON object.
pub type LayoutData = serde_json::Value;

/// Configuration shared by the editor and the capture pipeline
///
/// # Examples
///
/// ```
/// let cfg = ogframe::EditorConfig::default();
/// assert_eq!(cfg.default_dimensions.width, 1200);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Upper bound on waiting for images and fonts before a capture, in milliseconds
    pub resource_timeout_ms: u64,
    /// Size of template layouts that do not declare their own
    pub default_dimensions: Dimensions,
    /// Canvas colour behind the layout (any CSS colour)
    pub background: String,
    /// Advance width per character, in em, when no font is loaded
    pub fallback_advance_em: f32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            resource_timeout_ms: 10_000,
            default_dimensions: Dimensions::default(),
            background: "#ffffff".to_string(),
            fallback_advance_em: 0.55,
        }
    }
}

/// Pixel size of a layout's output image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const DEFAULT_WIDTH: u32 = 1200;
    pub const DEFAULT_HEIGHT: u32 = 630;

    /// Dimensions with zero axes replaced by the defaults
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: if width == 0 { Self::DEFAULT_WIDTH } else { width },
            height: if height == 0 { Self::DEFAULT_HEIGHT } else { height },
        }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
        }
    }
}

/// Texts of the host dialog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogLabels {
    pub title: Option<String>,
    pub finish_cta: Option<String>,
    pub aria_close: Option<String>,
}

impl DialogLabels {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Create image")
    }

    pub fn finish_cta(&self) -> &str {
        self.finish_cta.as_deref().unwrap_or("Generate")
    }

    pub fn aria_close(&self) -> &str {
        self.aria_close.as_deref().unwrap_or("close")
    }

    /// Copy with every missing label filled in
    pub fn resolved(&self) -> DialogLabels {
        DialogLabels {
            title: Some(self.title().to_string()),
            finish_cta: Some(self.finish_cta().to_string()),
            aria_close: Some(self.aria_close().to_string()),
        }
    }
}
