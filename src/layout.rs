//! Layout registry and the active layout selector.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rendering::frame::StyleRoot;
use crate::resolver::{get_path, FieldPath};
use crate::schema::{validate_fields, FieldSpec};
use crate::{Dimensions, Error, LayoutData, Result};

/// Document the editor was opened from. Read-only input to `prepare`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Look up a dotted path; `_id` resolves to the document id.
    pub fn get(&self, path: &str) -> Option<Value> {
        if path == "_id" {
            return Some(Value::String(self.id.clone()));
        }
        let path = FieldPath::parse(path);
        let (first, rest) = path.segments().split_first()?;
        let head = self.fields.get(first)?;
        let rest = FieldPath::parse(&rest.join("."));
        get_path(head, &rest).cloned()
    }
}

/// Visual part of a layout: turns layout data into markup for the preview frame.
///
/// Styles must be injected through `head`, which belongs to the isolated
/// frame, never to the host.
pub trait LayoutComponent: Send + Sync {
    fn render(&self, data: &LayoutData, head: &mut StyleRoot) -> Result<String>;
}

impl<F> LayoutComponent for F
where
    F: Fn(&LayoutData, &mut StyleRoot) -> Result<String> + Send + Sync,
{
    fn render(&self, data: &LayoutData, head: &mut StyleRoot) -> Result<String> {
        self(data, head)
    }
}

/// Extraction from the source document to a layout's initial data
pub type PrepareFn = Arc<dyn Fn(&SourceDocument) -> LayoutData + Send + Sync>;

/// A pre-built visual template supplied by the integrator
#[derive(Clone)]
pub struct LayoutDefinition {
    pub id: String,
    pub title: String,
    pub component: Arc<dyn LayoutComponent>,
    pub prepare: PrepareFn,
    pub fields: Vec<FieldSpec>,
    pub dimensions: Dimensions,
}

impl LayoutDefinition {
    pub fn new<C, P>(id: impl Into<String>, component: C, prepare: P) -> Self
    where
        C: LayoutComponent + 'static,
        P: Fn(&SourceDocument) -> LayoutData + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            component: Arc::new(component),
            prepare: Arc::new(prepare),
            fields: Vec::new(),
            dimensions: Dimensions::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields = fields;
        self
    }

    /// Zero axes fall back to the default size
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Dimensions::new(width, height);
        self
    }

    /// Initial data for `document`; always an object.
    pub fn prepare(&self, document: &SourceDocument) -> LayoutData {
        match (self.prepare)(document) {
            data @ Value::Object(_) => data,
            Value::Null => Value::Object(Map::new()),
            other => {
                debug!("layout {} prepared a non-object value, wrapping it", self.id);
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Value::Object(map)
            }
        }
    }
}

impl fmt::Debug for LayoutDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutDefinition")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("fields", &self.fields)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

/// Tracks which layout of the registry is active
#[derive(Debug, Clone)]
pub struct LayoutSelector {
    layouts: Arc<[LayoutDefinition]>,
    active: usize,
    disabled: bool,
}

impl LayoutSelector {
    /// Validate the registry and start on its first layout.
    pub fn new(layouts: impl Into<Arc<[LayoutDefinition]>>) -> Result<Self> {
        let layouts = layouts.into();
        if layouts.is_empty() {
            return Err(Error::InvalidConfiguration(
                "at least one layout is required".into(),
            ));
        }

        let mut ids = HashSet::new();
        for layout in layouts.iter() {
            if !ids.insert(layout.id.as_str()) {
                return Err(Error::InvalidConfiguration(format!(
                    "duplicate layout id {:?}",
                    layout.id
                )));
            }
            validate_fields(&layout.fields).map_err(|e| match e {
                Error::InvalidConfiguration(msg) => {
                    Error::InvalidConfiguration(format!("layout {:?}: {}", layout.id, msg))
                }
                other => other,
            })?;
        }

        Ok(Self {
            layouts,
            active: 0,
            disabled: false,
        })
    }

    pub fn layouts(&self) -> &[LayoutDefinition] {
        &self.layouts
    }

    pub fn active(&self) -> &LayoutDefinition {
        &self.layouts[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Make the layout with `id` active.
    ///
    /// Returns the newly active layout, or `None` when the id is unknown or
    /// the selector is disabled. Neither case is an error.
    pub fn select(&mut self, id: &str) -> Option<&LayoutDefinition> {
        if self.disabled {
            debug!("ignoring layout switch to {:?} while disabled", id);
            return None;
        }
        let Some(index) = self.layouts.iter().position(|l| l.id == id) else {
            debug!("ignoring unknown layout {:?}", id);
            return None;
        };
        self.active = index;
        Some(&self.layouts[index])
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}
