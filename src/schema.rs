//! Field schema attached to each layout.
//!
//! A schema is an ordered tree of [`FieldSpec`] nodes describing which keys of
//! the layout data can be edited and with what kind of control. Only object
//! fields may nest; images and arrays are described but cannot be edited.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kind of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Text,
    Number,
    Image,
    Object,
    Boolean,
    Array,
}

impl FieldKind {
    /// Whether a widget can edit values of this kind
    pub fn is_editable(self) -> bool {
        !matches!(self, FieldKind::Image | FieldKind::Array)
    }

    /// Reason shown to editors when no explicit one is configured.
    pub fn default_unsupported_reason(self) -> Option<&'static str> {
        match self {
            FieldKind::Image => Some("Images can't be edited here; change them in the document."),
            FieldKind::Array => Some("Lists can't be edited here; change them in the document."),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Text => "text",
            FieldKind::Number => "number",
            FieldKind::Image => "image",
            FieldKind::Object => "object",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
        }
    }
}

/// One node of a layout's field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Label shown next to the control
    pub title: String,
    /// Key into the layout data object
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nested schema, only for `object` fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSpec>>,
    /// Message shown instead of a control for kinds that can't be edited
    #[serde(default, rename = "unsupportedError", skip_serializing_if = "Option::is_none")]
    pub unsupported: Option<String>,
}

impl FieldSpec {
    pub fn new(kind: FieldKind, name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            name: name.into(),
            kind,
            description: None,
            fields: None,
            unsupported: None,
        }
    }

    pub fn string(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(FieldKind::String, name, title)
    }

    pub fn text(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(FieldKind::Text, name, title)
    }

    pub fn number(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(FieldKind::Number, name, title)
    }

    pub fn boolean(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(FieldKind::Boolean, name, title)
    }

    pub fn image(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(FieldKind::Image, name, title)
    }

    pub fn array(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(FieldKind::Array, name, title)
    }

    pub fn object(name: impl Into<String>, title: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            fields: Some(fields),
            ..Self::new(FieldKind::Object, name, title)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_unsupported(mut self, reason: impl Into<String>) -> Self {
        self.unsupported = Some(reason.into());
        self
    }

    /// Nested specs of an object field (empty for every other kind)
    pub fn children(&self) -> &[FieldSpec] {
        self.fields.as_deref().unwrap_or(&[])
    }

    /// Reason this field cannot be edited, if any.
    ///
    /// An explicit `unsupported` message wins over the per-kind default.
    pub fn unsupported_reason(&self) -> Option<String> {
        if self.kind.is_editable() {
            return None;
        }
        self.unsupported
            .clone()
            .or_else(|| self.kind.default_unsupported_reason().map(str::to_string))
    }
}

/// Check a schema tree against the object/nested invariant.
///
/// Object fields need a non-empty nested schema, every other kind must not
/// carry one. Names must be non-empty, free of `.` and unique among siblings.
pub fn validate_fields(fields: &[FieldSpec]) -> Result<()> {
    validate_level(fields, "")
}

fn validate_level(fields: &[FieldSpec], parent: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in fields {
        let path = if parent.is_empty() {
            spec.name.clone()
        } else {
            format!("{}.{}", parent, spec.name)
        };

        if spec.name.trim().is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "field {:?} under {:?} has an empty name",
                spec.title, parent
            )));
        }
        if spec.name.contains('.') {
            return Err(Error::InvalidConfiguration(format!(
                "field name {:?} must not contain '.'",
                path
            )));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(Error::InvalidConfiguration(format!("duplicate field {:?}", path)));
        }

        match (spec.kind, spec.fields.as_ref()) {
            (FieldKind::Object, Some(nested)) if !nested.is_empty() => {
                validate_level(nested, &path)?;
            }
            (FieldKind::Object, _) => {
                return Err(Error::InvalidConfiguration(format!(
                    "object field {:?} needs a non-empty `fields` list",
                    path
                )));
            }
            (kind, Some(_)) => {
                return Err(Error::InvalidConfiguration(format!(
                    "{} field {:?} must not declare nested fields",
                    kind.as_str(),
                    path
                )));
            }
            (_, None) => {}
        }
    }
    Ok(())
}
