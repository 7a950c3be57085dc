//! Field schema resolution.
//!
//! Turns a layout's schema plus the current data into [`FieldDirective`]s,
//! the contract handed to widget renderers. Resolution is a pure transform:
//! directives hold a copy of the value they were resolved against and every
//! setter returns a new data object instead of mutating one.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::{FieldKind, FieldSpec};
use crate::LayoutData;

/// Dotted path from the data root to a field, e.g. `author.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::parse(path)
    }
}

/// Resolved render instruction for one schema node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "directive", rename_all = "lowercase")]
pub enum FieldDirective {
    /// A primitive the widget renderer can edit
    Editable {
        path: FieldPath,
        spec: FieldSpec,
        value: Value,
    },
    /// An object field; each nested field is its own directive
    Group {
        path: FieldPath,
        spec: FieldSpec,
        children: Vec<FieldDirective>,
    },
    /// A field that can't be edited; only the reason is offered
    Unsupported {
        path: FieldPath,
        spec: FieldSpec,
        reason: String,
    },
}

impl FieldDirective {
    pub fn path(&self) -> &FieldPath {
        match self {
            FieldDirective::Editable { path, .. }
            | FieldDirective::Group { path, .. }
            | FieldDirective::Unsupported { path, .. } => path,
        }
    }

    pub fn spec(&self) -> &FieldSpec {
        match self {
            FieldDirective::Editable { spec, .. }
            | FieldDirective::Group { spec, .. }
            | FieldDirective::Unsupported { spec, .. } => spec,
        }
    }

    /// Current value of a primitive field
    pub fn value(&self) -> Option<&Value> {
        match self {
            FieldDirective::Editable { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_editable(&self) -> bool {
        !matches!(self, FieldDirective::Unsupported { .. })
    }

    /// Patch that writes `value` at this field's path.
    ///
    /// `None` for unsupported fields, which offer no setter.
    pub fn patch(&self, value: Value) -> Option<Value> {
        if !self.is_editable() {
            return None;
        }
        Some(patch_at(self.path(), value))
    }

    /// New data object with `value` merged in at this field's path.
    ///
    /// Everything outside the path is left as it was. For object fields the
    /// value is deep-merged so sibling keys of the object survive.
    pub fn set_value(&self, data: &LayoutData, value: Value) -> Option<LayoutData> {
        self.patch(value).map(|patch| deep_merge(data, &patch))
    }

    /// Find the directive for `path` in this subtree
    pub fn find(&self, path: &FieldPath) -> Option<&FieldDirective> {
        if self.path() == path {
            return Some(self);
        }
        match self {
            FieldDirective::Group { children, .. } => find_directive(children, path),
            _ => None,
        }
    }
}

/// Find the directive for `path` among resolved top-level directives
pub fn find_directive<'a>(directives: &'a [FieldDirective], path: &FieldPath) -> Option<&'a FieldDirective> {
    directives.iter().find_map(|d| d.find(path))
}

/// Resolve a schema against the current data, one directive per spec.
pub fn resolve_fields(fields: &[FieldSpec], data: &LayoutData) -> Vec<FieldDirective> {
    resolve_level(fields, data, &FieldPath::root())
}

fn resolve_level(fields: &[FieldSpec], data: &Value, parent: &FieldPath) -> Vec<FieldDirective> {
    fields
        .iter()
        .map(|spec| {
            let path = parent.child(&spec.name);
            let value = data.get(&spec.name).unwrap_or(&Value::Null);
            match spec.kind {
                FieldKind::Object => FieldDirective::Group {
                    children: resolve_level(spec.children(), value, &path),
                    path,
                    spec: spec.clone(),
                },
                FieldKind::Image | FieldKind::Array => FieldDirective::Unsupported {
                    reason: spec.unsupported_reason().unwrap_or_default(),
                    path,
                    spec: spec.clone(),
                },
                FieldKind::String | FieldKind::Text | FieldKind::Number | FieldKind::Boolean => {
                    FieldDirective::Editable {
                        path,
                        spec: spec.clone(),
                        value: value.clone(),
                    }
                }
            }
        })
        .collect()
}

/// Recursively merge `patch` into `base`.
///
/// Objects merge key by key; any other patch value (arrays included)
/// replaces what was there.
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in patch_map {
                let next = match base_map.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, other) => other.clone(),
    }
}

/// Nested object that holds `value` at `path`: `a.b` -> `{"a": {"b": value}}`
pub fn patch_at(path: &FieldPath, value: Value) -> Value {
    path.segments().iter().rev().fold(value, |inner, key| {
        let mut map = Map::new();
        map.insert(key.clone(), inner);
        Value::Object(map)
    })
}

/// Read the value at `path`
pub fn get_path<'a>(data: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(data, |current, key| current.get(key.as_str()))
}

/// Write `value` at `path`, creating intermediate objects as needed.
pub fn set_path(data: &mut Value, path: &FieldPath, value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        *data = value;
        return;
    };
    let mut current = data;
    for key in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
            _ => return,
        };
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}
