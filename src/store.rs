//! Layout data store.
//!
//! Owns the editable data object of the active layout. Every mutation swaps
//! in a new `Arc`, so observers can tell a change apart by identity, and
//! pushes the new snapshot to the single registered observer.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::resolver::deep_merge;
use crate::{Error, LayoutData, Result};

/// Receives every new data snapshot. At most one is registered at a time.
pub trait DataObserver: Send {
    fn data_changed(&mut self, data: &Arc<LayoutData>);
}

/// Holder of the editable data for the active layout
pub struct LayoutDataStore {
    data: Arc<LayoutData>,
    revision: u64,
    observer: Option<Box<dyn DataObserver>>,
}

impl LayoutDataStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(Value::Object(Default::default())),
            revision: 0,
            observer: None,
        }
    }

    /// Register the observer, replacing any previous one.
    ///
    /// The observer is immediately handed the current snapshot.
    pub fn set_observer(&mut self, mut observer: Box<dyn DataObserver>) {
        observer.data_changed(&self.data);
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) -> Option<Box<dyn DataObserver>> {
        self.observer.take()
    }

    /// Replace the whole object
    pub fn seed(&mut self, data: LayoutData) -> Result<()> {
        if !data.is_object() {
            return Err(Error::InvalidPatch(kind_of(&data).into()));
        }
        self.replace(data);
        Ok(())
    }

    /// Deep-merge `patch` into the current object.
    ///
    /// Keys not named in the patch are kept as they were.
    pub fn merge(&mut self, patch: &Value) -> Result<()> {
        if !patch.is_object() {
            return Err(Error::InvalidPatch(kind_of(patch).into()));
        }
        let merged = deep_merge(&self.data, patch);
        self.replace(merged);
        Ok(())
    }

    /// Live snapshot for render consumption
    pub fn current(&self) -> Arc<LayoutData> {
        Arc::clone(&self.data)
    }

    /// Number of mutations applied so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn replace(&mut self, data: LayoutData) {
        self.data = Arc::new(data);
        self.revision += 1;
        debug!("layout data revision {}", self.revision);
        if let Some(observer) = self.observer.as_mut() {
            observer.data_changed(&self.data);
        }
    }
}

impl Default for LayoutDataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
