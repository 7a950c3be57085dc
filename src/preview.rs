//! Isolated preview renderer.
//!
//! The renderer observes the data store and mounts the active layout's
//! component into a fresh [`Frame`] for every new data snapshot. The host and
//! the capture pipeline read the current frame through a [`PreviewHandle`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::layout::{LayoutComponent, LayoutDefinition};
use crate::rendering::Frame;
use crate::store::DataObserver;
use crate::{Dimensions, LayoutData};

#[derive(Debug)]
struct PreviewState {
    frame: Frame,
    /// Snapshot the current frame was rendered from
    rendered_from: Option<Arc<LayoutData>>,
    render_count: u64,
    last_error: Option<String>,
}

/// Shared read side of the preview
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    state: Arc<Mutex<PreviewState>>,
}

impl PreviewHandle {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            state: Arc::new(Mutex::new(PreviewState {
                frame: Frame::empty(dimensions),
                rendered_from: None,
                render_count: 0,
                last_error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PreviewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current frame
    pub fn frame(&self) -> Frame {
        self.lock().frame.clone()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.lock().frame.dimensions()
    }

    /// Number of times a component has been rendered into this preview
    pub fn render_count(&self) -> u64 {
        self.lock().render_count
    }

    /// Error of the most recent render, if it failed
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// The frame if it shows `data`.
    ///
    /// Fails with the render error when the last render failed, or when the
    /// frame was rendered from some other snapshot.
    pub fn current_frame(&self, data: &Arc<LayoutData>) -> Result<Frame, String> {
        let state = self.lock();
        if let Some(error) = &state.last_error {
            return Err(error.clone());
        }
        match &state.rendered_from {
            Some(from) if Arc::ptr_eq(from, data) => Ok(state.frame.clone()),
            _ => Err("preview was not rendered from the current data".to_string()),
        }
    }

    /// Replace the frame with an empty one of `dimensions`, forgetting what it
    /// was rendered from. A detached preview stays detached.
    pub fn reset(&self, dimensions: Dimensions) {
        let mut state = self.lock();
        let detached = state.frame.is_detached();
        state.frame = Frame::empty(dimensions);
        if detached {
            state.frame.detach();
        }
        state.rendered_from = None;
        state.last_error = None;
    }

    /// Unmount the preview. Later renders are ignored and captures fail.
    pub fn detach(&self) {
        self.lock().frame.detach();
    }

    pub fn is_detached(&self) -> bool {
        self.lock().frame.is_detached()
    }
}

/// Renders one layout's component into the preview on every data change
pub struct PreviewRenderer {
    layout_id: String,
    component: Arc<dyn LayoutComponent>,
    dimensions: Dimensions,
    handle: PreviewHandle,
}

impl PreviewRenderer {
    pub fn new(layout: &LayoutDefinition, handle: PreviewHandle) -> Self {
        Self {
            layout_id: layout.id.clone(),
            component: Arc::clone(&layout.component),
            dimensions: layout.dimensions,
            handle,
        }
    }

    pub fn handle(&self) -> &PreviewHandle {
        &self.handle
    }
}

impl DataObserver for PreviewRenderer {
    fn data_changed(&mut self, data: &Arc<LayoutData>) {
        let mut state = self.handle.lock();
        if state.frame.is_detached() {
            debug!("preview detached, skipping render of {}", self.layout_id);
            return;
        }
        if state.rendered_from.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, data)) {
            return;
        }

        state.render_count += 1;
        match Frame::mount(self.component.as_ref(), data, self.dimensions) {
            Ok(frame) => {
                state.frame = frame;
                state.rendered_from = Some(Arc::clone(data));
                state.last_error = None;
            }
            Err(e) => {
                // the previous frame stays on screen
                warn!("layout {} failed to render: {}", self.layout_id, e);
                state.last_error = Some(e.to_string());
            }
        }
    }
}
