//! Editor orchestrator.
//!
//! Ties the layout selector, the data store, the preview and the capture
//! pipeline together and drives the generate/close lifecycle for the host.

pub mod upload;

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use crate::capture::{CaptureConfig, CapturePipeline, ResourceLoader};
use crate::layout::{LayoutDefinition, LayoutSelector, SourceDocument};
use crate::preview::{PreviewHandle, PreviewRenderer};
use crate::rendering::Frame;
use crate::resolver::{find_directive, resolve_fields, FieldDirective, FieldPath};
use crate::store::LayoutDataStore;
use crate::{DialogLabels, EditorConfig, Error, LayoutData, Result};

use upload::{AssetUploader, UploadedAsset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    /// Accepting edits; generate and close are available
    Idle,
    /// A capture or upload is in flight; the editor is read-only
    Generating,
}

/// Lifecycle notifications for the host dialog
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    StateChanged(EditorState),
    Generated(UploadedAsset),
    Failed(String),
    Closed,
}

/// Receives editor events
pub trait EditorHost: Send {
    fn on_event(&mut self, event: &EditorEvent);
}

impl<F> EditorHost for F
where
    F: FnMut(&EditorEvent) + Send,
{
    fn on_event(&mut self, event: &EditorEvent) {
        self(event)
    }
}

pub type CloseFn = Box<dyn FnMut() + Send>;
pub type SelectFn = Box<dyn FnMut(&UploadedAsset) + Send>;

/// Host-supplied settings and callbacks
#[derive(Default)]
pub struct EditorOptions {
    pub config: EditorConfig,
    pub labels: DialogLabels,
    /// Font for text whose family has no `@font-face`. DejaVu Sans when unset.
    pub default_font: Option<Vec<u8>>,
    /// Called when the dialog is closed
    pub on_close: Option<CloseFn>,
    /// Called with every uploaded asset
    pub on_select: Option<SelectFn>,
    pub host: Option<Box<dyn EditorHost>>,
}

impl fmt::Debug for EditorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorOptions")
            .field("config", &self.config)
            .field("labels", &self.labels)
            .field("default_font", &self.default_font.as_ref().map(Vec::len))
            .field("on_close", &self.on_close.is_some())
            .field("on_select", &self.on_select.is_some())
            .field("host", &self.host.is_some())
            .finish()
    }
}

fn emit(host: &mut Option<Box<dyn EditorHost>>, event: EditorEvent) {
    debug!("editor event: {:?}", event);
    if let Some(host) = host.as_mut() {
        host.on_event(&event);
    }
}

/// Holds the editor in `Generating` and puts it back to `Idle` when dropped,
/// including when the generate future is dropped half way.
struct GenerateGuard<'a> {
    state: &'a mut EditorState,
    selector: &'a mut LayoutSelector,
    host: &'a mut Option<Box<dyn EditorHost>>,
}

impl<'a> GenerateGuard<'a> {
    fn enter(
        state: &'a mut EditorState,
        selector: &'a mut LayoutSelector,
        host: &'a mut Option<Box<dyn EditorHost>>,
    ) -> Self {
        *state = EditorState::Generating;
        selector.set_disabled(true);
        emit(host, EditorEvent::StateChanged(EditorState::Generating));
        Self { state, selector, host }
    }

    /// Report the outcome; `Idle` follows on drop.
    fn finish(self, outcome: &Result<UploadedAsset>) {
        let event = match outcome {
            Ok(asset) => EditorEvent::Generated(asset.clone()),
            Err(e) => EditorEvent::Failed(e.to_string()),
        };
        emit(&mut *self.host, event);
    }
}

impl Drop for GenerateGuard<'_> {
    fn drop(&mut self) {
        if *self.state == EditorState::Generating {
            *self.state = EditorState::Idle;
            self.selector.set_disabled(false);
            emit(&mut *self.host, EditorEvent::StateChanged(EditorState::Idle));
        }
    }
}

/// A preview image editor session for one source document
pub struct Editor {
    selector: LayoutSelector,
    document: SourceDocument,
    store: LayoutDataStore,
    preview: PreviewHandle,
    pipeline: CapturePipeline,
    uploader: Arc<dyn AssetUploader>,
    labels: DialogLabels,
    state: EditorState,
    closed: bool,
    host: Option<Box<dyn EditorHost>>,
    on_close: Option<CloseFn>,
    on_select: Option<SelectFn>,
}

impl Editor {
    /// Validate the layouts, seed the store from the first one and mount
    /// the preview.
    pub fn new(
        layouts: Vec<LayoutDefinition>,
        document: SourceDocument,
        options: EditorOptions,
        loader: Arc<dyn ResourceLoader>,
        uploader: Arc<dyn AssetUploader>,
    ) -> Result<Self> {
        let selector = LayoutSelector::new(layouts)?;
        let mut pipeline = CapturePipeline::new(loader, CaptureConfig::try_from(&options.config)?);
        if let Some(font) = options.default_font {
            pipeline = pipeline.with_default_font(font)?;
        }

        let active = selector.active();
        let preview = PreviewHandle::new(active.dimensions);
        let mut store = LayoutDataStore::new();
        store.seed(active.prepare(&document))?;
        store.set_observer(Box::new(PreviewRenderer::new(active, preview.clone())));
        info!(
            "editor opened for {} with layout {} ({} layout(s))",
            document.id,
            active.id,
            selector.layouts().len()
        );

        Ok(Self {
            selector,
            document,
            store,
            preview,
            pipeline,
            uploader,
            labels: options.labels,
            state: EditorState::Idle,
            closed: false,
            host: options.host,
            on_close: options.on_close,
            on_select: options.on_select,
        })
    }

    pub fn state(&self) -> EditorState {
        self.state
    }

    /// Whether the host should enable its generate action
    pub fn generate_enabled(&self) -> bool {
        self.state == EditorState::Idle && !self.closed
    }

    /// Whether the host should offer a close affordance
    pub fn can_close(&self) -> bool {
        self.state == EditorState::Idle && !self.closed
    }

    /// Dialog labels with defaults applied
    pub fn labels(&self) -> DialogLabels {
        self.labels.resolved()
    }

    pub fn document(&self) -> &SourceDocument {
        &self.document
    }

    pub fn layouts(&self) -> &[LayoutDefinition] {
        self.selector.layouts()
    }

    pub fn active_layout(&self) -> &LayoutDefinition {
        self.selector.active()
    }

    /// Current data snapshot
    pub fn data(&self) -> Arc<LayoutData> {
        self.store.current()
    }

    /// Copy of the frame currently shown in the preview
    pub fn frame(&self) -> Frame {
        self.preview.frame()
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    /// Form directives of the active layout for the current data
    pub fn directives(&self) -> Vec<FieldDirective> {
        resolve_fields(&self.selector.active().fields, &self.store.current())
    }

    /// Set the field at dotted `path` to `value`.
    pub fn edit(&mut self, path: &str, value: Value) -> Result<()> {
        if self.state == EditorState::Generating {
            return Err(Error::Busy);
        }
        let field = FieldPath::parse(path);
        let directives = self.directives();
        let patch = match find_directive(&directives, &field) {
            None => return Err(Error::UnknownField(path.to_string())),
            Some(FieldDirective::Unsupported { reason, .. }) => {
                return Err(Error::UnsupportedField {
                    path: path.to_string(),
                    reason: reason.clone(),
                })
            }
            Some(FieldDirective::Group { .. }) if !value.is_object() => {
                return Err(Error::InvalidPatch(format!("non-object value for group {}", path)));
            }
            Some(directive) => directive.patch(value),
        };
        let Some(patch) = patch else {
            return Err(Error::UnknownField(path.to_string()));
        };
        self.store.merge(&patch)
    }

    /// Switch to the layout with `id` and re-seed its data from the document.
    ///
    /// Unknown ids are a no-op and return `Ok(false)`. Edits made under the
    /// previous layout are discarded.
    pub fn select_layout(&mut self, id: &str) -> Result<bool> {
        if self.state == EditorState::Generating {
            return Err(Error::Busy);
        }
        let Some(layout) = self.selector.select(id) else {
            return Ok(false);
        };
        let data = layout.prepare(&self.document);
        let renderer = PreviewRenderer::new(layout, self.preview.clone());

        // the old layout's frame must not outlive the switch
        self.preview.reset(layout.dimensions);
        // the new component must never see the old layout's data
        self.store.clear_observer();
        self.store.seed(data)?;
        self.store.set_observer(Box::new(renderer));
        info!("switched to layout {}", id);
        Ok(true)
    }

    /// Capture the preview, upload it and report the asset.
    ///
    /// The editor is read-only until this returns. On failure all edits are
    /// kept and the editor is ready to try again. A preview that failed to
    /// render the current data is reported as a failure, never captured.
    pub async fn generate(&mut self) -> Result<UploadedAsset> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.state == EditorState::Generating {
            return Err(Error::Busy);
        }
        let dimensions = self.selector.active().dimensions;
        let data = self.store.current();
        info!(
            "generating {} image ({}x{})",
            self.selector.active().id,
            dimensions.width,
            dimensions.height
        );

        let guard = GenerateGuard::enter(&mut self.state, &mut self.selector, &mut self.host);
        let outcome = match self.preview.current_frame(&data) {
            Ok(frame) => match self.pipeline.capture(&frame, dimensions).await {
                Ok(capture) => self.uploader.upload(capture).await,
                Err(e) => Err(e.into()),
            },
            Err(reason) => Err(Error::RenderError(format!("preview is not capturable ({})", reason))),
        };
        match &outcome {
            Ok(asset) => {
                if let Some(on_select) = self.on_select.as_mut() {
                    on_select(asset);
                }
            }
            Err(e) => warn!("generate failed: {}", e),
        }
        guard.finish(&outcome);
        outcome
    }

    /// Close the dialog. Refused while generating.
    pub fn close(&mut self) -> Result<()> {
        if self.state == EditorState::Generating {
            return Err(Error::Busy);
        }
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.preview.detach();
        if let Some(on_close) = self.on_close.as_mut() {
            on_close();
        }
        emit(&mut self.host, EditorEvent::Closed);
        Ok(())
    }
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("document", &self.document.id)
            .field("layout", &self.selector.active().id)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StaticLoader;
    use crate::rendering::StyleRoot;
    use crate::schema::FieldSpec;
    use crate::Dimensions;
    use serde_json::json;
    use std::sync::Mutex;
    use upload::MemoryUploader;

    fn card() -> LayoutDefinition {
        LayoutDefinition::new(
            "card",
            |data: &LayoutData, _: &mut StyleRoot| -> Result<String> {
                Ok(format!("<h1>{}</h1><img src=\"{}\">", data["title"].as_str().unwrap_or_default(), data["cover"].as_str().unwrap_or("")))
            },
            |doc: &SourceDocument| json!({"title": doc.get("title"), "author": {"name": doc.get("author.name")}}),
        )
        .with_fields(vec![
            FieldSpec::string("title", "Title"),
            FieldSpec::object("author", "Author", vec![FieldSpec::string("name", "Name")]),
            FieldSpec::image("cover", "Cover"),
        ])
        .with_dimensions(200, 100)
    }

    fn document() -> SourceDocument {
        SourceDocument::new("post-1")
            .with_field("title", json!("Hello"))
            .with_field("author", json!({"name": "Ada"}))
    }

    fn recorder() -> (Arc<Mutex<Vec<EditorEvent>>>, Box<dyn EditorHost>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let host = move |event: &EditorEvent| sink.lock().unwrap().push(event.clone());
        (events, Box::new(host))
    }

    fn editor(uploader: MemoryUploader, host: Option<Box<dyn EditorHost>>) -> Editor {
        let options = EditorOptions {
            host,
            ..EditorOptions::default()
        };
        Editor::new(vec![card()], document(), options, Arc::new(StaticLoader::new()), Arc::new(uploader)).unwrap()
    }

    #[test]
    fn new_seeds_and_mounts_preview() {
        let editor = editor(MemoryUploader::new(), None);
        assert_eq!(editor.data()["title"], "Hello");
        assert!(editor.frame().markup().contains("Hello"));
        assert_eq!(editor.frame().dimensions().width, 200);
        assert!(editor.generate_enabled());
        assert_eq!(editor.labels().title(), "Create image");
    }

    #[test]
    fn edits_are_validated_against_directives() {
        let mut editor = editor(MemoryUploader::new(), None);
        editor.edit("author.name", json!("Grace")).unwrap();
        assert_eq!(editor.data()["author"]["name"], "Grace");
        assert_eq!(editor.data()["title"], "Hello");
        assert!(editor.frame().markup().contains("Hello"));

        assert!(matches!(editor.edit("nope", json!(1)), Err(Error::UnknownField(_))));
        assert!(matches!(editor.edit("cover", json!("x.png")), Err(Error::UnsupportedField { .. })));
        assert!(matches!(editor.edit("author", json!("flat")), Err(Error::InvalidPatch(_))));
    }

    #[test]
    fn unknown_layout_is_a_noop() {
        let mut editor = editor(MemoryUploader::new(), None);
        editor.edit("title", json!("Edited")).unwrap();
        assert!(!editor.select_layout("missing").unwrap());
        assert_eq!(editor.data()["title"], "Edited");
    }

    #[tokio::test]
    async fn generate_reports_and_returns_to_idle() {
        let uploader = MemoryUploader::new();
        let (events, host) = recorder();
        let mut editor = editor(uploader.clone(), Some(host));
        let asset = editor.generate().await.unwrap();
        assert_eq!((asset.width, asset.height), (200, 100));
        assert_eq!(uploader.uploads().len(), 1);
        assert_eq!(editor.state(), EditorState::Idle);

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                EditorEvent::StateChanged(EditorState::Generating),
                EditorEvent::Generated(asset),
                EditorEvent::StateChanged(EditorState::Idle),
            ]
        );
    }

    #[tokio::test]
    async fn failed_upload_keeps_edits() {
        let (events, host) = recorder();
        let mut editor = editor(MemoryUploader::rejecting("offline"), Some(host));
        editor.edit("title", json!("Keep me")).unwrap();
        let err = editor.generate().await.unwrap_err();
        assert!(matches!(err, Error::UploadError(_)));
        assert_eq!(editor.data()["title"], "Keep me");
        assert!(editor.generate_enabled());

        let events = events.lock().unwrap().clone();
        assert!(matches!(events[1], EditorEvent::Failed(ref m) if m.contains("offline")));
        assert_eq!(events.last(), Some(&EditorEvent::StateChanged(EditorState::Idle)));
    }

    #[test]
    fn close_detaches_and_notifies() {
        let closed = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&closed);
        let options = EditorOptions {
            on_close: Some(Box::new(move || *counter.lock().unwrap() += 1)),
            ..EditorOptions::default()
        };
        let mut editor =
            Editor::new(vec![card()], document(), options, Arc::new(StaticLoader::new()), Arc::new(MemoryUploader::new())).unwrap();
        editor.close().unwrap();
        editor.close().unwrap();
        assert_eq!(*closed.lock().unwrap(), 1);
        assert!(!editor.can_close());
        assert!(editor.preview().is_detached());
    }

    #[test]
    fn empty_registry_is_rejected() {
        let err = Editor::new(
            vec![],
            document(),
            EditorOptions::default(),
            Arc::new(StaticLoader::new()),
            Arc::new(MemoryUploader::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    fn fragile(id: &str, width: u32, height: u32) -> LayoutDefinition {
        LayoutDefinition::new(
            id,
            |data: &LayoutData, _: &mut StyleRoot| -> Result<String> {
                match data["title"].as_str() {
                    Some("boom") | None => Err(Error::RenderError("cannot render".into())),
                    Some(title) => Ok(format!("<h1>{}</h1>", title)),
                }
            },
            |doc: &SourceDocument| json!({"title": doc.get("title")}),
        )
        .with_fields(vec![FieldSpec::string("title", "Title")])
        .with_dimensions(width, height)
    }

    fn failure_events(events: &Arc<Mutex<Vec<EditorEvent>>>) -> Vec<EditorEvent> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !matches!(e, EditorEvent::Closed))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn failed_render_is_never_captured() {
        let uploader = MemoryUploader::new();
        let (events, host) = recorder();
        let options = EditorOptions {
            host: Some(host),
            ..EditorOptions::default()
        };
        let mut editor = Editor::new(
            vec![fragile("fragile", 200, 100)],
            document(),
            options,
            Arc::new(StaticLoader::new()),
            Arc::new(uploader.clone()),
        )
        .unwrap();
        editor.edit("title", json!("boom")).unwrap();
        // the old frame is still on screen
        assert!(editor.frame().markup().contains("Hello"));

        let err = editor.generate().await.unwrap_err();
        assert!(matches!(err, Error::RenderError(ref m) if m.contains("cannot render")));
        assert!(uploader.uploads().is_empty());
        assert_eq!(editor.state(), EditorState::Idle);
        let events = failure_events(&events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], EditorEvent::StateChanged(EditorState::Generating));
        assert!(matches!(events[1], EditorEvent::Failed(_)));
        assert_eq!(events[2], EditorEvent::StateChanged(EditorState::Idle));

        editor.edit("title", json!("Fixed")).unwrap();
        editor.generate().await.unwrap();
        assert_eq!(uploader.uploads().len(), 1);
    }

    #[tokio::test]
    async fn switching_to_a_broken_layout_drops_the_old_frame() {
        let uploader = MemoryUploader::new();
        let (events, host) = recorder();
        let options = EditorOptions {
            host: Some(host),
            ..EditorOptions::default()
        };
        let broken = LayoutDefinition::new(
            "broken",
            |_: &LayoutData, _: &mut StyleRoot| -> Result<String> { Err(Error::RenderError("missing partial".into())) },
            |_: &SourceDocument| json!({}),
        )
        .with_dimensions(300, 150);
        let mut editor = Editor::new(
            vec![card(), broken],
            document(),
            options,
            Arc::new(StaticLoader::new()),
            Arc::new(uploader.clone()),
        )
        .unwrap();
        assert!(editor.select_layout("broken").unwrap());
        assert_eq!(editor.frame(), Frame::empty(Dimensions { width: 300, height: 150 }));
        assert!(editor.preview().last_error().unwrap().contains("missing partial"));

        let err = editor.generate().await.unwrap_err();
        assert!(matches!(err, Error::RenderError(_)));
        assert!(uploader.uploads().is_empty());
        let events = failure_events(&events);
        assert!(matches!(events[1], EditorEvent::Failed(ref m) if m.contains("missing partial")));
        assert_eq!(events.last(), Some(&EditorEvent::StateChanged(EditorState::Idle)));
    }

    #[tokio::test]
    async fn generate_after_close_is_refused() {
        let uploader = MemoryUploader::new();
        let (events, host) = recorder();
        let mut editor = editor(uploader.clone(), Some(host));
        editor.close().unwrap();
        assert!(matches!(editor.generate().await, Err(Error::Closed)));
        assert!(uploader.uploads().is_empty());
        assert_eq!(events.lock().unwrap().clone(), vec![EditorEvent::Closed]);
    }

    #[test]
    fn bad_background_is_rejected_up_front() {
        let options = EditorOptions {
            config: EditorConfig {
                background: "not-a-colour".into(),
                ..EditorConfig::default()
            },
            ..EditorOptions::default()
        };
        let err = Editor::new(
            vec![card()],
            document(),
            options,
            Arc::new(StaticLoader::new()),
            Arc::new(MemoryUploader::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(ref m) if m.contains("not-a-colour")));
    }
}
