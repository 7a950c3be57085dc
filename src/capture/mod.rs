//! Capture pipeline: waits for a frame's sub-resources, then rasterizes it.

pub mod loader;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info};
use tiny_skia::Pixmap;

use crate::error::CaptureError;
use crate::rendering::font::{FontBook, BUNDLED_FONT};
use crate::rendering::frame::{image_source, selector};
use crate::rendering::layout::{layout_document, LayoutContext};
use crate::rendering::paint::build_display_list;
use crate::rendering::raster::{decode_image, rasterize};
use crate::rendering::style::{Rgba, Stylesheet};
use crate::rendering::{CaptureResult, Frame};
use crate::{Dimensions, EditorConfig};

pub use loader::{DataUriLoader, FsLoader, Resource, ResourceLoader, StaticLoader};
#[cfg(feature = "http")]
pub use loader::HttpLoader;

/// Settings of one pipeline
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Upper bound on the whole sub-resource wait
    pub resource_timeout: Duration,
    pub background: Rgba,
    pub fallback_advance_em: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let config = EditorConfig::default();
        Self {
            resource_timeout: Duration::from_millis(config.resource_timeout_ms),
            background: Rgba::WHITE,
            fallback_advance_em: config.fallback_advance_em,
        }
    }
}

impl TryFrom<&EditorConfig> for CaptureConfig {
    type Error = crate::Error;

    /// Fails when the background is not a CSS colour.
    fn try_from(config: &EditorConfig) -> crate::Result<Self> {
        let background = Rgba::parse(&config.background).ok_or_else(|| {
            crate::Error::InvalidConfiguration(format!("background {:?} is not a colour", config.background))
        })?;
        Ok(Self {
            resource_timeout: Duration::from_millis(config.resource_timeout_ms),
            background,
            fallback_advance_em: config.fallback_advance_em,
        })
    }
}

/// What a frame needs loaded before it can be painted
#[derive(Debug, Default, PartialEq, Eq)]
struct Requests {
    images: Vec<String>,
    /// (family, src)
    fonts: Vec<(String, String)>,
}

impl Requests {
    fn len(&self) -> usize {
        self.images.len() + self.fonts.len()
    }
}

enum Kind {
    /// Keyed by the `src` the frame asked for
    Image(String),
    Font(String),
}

/// Turns preview frames into PNG bitmaps
pub struct CapturePipeline {
    loader: Arc<dyn ResourceLoader>,
    config: CaptureConfig,
    default_font: Option<Arc<Vec<u8>>>,
}

impl CapturePipeline {
    /// Pipeline painting unstyled families with the bundled DejaVu Sans.
    pub fn new(loader: Arc<dyn ResourceLoader>, config: CaptureConfig) -> Self {
        Self {
            loader,
            config,
            default_font: Some(Arc::new(BUNDLED_FONT.to_vec())),
        }
    }

    /// Font used for any family without its own `@font-face`
    pub fn with_default_font(mut self, data: Vec<u8>) -> crate::Result<Self> {
        let data = Arc::new(data);
        FontBook::new(self.config.fallback_advance_em)
            .set_default(Arc::clone(&data))
            .map_err(|e| crate::Error::InvalidConfiguration(format!("default font: {}", e)))?;
        self.default_font = Some(data);
        Ok(self)
    }

    /// Only `@font-face` fonts are used; text in any other family fails the
    /// capture.
    pub fn without_default_font(mut self) -> Self {
        self.default_font = None;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Snapshot `frame` at exactly `dimensions`.
    ///
    /// Every `<img>` and `@font-face` source is loaded first; nothing is
    /// painted while a load is still pending.
    pub async fn capture(&self, frame: &Frame, dimensions: Dimensions) -> Result<CaptureResult, CaptureError> {
        if frame.is_detached() {
            return Err(CaptureError::Detached);
        }

        let sheets = frame.stylesheets();
        let requests = collect_requests(frame, &sheets)?;
        debug!(
            "capture {}x{}: waiting for {} image(s), {} font(s)",
            dimensions.width,
            dimensions.height,
            requests.images.len(),
            requests.fonts.len()
        );

        let mut fonts = FontBook::new(self.config.fallback_advance_em);
        if let Some(data) = &self.default_font {
            fonts.set_default(Arc::clone(data)).map_err(CaptureError::Rasterize)?;
        }
        let mut images: HashMap<String, Pixmap> = HashMap::new();
        for (kind, resource) in self.load_all(&requests).await? {
            match kind {
                Kind::Image(src) => {
                    let pixmap = decode_image(&resource.bytes)
                        .map_err(|e| CaptureError::failed(loader::url_label(&resource.url), e))?;
                    images.insert(src, pixmap);
                }
                Kind::Font(family) => {
                    fonts
                        .insert(&family, resource.bytes.to_vec())
                        .map_err(|e| CaptureError::failed(loader::url_label(&resource.url), e))?;
                }
            }
        }

        let image_sizes: HashMap<String, (u32, u32)> = images
            .iter()
            .map(|(src, p)| (src.clone(), (p.width(), p.height())))
            .collect();
        let sheet = Stylesheet::parse_all(sheets.iter().map(String::as_str));
        let ctx = LayoutContext {
            sheet: &sheet,
            measure: &fonts,
            image_sizes: &image_sizes,
        };
        let document = frame.document();
        let root = layout_document(&document, dimensions, &ctx).map_err(|e| CaptureError::Rasterize(e.to_string()))?;
        let commands = build_display_list(&root);

        let result = rasterize(&commands, dimensions, self.config.background, &images, &fonts)?;
        info!("captured {}x{} ({} bytes)", result.width, result.height, result.byte_len());
        Ok(result)
    }

    /// Load everything concurrently within the resource timeout. The first
    /// failure aborts the wait.
    async fn load_all(&self, requests: &Requests) -> Result<Vec<(Kind, Resource)>, CaptureError> {
        let total = requests.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut pending: FuturesUnordered<_> = requests
            .images
            .iter()
            .map(|src| (Kind::Image(src.clone()), src.as_str()))
            .chain(requests.fonts.iter().map(|(family, src)| (Kind::Font(family.clone()), src.as_str())))
            .map(|(kind, url)| {
                let load = self.loader.load(url);
                async move { load.await.map(|res| (kind, res)) }
            })
            .collect();

        let mut loaded = Vec::with_capacity(total);
        let waited = tokio::time::timeout(self.config.resource_timeout, async {
            while let Some(result) = pending.next().await {
                loaded.push(result?);
            }
            Ok::<_, CaptureError>(())
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(loaded),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::ResourceTimeout {
                timeout_ms: self.config.resource_timeout.as_millis() as u64,
                pending: total - loaded.len(),
            }),
        }
    }
}

/// Sub-resources referenced by `frame`, deduplicated, in document order.
fn collect_requests(frame: &Frame, sheets: &[String]) -> Result<Requests, CaptureError> {
    let mut requests = Requests::default();
    let mut seen = HashSet::new();

    let document = frame.document();
    let img = selector("img[src]").map_err(|e| CaptureError::Rasterize(e.to_string()))?;
    for element in document.select(&img) {
        if let Some(src) = image_source(element.value()) {
            if seen.insert(src.to_string()) {
                requests.images.push(src.to_string());
            }
        }
    }

    let sheet = Stylesheet::parse_all(sheets.iter().map(String::as_str));
    for face in sheet.font_faces() {
        if seen.insert(face.src.clone()) {
            requests.fonts.push((face.family.clone(), face.src.clone()));
        }
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::StyleRoot;
    use crate::{LayoutData, Result};
    use serde_json::json;

    fn card(data: &LayoutData, head: &mut StyleRoot) -> Result<String> {
        head.inject("body { background: #ff0000; } .logo { width: 10px; height: 10px; }");
        let logo = data["logo"].as_str().unwrap_or_default();
        Ok(format!("<img class=\"logo\" src=\"{}\"><p>{}</p>", logo, data["title"].as_str().unwrap_or_default()))
    }

    fn png_1x1() -> Vec<u8> {
        let mut source = image::RgbaImage::new(1, 1);
        source.put_pixel(0, 0, image::Rgba([0, 255, 0, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        source.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn pipeline(loader: StaticLoader, timeout_ms: u64) -> CapturePipeline {
        let config = CaptureConfig {
            resource_timeout: Duration::from_millis(timeout_ms),
            ..CaptureConfig::default()
        };
        CapturePipeline::new(Arc::new(loader), config)
    }

    #[test]
    fn requests_are_deduplicated() {
        let component = |_: &LayoutData, head: &mut StyleRoot| -> Result<String> {
            head.inject("@font-face { font-family: Brand; src: url(brand.ttf); }");
            Ok("<img src=\"a.png\"><img src=\"a.png\"><img src=\"b.png\"><img src=\"\">".to_string())
        };
        let frame = Frame::mount(&component, &json!({}), Dimensions::default()).unwrap();
        let requests = collect_requests(&frame, &frame.stylesheets()).unwrap();
        assert_eq!(requests.images, vec!["a.png", "b.png"]);
        assert_eq!(requests.fonts, vec![("brand".to_string(), "brand.ttf".to_string())]);
    }

    #[tokio::test]
    async fn captures_at_exact_dimensions() {
        let frame = Frame::mount(&card, &json!({"title": "Hi", "logo": "logo.png"}), Dimensions { width: 64, height: 32 }).unwrap();
        let pipeline = pipeline(StaticLoader::new().with("logo.png", png_1x1()), 1_000);
        let result = pipeline.capture(&frame, frame.dimensions()).await.unwrap();
        assert_eq!((result.width, result.height), (64, 32));

        let img = image::load_from_memory(&result.png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (64, 32));
        assert_eq!(img.get_pixel(5, 5).0, [0, 255, 0, 255]);
        assert_eq!(img.get_pixel(40, 25).0, [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn detached_frames_are_refused() {
        let mut frame = Frame::empty(Dimensions::default());
        frame.detach();
        let err = pipeline(StaticLoader::new(), 1_000).capture(&frame, frame.dimensions()).await.unwrap_err();
        assert_eq!(err, CaptureError::Detached);
    }

    #[tokio::test]
    async fn failed_loads_and_bad_images_fail_the_capture() {
        let frame = Frame::mount(&card, &json!({"logo": "logo.png"}), Dimensions { width: 16, height: 16 }).unwrap();

        let err = pipeline(StaticLoader::new().failing("logo.png", "404"), 1_000)
            .capture(&frame, frame.dimensions())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::ResourceFailed { ref url, .. } if url == "logo.png"));

        let err = pipeline(StaticLoader::new().with("logo.png", b"not a png".to_vec()), 1_000)
            .capture(&frame, frame.dimensions())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::ResourceFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_loads_time_out() {
        let frame = Frame::mount(&card, &json!({"logo": "slow.png"}), Dimensions { width: 16, height: 16 }).unwrap();
        let err = pipeline(StaticLoader::new().never_resolve("slow.png"), 5_000)
            .capture(&frame, frame.dimensions())
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::ResourceTimeout { timeout_ms: 5_000, pending: 1 });
    }

    fn ink(result: &CaptureResult) -> usize {
        let img = image::load_from_memory(&result.png).unwrap().to_rgba8();
        img.pixels().filter(|p| p.0 != [255, 255, 255, 255]).count()
    }

    fn headline(_: &LayoutData, head: &mut StyleRoot) -> Result<String> {
        head.inject("h1 { margin: 0; font-size: 40px; color: #000000; }");
        Ok("<h1>HELLO WORLD</h1>".to_string())
    }

    #[tokio::test]
    async fn padded_image_sources_match_their_loads() {
        let component = |_: &LayoutData, _: &mut StyleRoot| -> Result<String> {
            Ok("<img src=\" logo.png \">".to_string())
        };
        let frame = Frame::mount(&component, &json!({}), Dimensions { width: 8, height: 8 }).unwrap();
        let result = pipeline(StaticLoader::new().with("logo.png", png_1x1()), 1_000)
            .capture(&frame, frame.dimensions())
            .await
            .unwrap();
        let img = image::load_from_memory(&result.png).unwrap().to_rgba8();
        // natural 1x1 size, not collapsed to nothing
        assert_eq!(img.get_pixel(0, 0).0, [0, 255, 0, 255]);
        assert_eq!(img.get_pixel(4, 4).0, [255, 255, 255, 255]);
    }

    #[tokio::test]
    async fn text_is_painted_with_the_bundled_font() {
        let frame = Frame::mount(&headline, &json!({}), Dimensions { width: 400, height: 100 }).unwrap();
        let result = pipeline(StaticLoader::new(), 1_000).capture(&frame, frame.dimensions()).await.unwrap();
        assert!(ink(&result) > 100);
    }

    #[tokio::test]
    async fn text_without_any_font_fails() {
        let frame = Frame::mount(&headline, &json!({}), Dimensions { width: 400, height: 100 }).unwrap();
        let err = pipeline(StaticLoader::new(), 1_000)
            .without_default_font()
            .capture(&frame, frame.dimensions())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Rasterize(ref msg) if msg.contains("no font")));
    }

    #[tokio::test]
    async fn font_faces_are_loaded_before_painting() {
        let component = |_: &LayoutData, head: &mut StyleRoot| -> Result<String> {
            head.inject("@font-face { font-family: Brand; src: url(fonts/brand.ttf); }");
            head.inject("h1 { margin: 0; font-family: Brand, sans-serif; font-size: 40px; color: #000000; }");
            Ok("<h1>HELLO WORLD</h1>".to_string())
        };
        let frame = Frame::mount(&component, &json!({}), Dimensions { width: 400, height: 100 }).unwrap();
        let result = pipeline(StaticLoader::new().with("fonts/brand.ttf", BUNDLED_FONT.to_vec()), 1_000)
            .without_default_font()
            .capture(&frame, frame.dimensions())
            .await
            .unwrap();
        assert!(ink(&result) > 100);

        let err = pipeline(StaticLoader::new().with("fonts/brand.ttf", b"not a font".to_vec()), 1_000)
            .capture(&frame, frame.dimensions())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::ResourceFailed { ref url, .. } if url == "fonts/brand.ttf"));
    }

    #[test]
    fn unparsable_background_is_a_configuration_error() {
        let config = EditorConfig {
            background: "not-a-colour".into(),
            ..EditorConfig::default()
        };
        assert!(matches!(CaptureConfig::try_from(&config), Err(crate::Error::InvalidConfiguration(_))));
        let config = EditorConfig {
            background: "rgb(10, 20, 30)".into(),
            ..EditorConfig::default()
        };
        assert_eq!(CaptureConfig::try_from(&config).unwrap().background, Rgba { r: 10, g: 20, b: 30, a: 255 });
    }

    #[tokio::test]
    async fn bad_default_font_is_rejected() {
        let pipeline = pipeline(StaticLoader::new(), 1_000);
        assert!(pipeline.with_default_font(b"nope".to_vec()).is_err());
    }
}
