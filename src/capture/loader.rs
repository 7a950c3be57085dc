//! Sub-resource loaders used by the capture pipeline.
//!
//! Layouts reference images with `<img src>` and fonts with `@font-face`.
//! A [`ResourceLoader`] turns those URLs into bytes. Loaders never block the
//! event loop; the pipeline bounds the total wait.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use futures::future::{self, BoxFuture, FutureExt};

use crate::error::CaptureError;

/// Bytes of one loaded sub-resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    pub mime: Option<String>,
    pub bytes: Arc<Vec<u8>>,
}

impl Resource {
    pub fn new(url: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            mime: None,
            bytes: Arc::new(bytes),
        }
    }
}

/// Fetches sub-resources referenced by the preview frame
pub trait ResourceLoader: Send + Sync {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resource, CaptureError>>;
}

impl<T: ResourceLoader + ?Sized> ResourceLoader for Arc<T> {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resource, CaptureError>> {
        (**self).load(url)
    }
}

/// Decode a `data:` URI. Returns `None` if `url` is not one.
pub fn decode_data_uri(url: &str) -> Option<Result<Resource, CaptureError>> {
    let rest = url.strip_prefix("data:")?;
    let Some((meta, payload)) = rest.split_once(',') else {
        return Some(Err(CaptureError::failed(url_label(url), "malformed data URI")));
    };
    let is_base64 = meta.ends_with(";base64");
    let mime = meta.trim_end_matches(";base64").split(';').next().unwrap_or_default();

    let bytes = if is_base64 {
        match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
            Ok(bytes) => bytes,
            Err(e) => return Some(Err(CaptureError::failed(url_label(url), e))),
        }
    } else {
        payload.as_bytes().to_vec()
    };

    Some(Ok(Resource {
        url: url.to_string(),
        mime: (!mime.is_empty()).then(|| mime.to_string()),
        bytes: Arc::new(bytes),
    }))
}

/// Short form of a URL for messages (data URIs can be huge)
pub(crate) fn url_label(url: &str) -> &str {
    if url.starts_with("data:") {
        url.split(',').next().unwrap_or("data:")
    } else {
        url
    }
}

/// Loads only `data:` URIs; anything else fails
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUriLoader;

impl ResourceLoader for DataUriLoader {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resource, CaptureError>> {
        let result = decode_data_uri(url)
            .unwrap_or_else(|| Err(CaptureError::failed(url, "only data: URIs are supported")));
        future::ready(result).boxed()
    }
}

/// Loads files below a root directory, plus `data:` URIs.
///
/// Relative paths and `file://` URLs are accepted; paths escaping the root
/// with `..` are refused.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, CaptureError> {
        let path = if url.starts_with("file:") {
            url::Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| CaptureError::failed(url, "invalid file URL"))?
        } else if url.contains("://") {
            return Err(CaptureError::Tainted(url.to_string()));
        } else {
            PathBuf::from(url.trim_start_matches('/'))
        };

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(CaptureError::Tainted(url.to_string()));
        }
        if path.is_absolute() {
            if path.starts_with(&self.root) {
                return Ok(path);
            }
            return Err(CaptureError::Tainted(url.to_string()));
        }
        Ok(self.root.join(path))
    }
}

impl ResourceLoader for FsLoader {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resource, CaptureError>> {
        async move {
            if let Some(result) = decode_data_uri(url) {
                return result;
            }
            let path = self.resolve(url)?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| CaptureError::failed(url, format!("{}: {}", path.display(), e)))?;
            Ok(Resource {
                url: url.to_string(),
                mime: mime_from_extension(&path).map(str::to_string),
                bytes: Arc::new(bytes),
            })
        }
        .boxed()
    }
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => return None,
    })
}

/// In-memory loader for tests and embedded assets.
///
/// URLs registered with [`StaticLoader::never_resolve`] stay pending forever,
/// which is how a hung network fetch looks to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    entries: HashMap<String, Entry>,
}

#[derive(Debug, Clone)]
enum Entry {
    Ready(Arc<Vec<u8>>),
    Failing(String),
    Pending,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.insert(url.into(), Entry::Ready(Arc::new(bytes)));
        self
    }

    pub fn failing(mut self, url: impl Into<String>, reason: impl Into<String>) -> Self {
        self.entries.insert(url.into(), Entry::Failing(reason.into()));
        self
    }

    pub fn never_resolve(mut self, url: impl Into<String>) -> Self {
        self.entries.insert(url.into(), Entry::Pending);
        self
    }
}

impl ResourceLoader for StaticLoader {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resource, CaptureError>> {
        if let Some(result) = decode_data_uri(url) {
            return future::ready(result).boxed();
        }
        match self.entries.get(url) {
            Some(Entry::Ready(bytes)) => future::ready(Ok(Resource {
                url: url.to_string(),
                mime: None,
                bytes: Arc::clone(bytes),
            }))
            .boxed(),
            Some(Entry::Failing(reason)) => future::ready(Err(CaptureError::failed(url, reason))).boxed(),
            Some(Entry::Pending) => future::pending().boxed(),
            None => future::ready(Err(CaptureError::failed(url, "not found"))).boxed(),
        }
    }
}

/// HTTP(S) loader. Hosts outside `allowed_hosts` (when set) taint the capture.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: reqwest::Client,
    allowed_hosts: Option<Vec<String>>,
}

#[cfg(feature = "http")]
impl HttpLoader {
    pub fn new(user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| crate::Error::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            allowed_hosts: None,
        })
    }

    pub fn allow_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_hosts = Some(hosts);
        self
    }

    fn check_origin(&self, url: &str) -> Result<(), CaptureError> {
        let Some(allowed) = &self.allowed_hosts else {
            return Ok(());
        };
        let parsed = url::Url::parse(url).map_err(|e| CaptureError::failed(url, e))?;
        let host = parsed.host_str().unwrap_or_default();
        if allowed.iter().any(|h| h.eq_ignore_ascii_case(host)) {
            Ok(())
        } else {
            Err(CaptureError::Tainted(url.to_string()))
        }
    }
}

#[cfg(feature = "http")]
impl ResourceLoader for HttpLoader {
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Resource, CaptureError>> {
        async move {
            if let Some(result) = decode_data_uri(url) {
                return result;
            }
            self.check_origin(url)?;
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| CaptureError::failed(url, e))?;
            let mime = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = resp.bytes().await.map_err(|e| CaptureError::failed(url, e))?;
            Ok(Resource {
                url: url.to_string(),
                mime,
                bytes: Arc::new(bytes.to_vec()),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_uris_decode_base64_and_plain() {
        let loader = DataUriLoader;
        let res = loader.load("data:text/plain;base64,aGVsbG8=").await.unwrap();
        assert_eq!(res.bytes.as_slice(), b"hello");
        assert_eq!(res.mime.as_deref(), Some("text/plain"));

        let res = loader.load("data:,plain").await.unwrap();
        assert_eq!(res.bytes.as_slice(), b"plain");
        assert!(res.mime.is_none());
    }

    #[tokio::test]
    async fn bad_data_uris_fail() {
        let err = DataUriLoader.load("data:image/png;base64,@@@").await.unwrap_err();
        assert!(matches!(err, CaptureError::ResourceFailed { ref url, .. } if url == "data:image/png;base64"));
        assert!(DataUriLoader.load("https://example.com/a.png").await.is_err());
    }

    #[tokio::test]
    async fn fs_loader_reads_below_root_only() {
        let dir = std::env::temp_dir().join(format!("ogframe-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("logo.png"), b"png-bytes").unwrap();

        let loader = FsLoader::new(&dir);
        let res = loader.load("logo.png").await.unwrap();
        assert_eq!(res.bytes.as_slice(), b"png-bytes");
        assert_eq!(res.mime.as_deref(), Some("image/png"));

        assert!(matches!(loader.load("../etc/passwd").await, Err(CaptureError::Tainted(_))));
        assert!(matches!(loader.load("https://cdn.example.com/x.png").await, Err(CaptureError::Tainted(_))));
        assert!(matches!(loader.load("missing.png").await, Err(CaptureError::ResourceFailed { .. })));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn static_loader_serves_and_fails() {
        let loader = StaticLoader::new().with("a.png", vec![1, 2]).failing("b.png", "boom");
        assert_eq!(loader.load("a.png").await.unwrap().bytes.as_slice(), &[1, 2]);
        assert!(loader.load("b.png").await.unwrap_err().to_string().contains("boom"));
        assert!(loader.load("c.png").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn never_resolving_entries_stay_pending() {
        let loader = StaticLoader::new().never_resolve("slow.png");
        let res = tokio::time::timeout(std::time::Duration::from_secs(60), loader.load("slow.png")).await;
        assert!(res.is_err());
    }
}
