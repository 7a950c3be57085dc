//! Asset upload collaborators.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rendering::CaptureResult;
use crate::{Error, Result};

/// Asset record returned by an uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedAsset {
    /// Content address: hex sha256 of the PNG bytes
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
    /// Where the uploader put the asset (path, URL or key)
    pub location: String,
}

impl UploadedAsset {
    fn describe(capture: &CaptureResult, location: String) -> Self {
        Self {
            id: content_id(&capture.png),
            width: capture.width,
            height: capture.height,
            byte_len: capture.byte_len(),
            location,
        }
    }
}

/// Hex sha256 of `bytes`
pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Stores a captured image and returns its asset record
pub trait AssetUploader: Send + Sync {
    fn upload(&self, capture: CaptureResult) -> BoxFuture<'_, Result<UploadedAsset>>;
}

/// Writes `<sha256>.png` files into a directory
#[derive(Debug, Clone)]
pub struct FsUploader {
    dir: PathBuf,
}

impl FsUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AssetUploader for FsUploader {
    fn upload(&self, capture: CaptureResult) -> BoxFuture<'_, Result<UploadedAsset>> {
        async move {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| Error::UploadError(format!("{}: {}", self.dir.display(), e)))?;
            let path = self.dir.join(format!("{}.png", content_id(&capture.png)));
            tokio::fs::write(&path, &capture.png)
                .await
                .map_err(|e| Error::UploadError(format!("{}: {}", path.display(), e)))?;
            info!("wrote {} ({} bytes)", path.display(), capture.byte_len());
            Ok(UploadedAsset::describe(&capture, path.display().to_string()))
        }
        .boxed()
    }
}

/// Keeps uploads in memory; can be told to reject them
#[derive(Debug, Clone, Default)]
pub struct MemoryUploader {
    uploads: Arc<Mutex<Vec<CaptureResult>>>,
    reject_with: Option<String>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploader that fails every upload with `reason`
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject_with: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<CaptureResult> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AssetUploader for MemoryUploader {
    fn upload(&self, capture: CaptureResult) -> BoxFuture<'_, Result<UploadedAsset>> {
        let result = match &self.reject_with {
            Some(reason) => Err(Error::UploadError(reason.clone())),
            None => {
                let asset = UploadedAsset::describe(&capture, format!("memory:{}", content_id(&capture.png)));
                self.uploads.lock().unwrap_or_else(PoisonError::into_inner).push(capture);
                Ok(asset)
            }
        };
        futures::future::ready(result).boxed()
    }
}
