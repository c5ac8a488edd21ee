//! Local cache for the prebuilt panel script.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_BUNDLE_URL: &str =
    "https://github.com/bia-pain-bache/BPB-Worker-Panel/releases/latest/download/worker.js";
pub const BUNDLE_FILE_NAME: &str = "worker.js";
const TEMP_DIR_PREFIX: &str = ".bpb-wizard";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("error downloading worker.js: {0}")]
    Download(#[from] reqwest::Error),

    #[error("error downloading worker.js: {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to write worker.js: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Make sure the bundle is cached locally and return its path.
    async fn ensure(&self) -> Result<PathBuf, BundleError>;

    async fn load(&self) -> Result<Vec<u8>, BundleError> {
        let path = self.ensure().await?;
        Ok(tokio::fs::read(path).await?)
    }
}

/// Downloads the bundle at most once into a process-scoped temp directory.
pub struct BundleCache {
    url: String,
    path: PathBuf,
    http: reqwest::Client,
    lock: tokio::sync::Mutex<()>,
    _dir: Option<tempfile::TempDir>,
}

impl BundleCache {
    /// Create the temp directory. Failure here is fatal for the run.
    pub fn create(url: impl Into<String>) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(TEMP_DIR_PREFIX).tempdir()?;
        let path = dir.path().join(BUNDLE_FILE_NAME);
        Ok(Self {
            _dir: Some(dir),
            ..Self::at(url, path)
        })
    }

    /// Cache at an explicit path; the caller owns the directory.
    pub fn at(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            http: reqwest::Client::new(),
            lock: tokio::sync::Mutex::new(()),
            _dir: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn download(&self) -> Result<(), BundleError> {
        tracing::debug!(url = %self.url, path = %self.path.display(), "downloading bundle");
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(BundleError::Status(response.status()));
        }

        // Stream into a sibling file so an interrupted download is never mistaken for a cached one.
        let partial = self.path.with_extension("js.part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl BundleSource for BundleCache {
    async fn ensure(&self) -> Result<PathBuf, BundleError> {
        let _guard = self.lock.lock().await;
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(self.path.clone());
        }
        self.download().await?;
        Ok(self.path.clone())
    }
}
