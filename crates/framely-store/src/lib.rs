//! Per-video on-disk store.
//!
//! Layout: `store/<video_id>/{video.*, audio.wav, frames/, vab.json}`.
//! The store is partitioned by video ID, giving each job exclusive
//! ownership of its directory; bundle writes go through a temp file and
//! an atomic rename so readers never observe a partial `vab.json`.

mod error;

pub use error::{StoreError, StoreResult};

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use framely_models::{Vab, VideoId};

/// Handle to the store root.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create from the `STORE_PATH` environment variable.
    pub fn from_env() -> Self {
        Self::new(std::env::var("STORE_PATH").unwrap_or_else(|_| "store".to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join(video_id.as_str())
    }

    /// Canonical source video path inside a video directory.
    pub fn video_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("video.mp4")
    }

    pub fn audio_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("audio.wav")
    }

    pub fn frames_dir(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("frames")
    }

    pub fn bundle_path(&self, video_id: &VideoId) -> PathBuf {
        self.video_dir(video_id).join("vab.json")
    }

    /// Create the per-video directory if missing and return it.
    pub async fn ensure_video_dir(&self, video_id: &VideoId) -> StoreResult<PathBuf> {
        let dir = self.video_dir(video_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Locate an ingested or downloaded source video, any extension.
    pub async fn find_source(&self, video_id: &VideoId) -> StoreResult<Option<PathBuf>> {
        let dir = self.video_dir(video_id);
        if !dir.exists() {
            return Ok(None);
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().is_some_and(|s| s == "video") && path.is_file() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Persist an uploaded source video.
    pub async fn save_upload(&self, video_id: &VideoId, bytes: &[u8]) -> StoreResult<PathBuf> {
        self.ensure_video_dir(video_id).await?;
        let path = self.video_path(video_id);
        tokio::fs::write(&path, bytes).await?;
        info!(video_id = %video_id, bytes = bytes.len(), "stored uploaded source");
        Ok(path)
    }

    pub async fn bundle_exists(&self, video_id: &VideoId) -> bool {
        tokio::fs::try_exists(self.bundle_path(video_id)).await.unwrap_or(false)
    }

    /// Validate and persist a bundle atomically (write-to-temp + rename).
    pub async fn write_bundle(&self, video_id: &VideoId, bundle: &Vab) -> StoreResult<()> {
        bundle.validate()?;

        let dir = self.ensure_video_dir(video_id).await?;
        let target = self.bundle_path(video_id);
        let json = serde_json::to_vec_pretty(bundle)?;

        let tmp = tokio::task::spawn_blocking(move || -> StoreResult<tempfile::TempPath> {
            use std::io::Write;
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&json)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        tmp.persist(&target).map_err(|e| StoreError::Io(e.error))?;
        debug!(video_id = %video_id, path = %target.display(), "bundle persisted");
        Ok(())
    }

    /// Load the persisted bundle, if any.
    pub async fn load_bundle(&self, video_id: &VideoId) -> StoreResult<Option<Vab>> {
        let path = self.bundle_path(video_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// SHA-256 of a file's contents as lowercase hex.
    pub async fn sha256_file(path: &Path) -> StoreResult<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> StoreResult<String> {
            use std::io::Read;
            let mut file = std::fs::File::open(&path)?;
            let mut hasher = Sha256::new();
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let digest = hasher.finalize();
            Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}
