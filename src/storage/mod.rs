//! Storage adapter: where sources come from and where HLS output goes
//!
//! - `layout` - pure path mapping for raw uploads and HLS output
//! - `remote` - S3-compatible backend via `object_store`
//! - `dev` - development helpers (uploads root autodetection)
//!
//! [`Storage`] is built once at startup from validated configuration and
//! handed to the worker; there is no process-global client.

pub mod dev;
pub mod layout;
pub mod remote;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{StorageBackend, StorageConfig};

pub use layout::{PathKind, StorageLayout, validate_component};
pub use remote::{PublishedObject, RemoteStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Invalid {what}: {value:?}")]
    InvalidComponent { what: &'static str, value: String },

    #[error("Missing storage configuration: {0}")]
    MissingConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Subdirectory of a job's work dir that fetched sources land in
pub const SOURCE_DIR: &str = "source";

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// How a source locator was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    PublicPrefix,
    AbsolutePath,
    RawDirectory,
    ObjectKey,
}

/// A resolved source file on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub strategy: SourceStrategy,
    /// Fetched into the job's work dir; removed with it
    pub temporary: bool,
}

#[derive(Clone)]
pub struct Storage {
    layout: StorageLayout,
    remote: Option<RemoteStore>,
    temp_dir: PathBuf,
}

impl Storage {
    /// Local backend: output is written straight into the uploads tree
    pub fn local(layout: StorageLayout, temp_dir: PathBuf) -> Self {
        Self {
            layout,
            remote: None,
            temp_dir,
        }
    }

    /// Remote backend: output is staged under `temp_dir` and uploaded
    pub fn remote(layout: StorageLayout, remote: RemoteStore, temp_dir: PathBuf) -> Self {
        Self {
            layout,
            remote: Some(remote),
            temp_dir,
        }
    }

    pub fn from_config(config: &StorageConfig, temp_dir: PathBuf) -> Result<Self> {
        let uploads_root = config
            .uploads_root
            .clone()
            .ok_or_else(|| StorageError::MissingConfig("storage.uploads_root".to_string()))?;
        let layout = StorageLayout::new(
            uploads_root,
            &config.public_prefix,
            config.category_partitioning,
        );

        match config.backend {
            StorageBackend::Local => Ok(Self::local(layout, temp_dir)),
            StorageBackend::Remote => {
                let remote = RemoteStore::from_config(config)?;
                info!(bucket = %remote.bucket, "Using remote storage backend");
                Ok(Self::remote(layout, remote, temp_dir))
            }
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Find the raw input for `locator`, trying in order:
    ///
    /// 1. `/<public_prefix>/<rest>` rewritten to `<uploads_root>/<rest>`
    /// 2. an existing absolute path
    /// 3. a bare video id: first `original*` file in `<uploads_root>/raw/<id>/`
    /// 4. (remote backend) an object key, fetched into `work_dir/source/`,
    ///    apart from anything the encoder writes into `work_dir`
    ///
    /// A locator carrying the public prefix is never tried as a literal path.
    pub async fn resolve_source(&self, locator: &str, work_dir: &Path) -> Result<SourceFile> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(StorageError::NotFound("empty source locator".to_string()));
        }

        if let Some(path) = self.layout.rewrite_public_path(locator)? {
            if is_file(&path).await {
                return Ok(found(path, SourceStrategy::PublicPrefix));
            }
            return Err(StorageError::NotFound(locator.to_string()));
        }

        let as_path = Path::new(locator);
        if as_path.is_absolute() && is_file(as_path).await {
            return Ok(found(as_path.to_path_buf(), SourceStrategy::AbsolutePath));
        }

        if validate_component(locator, "video_id").is_ok() {
            let raw_dir = self.layout.resolve(locator, None, PathKind::Raw)?;
            if let Some(path) = first_original(&raw_dir).await? {
                return Ok(found(path, SourceStrategy::RawDirectory));
            }
        }

        if let Some(remote) = &self.remote {
            let key = locator.trim_start_matches('/');
            if !key.is_empty() && remote.exists(key).await? {
                let source_dir = work_dir.join(SOURCE_DIR);
                tokio::fs::create_dir_all(&source_dir).await?;
                let file_name = Path::new(key)
                    .file_name()
                    .map(|name| name.to_os_string())
                    .unwrap_or_else(|| "original".into());
                let path = source_dir.join(file_name);
                remote.fetch(key, &path).await?;
                return Ok(SourceFile {
                    path,
                    strategy: SourceStrategy::ObjectKey,
                    temporary: true,
                });
            }
        }

        Err(StorageError::NotFound(locator.to_string()))
    }

    /// Create and return the directory the HLS output for a video goes to.
    ///
    /// Local backend: `<uploads_root>/hls/[<category>/]<video_id>`.
    /// Remote backend: the same relative layout under `<temp_dir>/staging`.
    pub async fn ensure_output_location(&self, video_id: &str, category: Option<&str>) -> Result<PathBuf> {
        let relative = self.layout.relative(video_id, category, PathKind::Hls)?;
        let dir = match self.remote {
            None => self.layout.uploads_root().join(relative),
            Some(_) => self.temp_dir.join("staging").join(relative),
        };
        tokio::fs::create_dir_all(&dir).await?;
        debug!(video_id, dir = %dir.display(), "Output location ready");
        Ok(dir)
    }

    /// Make a finished output directory durable on the configured backend.
    ///
    /// Local backend: nothing to do, the output already lives in place.
    pub async fn publish(
        &self,
        output_dir: &Path,
        video_id: &str,
        category: Option<&str>,
    ) -> Result<Vec<PublishedObject>> {
        match &self.remote {
            None => Ok(Vec::new()),
            Some(remote) => {
                let prefix = self.layout.object_prefix(video_id, category)?;
                remote.publish_dir(output_dir, &prefix).await
            }
        }
    }

    /// Stream a remote object to a local file
    pub async fn fetch(&self, key: &str, local_path: &Path) -> Result<()> {
        match &self.remote {
            Some(remote) => remote.fetch(key, local_path).await,
            None => Err(StorageError::MissingConfig(
                "fetch requires the remote storage backend".to_string(),
            )),
        }
    }

    /// Drop a staged output directory once it has been published
    pub async fn discard_staging(&self, output_dir: &Path) -> Result<()> {
        if self.remote.is_some() && output_dir.starts_with(self.temp_dir.join("staging")) {
            match tokio::fs::remove_dir_all(output_dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn found(path: PathBuf, strategy: SourceStrategy) -> SourceFile {
    SourceFile {
        path,
        strategy,
        temporary: false,
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn first_original(raw_dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(raw_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("original") && entry.file_type().await?.is_file() {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::path::Path as StoragePath;
    use tempfile::TempDir;

    fn local_storage(root: &Path) -> Storage {
        Storage::local(
            StorageLayout::new(root.join("uploads"), "uploads", false),
            root.join("tmp"),
        )
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"video").unwrap();
    }

    #[tokio::test]
    async fn test_public_prefix_takes_priority() {
        let temp = TempDir::new().unwrap();
        let storage = local_storage(temp.path());
        let expected = temp.path().join("uploads/raw/abc/original.mp4");
        touch(&expected);

        let source = storage
            .resolve_source("/uploads/raw/abc/original.mp4", temp.path())
            .await
            .unwrap();
        assert_eq!(source.path, expected);
        assert_eq!(source.strategy, SourceStrategy::PublicPrefix);
        assert!(!source.temporary);
    }

    #[tokio::test]
    async fn test_public_prefix_never_read_as_literal_path() {
        let temp = TempDir::new().unwrap();
        let storage = local_storage(temp.path());

        let err = storage
            .resolve_source("/uploads/raw/abc/original.mp4", temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_absolute_path() {
        let temp = TempDir::new().unwrap();
        let storage = local_storage(temp.path());
        let file = temp.path().join("elsewhere/clip.mov");
        touch(&file);

        let source = storage
            .resolve_source(file.to_str().unwrap(), temp.path())
            .await
            .unwrap();
        assert_eq!(source.strategy, SourceStrategy::AbsolutePath);
        assert_eq!(source.path, file);
    }

    #[tokio::test]
    async fn test_bare_id_picks_first_original_by_name() {
        let temp = TempDir::new().unwrap();
        let storage = local_storage(temp.path());
        touch(&temp.path().join("uploads/raw/v1/original.webm"));
        touch(&temp.path().join("uploads/raw/v1/original.mp4"));
        touch(&temp.path().join("uploads/raw/v1/notes.txt"));

        let source = storage.resolve_source("v1", temp.path()).await.unwrap();
        assert_eq!(source.strategy, SourceStrategy::RawDirectory);
        assert_eq!(source.path, temp.path().join("uploads/raw/v1/original.mp4"));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let temp = TempDir::new().unwrap();
        let storage = local_storage(temp.path());

        for locator in ["v404", "/nope/clip.mp4", "../v1"] {
            assert!(matches!(
                storage.resolve_source(locator, temp.path()).await,
                Err(StorageError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_ensure_output_location_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let storage = local_storage(temp.path());

        let first = storage.ensure_output_location("v1", Some("math")).await.unwrap();
        let second = storage.ensure_output_location("v1", Some("math")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, temp.path().join("uploads/hls/v1"));
        assert!(first.is_dir());
        assert!(storage.publish(&first, "v1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_object_key_is_fetched_as_temporary() {
        let temp = TempDir::new().unwrap();
        let remote = RemoteStore::in_memory();
        remote
            .inner()
            .put(
                &StoragePath::from("incoming/v9/original.mp4"),
                bytes::Bytes::from("remote-video").into(),
            )
            .await
            .unwrap();
        let storage = Storage::remote(
            StorageLayout::new(temp.path().join("uploads"), "uploads", true),
            remote,
            temp.path().join("tmp"),
        );

        let work_dir = temp.path().join("tmp/job-1");
        let source = storage
            .resolve_source("incoming/v9/original.mp4", &work_dir)
            .await
            .unwrap();
        assert_eq!(source.strategy, SourceStrategy::ObjectKey);
        assert!(source.temporary);
        assert_eq!(source.path, work_dir.join("source/original.mp4"));
        assert_eq!(std::fs::read_to_string(&source.path).unwrap(), "remote-video");

        let out = storage.ensure_output_location("v9", Some("math")).await.unwrap();
        assert_eq!(out, temp.path().join("tmp/staging/hls/math/v9"));
    }

    #[tokio::test]
    async fn test_fetched_source_cannot_collide_with_encoder_output() {
        let temp = TempDir::new().unwrap();
        let remote = RemoteStore::in_memory();
        remote
            .inner()
            .put(
                &StoragePath::from("renders/480p.ts"),
                bytes::Bytes::from("source-video").into(),
            )
            .await
            .unwrap();
        let storage = Storage::remote(
            StorageLayout::new(temp.path().join("uploads"), "uploads", false),
            remote,
            temp.path().join("tmp"),
        );

        let work_dir = temp.path().join("tmp/jobs/job-2");
        let source = storage.resolve_source("renders/480p.ts", &work_dir).await.unwrap();

        // The driver encodes the 480p rendition to `<work_dir>/480p.ts`
        assert_ne!(source.path, work_dir.join("480p.ts"));
        assert_eq!(source.path, work_dir.join("source/480p.ts"));
        assert_eq!(std::fs::read_to_string(&source.path).unwrap(), "source-video");
    }
}
