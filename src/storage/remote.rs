//! S3-compatible publishing and fetching through `object_store`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, try_join_all};
use futures::{Stream, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::{
    Attribute, Attributes, ObjectStore, PutMultipartOpts, PutOptions, WriteMultipart,
    path::Path as StoragePath,
};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use super::{Result, StorageError};
use crate::config::StorageConfig;
use crate::encoder::MASTER_PLAYLIST;

/// Files above this size are streamed as multipart uploads
pub const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;
/// Part size for multipart uploads (S3 minimum is 5 MiB)
const PART_SIZE: usize = 5 * 1024 * 1024;
const PARTS_IN_FLIGHT: usize = 4;
const READ_BUFFER: usize = 256 * 1024;

/// One object written (or found already present) during a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedObject {
    pub key: String,
    pub size: u64,
    pub skipped: bool,
}

/// Object store client for HLS output
#[derive(Clone)]
pub struct RemoteStore {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
    multipart_threshold: u64,
}

impl RemoteStore {
    /// Create new remote store with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self {
            store,
            bucket,
            multipart_threshold: MULTIPART_THRESHOLD,
        }
    }

    /// In-memory backend for tests and local development
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(object_store::memory::InMemory::new()),
            "hlsworker-local".to_string(),
        )
    }

    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    /// Build an S3 client from validated configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| StorageError::MissingConfig("storage.bucket".to_string()))?;
        let region = config
            .region
            .clone()
            .ok_or_else(|| StorageError::MissingConfig("storage.region".to_string()))?;
        let access_key = config
            .access_key
            .clone()
            .ok_or_else(|| StorageError::MissingConfig("S3_ACCESS_KEY".to_string()))?;
        let secret_key = config
            .secret_key
            .clone()
            .ok_or_else(|| StorageError::MissingConfig("S3_SECRET_KEY".to_string()))?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&bucket)
            .with_region(region)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_allow_http(config.allow_http);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        Ok(Self::new(Arc::new(builder.build()?), bucket))
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&StoragePath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Upload everything under `local_dir` to `<prefix>/<relative path>`.
    ///
    /// Files of one directory go up concurrently, subdirectories recurse.
    /// The root `master.m3u8` is uploaded only after every other object has
    /// succeeded, and always overwritten.
    pub async fn publish_dir(&self, local_dir: &Path, prefix: &str) -> Result<Vec<PublishedObject>> {
        let mut published = self.upload_tree(local_dir.to_path_buf(), prefix.to_string(), true).await?;

        let master = local_dir.join(MASTER_PLAYLIST);
        if tokio::fs::try_exists(&master).await? {
            let key = format!("{}/{}", prefix, MASTER_PLAYLIST);
            published.push(self.upload_file(&master, &key, true).await?);
        }

        let uploaded = published.iter().filter(|o| !o.skipped).count();
        info!(prefix, uploaded, skipped = published.len() - uploaded, "Published HLS output");
        Ok(published)
    }

    fn upload_tree(&self, dir: PathBuf, prefix: String, is_root: bool) -> BoxFuture<'_, Result<Vec<PublishedObject>>> {
        Box::pin(async move {
            let mut files = Vec::new();
            let mut subdirs = Vec::new();

            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    subdirs.push((entry.path(), format!("{}/{}", prefix, name)));
                } else if file_type.is_file() {
                    if name.ends_with(".tmp") || (is_root && name == MASTER_PLAYLIST) {
                        continue;
                    }
                    files.push((entry.path(), format!("{}/{}", prefix, name)));
                }
            }

            let mut published = try_join_all(
                files
                    .iter()
                    .map(|(path, key)| self.upload_file(path, key, false)),
            )
            .await?;

            let nested = try_join_all(
                subdirs
                    .into_iter()
                    .map(|(path, key)| self.upload_tree(path, key, false)),
            )
            .await?;
            published.extend(nested.into_iter().flatten());

            Ok(published)
        })
    }

    async fn upload_file(&self, path: &Path, key: &str, force: bool) -> Result<PublishedObject> {
        let location = StoragePath::from(key);
        let size = tokio::fs::metadata(path).await?.len();

        if !force {
            match self.store.head(&location).await {
                Ok(meta) if meta.size == size => {
                    debug!(key, size, "Object already present, skipping");
                    return Ok(PublishedObject {
                        key: key.to_string(),
                        size,
                        skipped: true,
                    });
                }
                Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type_for(path).into());

        if size > self.multipart_threshold {
            self.put_streaming(path, &location, attributes).await?;
        } else {
            let data = tokio::fs::read(path).await?;
            let options = PutOptions {
                attributes,
                ..Default::default()
            };
            self.store.put_opts(&location, data.into(), options).await?;
        }

        debug!(key, size, "Uploaded object");
        Ok(PublishedObject {
            key: key.to_string(),
            size,
            skipped: false,
        })
    }

    /// Multipart upload read from disk in chunks, so memory stays bounded
    /// by the parts in flight. The upload is aborted on failure.
    async fn put_streaming(&self, path: &Path, location: &StoragePath, attributes: Attributes) -> Result<()> {
        let opts = PutMultipartOpts {
            attributes,
            ..Default::default()
        };
        let upload = self.store.put_multipart_opts(location, opts).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);
        let mut chunks = ReaderStream::with_capacity(File::open(path).await?, READ_BUFFER);

        let written = async {
            while let Some(chunk) = chunks.try_next().await? {
                writer.wait_for_capacity(PARTS_IN_FLIGHT).await?;
                writer.put(chunk);
            }
            Ok::<_, StorageError>(())
        }
        .await;

        match written {
            Ok(()) => {
                writer.finish().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!(location = %location, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    /// Stream an object to `local_path` without buffering it in memory
    pub async fn fetch(&self, key: &str, local_path: &Path) -> Result<()> {
        let result = match self.store.get(&StoragePath::from(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        stream_to_file(local_path, result.into_stream()).await?;
        info!(key, path = %local_path.display(), "Fetched object");
        Ok(())
    }
}

/// Content type by file extension
pub fn content_type_for(path: &Path) -> String {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

/// Save a `Stream` to a file; a partially written file is removed on error
pub async fn stream_to_file<S, E>(path: &Path, stream: S) -> std::io::Result<()>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let written = async {
        let body_with_io_error = stream.map_err(std::io::Error::other);
        let body_reader = StreamReader::new(body_with_io_error);
        futures::pin_mut!(body_reader);

        let mut file = BufWriter::new(File::create(path).await?);
        tokio::io::copy(&mut body_reader, &mut file).await?;
        file.flush().await?;
        file.get_ref().sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if written.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}
