use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use m3u8_rs::{MediaPlaylist, VariantStream};

use super::hls;
use super::ladder::RenditionSpec;
use super::{EncodeError, Encoder, MASTER_PLAYLIST, RENDITION_PLAYLIST, Result};
use crate::observability::Metrics;

/// A rendition encoded to a single file, not yet segmented
#[derive(Debug, Clone)]
pub struct EncodedRendition {
    pub spec: RenditionSpec,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct TranscodeOutcome {
    pub encoded: Vec<EncodedRendition>,
    pub failed: Vec<(RenditionSpec, EncodeError)>,
}

impl TranscodeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A packaged rendition: playlist plus segments on disk
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub name: String,
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub bandwidth: u64,
    /// Video bitrate in bits per second
    pub bitrate: u64,
    pub codec: String,
    pub segment_paths: Vec<PathBuf>,
    pub segment_durations: Vec<f64>,
    pub playlist_path: PathBuf,
}

impl Rendition {
    pub(crate) fn from_playlist(spec: &RenditionSpec, dir: &Path, playlist: &MediaPlaylist) -> Self {
        Self {
            name: spec.name.clone(),
            resolution: spec.resolution(),
            width: spec.width,
            height: spec.height,
            bandwidth: spec.bandwidth(),
            bitrate: spec.video_bitrate.bps(),
            codec: spec.codec.as_str().to_string(),
            segment_paths: playlist.segments.iter().map(|s| dir.join(&s.uri)).collect(),
            segment_durations: playlist.segments.iter().map(|s| s.duration as f64).collect(),
            playlist_path: dir.join(RENDITION_PLAYLIST),
        }
    }
}

/// The written master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct MasterManifest {
    pub video_id: String,
    pub path: PathBuf,
    /// Playlist URIs relative to the master, with bandwidth and resolution
    pub renditions: Vec<VariantStream>,
}

/// Runs the encoder per rendition under a shared budget and packages HLS.
///
/// Every encoder invocation holds one permit of `budget`; the semaphore is
/// shared by all jobs of the process so concurrent jobs cannot oversubscribe
/// the machine.
pub struct EncodingDriver {
    encoder: Arc<dyn Encoder>,
    budget: Arc<Semaphore>,
    segment_seconds: u32,
    rendition_attempts: u32,
    metrics: Arc<Metrics>,
}

impl EncodingDriver {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        budget: Arc<Semaphore>,
        segment_seconds: u32,
        rendition_attempts: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            encoder,
            budget,
            segment_seconds,
            rendition_attempts: rendition_attempts.max(1),
            metrics,
        }
    }

    pub fn segment_seconds(&self) -> u32 {
        self.segment_seconds
    }

    /// Encode every spec concurrently into `work_dir/<name>.ts`.
    ///
    /// A failing rendition is retried on its own up to `rendition_attempts`
    /// times; the others are unaffected. `on_done` fires once per rendition
    /// that succeeds.
    pub async fn transcode(
        &self,
        input: &Path,
        specs: &[RenditionSpec],
        work_dir: &Path,
        on_done: &(dyn Fn(&RenditionSpec) + Send + Sync),
    ) -> TranscodeOutcome {
        let results = join_all(specs.iter().map(|spec| async move {
            let output = work_dir.join(format!("{}.ts", spec.name));
            let result = self.encode_with_retries(input, spec, &output).await;
            if result.is_ok() {
                on_done(spec);
            }
            (spec.clone(), output, result)
        }))
        .await;

        let mut outcome = TranscodeOutcome::default();
        for (spec, path, result) in results {
            match result {
                Ok(()) => outcome.encoded.push(EncodedRendition { spec, path }),
                Err(e) => outcome.failed.push((spec, e)),
            }
        }
        outcome
    }

    async fn encode_with_retries(&self, input: &Path, spec: &RenditionSpec, output: &Path) -> Result<()> {
        let mut attempt = 1;
        loop {
            let result = {
                let Ok(_permit) = self.budget.acquire().await else {
                    return Err(EncodeError::BudgetClosed);
                };
                debug!(rendition = %spec.name, attempt, "Encoding rendition");
                self.encoder
                    .encode(input, spec, output, self.segment_seconds)
                    .await
            };

            match result {
                Ok(()) => {
                    self.metrics.rendition_encoded();
                    return Ok(());
                }
                Err(e) if attempt < self.rendition_attempts => {
                    warn!(rendition = %spec.name, attempt, error = %e, "Rendition failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Segment each encoded rendition into `<out_dir>/<name>/` and write its
    /// playlist. Any existing master is removed first: it must never point at
    /// renditions that are being rewritten.
    pub async fn package_renditions(
        &self,
        encoded: &[EncodedRendition],
        out_dir: &Path,
    ) -> Result<Vec<Rendition>> {
        remove_if_exists(&out_dir.join(MASTER_PLAYLIST)).await?;

        let mut renditions = Vec::with_capacity(encoded.len());
        for rendition in encoded {
            let spec = &rendition.spec;
            let dir = out_dir.join(&spec.name);
            if tokio::fs::try_exists(&dir).await? {
                tokio::fs::remove_dir_all(&dir).await?;
            }
            tokio::fs::create_dir_all(&dir).await?;

            let segments = {
                let Ok(_permit) = self.budget.acquire().await else {
                    return Err(EncodeError::BudgetClosed);
                };
                self.encoder
                    .segment(&rendition.path, spec, &dir, self.segment_seconds)
                    .await?
            };

            let playlist = hls::vod_playlist(segments);
            hls::write_media(&dir.join(RENDITION_PLAYLIST), &playlist).await?;

            debug!(rendition = %spec.name, segments = playlist.segments.len(), "Rendition packaged");
            renditions.push(Rendition::from_playlist(spec, &dir, &playlist));
        }
        Ok(renditions)
    }

    /// Write `master.m3u8` once every listed playlist and segment is on disk.
    pub async fn write_master(
        &self,
        video_id: &str,
        renditions: &[Rendition],
        out_dir: &Path,
    ) -> Result<MasterManifest> {
        if renditions.is_empty() {
            return Err(EncodeError::NoRenditions);
        }

        for rendition in renditions {
            for path in std::iter::once(&rendition.playlist_path).chain(&rendition.segment_paths) {
                if !tokio::fs::try_exists(path).await? {
                    return Err(EncodeError::IncompleteRendition {
                        rendition: rendition.name.clone(),
                        missing: path.clone(),
                    });
                }
            }
            if rendition.segment_paths.is_empty() {
                return Err(EncodeError::IncompleteRendition {
                    rendition: rendition.name.clone(),
                    missing: rendition.playlist_path.clone(),
                });
            }
        }

        let mut sorted: Vec<&Rendition> = renditions.iter().collect();
        sorted.sort_by_key(|r| r.bandwidth);

        let master = hls::master_playlist(sorted);

        let path = out_dir.join(MASTER_PLAYLIST);
        hls::write_master(&path, &master).await?;
        info!(video_id, renditions = master.variants.len(), "Master playlist written");

        Ok(MasterManifest {
            video_id: video_id.to_string(),
            path,
            renditions: master.variants,
        })
    }

    /// Package all renditions, then write the master
    pub async fn package_hls(
        &self,
        video_id: &str,
        encoded: &[EncodedRendition],
        out_dir: &Path,
    ) -> Result<MasterManifest> {
        let renditions = self.package_renditions(encoded, out_dir).await?;
        self.write_master(video_id, &renditions, out_dir).await
    }

    /// A rendition already packaged by an earlier attempt, if it is intact
    pub async fn load_packaged(&self, spec: &RenditionSpec, out_dir: &Path) -> Option<Rendition> {
        let dir = out_dir.join(&spec.name);
        let content = tokio::fs::read(dir.join(RENDITION_PLAYLIST)).await.ok()?;
        let playlist = hls::parse_media(&content)?;
        if !playlist.end_list || playlist.segments.is_empty() {
            return None;
        }

        let rendition = Rendition::from_playlist(spec, &dir, &playlist);
        for segment in &rendition.segment_paths {
            if !tokio::fs::try_exists(segment).await.unwrap_or(false) {
                return None;
            }
        }
        Some(rendition)
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
