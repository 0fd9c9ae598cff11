//! HLS playlists, built and parsed with `m3u8_rs`

use std::path::{Path, PathBuf};

use m3u8_rs::{
    MasterPlaylist, MediaPlaylist, MediaPlaylistType, MediaSegment, Playlist, Resolution,
    VariantStream,
};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::driver::Rendition;
use super::{RENDITION_PLAYLIST, SegmentInfo};

const HLS_VERSION: usize = 3;

/// VOD media playlist whose target duration is the ceiling of its longest segment
pub fn vod_playlist(segments: Vec<SegmentInfo>) -> MediaPlaylist {
    let longest = segments.iter().map(|s| s.duration).fold(0.0_f64, f64::max);
    MediaPlaylist {
        version: Some(HLS_VERSION),
        target_duration: longest.ceil() as u64,
        media_sequence: 0,
        segments: segments
            .into_iter()
            .map(|s| MediaSegment {
                uri: s.file_name,
                duration: s.duration as f32,
                ..Default::default()
            })
            .collect(),
        end_list: true,
        playlist_type: Some(MediaPlaylistType::Vod),
        ..Default::default()
    }
}

/// One variant per rendition, in the order given, each pointing at
/// `<name>/playlist.m3u8`
pub fn master_playlist<'a>(renditions: impl IntoIterator<Item = &'a Rendition>) -> MasterPlaylist {
    MasterPlaylist {
        version: Some(HLS_VERSION),
        variants: renditions
            .into_iter()
            .map(|r| VariantStream {
                uri: format!("{}/{}", r.name, RENDITION_PLAYLIST),
                bandwidth: r.bandwidth,
                resolution: Some(Resolution {
                    width: r.width as u64,
                    height: r.height as u64,
                }),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Parse a media playlist; master playlists and garbage yield `None`
pub fn parse_media(content: &[u8]) -> Option<MediaPlaylist> {
    match m3u8_rs::parse_playlist_res(content) {
        Ok(Playlist::MediaPlaylist(playlist)) => Some(playlist),
        _ => None,
    }
}

pub async fn write_media(path: &Path, playlist: &MediaPlaylist) -> Result<(), std::io::Error> {
    let mut buf = Vec::new();
    playlist.write_to(&mut buf)?;
    write_atomic(path, &buf).await
}

pub async fn write_master(path: &Path, playlist: &MasterPlaylist) -> Result<(), std::io::Error> {
    let mut buf = Vec::new();
    playlist.write_to(&mut buf)?;
    write_atomic(path, &buf).await
}

/// Write to `<path>.tmp`, sync, then rename over `path`, so readers see
/// either nothing or the complete file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), std::io::Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::RenditionSpec;
    use tempfile::TempDir;

    fn segments() -> Vec<SegmentInfo> {
        [6.0, 6.006, 2.5]
            .into_iter()
            .enumerate()
            .map(|(i, duration)| SegmentInfo {
                file_name: format!("segment-{:03}.ts", i),
                duration,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_playlist_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("playlist.m3u8");

        write_media(&path, &vod_playlist(segments())).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();

        assert!(content.starts_with("#EXTM3U"));
        assert!(content.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(content.contains("#EXT-X-TARGETDURATION:7"));
        assert!(content.contains("segment-002.ts"));
        assert!(content.contains("#EXT-X-ENDLIST"));
        assert!(!temp_dir.path().join("playlist.m3u8.tmp").exists());
    }

    #[tokio::test]
    async fn test_parse_reads_back_written_playlist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("playlist.m3u8");
        write_media(&path, &vod_playlist(segments())).await.unwrap();

        let parsed = parse_media(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.segments.len(), 3);
        assert_eq!(parsed.segments[1].uri, "segment-001.ts");
        assert_eq!(parsed.segments[2].duration, 2.5);
        assert_eq!(parsed.target_duration, 7);
        assert!(parsed.end_list);

        assert!(parse_media(b"not a playlist").is_none());
    }

    #[tokio::test]
    async fn test_master_playlist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("master.m3u8");
        let ladder = RenditionSpec::default_ladder();
        let renditions: Vec<Rendition> = ladder
            .iter()
            .map(|spec| {
                let dir = temp_dir.path().join(&spec.name);
                Rendition::from_playlist(spec, &dir, &vod_playlist(segments()))
            })
            .collect();

        let master = master_playlist(&renditions);
        write_master(&path, &master).await.unwrap();

        let content = std::fs::read(&path).unwrap();
        let Ok(Playlist::MasterPlaylist(parsed)) = m3u8_rs::parse_playlist_res(&content) else {
            panic!("expected a master playlist");
        };
        assert_eq!(parsed.variants.len(), 2);
        assert_eq!(parsed.variants[0].uri, "480p/playlist.m3u8");
        assert_eq!(parsed.variants[0].bandwidth, ladder[0].bandwidth());
        assert_eq!(
            parsed.variants[0].resolution,
            Some(Resolution {
                width: 854,
                height: 480
            })
        );
        assert!(parse_media(&content).is_none());
    }
}
