//! Pure mapping from `(video_id, category, kind)` to storage locations.
//!
//! Ids and categories are validated as single normal path components, so two
//! different inputs can never map to the same directory and nothing can
//! escape the uploads root.

use std::path::{Component, Path, PathBuf};

use super::{Result, StorageError};

/// Which tree a path lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// `raw/<video_id>`, never partitioned by category
    Raw,
    /// `hls/[<category>/]<video_id>`
    Hls,
}

impl PathKind {
    fn dir(&self) -> &'static str {
        match self {
            PathKind::Raw => "raw",
            PathKind::Hls => "hls",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    uploads_root: PathBuf,
    public_prefix: String,
    category_partitioning: bool,
}

impl StorageLayout {
    pub fn new(uploads_root: PathBuf, public_prefix: &str, category_partitioning: bool) -> Self {
        Self {
            uploads_root,
            public_prefix: public_prefix.trim_matches('/').to_string(),
            category_partitioning,
        }
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Path relative to the uploads root, e.g. `hls/math/v1`
    pub fn relative(&self, video_id: &str, category: Option<&str>, kind: PathKind) -> Result<PathBuf> {
        validate_component(video_id, "video_id")?;

        let mut path = PathBuf::from(kind.dir());
        if kind == PathKind::Hls {
            if let Some(category) = self.effective_category(category)? {
                path.push(category);
            }
        }
        path.push(video_id);
        Ok(path)
    }

    /// Absolute path under the uploads root
    pub fn resolve(&self, video_id: &str, category: Option<&str>, kind: PathKind) -> Result<PathBuf> {
        Ok(self.uploads_root.join(self.relative(video_id, category, kind)?))
    }

    /// Object store prefix for a video's HLS output: `hls/[<category>/]<video_id>`
    pub fn object_prefix(&self, video_id: &str, category: Option<&str>) -> Result<String> {
        let mut parts = vec!["hls"];
        let category = self.effective_category(category)?;
        if let Some(category) = category {
            parts.push(category);
        }
        validate_component(video_id, "video_id")?;
        parts.push(video_id);
        Ok(parts.join("/"))
    }

    /// Public path the backend serves: `/<prefix>/hls/[<category>/]<video_id>/master.m3u8`
    pub fn manifest_public_path(&self, video_id: &str, category: Option<&str>) -> Result<String> {
        let prefix = self.object_prefix(video_id, category)?;
        if self.public_prefix.is_empty() {
            Ok(format!("/{}/{}", prefix, crate::encoder::MASTER_PLAYLIST))
        } else {
            Ok(format!(
                "/{}/{}/{}",
                self.public_prefix,
                prefix,
                crate::encoder::MASTER_PLAYLIST
            ))
        }
    }

    /// Rewrite `/<prefix>/<rest>` to `<uploads_root>/<rest>`.
    ///
    /// Returns `Ok(None)` when the locator does not carry the public prefix.
    /// A prefixed locator whose remainder is not made of plain components is
    /// rejected rather than falling through to other strategies.
    pub fn rewrite_public_path(&self, locator: &str) -> Result<Option<PathBuf>> {
        if self.public_prefix.is_empty() {
            return Ok(None);
        }
        let marker = format!("/{}/", self.public_prefix);
        let Some(rest) = locator.strip_prefix(&marker) else {
            return Ok(None);
        };

        let rest = Path::new(rest);
        if rest.as_os_str().is_empty()
            || !rest.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidComponent {
                what: "source_locator",
                value: locator.to_string(),
            });
        }
        Ok(Some(self.uploads_root.join(rest)))
    }

    fn effective_category<'a>(&self, category: Option<&'a str>) -> Result<Option<&'a str>> {
        if !self.category_partitioning {
            return Ok(None);
        }
        match category {
            Some(category) if !category.is_empty() => {
                validate_component(category, "category_partition")?;
                Ok(Some(category))
            }
            _ => Ok(None),
        }
    }
}

/// Accept only a single normal path component: no separators, no `.`/`..`,
/// not empty.
pub fn validate_component(value: &str, what: &'static str) -> Result<()> {
    let invalid = || StorageError::InvalidComponent {
        what,
        value: value.to_string(),
    };

    if value.is_empty() || value.contains('/') || value.contains('\\') || value.contains('\0') {
        return Err(invalid());
    }
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(partitioning: bool) -> StorageLayout {
        StorageLayout::new(PathBuf::from("/data/uploads"), "/uploads/", partitioning)
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let layout = layout(false);
        let first = layout.resolve("v1", None, PathKind::Hls).unwrap();
        let second = layout.resolve("v1", None, PathKind::Hls).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, PathBuf::from("/data/uploads/hls/v1"));
    }

    #[test]
    fn test_category_only_when_partitioning_enabled() {
        assert_eq!(
            layout(false).resolve("v1", Some("math"), PathKind::Hls).unwrap(),
            PathBuf::from("/data/uploads/hls/v1")
        );
        assert_eq!(
            layout(true).resolve("v1", Some("math"), PathKind::Hls).unwrap(),
            PathBuf::from("/data/uploads/hls/math/v1")
        );
        assert_eq!(
            layout(true).resolve("v1", Some("math"), PathKind::Raw).unwrap(),
            PathBuf::from("/data/uploads/raw/v1")
        );
    }

    #[test]
    fn test_public_paths() {
        assert_eq!(
            layout(false).manifest_public_path("v1", None).unwrap(),
            "/uploads/hls/v1/master.m3u8"
        );
        assert_eq!(
            layout(true).manifest_public_path("v1", Some("math")).unwrap(),
            "/uploads/hls/math/v1/master.m3u8"
        );
        assert_eq!(layout(true).object_prefix("v1", Some("math")).unwrap(), "hls/math/v1");
    }

    #[test]
    fn test_rejects_path_like_components() {
        for bad in ["", ".", "..", "a/b", "../v1", "a\\b"] {
            assert!(validate_component(bad, "video_id").is_err(), "{bad:?}");
        }
        assert!(validate_component("v1", "video_id").is_ok());
        assert!(validate_component("video.final-2", "video_id").is_ok());
        assert!(layout(true).resolve("v1", Some(".."), PathKind::Hls).is_err());
    }

    #[test]
    fn test_rewrite_public_path() {
        let layout = layout(false);
        assert_eq!(
            layout
                .rewrite_public_path("/uploads/raw/abc/original.mp4")
                .unwrap(),
            Some(PathBuf::from("/data/uploads/raw/abc/original.mp4"))
        );
        assert_eq!(layout.rewrite_public_path("/srv/raw/abc.mp4").unwrap(), None);
        assert!(layout.rewrite_public_path("/uploads/../etc/passwd").is_err());
    }
}
