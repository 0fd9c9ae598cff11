//! Development-only helpers. Nothing on the worker's production path calls
//! into this module; the CLI reaches it only behind `--autodetect-uploads-root`.

use std::path::{Path, PathBuf};

use tracing::debug;

const CANDIDATES: &[&str] = &[
    "uploads",
    "../uploads",
    "public/uploads",
    "../backend/uploads",
    "backend/uploads",
];

/// First candidate under `base` that looks like an uploads root
/// (a directory containing `raw/`).
pub fn autodetect_uploads_root(base: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|candidate| base.join(candidate))
        .inspect(|path| debug!(candidate = %path.display(), "Probing uploads root"))
        .find(|path| path.join("raw").is_dir())
}
