//! Filesystem utilities for moving and locating produced files.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, replacing any existing `dst`.
///
/// Attempts a rename first. If that fails with EXDEV (cross-device link
/// error), it falls back to copying into a temporary file next to `dst` and
/// renaming that into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Copy file to destination (via temp file) then delete source.
async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(MediaError::from(e));
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Locate the file an external tool actually produced for `prefix`.
///
/// Tools may append format or extension suffixes to the requested name, so
/// this returns the regular file in `dir` whose name starts with `prefix`,
/// preferring an exact match, then the largest candidate. Partial downloads
/// (`.part`, `.ytdl`) are ignored.
pub async fn find_by_prefix(dir: impl AsRef<Path>, prefix: &str) -> MediaResult<Option<PathBuf>> {
    let dir = dir.as_ref();
    let mut entries = fs::read_dir(dir).await?;
    let mut best: Option<(PathBuf, u64)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        if name == prefix {
            return Ok(Some(entry.path()));
        }

        let len = metadata.len();
        if best.as_ref().map_or(true, |(_, best_len)| len > *best_len) {
            best = Some((entry.path(), len));
        }
    }

    Ok(best.map(|(path, _)| path))
}

/// Remove every file in `dir` whose name starts with `prefix`, best effort.
/// Returns how many were removed.
pub async fn remove_by_prefix(dir: impl AsRef<Path>, prefix: &str) -> usize {
    let dir = dir.as_ref();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot list {} for cleanup: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}

/// Remove a file, logging instead of failing.
pub async fn remove_quietly(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
