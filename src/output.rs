//! The session-owned output directory: creation, write check, and purge.

use std::io;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::StreamError;

/// `stream_<digits>.ts`, the only segment shape the transcoder is told to write.
pub fn is_segment_name(name: &str) -> bool {
    name.strip_prefix("stream_")
        .and_then(|rest| rest.strip_suffix(".ts"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Anything a previous run may have left behind: the configured playlist,
/// other `stream*.m3u8` variants, ffmpeg's `.tmp` rewrite files, and numbered
/// segments.
pub fn is_stream_artifact(name: &str, playlist_name: &str) -> bool {
    if is_segment_name(name) {
        return true;
    }
    let playlist = name.strip_suffix(".tmp").unwrap_or(name);
    if playlist == playlist_name {
        return true;
    }
    playlist.starts_with("stream") && playlist.ends_with(".m3u8")
}

/// Create `dir` if needed and prove it is writable by creating a scratch file.
pub async fn ensure_writable(dir: &Path) -> Result<(), StreamError> {
    let denied = |e: io::Error| StreamError::WriteDenied {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    tokio::fs::create_dir_all(dir).await.map_err(denied)?;
    let probe = dir.join(".write-check");
    tokio::fs::write(&probe, b"").await.map_err(denied)?;
    remove_if_present(&probe).await.map_err(denied)?;
    Ok(())
}

/// Delete every stream artifact in `dir`. A missing directory or a file that
/// disappears underneath us counts as already purged.
pub async fn purge(dir: &Path, playlist_name: &str) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_stream_artifact(name, playlist_name) {
            continue;
        }
        match remove_if_present(&entry.path()).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(file = %entry.path().display(), error = %e, "Failed to remove stale artifact")
            }
        }
    }
    debug!(dir = %dir.display(), removed, "Purged output directory");
    Ok(removed)
}

/// True once the playlist exists and at least one numbered segment sits next to it.
pub async fn has_playable_output(dir: &Path, playlist_name: &str) -> bool {
    if tokio::fs::metadata(dir.join(playlist_name)).await.is_err() {
        return false;
    }
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_str().is_some_and(is_segment_name) {
            return true;
        }
    }
    false
}

async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_names() {
        assert!(is_segment_name("stream_0.ts"));
        assert!(is_segment_name("stream_1234.ts"));
        assert!(!is_segment_name("stream_.ts"));
        assert!(!is_segment_name("stream_12a.ts"));
        assert!(!is_segment_name("stream_1.ts.bak"));
        assert!(!is_segment_name("other_1.ts"));
        assert!(!is_segment_name("../stream_1.ts"));
    }

    #[test]
    fn artifacts_cover_playlists_and_segments() {
        assert!(is_stream_artifact("stream.m3u8", "stream.m3u8"));
        assert!(is_stream_artifact("stream_low.m3u8", "stream.m3u8"));
        assert!(is_stream_artifact("stream.m3u8.tmp", "stream.m3u8"));
        assert!(is_stream_artifact("stream_7.ts", "stream.m3u8"));
        assert!(!is_stream_artifact("index.html", "stream.m3u8"));
        assert!(!is_stream_artifact("notes.m3u8", "stream.m3u8"));
    }

    #[test]
    fn configured_playlist_name_is_an_artifact() {
        assert!(is_stream_artifact("live.m3u8", "live.m3u8"));
        assert!(is_stream_artifact("live.m3u8.tmp", "live.m3u8"));
        assert!(!is_stream_artifact("live.m3u8", "stream.m3u8"));
        assert!(!is_stream_artifact("live.txt", "live.m3u8"));
    }

    #[tokio::test]
    async fn purge_removes_only_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["stream.m3u8", "stream_0.ts", "stream_1.ts", "keep.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let removed = purge(dir.path(), "stream.m3u8").await.unwrap();
        assert_eq!(removed, 3);
        assert!(dir.path().join("keep.txt").exists());
        assert!(!dir.path().join("stream.m3u8").exists());
    }

    #[tokio::test]
    async fn purge_removes_custom_playlist() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["live.m3u8", "live.m3u8.tmp", "stream_4.ts", "keep.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(purge(dir.path(), "live.m3u8").await.unwrap(), 3);
        assert!(!dir.path().join("live.m3u8").exists());
        assert!(!dir.path().join("live.m3u8.tmp").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn purge_of_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(purge(&dir.path().join("absent"), "stream.m3u8").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn playable_needs_playlist_and_segment() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_playable_output(dir.path(), "stream.m3u8").await);

        std::fs::write(dir.path().join("stream.m3u8"), b"#EXTM3U\n").unwrap();
        assert!(!has_playable_output(dir.path(), "stream.m3u8").await);

        std::fs::write(dir.path().join("stream_0.ts"), b"").unwrap();
        assert!(has_playable_output(dir.path(), "stream.m3u8").await);
    }

    #[tokio::test]
    async fn ensure_writable_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_writable(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(".write-check").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ensure_writable_reports_write_denied() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let err = ensure_writable(&blocker.join("sub")).await.unwrap_err();
        assert_eq!(err.cause(), "write-denied");
    }
}
