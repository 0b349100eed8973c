//! Local media library — a flat directory of files ffmpeg can decode.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Extensions offered for local playback.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "m4a", "ogg"];

fn is_audio_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            AUDIO_EXTENSIONS.iter().any(|known| *known == e)
        })
        .unwrap_or(false)
}

/// List playable file names in `dir`, sorted.  A missing or unreadable
/// directory yields an empty list rather than an error — the library is an
/// optional convenience, not a required resource.
pub async fn list_files(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "cannot read library dir: {}", e);
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(name) = entry.file_name().into_string() {
            if is_audio_file(&name) {
                names.push(name);
            }
        }
    }
    names.sort();
    names
}

/// Resolve a client-supplied file name against the library directory.
/// Only bare file names are accepted — anything that could escape the
/// directory is rejected.
pub fn resolve(dir: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty()
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return None;
    }
    Some(dir.join(name))
}
