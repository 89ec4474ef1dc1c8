//! # Scratch Directory
//!
//! Every artifact of a merge (uploaded parts, the concat manifest and the
//! merged output) lives in one directory that is created when the server
//! starts. The handle is cloned into the application state and passed down
//! explicitly; nothing in the request path looks the directory up on its own.
//!
//! Requests never coordinate with each other. Isolation comes only from the
//! random identifier in every filename: a collision is astronomically
//! unlikely, but nothing here makes it impossible.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension of the merged output. ffmpeg picks the muxer from it.
const OUTPUT_EXTENSION: &str = "mp3";

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create the directory (and any missing parents) and return a handle to it.
    ///
    /// Relative paths are made absolute against the current working
    /// directory so the manifest never depends on where ffmpeg is started.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        tokio::fs::create_dir_all(path).await?;
        let root = tokio::fs::canonicalize(path).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh, collision-resistant path for one uploaded part.
    pub fn upload_path(&self, original_name: &str) -> PathBuf {
        self.root
            .join(format!("{}-{}", Uuid::new_v4(), sanitize_file_name(original_name)))
    }

    pub fn manifest_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}-list.txt", session_id))
    }

    pub fn output_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join(format!("{}-merged.{}", session_id, OUTPUT_EXTENSION))
    }
}

/// Keep only the last path component of a client-supplied filename and
/// replace anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // "." and ".." would otherwise survive as a bare component
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
