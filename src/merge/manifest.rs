//! Concat-demuxer manifest.
//!
//! ffmpeg's concat demuxer reads a text file with one `file '<path>'`
//! directive per input. Inside the single quotes a literal `'` has to be
//! written as `'\''` (close quote, escaped quote, reopen quote).

use super::upload::Upload;
use std::path::Path;

/// Render the manifest for `uploads`, in the order given.
pub fn render(uploads: &[Upload]) -> String {
    uploads
        .iter()
        .map(|upload| format!("file '{}'", escape_path(&upload.path)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write the manifest for `uploads` to `path`.
pub async fn write(path: &Path, uploads: &[Upload]) -> std::io::Result<()> {
    tokio::fs::write(path, render(uploads)).await
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
