//! # Upload Intake
//!
//! Reads a multipart body and writes every file part into the scratch
//! directory. Parts are accepted under any field name; a part counts as a
//! file when its content disposition carries a `filename`. Plain form
//! fields are read to the end and ignored.

use super::scratch::ScratchDir;
use super::session::MergeSession;
use crate::config::LimitsConfig;
use crate::error::{AppError, AppResult};
use actix_multipart::{Field, Multipart, MultipartError};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// One uploaded file, already persisted on disk.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Form field the part arrived under (the ordering key comes from it)
    pub field_name: String,
    /// Filename the client sent
    pub original_name: String,
    /// Where the bytes are stored
    pub path: PathBuf,
    /// Position among the file parts of the request, starting at 0
    pub arrival_index: usize,
    pub size_bytes: u64,
}

/// Persist every file part of `payload` into `scratch`, registering each
/// path with `session` before writing to it.
///
/// Fails with [`AppError::NoFiles`] when the body holds no file part,
/// including requests that are not multipart at all.
pub async fn receive_uploads(
    mut payload: Multipart,
    scratch: &ScratchDir,
    session: &mut MergeSession,
    limits: &LimitsConfig,
) -> AppResult<()> {
    let mut parts_seen = 0usize;

    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(field) => field,
            Err(err) if parts_seen == 0 => return Err(before_first_part(err)),
            Err(err) => return Err(err.into()),
        };
        parts_seen += 1;

        let (field_name, original_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => (String::new(), None),
        };

        let Some(original_name) = original_name else {
            // Not a file part; drain it so the next part can be read
            while let Some(chunk) = field.next().await {
                chunk?;
            }
            continue;
        };

        if session.uploads.len() >= limits.max_files {
            return Err(AppError::TooManyFiles(limits.max_files));
        }

        let path = scratch.upload_path(&original_name);
        session.track(path.clone());
        let size_bytes = persist_field(&mut field, &path, limits.max_file_bytes).await?;

        let arrival_index = session.uploads.len();
        debug!(
            session_id = %session.session_id,
            field = %field_name,
            file = %original_name,
            arrival_index,
            size_bytes,
            "Stored uploaded part"
        );

        session.accept(Upload {
            field_name,
            original_name,
            path,
            arrival_index,
            size_bytes,
        });
    }

    if session.uploads.is_empty() {
        return Err(AppError::NoFiles);
    }

    Ok(())
}

/// A body that fails before its first part carries no files, so a missing
/// or non-multipart Content-Type and an empty stream answer like an empty form.
fn before_first_part(err: MultipartError) -> AppError {
    match err {
        MultipartError::ContentTypeMissing
        | MultipartError::ContentTypeIncompatible
        | MultipartError::Incomplete => AppError::NoFiles,
        other => other.into(),
    }
}

/// Stream one field to `path`, enforcing the per-file size limit.
async fn persist_field(field: &mut Field, path: &Path, max_bytes: u64) -> AppResult<u64> {
    let mut file = File::create(path).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.next().await {
        let data = chunk?;
        written += data.len() as u64;
        if written > max_bytes {
            return Err(AppError::FileTooLarge(max_bytes));
        }
        file.write_all(&data).await?;
    }

    file.flush().await?;
    Ok(written)
}
