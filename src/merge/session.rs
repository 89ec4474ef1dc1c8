//! # Merge Session
//!
//! One merge request owns one `MergeSession`. The session records every
//! artifact the request creates in the scratch directory and deletes all of
//! them together when the request is over.
//!
//! ## Session Lifecycle:
//! 1. **Received**: Session created, multipart body not read yet
//! 2. **FilesPersisted**: Every file part is on disk
//! 3. **Ordered**: Parts sorted by the number in their field name
//! 4. **ManifestWritten**: Concat list written next to the uploads
//! 5. **ToolInvoked**: ffmpeg finished and produced the output
//! 6. **Streaming**: Output is being sent to the client
//! 7. **Failed**: Some step returned an error
//! 8. **Cleaned**: All artifacts removed (reached on every path)
//!
//! ## Cleanup guarantee
//! [`MergeSession::cleanup`] runs at most once; `Drop` calls it as well, so
//! an early return, a dropped response body or a cancelled request future
//! all end in the same cleanup.

use super::scratch::ScratchDir;
use super::upload::Upload;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a merge request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStage {
    Received,
    FilesPersisted,
    Ordered,
    ManifestWritten,
    ToolInvoked,
    Streaming,
    Failed,
    Cleaned,
}

impl MergeStage {
    /// Convert stage to string for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStage::Received => "received",
            MergeStage::FilesPersisted => "files_persisted",
            MergeStage::Ordered => "ordered",
            MergeStage::ManifestWritten => "manifest_written",
            MergeStage::ToolInvoked => "tool_invoked",
            MergeStage::Streaming => "streaming",
            MergeStage::Failed => "failed",
            MergeStage::Cleaned => "cleaned",
        }
    }
}

pub struct MergeSession {
    /// Unique identifier for this session (UUID v4)
    pub session_id: String,

    /// Uploaded parts, in arrival order until the session is ordered
    pub uploads: Vec<Upload>,

    /// Upload paths registered before their first byte is written, so a
    /// part that fails halfway is still removed
    pending: Vec<PathBuf>,

    manifest_path: PathBuf,
    output_path: PathBuf,
    stage: MergeStage,
    cleaned: bool,
}

impl MergeSession {
    /// Start a session whose manifest and output paths are namespaced by a
    /// fresh session id inside `scratch`.
    pub fn new(scratch: &ScratchDir) -> Self {
        let session_id = Uuid::new_v4().to_string();
        Self {
            manifest_path: scratch.manifest_path(&session_id),
            output_path: scratch.output_path(&session_id),
            session_id,
            uploads: Vec::new(),
            pending: Vec::new(),
            stage: MergeStage::Received,
            cleaned: false,
        }
    }

    pub fn stage(&self) -> MergeStage {
        self.stage
    }

    pub fn advance(&mut self, stage: MergeStage) {
        debug!(
            session_id = %self.session_id,
            from = self.stage.as_str(),
            to = stage.as_str(),
            "Merge session stage changed"
        );
        self.stage = stage;
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Register a path that is about to be written.
    pub fn track(&mut self, path: PathBuf) {
        self.pending.push(path);
    }

    /// Move a fully written upload from the pending list into `uploads`.
    pub fn accept(&mut self, upload: Upload) {
        self.pending.retain(|p| p != &upload.path);
        self.uploads.push(upload);
    }

    /// Every path this session may have created.
    fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.uploads
            .iter()
            .map(|u| u.path.as_path())
            .chain(self.pending.iter().map(PathBuf::as_path))
            .chain([self.manifest_path.as_path(), self.output_path.as_path()])
    }

    /// Delete every artifact of this session.
    ///
    /// Missing files are fine (not every stage creates every artifact).
    /// Other failures are logged and swallowed: they must never replace the
    /// response the client is already getting. Returns the number of files
    /// that could not be removed.
    pub fn cleanup(&mut self) -> usize {
        if self.cleaned {
            return 0;
        }
        self.cleaned = true;

        let mut removed = 0;
        let mut failed = 0;
        for path in self.artifacts() {
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    failed += 1;
                    warn!(
                        session_id = %self.session_id,
                        path = %path.display(),
                        error = %e,
                        "Cleanup error: could not remove scratch artifact"
                    );
                }
            }
        }

        debug!(
            session_id = %self.session_id,
            last_stage = self.stage.as_str(),
            removed,
            failed,
            "Merge session cleaned up"
        );
        self.stage = MergeStage::Cleaned;
        failed
    }
}

impl Drop for MergeSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
