//! Response body for the merged file.
//!
//! The stream owns the [`MergeSession`]. When the last chunk has been read
//! the file is closed and the session cleaned up right away. When actix
//! drops the body before that (client disconnected, write failed) the
//! session's `Drop` does the same cleanup.

use super::session::{MergeSession, MergeStage};
use crate::state::ActiveMerge;
use actix_web::web::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

pub struct ArtifactStream {
    /// `None` once the file is exhausted or failed
    reader: Option<ReaderStream<File>>,
    session: MergeSession,
    bytes_sent: u64,
    _active: Option<ActiveMerge>,
}

impl ArtifactStream {
    /// Open the session's output file for streaming.
    ///
    /// Returns the stream and the file length. On error the session is
    /// handed back so the caller can fail it properly.
    pub async fn open(
        mut session: MergeSession,
        active: Option<ActiveMerge>,
    ) -> Result<(Self, u64), (std::io::Error, MergeSession)> {
        let file = match File::open(session.output_path()).await {
            Ok(file) => file,
            Err(e) => return Err((e, session)),
        };
        let len = match file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(e) => return Err((e, session)),
        };

        session.advance(MergeStage::Streaming);
        Ok((
            Self {
                reader: Some(ReaderStream::new(file)),
                session,
                bytes_sent: 0,
                _active: active,
            },
            len,
        ))
    }

    fn finish(&mut self) {
        // Close the file before deleting it
        self.reader = None;
        self.session.cleanup();
    }
}

impl Stream for ArtifactStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(reader).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!(
                    session_id = %this.session.session_id,
                    error = %e,
                    "Failed to read merged output while streaming"
                );
                this.session.advance(MergeStage::Failed);
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                info!(
                    session_id = %this.session.session_id,
                    bytes_sent = this.bytes_sent,
                    "Merged audio streamed"
                );
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
