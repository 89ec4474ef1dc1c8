//! # Audio Merge Pipeline
//!
//! Everything a `POST /merge` request goes through, one module per step:
//!
//! - **upload**: multipart parts → files in the scratch directory
//! - **ordering**: sort parts by the number in their field name
//! - **manifest**: write the concat list ffmpeg reads
//! - **ffmpeg**: run the stream-copy concatenation
//! - **stream**: send the merged file back, then clean up
//! - **session**: owns the request's artifacts and deletes them together
//! - **scratch**: the directory all of the above lives in

pub mod ffmpeg;
pub mod manifest;
pub mod ordering;
pub mod scratch;
pub mod session;
pub mod stream;
pub mod upload;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use ffmpeg::FfmpegConcatenator;
pub use scratch::ScratchDir;
pub use session::{MergeSession, MergeStage};
pub use stream::ArtifactStream;
pub use upload::receive_uploads;
