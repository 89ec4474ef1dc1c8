//! # Error Handling
//!
//! This module defines the error type returned by every handler and how it is
//! converted into an HTTP response.
//!
//! ## Shape on the wire
//! Errors are kept structured (a kind, a fixed user-facing message and an
//! optional diagnostic) everywhere inside the service. Only
//! [`ResponseError::error_response`] flattens them into the JSON body clients
//! see:
//!
//! ```json
//! { "error": "Failed to merge audio files", "details": "<ffmpeg stderr>" }
//! ```
//!
//! `details` is omitted when there is nothing useful to add, e.g. for the
//! "No audio files provided" response.
//!
//! ## Traits for Error Conversion
//! - **From trait**: Automatically converts between error types so `?` works
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted in logs

use actix_multipart::MultipartError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **NoFiles / InvalidUpload / TooManyFiles**: Client sent an unusable upload (400)
/// - **FileTooLarge**: A single part exceeded the configured size (413)
/// - **Concatenation / Timeout / Io**: The merge itself failed (500)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Concatenation(stderr));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// The request carried no file parts at all
    NoFiles,

    /// The multipart body could not be parsed
    InvalidUpload(String),

    /// More file parts than `limits.max_files`
    TooManyFiles(usize),

    /// A file part grew past `limits.max_file_bytes`
    FileTooLarge(u64),

    /// The external tool exited unsuccessfully or could not be started;
    /// carries its diagnostic output
    Concatenation(String),

    /// The external tool did not finish in time
    Timeout(u64),

    /// Reading or writing a scratch artifact failed
    Io(String),
}

impl AppError {
    /// Machine-readable tag, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NoFiles => "no_files",
            AppError::InvalidUpload(_) => "invalid_upload",
            AppError::TooManyFiles(_) => "too_many_files",
            AppError::FileTooLarge(_) => "file_too_large",
            AppError::Concatenation(_) => "concatenation",
            AppError::Timeout(_) => "timeout",
            AppError::Io(_) => "io",
        }
    }

    /// The short message put in the `error` field of the response body.
    pub fn message(&self) -> &'static str {
        match self {
            AppError::NoFiles => "No audio files provided",
            AppError::InvalidUpload(_) => "Invalid multipart upload",
            AppError::TooManyFiles(_) => "Too many audio files",
            AppError::FileTooLarge(_) => "Audio file too large",
            AppError::Concatenation(_) | AppError::Timeout(_) | AppError::Io(_) => {
                "Failed to merge audio files"
            }
        }
    }

    /// Diagnostic text for the `details` field, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            AppError::NoFiles => None,
            AppError::InvalidUpload(msg)
            | AppError::Concatenation(msg)
            | AppError::Io(msg) => Some(msg.clone()),
            AppError::TooManyFiles(limit) => {
                Some(format!("at most {} files may be merged in one request", limit))
            }
            AppError::FileTooLarge(limit) => {
                Some(format!("each file must be at most {} bytes", limit))
            }
            AppError::Timeout(secs) => Some(format!("ffmpeg did not finish within {} seconds", secs)),
        }
    }
}

/// Implementation of the Display trait for AppError.
///
/// This is what ends up in the logs, so it includes the diagnostic text.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.details() {
            Some(details) => write!(f, "{}: {}", self.message(), details),
            None => write!(f, "{}", self.message()),
        }
    }
}

impl std::error::Error for AppError {}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - NoFiles/InvalidUpload/TooManyFiles → 400 (Bad Request)
/// - FileTooLarge → 413 (Payload Too Large)
/// - Everything else → 500 (Internal Server Error)
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoFiles | AppError::InvalidUpload(_) | AppError::TooManyFiles(_) => {
                StatusCode::BAD_REQUEST  // 400
            }
            AppError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,  // 413
            AppError::Concatenation(_) | AppError::Timeout(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR  // 500
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self.details() {
            Some(details) => json!({
                "error": self.message(),    // Human-readable error message
                "details": details,         // What actually went wrong
            }),
            None => json!({ "error": self.message() }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Scratch-file reads and writes are part of the merge, so they surface as
/// "Failed to merge audio files".
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

/// A broken multipart body is the client's fault.
impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::InvalidUpload(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
