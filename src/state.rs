//! # Application State Management
//!
//! This module manages state shared by every HTTP request handler.
//!
//! ## What lives here
//! - **config**: read-only after startup, so a plain `Arc` is enough
//! - **scratch**: handle to the scratch directory created at startup
//! - **ffmpeg**: the configured concatenator
//! - **metrics**: counters updated by every request, behind `Arc<RwLock<_>>`
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many HTTP handlers can hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time
//!
//! Merge requests themselves share nothing through this state; they are
//! isolated by unique filenames in the scratch directory.

use crate::config::AppConfig;        // Our configuration types
use crate::merge::{FfmpegConcatenator, ScratchDir};
use std::collections::HashMap;       // For storing per-endpoint metrics
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;              // For tracking server uptime

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Debug, Clone)]**: Cloning only bumps reference counts, so every
///   worker thread gets its own cheap copy
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, fixed once the server is running
    pub config: Arc<AppConfig>,

    /// Where merge requests keep their temporary files
    pub scratch: ScratchDir,

    /// The external concatenation tool
    pub ffmpeg: FfmpegConcatenator,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no Arc<RwLock> needed)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total 4xx/5xx responses (for reliability monitoring)
/// - **active_merges**: Merges currently between intake and end of streaming
/// - **merges_completed / merges_failed**: Outcome of every merge request
/// - **endpoint_metrics**: Per-endpoint statistics
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Merge requests currently in flight
    pub active_merges: u32,

    /// Merges whose ffmpeg run succeeded
    pub merges_completed: u64,

    /// Merges that ended in an error response, keyed by error kind
    pub merges_failed: HashMap<String, u64>,

    /// Detailed metrics for each API endpoint
    /// Key: endpoint name (e.g., "POST /merge")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

/// Keeps `active_merges` incremented for as long as it is alive.
///
/// The merge handler creates one and hands it to the response stream, so
/// a merge counts as active until its output has been sent (or dropped).
#[derive(Debug)]
pub struct ActiveMerge {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveMerge {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_merges = metrics.active_merges.saturating_sub(1);
    }
}

/// Implementation of methods for AppState.
impl AppState {
    /// Create a new AppState from the loaded configuration and the scratch
    /// directory prepared at startup.
    pub fn new(config: AppConfig, scratch: ScratchDir) -> Self {
        let ffmpeg = FfmpegConcatenator::new(config.ffmpeg.binary.clone(), config.ffmpeg_timeout());
        Self {
            config: Arc::new(config),
            scratch,
            ffmpeg,
            // Start with empty metrics
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            // Record when the server started
            start_time: Instant::now(),
        }
    }

    /// A poisoned lock only means another request panicked mid-update; the
    /// counters are still usable.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## HashMap operations:
    /// The first time we see an endpoint, we create a new EndpointMetric with default values.
    /// Subsequent requests update the existing metrics for that endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();

        // Get or create metrics for this specific endpoint
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark a merge as started; it stays active until the guard is dropped.
    pub fn begin_merge(&self) -> ActiveMerge {
        self.metrics_write().active_merges += 1;
        ActiveMerge {
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn record_merge_completed(&self) {
        self.metrics_write().merges_completed += 1;
    }

    pub fn record_merge_failed(&self, kind: &str) {
        *self.metrics_write().merges_failed.entry(kind.to_string()).or_default() += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// ## Why a snapshot:
    /// Cloning releases the lock immediately, so serializing the response
    /// never blocks requests that want to update a counter.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Implementation of utility methods for EndpointMetric.
impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    ///
    /// ## Example:
    /// If an endpoint has processed 10 requests taking a total of 500ms,
    /// the average response time would be 50ms per request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no average to calculate
        }
    }

    /// Calculate the error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no errors possible
        }
    }
}
