use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": state.config.service.name,
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let merges_failed: u64 = metrics.merges_failed.values().sum();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": state.config.service.name,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "merges": {
            "active": metrics.active_merges,
            "completed": metrics.merges_completed,
            "failed": merges_failed,
            "failed_by_kind": metrics.merges_failed,
        },
        "endpoints": endpoint_stats,
        "scratch": scratch_status(&state),
        "ffmpeg": {
            "binary": state.ffmpeg.binary().display().to_string(),
            "timeout_secs": state.config.ffmpeg.timeout_secs,
        }
    }))
}

/// Entries currently in the scratch directory. With no merge in flight this
/// should be zero; anything else means artifacts were left behind.
fn scratch_status(state: &AppState) -> serde_json::Value {
    match std::fs::read_dir(state.scratch.root()) {
        Ok(entries) => json!({
            "path": state.scratch.root().display().to_string(),
            "entries": entries.count(),
            "available": true
        }),
        Err(e) => json!({
            "path": state.scratch.root().display().to_string(),
            "available": false,
            "error": e.to_string()
        }),
    }
}
