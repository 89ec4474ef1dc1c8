//! # Merge Endpoint
//!
//! `POST /merge` takes a multipart body with any number of file parts,
//! concatenates them in the order given by the numbers in their field names
//! and streams the result back as `merged-podcast.mp3`.
//!
//! ## Request flow:
//! 1. Store every file part in the scratch directory
//! 2. Sort the parts (`audio_2, audio_0, audio_10` → `audio_0, audio_2, audio_10`)
//! 3. Write the concat manifest
//! 4. Run ffmpeg with stream copy
//! 5. Stream the output; the session's files are deleted once it is sent
//!
//! Any failure deletes the session's files before the error response goes out.

use crate::error::{AppError, AppResult};
use crate::merge::{manifest, ordering, receive_uploads, ArtifactStream, MergeSession, MergeStage};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use tracing::{debug, error, info, warn};

/// Content type of the merged output.
pub const MERGED_CONTENT_TYPE: &str = "audio/mpeg";

/// Filename suggested to the client for the merged output.
pub const MERGED_FILE_NAME: &str = "merged-podcast.mp3";

pub async fn merge_audio(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let active = state.begin_merge();
    let mut session = MergeSession::new(&state.scratch);
    info!(session_id = %session.session_id, "Merge request received");

    if let Err(err) = prepare(&state, payload, &mut session).await {
        return Err(fail(&state, session, err));
    }

    match ArtifactStream::open(session, Some(active)).await {
        Ok((stream, len)) => {
            state.record_merge_completed();
            Ok(HttpResponse::Ok()
                .content_type(MERGED_CONTENT_TYPE)
                .insert_header((
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", MERGED_FILE_NAME),
                ))
                .no_chunking(len)
                .streaming(stream))
        }
        Err((e, session)) => Err(fail(&state, session, e.into())),
    }
}

/// Everything up to and including the ffmpeg run.
async fn prepare(
    state: &AppState,
    payload: Multipart,
    session: &mut MergeSession,
) -> AppResult<()> {
    receive_uploads(payload, &state.scratch, session, &state.config.limits).await?;
    session.advance(MergeStage::FilesPersisted);

    ordering::sort_uploads(&mut session.uploads);
    session.advance(MergeStage::Ordered);

    let fields: Vec<&str> = session.uploads.iter().map(|u| u.field_name.as_str()).collect();
    let total_bytes: u64 = session.uploads.iter().map(|u| u.size_bytes).sum();
    info!(
        session_id = %session.session_id,
        files = ?fields,
        total_bytes,
        "Merging files"
    );

    for (position, upload) in session.uploads.iter().enumerate() {
        debug!(
            session_id = %session.session_id,
            position,
            field = %upload.field_name,
            file = %upload.original_name,
            arrival_index = upload.arrival_index,
            "Manifest entry"
        );
    }
    manifest::write(session.manifest_path(), &session.uploads).await?;
    session.advance(MergeStage::ManifestWritten);

    state
        .ffmpeg
        .concat(session.manifest_path(), session.output_path())
        .await?;
    session.advance(MergeStage::ToolInvoked);

    Ok(())
}

/// Log the failure, clean up right away and hand the error back for the response.
fn fail(state: &AppState, mut session: MergeSession, err: AppError) -> AppError {
    let stage = session.stage();
    match &err {
        AppError::NoFiles
        | AppError::InvalidUpload(_)
        | AppError::TooManyFiles(_)
        | AppError::FileTooLarge(_) => warn!(
            session_id = %session.session_id,
            stage = stage.as_str(),
            kind = err.kind(),
            error = %err,
            "Merge rejected"
        ),
        _ => error!(
            session_id = %session.session_id,
            stage = stage.as_str(),
            kind = err.kind(),
            error = %err,
            "Merge error"
        ),
    }

    session.advance(MergeStage::Failed);
    session.cleanup();
    state.record_merge_failed(err.kind());
    err
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::merge::testing::{
        fake_ffmpeg, stalled_pid, wait_until_gone, write_script, FAILING_FFMPEG, STALLING_FFMPEG,
    };
    use crate::merge::ScratchDir;
    use actix_web::body::{BodySize, MessageBody};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    const BOUNDARY: &str = "----merge-test-boundary";

    enum Part<'a> {
        File { field: &'a str, filename: &'a str, data: &'a [u8] },
        Text { field: &'a str, value: &'a str },
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::File { field, filename, data } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/mpeg\r\n\r\n",
                            field, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                Part::Text { field, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", field, value)
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn merge_request(parts: &[Part<'_>]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/merge")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(parts))
    }

    async fn state_with(
        tmp: &Path,
        binary: PathBuf,
        configure: impl FnOnce(&mut AppConfig),
    ) -> AppState {
        let mut config = AppConfig::default();
        config.ffmpeg.binary = binary.display().to_string();
        configure(&mut config);
        let scratch = ScratchDir::create(tmp.join("scratch")).await.unwrap();
        AppState::new(config, scratch)
    }

    fn scratch_entries(state: &AppState) -> usize {
        std::fs::read_dir(state.scratch.root()).unwrap().count()
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .route("/merge", web::post().to(merge_audio)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_merge_orders_by_field_number() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |_| {}).await;
        let app = app!(state);

        let req = merge_request(&[
            Part::File { field: "audio_2", filename: "c.mp3", data: b"[two]" },
            Part::File { field: "audio_0", filename: "a.mp3", data: b"[zero]" },
            Part::File { field: "audio_10", filename: "b.mp3", data: b"[ten]" },
        ]);
        let resp = test::call_service(&app, req.to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/mpeg");
        assert_eq!(
            resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"merged-podcast.mp3\""
        );
        // Sent with a Content-Length, not chunked
        assert_eq!(resp.response().body().size(), BodySize::Sized(16));

        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"[zero][two][ten]");

        assert_eq!(scratch_entries(&state), 0);
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.merges_completed, 1);
        assert_eq!(metrics.active_merges, 0);
    }

    #[actix_web::test]
    async fn test_field_without_digits_sorts_first_and_text_fields_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |_| {}).await;
        let app = app!(state);

        let req = merge_request(&[
            Part::File { field: "audio_1", filename: "b.mp3", data: b"B" },
            Part::Text { field: "title", value: "Episode 12" },
            Part::File { field: "intro", filename: "a.mp3", data: b"A" },
        ]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&test::read_body(resp).await[..], b"AB");
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_no_files_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |_| {}).await;
        let app = app!(state);

        let req = merge_request(&[Part::Text { field: "title", value: "nothing here" }]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "error": "No audio files provided" }));
        assert_eq!(scratch_entries(&state), 0);
        assert_eq!(state.get_metrics_snapshot().merges_failed["no_files"], 1);
    }

    /// Send `req` to a fresh app and expect the plain no-files answer.
    async fn assert_no_files(req: test::TestRequest) {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |_| {}).await;
        let app = app!(state);

        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "error": "No audio files provided" }));
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_missing_content_type_is_no_files() {
        assert_no_files(test::TestRequest::post().uri("/merge").set_payload("audio")).await;
    }

    #[actix_web::test]
    async fn test_json_body_is_no_files() {
        assert_no_files(
            test::TestRequest::post()
                .uri("/merge")
                .insert_header((header::CONTENT_TYPE, "application/json"))
                .set_payload(r#"{"audio_0":"a.mp3"}"#),
        )
        .await;
    }

    #[actix_web::test]
    async fn test_multipart_without_parts_is_no_files() {
        assert_no_files(
            test::TestRequest::post()
                .uri("/merge")
                .insert_header((header::CONTENT_TYPE, "multipart/form-data; boundary=xyz"))
                .set_payload("--xyz--"),
        )
        .await;
    }

    #[actix_web::test]
    async fn test_body_broken_after_first_part_is_invalid_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |_| {}).await;
        let app = app!(state);

        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nEpisode\r\n--{b}\r\n",
            b = BOUNDARY
        );
        body.push_str("Content-Disposition: form-data; name=\"audio_0\"; filename=\"a.mp3\"\r\n\r\nAAAA");
        let req = test::TestRequest::post()
            .uri("/merge")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body);

        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid multipart upload");
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_cancelled_request_kills_ffmpeg_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = write_script(tmp.path(), "ffmpeg-stall", STALLING_FFMPEG);
        let state = state_with(tmp.path(), binary, |_| {}).await;
        let app = app!(state);

        let req = merge_request(&[
            Part::File { field: "audio_0", filename: "a.mp3", data: b"A" },
            Part::File { field: "audio_1", filename: "b.mp3", data: b"B" },
        ]);
        let call = test::call_service(&app, req.to_request());
        assert!(tokio::time::timeout(Duration::from_secs(1), call).await.is_err());

        let pid = stalled_pid(tmp.path()).expect("ffmpeg should have been started");
        assert!(wait_until_gone(pid).await, "ffmpeg {} still running", pid);
        assert_eq!(scratch_entries(&state), 0);
        assert_eq!(state.get_metrics_snapshot().active_merges, 0);
    }

    #[actix_web::test]
    async fn test_ffmpeg_timeout_is_server_error() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = write_script(tmp.path(), "ffmpeg-stall", STALLING_FFMPEG);
        let state = state_with(tmp.path(), binary, |config| {
            config.ffmpeg.timeout_secs = 1;
        })
        .await;
        let app = app!(state);

        let req = merge_request(&[Part::File { field: "audio_0", filename: "a.mp3", data: b"A" }]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Failed to merge audio files");
        assert_eq!(body["details"], "ffmpeg did not finish within 1 seconds");

        let pid = stalled_pid(tmp.path()).expect("ffmpeg should have been started");
        assert!(wait_until_gone(pid).await, "ffmpeg {} still running", pid);
        assert_eq!(scratch_entries(&state), 0);
        assert_eq!(state.get_metrics_snapshot().merges_failed["timeout"], 1);
    }

    #[actix_web::test]
    async fn test_ffmpeg_failure_is_reported_and_cleaned_up() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = write_script(tmp.path(), "ffmpeg-fail", FAILING_FFMPEG);
        let state = state_with(tmp.path(), binary, |_| {}).await;
        let app = app!(state);

        let req = merge_request(&[
            Part::File { field: "audio_0", filename: "a.mp3", data: b"A" },
            Part::File { field: "audio_1", filename: "b.wav", data: b"B" },
        ]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Failed to merge audio files");
        assert!(body["details"]
            .as_str()
            .unwrap()
            .contains("Invalid data found when processing input"));
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_missing_ffmpeg_is_server_error() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), tmp.path().join("no-such-ffmpeg"), |_| {}).await;
        let app = app!(state);

        let req = merge_request(&[Part::File { field: "audio_0", filename: "a.mp3", data: b"A" }]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_file_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |config| {
            config.limits.max_file_bytes = 4;
        })
        .await;
        let app = app!(state);

        let req = merge_request(&[
            Part::File { field: "audio_0", filename: "a.mp3", data: b"ok" },
            Part::File { field: "audio_1", filename: "b.mp3", data: b"far too long" },
        ]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_file_count_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |config| {
            config.limits.max_files = 1;
        })
        .await;
        let app = app!(state);

        let req = merge_request(&[
            Part::File { field: "audio_0", filename: "a.mp3", data: b"A" },
            Part::File { field: "audio_1", filename: "b.mp3", data: b"B" },
        ]);
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Too many audio files");
        assert_eq!(scratch_entries(&state), 0);
    }

    #[actix_web::test]
    async fn test_concurrent_requests_do_not_mix() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), fake_ffmpeg(tmp.path()), |_| {}).await;
        let app = app!(state);

        let first = merge_request(&[
            Part::File { field: "audio_1", filename: "same.mp3", data: b"first-1|" },
            Part::File { field: "audio_0", filename: "same.mp3", data: b"first-0|" },
        ]);
        let second = merge_request(&[
            Part::File { field: "audio_0", filename: "same.mp3", data: b"second-0|" },
            Part::File { field: "audio_1", filename: "same.mp3", data: b"second-1|" },
        ]);

        let (first, second) = futures_util::future::join(
            test::call_service(&app, first.to_request()),
            test::call_service(&app, second.to_request()),
        )
        .await;

        assert_eq!(&test::read_body(first).await[..], b"first-0|first-1|");
        assert_eq!(&test::read_body(second).await[..], b"second-0|second-1|");
        assert_eq!(scratch_entries(&state), 0);
    }
}
