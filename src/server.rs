//! HTTP surface: routing, validation, error mapping, and file streaming.
//!
//! Handlers never call the extractor on the async worker threads; every
//! extractor call goes through `spawn_blocking` so one slow download cannot
//! stall other requests.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, task};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use url::Url;

use crate::cleanup::CleanupScheduler;
use crate::config::ServiceConfig;
use crate::error::{DownloadError, ExtractionError, ValidationError};
use crate::extractor::Extractor;
use crate::metadata::{self, MetadataView};
use crate::orchestrator::{DownloadRequest, Downloader, StagedArtifact};

pub const SERVICE_NAME: &str = "tubefetch-api";

/// Hostnames (and their subdomains) accepted as video URLs.
const PLATFORM_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com"];

const INTERNAL_ERROR: &str = "Internal server error";
const ARTIFACT_MISSING: &str = "Download completed but file not found";

/// Everything the handlers need, constructed once in `main`.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServiceConfig>,
    extractor: Arc<dyn Extractor>,
    downloader: Arc<Downloader>,
    cleanup: CleanupScheduler,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        extractor: Arc<dyn Extractor>,
        cleanup: CleanupScheduler,
    ) -> Self {
        let downloader = Downloader::new(
            extractor.clone(),
            config.work_dir.clone(),
            config.serving_dir.clone(),
        );
        Self {
            config: Arc::new(config),
            extractor,
            downloader: Arc::new(downloader),
            cleanup,
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Generic 500. The real cause is logged by the caller, never sent.
    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR.to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::ExtractionFailed(source) => {
                extraction_error("Download failed", source)
            }
            missing @ DownloadError::ArtifactMissing { .. } => {
                error!(error = %missing, "extractor reported success without an output file");
                Self::bad_request(ARTIFACT_MISSING)
            }
            internal @ DownloadError::Internal { .. } => {
                error!(error = %internal, "download failed");
                Self::internal()
            }
        }
    }
}

fn metadata_error(err: ExtractionError) -> ApiError {
    extraction_error("Failed to extract video metadata", err)
}

/// The extractor's own failure message goes to the client; a binary that
/// cannot be started is a server fault and stays in the logs.
fn extraction_error(context: &str, err: ExtractionError) -> ApiError {
    match err {
        spawn @ ExtractionError::Spawn { .. } => {
            error!(error = %spawn, "extractor could not be started");
            ApiError::internal()
        }
        other => ApiError::bad_request(format!("{context}: {other}")),
    }
}

fn join_error(err: task::JoinError) -> ApiError {
    error!(error = %err, "blocking task failed");
    ApiError::internal()
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metadata", post(metadata_endpoint))
        .route("/download", post(download_endpoint))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Trims `raw` and checks it points at the video platform. Returns the URL
/// to hand to the extractor.
pub fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingUrl);
    }

    let parsed = match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ if !trimmed.contains("://") => Url::parse(&format!("https://{trimmed}"))
            .map_err(|_| ValidationError::UnsupportedUrl)?,
        _ => return Err(ValidationError::UnsupportedUrl),
    };

    let host = parsed
        .host_str()
        .ok_or(ValidationError::UnsupportedUrl)?
        .to_ascii_lowercase();
    let known = PLATFORM_HOSTS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    });
    if !known {
        return Err(ValidationError::UnsupportedUrl);
    }
    Ok(parsed.to_string())
}

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    status: &'static str,
    version: &'static str,
    environment: String,
    port: u16,
}

async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "YouTube Downloader API",
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        port: state.config.port,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    yt_dlp_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    yt_dlp_version: Option<String>,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let extractor = state.extractor.clone();
    let probe = task::spawn_blocking(move || extractor.version())
        .await
        .map_err(join_error)?;

    let response = match probe {
        Ok(version) => HealthResponse {
            status: "healthy",
            service: SERVICE_NAME,
            yt_dlp_available: true,
            yt_dlp_version: Some(version),
            port: state.config.port,
            error: None,
        },
        Err(err) => {
            warn!(error = %err, "health check failed");
            HealthResponse {
                status: "unhealthy",
                service: SERVICE_NAME,
                yt_dlp_available: false,
                yt_dlp_version: None,
                port: state.config.port,
                error: Some(err.to_string()),
            }
        }
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct MetadataRequest {
    url: String,
}

async fn metadata_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<MetadataRequest>, JsonRejection>,
) -> ApiResult<Json<MetadataView>> {
    let Json(request) = payload?;
    let url = validate_url(&request.url)?;

    let extractor = state.extractor.clone();
    let raw = task::spawn_blocking(move || metadata::fetch(extractor.as_ref(), &url))
        .await
        .map_err(join_error)?
        .map_err(metadata_error)?;

    Ok(Json(metadata::project(&raw)))
}

async fn download_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    let request = DownloadRequest::new(validate_url(&request.url)?, request.quality);
    info!(url = %request.url, quality = %request.quality, "download requested");

    let downloader = state.downloader.clone();
    let artifact = task::spawn_blocking(move || downloader.download(&request))
        .await
        .map_err(join_error)??;

    // The open handle keeps the bytes readable even if the timer fires
    // mid-stream.
    state
        .cleanup
        .schedule_delete(artifact.serving_path.clone(), state.config.cleanup_delay);

    stream_artifact(&artifact).await
}

async fn stream_artifact(artifact: &StagedArtifact) -> ApiResult<Response> {
    let file = File::open(&artifact.serving_path).await.map_err(|err| {
        error!(path = %artifact.serving_path.display(), error = %err, "opening staged file");
        ApiError::internal()
    })?;

    let mime = MimeGuess::from_path(&artifact.serving_path).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&artifact.file_name),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    info!(
        file = %artifact.file_name,
        size_bytes = artifact.size_bytes,
        staged_at = %artifact.created_at.to_rfc3339(),
        "streaming download"
    );
    Ok(response)
}

/// `attachment; filename="..."`, plus an RFC 5987 `filename*` when the name
/// cannot be sent verbatim as a quoted ASCII string.
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut value = format!("attachment; filename=\"{fallback}\"");
    if fallback != file_name {
        value.push_str("; filename*=UTF-8''");
        value.push_str(&encode_ext_value(file_name));
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn encode_ext_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

async fn not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::YtDlp;
    use crate::orchestrator::tests::StubExtractor;
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    fn test_config(root: &Path) -> ServiceConfig {
        let work_dir = root.join("work");
        std::fs::create_dir_all(&work_dir).unwrap();
        ServiceConfig {
            host: "127.0.0.1".into(),
            port: 8000,
            serving_dir: root.join("serving"),
            work_dir,
            cleanup_delay: Duration::from_secs(60),
            ytdlp_path: "yt-dlp".into(),
            cookies_file: None,
            environment: "test".into(),
        }
    }

    fn app(extractor: Arc<dyn Extractor>) -> (TempDir, Router) {
        let root = tempdir().unwrap();
        let (cleanup, _task) = CleanupScheduler::spawn();
        let state = AppState::new(test_config(root.path()), extractor, cleanup);
        (root, router(state))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn validate_url_accepts_platform_hosts() {
        assert_eq!(
            validate_url("  https://youtu.be/abc ").unwrap(),
            "https://youtu.be/abc"
        );
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_url("https://music.youtube.com/watch?v=abc").is_ok());
        assert_eq!(
            validate_url("youtube.com/watch?v=abc").unwrap(),
            "https://youtube.com/watch?v=abc"
        );
    }

    #[test]
    fn validate_url_rejects_everything_else() {
        assert_eq!(validate_url("   "), Err(ValidationError::MissingUrl));
        for url in [
            "https://vimeo.com/123",
            "https://notyoutube.com/watch?v=abc",
            "https://youtube.com.evil.example/watch",
            "ftp://youtube.com/abc",
            "not a url",
        ] {
            assert_eq!(validate_url(url), Err(ValidationError::UnsupportedUrl), "{url}");
        }
    }

    #[test]
    fn content_disposition_quotes_ascii_names() {
        assert_eq!(
            content_disposition("title.mp4").to_str().unwrap(),
            "attachment; filename=\"title.mp4\""
        );
        assert_eq!(
            content_disposition("Café \"live\".mp4").to_str().unwrap(),
            "attachment; filename=\"Caf_ _live_.mp4\"; filename*=UTF-8''Caf%C3%A9%20%22live%22.mp4"
        );
    }

    #[tokio::test]
    async fn download_streams_staged_file() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let (root, app) = app(stub.clone());

        let response = app
            .oneshot(post_json(
                "/download",
                json!({ "url": "https://youtu.be/abc", "quality": "720p" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"title.mp4\""
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"mp4-bytes");
        assert!(root.path().join("serving/title.mp4").exists());
        assert_eq!(std::fs::read_dir(root.path().join("work")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn download_without_artifact_is_a_client_error() {
        let stub = Arc::new(StubExtractor {
            reported_name: Some("predicted.mp4".into()),
            written_name: Some("other.webm".into()),
            ..StubExtractor::writing("unused")
        });
        let (_root, app) = app(stub);

        let response = app
            .oneshot(post_json(
                "/download",
                json!({ "url": "https://youtu.be/abc", "quality": "720p" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "detail": ARTIFACT_MISSING }));
    }

    #[tokio::test]
    async fn download_extraction_failure_forwards_message() {
        let stub = Arc::new(StubExtractor {
            fail_with: Some("ERROR: Video unavailable".into()),
            ..StubExtractor::writing("title.mp4")
        });
        let (_root, app) = app(stub);

        let response = app
            .oneshot(post_json("/download", json!({ "url": "https://youtu.be/abc" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Download failed: ERROR: Video unavailable" })
        );
    }

    #[tokio::test]
    async fn download_internal_failure_hides_details() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let root = tempdir().unwrap();
        let mut config = test_config(root.path());
        config.work_dir = root.path().join("missing");
        let (cleanup, _task) = CleanupScheduler::spawn();
        let app = router(AppState::new(config, stub.clone(), cleanup));

        let response = app
            .oneshot(post_json("/download", json!({ "url": "https://youtu.be/abc" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await, json!({ "detail": INTERNAL_ERROR }));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn metadata_rejects_empty_url_without_extracting() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let (_root, app) = app(stub.clone());

        let response = app
            .oneshot(post_json("/metadata", json!({ "url": "" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "detail": "URL is required" }));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn metadata_rejects_foreign_url_without_extracting() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let (_root, app) = app(stub.clone());

        let response = app
            .oneshot(post_json("/metadata", json!({ "url": "https://vimeo.com/12345" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Please provide a valid YouTube URL" })
        );
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn metadata_returns_projection() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let (_root, app) = app(stub.clone());

        let response = app
            .oneshot(post_json("/metadata", json!({ "url": "https://youtu.be/abc" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["title"], "title");
        assert_eq!(body["uploader"], "Unknown Uploader");
        assert_eq!(
            body["available_formats"],
            json!(["1080p", "720p", "360p", "144p"])
        );
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn metadata_failure_is_a_client_error() {
        let stub = Arc::new(StubExtractor {
            fail_with: Some("ERROR: Private video".into()),
            ..StubExtractor::writing("title.mp4")
        });
        let (_root, app) = app(stub);

        let response = app
            .oneshot(post_json("/metadata", json!({ "url": "https://youtu.be/abc" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Failed to extract video metadata: ERROR: Private video" })
        );
    }

    #[tokio::test]
    async fn malformed_body_gets_detail() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let (_root, app) = app(stub);

        let response = app
            .oneshot(post_json("/metadata", json!({ "link": "https://youtu.be/abc" })))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert!(json_body(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn unstartable_extractor_is_an_internal_error() {
        let missing = tempdir().unwrap();
        let program = missing.path().join("bin/yt-dlp");

        for uri in ["/metadata", "/download"] {
            let (_root, app) = app(Arc::new(YtDlp::new(&program)));
            let response = app
                .oneshot(post_json(uri, json!({ "url": "https://youtu.be/abc" })))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            let body = json_body(response).await;
            assert_eq!(body, json!({ "detail": INTERNAL_ERROR }), "{uri}");
            assert!(!body.to_string().contains("yt-dlp"), "{uri}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn download_schedules_deletion_of_served_file() {
        let stub = Arc::new(StubExtractor::writing("title.mp4"));
        let root = tempdir().unwrap();
        let mut config = test_config(root.path());
        config.cleanup_delay = Duration::from_secs(5);
        let (cleanup, _task) = CleanupScheduler::spawn();
        let app = router(AppState::new(config, stub, cleanup));

        let response = app
            .oneshot(post_json("/download", json!({ "url": "https://youtu.be/abc" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"mp4-bytes");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!root.path().join("serving/title.mp4").exists());
    }

    #[tokio::test]
    async fn audio_download_keeps_its_own_content_type() {
        let stub = Arc::new(StubExtractor::writing("title.m4a"));
        let (_root, app) = app(stub);

        let response = app
            .oneshot(post_json(
                "/download",
                json!({ "url": "https://youtu.be/abc", "quality": "audio" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("audio/"), "{content_type}");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"title.m4a\""
        );
    }

    #[tokio::test]
    async fn health_reports_extractor_state() {
        let (_root, healthy) = app(Arc::new(StubExtractor::writing("title.mp4")));
        let response = healthy.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["yt_dlp_available"], true);

        let missing = tempdir().unwrap();
        let (_root, degraded) = app(Arc::new(YtDlp::new(missing.path().join("yt-dlp"))));
        let response = degraded.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["yt_dlp_available"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn root_and_fallback() {
        let (_root, app) = app(Arc::new(StubExtractor::writing("title.mp4")));

        let response = app.clone().oneshot(get_req("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["environment"], "test");
        assert_eq!(body["port"], 8000);

        let response = app.oneshot(get_req("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await, json!({ "detail": "Endpoint not found" }));
    }
}
