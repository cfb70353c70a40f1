//! HTTP glue: axum routes that translate requests into session calls.
//!
//! - `GET /api/stream`: live multipart/x-mixed-replace MJPEG
//! - `GET /api/camera/status`: session status
//! - `/api/camera/{start,stop,restart}`: stream control
//! - `GET /api/camera/modes`, `POST /api/camera/mode/:id`: capture modes
//! - `POST /api/camera/capture`: snapshot of the latest frame
//! - `GET /health`

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde_json::json;
use tokio::task::JoinError;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::capture::frame::MULTIPART_CONTENT_TYPE;
use crate::error::CameraError;
use crate::pipeline::StreamSession;
use crate::snapshot;

/// Shared state handed to every handler
pub struct AppState {
    pub session: StreamSession,
    pub capture_dir: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/stream", get(video_stream))
        .route("/api/camera/status", get(camera_status))
        .route("/api/camera/start", get(start_camera).post(start_camera))
        .route("/api/camera/stop", get(stop_camera).post(stop_camera))
        .route("/api/camera/restart", get(restart_camera).post(restart_camera))
        .route("/api/camera/modes", get(list_modes))
        .route("/api/camera/mode/:id", post(set_mode))
        .route("/api/camera/capture", post(capture))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub enum ApiError {
    Camera(CameraError),
    Task(JoinError),
}

impl From<CameraError> for ApiError {
    fn from(e: CameraError) -> Self {
        ApiError::Camera(e)
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        ApiError::Task(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Camera(e) => {
                let status = match &e {
                    CameraError::UnknownMode(_) => StatusCode::NOT_FOUND,
                    CameraError::NotStreaming
                    | CameraError::NoFrameAvailable
                    | CameraError::StreamBusy => StatusCode::CONFLICT,
                    CameraError::DeviceUnavailable | CameraError::StartFailed { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    CameraError::WriteFailed(_) | CameraError::InvalidCatalog(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, Json(json!({ "error": e }))).into_response()
            }
            ApiError::Task(e) => {
                error!("Camera task failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Session calls block on process start/stop; keep them off the async workers
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

/// GET /api/stream: start if needed and stream frames as multipart parts
async fn video_stream(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.session.clone();
    let frames = blocking(move || {
        session.try_start_streaming()?;
        session.frames()
    })
    .await??;

    info!("Client attached to MJPEG stream");
    let body = Body::from_stream(
        frames
            .into_async()
            .map(|frame| Ok::<_, Infallible>(frame.to_multipart())),
    );

    Ok((
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn camera_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.session.status()).into_response()
}

async fn start_camera(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.session.clone();
    blocking(move || session.try_start_streaming()).await??;

    Ok(Json(json!({
        "message": "Camera streaming started",
        "status": state.session.status(),
    }))
    .into_response())
}

async fn stop_camera(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.session.clone();
    blocking(move || session.stop_streaming()).await?;

    Ok(Json(json!({ "message": "Camera streaming stopped" })).into_response())
}

/// Stop everything and re-detect the camera
async fn restart_camera(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.session.clone();
    if !blocking(move || session.reprobe()).await? {
        return Err(CameraError::DeviceUnavailable.into());
    }

    Ok(Json(json!({ "message": "Camera restarted successfully" })).into_response())
}

async fn list_modes(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "modes": state.session.list_modes(),
        "current": state.session.current_mode().id,
    }))
    .into_response()
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.session.clone();
    let restarted = blocking(move || session.set_mode(&id)).await??;
    let mode = state.session.current_mode();

    if !restarted {
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Mode changed but the stream failed to restart",
                "mode": mode,
            })),
        )
            .into_response());
    }

    Ok(Json(json!({
        "message": format!("Capture mode set to {}", mode.label),
        "mode": mode,
    }))
    .into_response())
}

async fn capture(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.session.clone();
    let dir = state.capture_dir.clone();
    let artifact = blocking(move || snapshot::capture(&session, &dir)).await??;

    Ok(Json(artifact).into_response())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "camera-stream" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureConfig, ModeCatalog};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = CaptureConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "exec sleep 30".into()],
            probe_program: "false".into(),
            probe_args: vec![],
            start_grace_ms: 50,
            stop_timeout_ms: 500,
            ..CaptureConfig::default()
        };
        let session = StreamSession::new(config, ModeCatalog::builtin().unwrap()).unwrap();
        router(Arc::new(AppState {
            session,
            capture_dir: std::env::temp_dir(),
        }))
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app(), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_starts_idle() {
        let (status, body) = call(app(), "GET", "/api/camera/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["streaming"], false);
        assert_eq!(body["mode"]["id"], "sd_480p");
        assert!(body["last_access"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_mode_is_not_found() {
        let (status, body) = call(app(), "POST", "/api/camera/mode/8k").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Unknown capture mode: 8k");
    }

    #[tokio::test]
    async fn test_modes_listing() {
        let (status, body) = call(app(), "GET", "/api/camera/modes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current"], "sd_480p");
        assert_eq!(body["modes"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_capture_requires_stream() {
        let (status, _) = call(app(), "POST", "/api/camera/capture").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_failed_restart_is_unavailable() {
        let app = app();
        let (status, _) = call(app.clone(), "POST", "/api/camera/restart").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(app, "GET", "/api/camera/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "unavailable");
    }
}
