//! HTTP surface: `POST /convert` and `GET /health`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode, request};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::codec::ToolLocator;
use crate::dsp::TransformParameters;
use crate::error::{ConversionError, ErrorKind};
use crate::orchestrator::{CancelToken, ConversionOrchestrator};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<ConversionOrchestrator>,
    ffmpeg: Arc<ToolLocator>,
    ytdlp: Arc<ToolLocator>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ConversionOrchestrator>,
        ffmpeg: Arc<ToolLocator>,
        ytdlp: Arc<ToolLocator>,
    ) -> Self {
        Self {
            orchestrator,
            ffmpeg,
            ytdlp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub youtube_link: String,
    #[serde(flatten)]
    pub params: TransformParameters,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub audio_data: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub ffmpeg_path: Option<String>,
    pub yt_dlp_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    kind: ErrorKind,
}

pub struct ApiError(ConversionError);

impl From<ConversionError> for ApiError {
    fn from(err: ConversionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            detail: self.0.message,
            kind: self.0.kind,
        };
        (status, Json(body)).into_response()
    }
}

/// Cancels the conversion if the handler future is dropped (client went away).
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/convert", post(convert))
        .route("/health", get(health))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Exact origins, `*` for any, or `https://*.example.com` for any subdomain.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CONTENT_DISPOSITION]);
    if allowed_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let patterns: Vec<String> = allowed_origins.to_vec();
    base.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _parts: &request::Parts| {
            origin
                .to_str()
                .is_ok_and(|origin| patterns.iter().any(|p| origin_matches(p, origin)))
        },
    ))
}

fn origin_matches(pattern: &str, origin: &str) -> bool {
    match pattern.split_once("://*.") {
        Some((scheme, domain)) => origin
            .strip_prefix(scheme)
            .and_then(|rest| rest.strip_prefix("://"))
            .and_then(|host| host.strip_suffix(domain))
            .is_some_and(|sub| sub.len() > 1 && sub.ends_with('.')),
        None => pattern == origin,
    }
}

async fn convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> Result<Response, ApiError> {
    let cancel = CancelToken::new();
    let _guard = CancelOnDrop(cancel.clone());
    let orchestrator = Arc::clone(&state.orchestrator);
    log::info!(target: "lofi::api", "POST /convert {}", request.youtube_link);

    let result = tokio::task::spawn_blocking(move || {
        orchestrator.convert_with_cancel(&request.youtube_link, &request.params, &cancel)
    })
    .await
    .map_err(|e| ConversionError {
        kind: ErrorKind::Internal,
        message: format!("conversion task failed: {e}"),
    })??;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        result.filename
    ))
    .ok();
    let body = ConvertResponse {
        audio_data: BASE64.encode(&result.payload),
        filename: result.filename,
    };
    let mut response = Json(body).into_response();
    if let Some(value) = disposition {
        response.headers_mut().insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ffmpeg = Arc::clone(&state.ffmpeg);
    let ytdlp = Arc::clone(&state.ytdlp);
    let (ffmpeg_path, yt_dlp_path) = tokio::task::spawn_blocking(move || {
        (
            ffmpeg.locate().ok().map(|p| p.display().to_string()),
            ytdlp.locate().ok().map(|p| p.display().to_string()),
        )
    })
    .await
    .unwrap_or((None, None));

    let healthy = ffmpeg_path.is_some() && yt_dlp_path.is_some();
    if !healthy {
        log::warn!(
            target: "lofi::api",
            "Health check degraded: ffmpeg={:?} yt-dlp={:?}",
            ffmpeg_path,
            yt_dlp_path
        );
    }
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        ffmpeg_path,
        yt_dlp_path,
    })
}
