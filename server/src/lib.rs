pub mod config;
pub mod error;
pub mod validation;
pub mod ws;

use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use tts_core::{AudioResult, GenerationRequest, ModelSession, VoiceInfo};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::validation::validate_generation_request;

/// Shared handler state. The model session is built once by the caller and
/// injected here; handlers never reach for a global.
#[derive(Clone)]
pub struct AppState {
    pub model: ModelSession,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(model: ModelSession, config: ServerConfig) -> Self {
        Self { model, config }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

/// Build the full application router: every route at the root and again
/// under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voices", get(list_voices))
        .route("/generate", post(generate_endpoint))
        .route("/ws/stream", get(ws::stream_ws));

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(&state.config))
        .into_inner();

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

fn build_cors(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false);

    let Some(ref allowed_origins) = config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(tower_http::cors::Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(tower_http::cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(ref value) = header_value {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header_value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Vec<VoiceInfo>> {
    Json(state.model.voices())
}

/// Run one blocking generation call on the blocking pool.
///
/// There is no timeout and no cancellation: once started, the call runs to
/// completion even if the caller has gone away.
pub async fn run_generation(model: ModelSession, request: GenerationRequest) -> Result<AudioResult, ApiError> {
    let audio = tokio::task::spawn_blocking(move || model.generate(&request)).await??;

    if audio.sample_rate == 0 {
        return Err(ApiError::Generation(anyhow::anyhow!("model returned a zero sample rate")));
    }
    Ok(audio)
}

pub async fn generate_endpoint(
    State(state): State<AppState>,
    Json(req): Json<GenerationRequest>,
) -> Result<Response, ApiError> {
    validate_generation_request(&req)?;

    let voice = req.voice.clone();
    let t0 = Instant::now();
    let audio = run_generation(state.model.clone(), req).await?;
    let t_gen = t0.elapsed().as_secs_f64();

    info!(
        "Generated {:.2}s audio in {:.2}s (RTF={:.2}) voice={}",
        audio.duration_secs(),
        t_gen,
        audio.real_time_factor(t_gen),
        voice
    );

    let wav = tts_core::encode_wav(&audio.samples, audio.sample_rate)
        .map_err(|e| ApiError::Generation(e.context("WAV encoding error")))?;

    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav).into_response())
}
