//! HTTP transport: the axum router, its state, and the serve loop.
//!
//! ```text
//! POST /api/calculate-results ──► decode_data_url ──► AnalysisEngine::analyze ──► AnalysisResponse
//!            │                        (blocking pool)        (under request timeout)
//!            └─ bad JSON / too large ──────────────────────────────────────────────► error envelope
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::assemble::AnalysisResponse;
use crate::backend::BackoffConfig;
use crate::config::{BackendKind, Config};
use crate::decode::decode_data_url;
use crate::engine::AnalysisEngine;
use crate::error::{AnalysisError, Result};
use crate::events::TracingEventHandler;
use crate::exec_ctx::ExecCtx;
use crate::recognizer::LlmRecognizer;
use crate::retry::RetryConfig;
use crate::types::{ImageRequest, ResultRecord};

/// Shared by every request.
#[derive(Clone, Debug)]
pub struct AppState {
    engine: Arc<AnalysisEngine>,
    request_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(engine: AnalysisEngine, request_timeout: Duration, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            engine: Arc::new(engine),
            request_timeout,
            shutdown,
        }
    }

    /// Wire the LLM recognizer described by `config`.
    pub fn from_config(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let mut ctx = ExecCtx::builder(&config.llm_base_url)
            .timeout(config.llm_timeout)
            .backoff(BackoffConfig::interactive().with_max_retries(config.llm_max_retries))
            .cancellation(Some(shutdown.clone()))
            .event_handler(Arc::new(TracingEventHandler));

        if config.backend == BackendKind::OpenAi {
            ctx = match &config.llm_api_key {
                Some(key) => ctx.openai_with_key(key),
                None => ctx.openai(),
            };
        }

        let mut recognizer = LlmRecognizer::new(Arc::new(ctx.build()?), &config.llm_model)
            .with_config(config.llm_config())
            .with_max_image_dimension(config.max_image_dimension);
        if config.llm_parse_retries > 0 {
            recognizer = recognizer.with_retry(RetryConfig::new(config.llm_parse_retries));
        }

        Ok(Self::new(
            AnalysisEngine::new(Arc::new(recognizer)),
            config.request_timeout,
            shutdown,
        ))
    }

    async fn process(&self, request: ImageRequest) -> Result<Vec<ResultRecord>> {
        let ImageRequest { image, dict_of_vars } = request;

        let image = tokio::task::spawn_blocking(move || decode_data_url(&image))
            .await
            .map_err(|e| AnalysisError::Other(format!("decode task failed: {}", e)))??;
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            format = ?image.format(),
            variables = dict_of_vars.len(),
            "decoded image"
        );

        let analysis = self.engine.analyze(&image, dict_of_vars, Some(&self.shutdown));
        tokio::time::timeout(self.request_timeout, analysis)
            .await
            .map_err(|_| AnalysisError::Timeout(self.request_timeout))?
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "analysis failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        (status, Json(AnalysisResponse::failure(&self))).into_response()
    }
}

/// Build the router: `GET /` and `POST /api/calculate-results`, with open
/// CORS, request tracing and a body limit of `max_body_bytes`.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/calculate-results", post(calculate))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn calculate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ImageRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(reason = %rejection.body_text(), "unreadable request body");
            let (status, message) = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
            } else {
                (StatusCode::BAD_REQUEST, "Invalid request body")
            };
            return (status, Json(AnalysisResponse::error_message(message))).into_response();
        }
    };

    match state.process(request).await {
        Ok(records) => Json(AnalysisResponse::success(records)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// Bind, serve until Ctrl-C, then drain. The shutdown flag is raised first so
/// in-flight backend retries stop early.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let state = AppState::from_config(&config, shutdown.clone()).context("building recognizer")?;
    let app = router(state, config.max_body_bytes);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    tracing::info!(
        address = %listener.local_addr()?,
        backend = ?config.backend,
        model = %config.llm_model,
        "inkcalc listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(flag: Arc<AtomicBool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    flag.store(true, Ordering::Relaxed);
}
