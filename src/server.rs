use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::bail_http;
use crate::cleanup::clean_response;
use crate::error::VocabTutorResult;
use crate::extractors::JsonPayload;
use crate::inference::task::ask::{AskHandler, AskRequest, AskResponse};
use crate::language::{LanguageGate, REDIRECT_MESSAGE};

pub const MISSING_PROMPT: &str = "Missing prompt";

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<dyn AskHandler>,
    /// Disabled when `None`
    pub language_gate: Option<Arc<LanguageGate>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ask", post(handle_ask_request))
        .route("/health", get(handle_health_request))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[axum_macros::debug_handler]
async fn handle_ask_request(
    State(state): State<AppState>,
    JsonPayload(req): JsonPayload<AskRequest>,
) -> VocabTutorResult<(StatusCode, Json<AskResponse>)> {
    let prompt = match req.prompt.as_deref().map(str::trim) {
        Some(prompt) if !prompt.is_empty() => prompt.to_string(),
        _ => bail_http!(StatusCode::BAD_REQUEST, MISSING_PROMPT),
    };
    debug!("Received prompt of {} characters", prompt.chars().count());

    if let Some(gate) = &state.language_gate {
        if !gate.admits(&prompt) {
            return Ok((
                StatusCode::OK,
                Json(AskResponse {
                    response: REDIRECT_MESSAGE.to_string(),
                }),
            ));
        }
    }

    // Generation is CPU/GPU bound, keep it off the async workers.
    // A panic surfaces as a JoinError and becomes a 500 like any other failure.
    let handler = state.handler.clone();
    let decoded = tokio::task::spawn_blocking(move || handler.run_ask(&prompt)).await??;

    Ok((
        StatusCode::OK,
        Json(AskResponse {
            response: clean_response(&decoded),
        }),
    ))
}

async fn handle_health_request() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
