//! HTTP surface: operator commands, liveness, and the status summary.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use holocron_core::UserName;

use crate::notifications::{DispatchDelay, NotificationPayload};
use crate::status::StatusData;
use crate::AppState;

/// A chat message relayed from the chat platform.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Wiki username of the person who wrote the message.
    pub author: String,
    pub content: String,
    /// Post the acknowledgment here as well.
    #[serde(default)]
    pub reply_channel: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .route("/commands", post(command_handler))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "holocron",
        "version": crate::get_bot_version(),
    }))
}

/// Validate the authorization header against a configured bearer token.
///
/// An endpoint without a configured token is disabled.
#[allow(clippy::result_large_err)] // Response is large but this is idiomatic in Axum handlers
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    let Some(expected_token) = auth_token else {
        return Err((StatusCode::FORBIDDEN, "Endpoint is disabled (no token configured)").into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(provided) if provided == expected_token => Ok(()),
        Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing or malformed Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

async fn status_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(response) = validate_auth(&headers, &state.status_auth_token) {
        return response;
    }

    match StatusData::collect(&state.store, &state.ctx, crate::get_bot_version()).await {
        Ok(data) => Json(data).into_response(),
        Err(e) => {
            error!("Failed to collect status: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to collect status").into_response()
        }
    }
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> Response {
    if let Err(response) = validate_auth(&headers, &state.command_auth_token) {
        return response;
    }

    let author = UserName::from(request.author.as_str());
    let Some(ack) = state
        .commands
        .handle(&request.content, &author, Utc::now())
        .await
    else {
        return StatusCode::NO_CONTENT.into_response();
    };

    if let Some(channel) = request.reply_channel {
        let text = if ack.ok {
            ack.message.clone()
        } else {
            format!(":warning: {}", ack.message)
        };
        if let Err(e) = state
            .ctx
            .queue
            .enqueue(
                NotificationPayload::chat(channel, text),
                DispatchDelay::Immediate,
                None,
                Utc::now(),
            )
            .await
        {
            warn!("Could not queue the acknowledgment for {}: {}", author, e);
        }
    }

    Json(ack).into_response()
}
