//! Outbound webhook relay service
//!
//! Small HTTP service the dispatcher can forward notifications to for
//! external delivery (email). Actual delivery sits behind the [`Mailer`]
//! trait so the transport can be swapped; the default mailer just logs.

use crate::error::{WasherError, WasherResult};
use crate::notify::NotifyPayload;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Delivery seam for the relay
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, payload: &NotifyPayload) -> WasherResult<()>;
}

/// Default mailer: logs the message instead of sending it
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, payload: &NotifyPayload) -> WasherResult<()> {
        tracing::info!(
            recipient = %payload.recipient_email,
            machine = ?payload.machine_id,
            "would deliver: {}",
            payload.message
        );
        Ok(())
    }
}

/// Shared relay state
#[derive(Clone)]
pub struct RelayState {
    mailer: Arc<dyn Mailer>,
    bearer_token: Option<String>,
}

impl RelayState {
    pub fn new(mailer: Arc<dyn Mailer>, bearer_token: Option<String>) -> Self {
        Self {
            mailer,
            bearer_token,
        }
    }
}

/// Build the relay router
pub fn relay_router(state: RelayState) -> Router {
    Router::new()
        .route("/notify", post(handle_notify))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the relay on localhost; port 0 picks a free one
///
/// Returns the bound port; the server runs on a spawned task.
pub async fn start_relay_server(state: RelayState, port: u16) -> WasherResult<u16> {
    let app = relay_router(state);

    // Bind to localhost only.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| WasherError::Internal(format!("Failed to bind relay: {}", e)))?;
    let bound = listener
        .local_addr()
        .map_err(|e| WasherError::Internal(format!("Failed to get relay port: {}", e)))?
        .port();

    tokio::spawn(async move {
        tracing::info!(port = bound, "relay listening on http://127.0.0.1");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok(bound)
}

async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_notify(
    State(state): State<RelayState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(expected) = &state.bearer_token {
        let supplied = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if supplied != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid bearer token"})),
            )
                .into_response();
        }
    }

    // Required fields per the wire contract; everything else is optional.
    for field in ["recipientEmail", "message", "timestamp"] {
        let present = body
            .get(field)
            .map(|v| !v.is_null() && v.as_str() != Some(""))
            .unwrap_or(false);
        if !present {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("missing required field: {}", field)})),
            )
                .into_response();
        }
    }

    let payload: NotifyPayload = match serde_json::from_value(body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("malformed payload: {}", e)})),
            )
                .into_response();
        }
    };

    match state.mailer.deliver(&payload).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "sent"}))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "mail delivery failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
