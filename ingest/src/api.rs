use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::warn;

use crate::app_context::AppContext;
use crate::pipeline::process_envelope;
use crate::types::decode_message;

pub async fn index() -> &'static str {
    "beacon location ingestion service"
}

pub fn router(context: Arc<AppContext>) -> Router {
    let liveness = context.liveness.clone();
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        )
        .route("/replay", post(replay))
        .with_state(context)
}

/// Operational entry point: run one raw message through the same pipeline
/// the consumer uses, synchronously, and return what was persisted. The body
/// goes through the consumer's own decoder, so anything the consumer would
/// treat as a poison message comes back as a 400 here.
async fn replay(State(context): State<Arc<AppContext>>, body: Bytes) -> Response {
    let envelope = match decode_message(&body, Utc::now()) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("replay rejected: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let gateway = envelope.gateway_external_id.clone();
    match process_envelope(&context.pool, envelope).await {
        Ok(processed) => (StatusCode::OK, Json(processed)).into_response(),
        Err(e) if e.is_retriable() => {
            warn!(gateway = %gateway, "replay failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            warn!(gateway = %gateway, "replay rejected: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}
