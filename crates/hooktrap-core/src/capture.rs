//! HTTP surface of the capture server.
//!
//! Control routes live under `/api/webhook`; everything else on the listener
//! is treated as an inbound webhook and captured. Capture never validates or
//! rejects a payload: any method, any path, any body gets a `200`.

use crate::controller::WebhookController;
use crate::registry::SubscriberRegistry;
use crate::HooktrapError;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use hooktrap_types::{CaptureAck, StartRequest, WebhookEvent, WebhookResponse};
use serde_json::json;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Build the router served by a running capture server instance.
pub fn capture_router(controller: Arc<WebhookController>) -> Router {
    let api_routes = Router::new()
        .route("/webhook/start", post(start))
        .route("/webhook/stop", post(stop))
        .route("/webhook/events", get(events))
        // Unknown API paths must 404 here; without this they would fall
        // through to the outer catch-all and be captured as webhooks.
        .fallback(api_not_found);

    Router::new()
        .nest("/api", api_routes)
        .fallback(capture)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn api_not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn error_status(err: &HooktrapError) -> StatusCode {
    match err {
        HooktrapError::AlreadyRunning | HooktrapError::NotRunning => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn start(
    State(controller): State<Arc<WebhookController>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<WebhookResponse>, (StatusCode, String)> {
    controller
        .start(req.port, req.enable_tunnel)
        .await
        .map(Json)
        .map_err(|e| (error_status(&e), e.to_string()))
}

async fn stop(
    State(controller): State<Arc<WebhookController>>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    controller
        .stop()
        .await
        .map(|()| Json(json!({ "status": "stopped" })))
        .map_err(|e| (error_status(&e), e.to_string()))
}

/// Unsubscribes when the SSE stream is dropped (client disconnect or server
/// stop).
struct SubscriptionGuard {
    registry: Arc<SubscriberRegistry>,
    id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}

async fn events(
    State(controller): State<Arc<WebhookController>>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, String)> {
    let (id, rx) = controller.subscribe_events().await.ok_or((
        StatusCode::CONFLICT,
        HooktrapError::NotRunning.to_string(),
    ))?;

    let guard = SubscriptionGuard {
        registry: controller.registry().clone(),
        id,
    };

    info!(target: "hooktrap::events", "Event stream opened for subscriber {}", id);

    let stream = ReceiverStream::new(rx).map(move |event: WebhookEvent| {
        let _ = &guard;
        Event::default().json_data(&event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Catch-all capture handler: build an event, fan it out, always ack 200.
async fn capture(
    State(controller): State<Arc<WebhookController>>,
    req: Request,
) -> (StatusCode, Json<CaptureAck>) {
    let (parts, body) = req.into_parts();

    // Parsed by hand so a malformed query string can never reject a capture.
    let query: Vec<(String, String)> =
        url::form_urlencoded::parse(parts.uri.query().unwrap_or("").as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

    // A body read error is logged, never fatal: capture with an empty body.
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(target: "hooktrap::capture", "Failed to read request body: {}", e);
            Default::default()
        }
    };

    let headers = parts.headers.iter().map(|(name, value)| {
        (
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
    });

    let event = WebhookEvent::from_parts(
        parts.method.as_str(),
        parts.uri.path(),
        headers,
        query,
        &bytes,
    );

    let delivered = controller.registry().broadcast(&event);
    info!(
        target: "hooktrap::capture",
        "Captured {} {} ({} bytes, delivered to {} subscribers)",
        event.method, event.path, event.body.len(), delivered
    );

    (StatusCode::OK, Json(CaptureAck::received(event.id)))
}
