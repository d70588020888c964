//! HTTP surface of the offline cache worker.
//!
//! Every request that does not hit a `/__worker/*` route is answered by the
//! active worker's fetch handler, which makes the server a network-first
//! caching proxy in front of the upstream origin.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{ClickOutcome, FetchRequest, FetchResponse, Registration};
use crate::notify::Notification;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

pub fn router(registration: Arc<Registration>) -> Router {
    Router::new()
        .route("/__worker/push", post(push))
        .route("/__worker/notificationclick", post(notification_click))
        .route("/__worker/clients", post(connect_client))
        .route("/__worker/clients/{id}", delete(disconnect_client))
        .fallback(proxy)
        .with_state(registration)
}

async fn proxy(State(registration): State<Arc<Registration>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting unreadable request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let request = FetchRequest {
        method: parts.method.as_str().to_string(),
        url: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        headers: parts
            .headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect(),
        body,
    };

    let response = registration.active().handle_fetch(request).await;
    into_response(response)
}

fn into_response(fetched: FetchResponse) -> Response {
    let mut response = Response::new(Body::from(fetched.body));
    *response.status_mut() = StatusCode::from_u16(fetched.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in fetched.headers {
        if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            headers.append(name, value);
        }
    }
    response
}

async fn push(State(registration): State<Arc<Registration>>, body: Bytes) -> Json<Notification> {
    let data = (!body.is_empty()).then_some(body.as_ref());
    Json(registration.active().handle_push(data))
}

#[derive(Debug, Default, Deserialize)]
struct ClickRequest {
    tag: Option<String>,
}

async fn notification_click(
    State(registration): State<Arc<Registration>>,
    body: Bytes,
) -> Json<ClickOutcome> {
    let click: ClickRequest = serde_json::from_slice(&body).unwrap_or_default();
    Json(registration.active().handle_notification_click(click.tag.as_deref()))
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    url: Option<String>,
}

async fn connect_client(
    State(registration): State<Arc<Registration>>,
    Json(connect): Json<ConnectRequest>,
) -> Json<serde_json::Value> {
    let url = connect.url.unwrap_or_else(|| "/".to_string());
    let id = registration.active().context().clients.connect(&url);
    Json(serde_json::json!({ "id": id }))
}

async fn disconnect_client(
    State(registration): State<Arc<Registration>>,
    Path(id): Path<u64>,
) -> StatusCode {
    if registration.active().context().clients.disconnect(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
