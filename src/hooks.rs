//! HTTP front end: per-key webhook ingress and peek.
//!
//! # Responsibilities
//! - `POST /{key}`: snapshot the inbound request into a record and push it
//! - `GET /{key}`: peek the default count as a JSON array, 204 when empty
//! - `GET /_ping`: liveness probe
//!
//! An empty queue answers 204 No Content, never an empty JSON array;
//! consumers rely on that distinction to tell "nothing yet" from "empty
//! batch".

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::ServeError;
use crate::net::VirtualListener;
use crate::queue::Queue;
use crate::record::{Header, Record};
use crate::server::Shutdown;

/// Build the hook router over a queue engine.
pub fn router(queue: Arc<Queue>) -> Router {
    Router::new()
        .route("/_ping", get(ping))
        .route("/{key}", post(push_hook).get(peek_hook))
        .route("/", any(missing_key))
        .with_state(queue)
        .layer(TraceLayer::new_for_http())
}

/// Serve HTTP connections from a virtual listener until it fails or
/// shutdown is triggered.
pub async fn serve(
    mut listener: VirtualListener,
    queue: Arc<Queue>,
    shutdown: Shutdown,
) -> Result<(), ServeError> {
    let app = router(queue);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = accepted?;
                let service = TowerToHyperService::new(app.clone());
                tokio::spawn(async move {
                    let outcome = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                    if let Err(err) = outcome {
                        tracing::debug!(error = %err, "http connection ended");
                    }
                });
            }
            () = shutdown.wait() => {
                tracing::info!("http server stopped");
                return Ok(());
            }
        }
    }
}

/// Snapshot an inbound request into the stored record form. Header order
/// and repeated values survive; non-UTF-8 bytes are replaced rather than
/// rejected, since a webhook must never bounce on an odd header.
fn snapshot_request(headers: &HeaderMap, body: &Bytes) -> Record {
    let host = headers
        .get(header::HOST)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    let mut snapshot = Vec::new();
    for name in headers.keys() {
        let value = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        snapshot.push(Header {
            name: name.as_str().to_string(),
            value,
        });
    }

    Record::new(
        host,
        snapshot,
        String::from_utf8_lossy(body).into_owned(),
    )
}

async fn ping() -> &'static str {
    "pong"
}

async fn missing_key() -> StatusCode {
    StatusCode::BAD_REQUEST
}

async fn push_hook(
    State(queue): State<Arc<Queue>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if key.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let record = snapshot_request(&headers, &body);
    match queue.push(&key, &[record]).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::error!(key = %key, error = %err, "failed adding to queue");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed adding to queue").into_response()
        }
    }
}

async fn peek_hook(State(queue): State<Arc<Queue>>, Path(key): Path<String>) -> Response {
    if key.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match queue.peek(&key, 0).await {
        Ok(records) if records.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(records) => Json(records).into_response(),
        Err(err) => {
            tracing::error!(key = %key, error = %err, "failed querying queue");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed querying queue").into_response()
        }
    }
}
