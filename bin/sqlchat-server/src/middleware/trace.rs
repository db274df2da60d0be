use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::BodyExt;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// JSON bodies up to this size are logged at `debug`.
const MAX_LOGGED_BODY: usize = 1024;

/// Assign (or propagate) an `x-trace-id`, run the request inside an
/// `http_request` span and log status and latency on completion.
pub async fn trace_middleware(req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let header_value = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        info!("→ request started");
        let (parts, body) = req.into_parts();
        let body = match buffer_and_log("request", &parts.headers, body).await {
            Some(bytes) => Body::from(bytes),
            None => {
                warn!("failed to read request body");
                Body::empty()
            }
        };
        let mut req = Request::from_parts(parts, body);
        if let Some(v) = &header_value {
            req.headers_mut().insert(X_TRACE_ID, v.clone());
        }

        let mut response = next.run(req).await;
        if let Some(v) = header_value {
            response.headers_mut().insert(X_TRACE_ID, v);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis() as u64,
            "← response finished"
        );
        response
    }
    .instrument(span)
    .await
}

async fn buffer_and_log(direction: &str, headers: &HeaderMap, body: Body) -> Option<Bytes> {
    let bytes = body.collect().await.ok()?.to_bytes();
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    if is_json && bytes.len() <= MAX_LOGGED_BODY {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            debug!(direction, body = text, "body");
        }
    } else if !bytes.is_empty() {
        debug!(direction, size = bytes.len(), "body skipped");
    }
    Some(bytes)
}
