//! Per-request timing log.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

pub const AJAX_HEADER: &str = "x-requested-with";

/// Which requests get a timing line.
#[derive(Clone, Debug, Default)]
pub struct RequestTiming {
    /// Only log requests sent with `X-Requested-With: XMLHttpRequest`.
    pub ajax_only: bool,
    /// Log only paths containing one of these substrings; empty logs every path.
    pub path_whitelist: Vec<String>,
}

impl RequestTiming {
    pub fn should_log(&self, path: &str, ajax: bool) -> bool {
        (!self.ajax_only || ajax)
            && (self.path_whitelist.is_empty() || self.path_whitelist.iter().any(|p| path.contains(p.as_str())))
    }
}

pub async fn log_timing(State(timing): State<Arc<RequestTiming>>, request: Request, next: Next) -> Response {
    let ajax = request
        .headers()
        .get(AJAX_HEADER)
        .is_some_and(|v| v.as_bytes() == b"XMLHttpRequest");
    let path = request.uri().path().to_string();
    if !timing.should_log(&path, ajax) {
        return next.run(request).await;
    }
    let method = request.method().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request"
    );
    response
}
