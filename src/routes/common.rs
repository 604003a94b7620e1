//! Common routes: health, readiness, version, status.

use crate::store::RecordStore;
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;

pub const STATUS_OK: &str = "Project is running OK\n";

/// One named check behind `GET /status`. `Ok(false)` is a failed check; `Err` means the check itself broke.
#[async_trait]
pub trait StatusCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<bool, Box<dyn Error + Send + Sync>>;
}

/// Store reachability; always the first status check.
pub struct StorePing<S>(pub Arc<S>);

#[async_trait]
impl<S: RecordStore> StatusCheck for StorePing<S> {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        self.0.ping().await?;
        Ok(true)
    }
}

struct CommonState<S> {
    store: Arc<S>,
    checks: Arc<[Arc<dyn StatusCheck>]>,
}

impl<S> Clone for CommonState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            checks: self.checks.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    store: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready<S: RecordStore>(State(state): State<CommonState<S>>) -> (StatusCode, Json<ReadyBody>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyBody {
                status: "ok",
                store: "ok",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyBody {
                    status: "degraded",
                    store: "unavailable",
                }),
            )
        }
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Runs every check in order and stops at the first one that fails or errors.
async fn status<S: RecordStore>(State(state): State<CommonState<S>>) -> (StatusCode, String) {
    for check in state.checks.iter() {
        match check.check().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(check = check.name(), "status check failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Status check failed: {}", check.name()),
                );
            }
            Err(e) => {
                tracing::error!(check = check.name(), error = %e, "status check errored");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Exception in status check: {}", check.name()),
                );
            }
        }
    }
    (StatusCode::OK, STATUS_OK.to_string())
}

/// GET /health, /ready (store ping), /version, /status (store ping then `checks`).
pub fn common_routes<S: RecordStore>(store: Arc<S>, checks: &[Arc<dyn StatusCheck>]) -> Router {
    let all: Vec<Arc<dyn StatusCheck>> = std::iter::once(Arc::new(StorePing(store.clone())) as Arc<dyn StatusCheck>)
        .chain(checks.iter().cloned())
        .collect();
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<S>))
        .route("/version", get(version))
        .route("/status", get(status::<S>))
        .with_state(CommonState {
            store,
            checks: all.into(),
        })
}
