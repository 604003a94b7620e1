//! Route builders.

mod common;
mod records;
mod timing;

pub use common::{common_routes, StatusCheck, StorePing, STATUS_OK};
pub use records::record_routes;
pub use timing::RequestTiming;

use crate::error::ConfigError;
use crate::extractors::CallerIdentity;
use crate::handlers::ExtJsonHandlers;
use crate::schema::Registry;
use crate::state::DispatchState;
use crate::store::RecordStore;
use axum::{middleware, Router};
use std::fmt;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Options for [`app`].
#[derive(Clone)]
pub struct AppOptions {
    /// Prefix the record routes are nested under; `""` or `"/"` mounts them at the root.
    pub mount: String,
    pub max_body_bytes: usize,
    /// Extra `/status` checks, run after the store ping.
    pub status_checks: Vec<Arc<dyn StatusCheck>>,
    pub timing: RequestTiming,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            mount: "/api".into(),
            max_body_bytes: 1024 * 1024,
            status_checks: Vec::new(),
            timing: RequestTiming::default(),
        }
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("mount", &self.mount)
            .field("max_body_bytes", &self.max_body_bytes)
            .field(
                "status_checks",
                &self.status_checks.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("timing", &self.timing)
            .finish()
    }
}

/// Full router: common routes at the root plus JSON grid record routes under `options.mount`.
pub fn app<S: RecordStore>(
    store: Arc<S>,
    registry: Arc<Registry>,
    identity: Arc<dyn CallerIdentity>,
    options: &AppOptions,
) -> Result<Router, ConfigError> {
    let handlers = Arc::new(ExtJsonHandlers::new(store.clone(), registry.clone()));
    let records = record_routes(DispatchState::new(handlers, registry, identity)?);
    let mount = options.mount.trim_end_matches('/');
    let common = common_routes(store, &options.status_checks);
    let router = if mount.is_empty() {
        common.merge(records)
    } else {
        if !mount.starts_with('/') {
            return Err(ConfigError::Settings(format!("mount point must start with '/': {}", options.mount)));
        }
        common.nest(mount, records)
    };
    let timing_filter = Arc::new(options.timing.clone());
    Ok(router.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn_with_state(timing_filter, timing::log_timing))
            .layer(RequestBodyLimitLayer::new(options.max_body_bytes)),
    ))
}
