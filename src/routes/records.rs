//! Record dispatcher: `/{path_segment}/json` for read/create, `/{path_segment}/json/{id}` for update/delete.

use crate::error::AppError;
use crate::extractors::{Caller, RequestCaller};
use crate::handlers::CrudHandlerSet;
use crate::schema::RecordType;
use crate::state::DispatchState;
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::Method,
    response::Response,
    routing::any,
    Router,
};
use std::sync::Arc;

const ALLOW_COLLECTION: &str = "GET, POST";
const ALLOW_MEMBER: &str = "PUT, DELETE";

fn record_type<H>(state: &DispatchState<H>, segment: &str) -> Result<Arc<RecordType>, AppError> {
    state
        .registry
        .record_type_by_path(segment)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("no record type at /{}", segment)))
}

fn require_caller(caller: RequestCaller) -> Result<Caller, AppError> {
    caller.0.ok_or(AppError::Forbidden)
}

async fn collection<H: CrudHandlerSet>(
    State(state): State<DispatchState<H>>,
    Path(segment): Path<String>,
    method: Method,
    caller: RequestCaller,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, AppError> {
    let rt = record_type(&state, &segment)?;
    if method != Method::GET && method != Method::POST {
        return Err(AppError::MethodNotAllowed { allow: ALLOW_COLLECTION });
    }
    let caller = require_caller(caller)?;
    tracing::debug!(%method, record_type = %rt.name, user = %caller.user, "dispatch");
    if method == Method::GET {
        let params: Vec<(String, String)> = serde_urlencoded::from_str(query.as_deref().unwrap_or(""))
            .map_err(|e| AppError::BadFilter(e.to_string()))?;
        state.handlers.read(&rt, &caller, &params).await
    } else {
        state.handlers.create(&rt, &caller, body).await
    }
}

async fn member<H: CrudHandlerSet>(
    State(state): State<DispatchState<H>>,
    Path((segment, id)): Path<(String, String)>,
    method: Method,
    caller: RequestCaller,
    body: Bytes,
) -> Result<Response, AppError> {
    let rt = record_type(&state, &segment)?;
    if !state.id_pattern.is_match(&id) {
        return Err(AppError::NotFound(format!("{} {}", rt.name, id)));
    }
    if method != Method::PUT && method != Method::DELETE {
        return Err(AppError::MethodNotAllowed { allow: ALLOW_MEMBER });
    }
    let caller = require_caller(caller)?;
    tracing::debug!(%method, record_type = %rt.name, id = %id, user = %caller.user, "dispatch");
    if method == Method::PUT {
        state.handlers.update(&rt, &caller, &id, body).await
    } else {
        state.handlers.delete(&rt, &caller, &id).await
    }
}

/// Record routes for every registered type, dispatched to `H`.
pub fn record_routes<H: CrudHandlerSet>(state: DispatchState<H>) -> Router {
    Router::new()
        .route("/:segment/json", any(collection::<H>))
        .route("/:segment/json/", any(collection::<H>))
        .route("/:segment/json/:id", any(member::<H>))
        .with_state(state)
}
