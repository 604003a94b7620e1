//! CRUD handler capability and the JSON grid implementation.

mod ext_json;

pub use ext_json::*;

use crate::error::AppError;
use crate::extractors::Caller;
use crate::schema::RecordType;
use async_trait::async_trait;
use axum::{body::Bytes, response::Response};

/// The four record operations the dispatcher routes to. Each returns a finished response or an
/// [`AppError`] that renders as the failure envelope.
#[async_trait]
pub trait CrudHandlerSet: Send + Sync + 'static {
    async fn create(&self, record_type: &RecordType, caller: &Caller, body: Bytes) -> Result<Response, AppError>;

    /// `params` are the decoded query-string pairs in request order.
    async fn read(&self, record_type: &RecordType, caller: &Caller, params: &[(String, String)]) -> Result<Response, AppError>;

    /// `id` is the raw path segment, already checked to be all digits.
    async fn update(&self, record_type: &RecordType, caller: &Caller, id: &str, body: Bytes) -> Result<Response, AppError>;

    async fn delete(&self, record_type: &RecordType, caller: &Caller, id: &str) -> Result<Response, AppError>;
}
