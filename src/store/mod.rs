//! Record store capability: what the CRUD handlers need from a backing data store.
//!
//! Stores materialize relations one level deep: foreign keys as [`RelatedRef`](crate::record::RelatedRef)
//! (primary key plus display string), many-to-many fields as the related primary keys.

mod memory;
mod postgres;

pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{ensure_database_exists, PgRecordStore, PgTransaction};

use crate::query::QuerySpec;
use crate::record::Record;
use crate::schema::{FieldDescriptor, RecordType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Equality restrictions that define the caller's visible record set.
pub type Scope = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown field '{field}' on {record_type}")]
    UnknownField { record_type: String, field: String },
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),
    #[error("record has no primary key")]
    MissingPrimaryKey,
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Open a transaction. Nothing written through it is visible to others before `commit`.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Records matching every filter, in sort order when given and primary key order otherwise.
    /// Unknown filter or sort fields fail with [`StoreError::UnknownField`] before any data is read.
    async fn query(&self, record_type: &RecordType, spec: &QuerySpec) -> Result<Vec<Record>, StoreError>;

    /// One record by primary key, restricted to `scope`.
    async fn fetch(&self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError>;

    /// Delete one record (and its many-to-many links) with the store's own single-operation atomicity.
    async fn delete(&self, record_type: &RecordType, id: &Value) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn fetch(&mut self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError>;

    /// Insert when the record was never persisted, update its own columns otherwise.
    /// Re-saving an unchanged record is a no-op as far as stored data goes.
    async fn save(&mut self, record_type: &RecordType, record: &mut Record) -> Result<(), StoreError>;

    /// Remove every link of `field` for the record with primary key `pk`.
    async fn clear_related(&mut self, record_type: &RecordType, field: &FieldDescriptor, pk: &Value) -> Result<(), StoreError>;

    async fn add_related(
        &mut self,
        record_type: &RecordType,
        field: &FieldDescriptor,
        pk: &Value,
        targets: &[Value],
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
