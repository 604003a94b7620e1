//! PostgreSQL record store over a sqlx pool.

use super::{RecordStore, Scope, StoreError, StoreTransaction};
use crate::query::QuerySpec;
use crate::record::{FieldValue, Record, RelatedRef};
use crate::schema::{FieldDescriptor, RecordType, Registry, Relation, ScalarKind};
use crate::sql::{
    clear_links, delete_record, insert_links, insert_record, select_records, update_record, QueryBuf,
    DISPLAY_ALIAS_SUFFIX,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Row};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

fn bound(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    q.params
        .iter()
        .fold(sqlx::query(&q.sql), |query, p| query.bind(p.clone()))
}

async fn fetch_rows(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<PgRow>, StoreError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    Ok(bound(q).fetch_all(conn).await?)
}

async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, StoreError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    Ok(bound(q).execute(conn).await?.rows_affected())
}

/// Decode one selected column in the wire form the SELECT list produces for `kind`.
fn decode_scalar(row: &PgRow, name: &str, kind: ScalarKind) -> Result<Value, StoreError> {
    use ScalarKind::*;
    let v = match kind {
        AutoField | BigAutoField | IntegerField | BigIntegerField | SmallIntegerField | PositiveIntegerField
        | PositiveSmallIntegerField => row.try_get::<Option<i64>, _>(name)?.map(Value::from),
        FloatField => row
            .try_get::<Option<f64>, _>(name)?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        BooleanField | NullBooleanField => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
        JSONField => row.try_get::<Option<Value>, _>(name)?,
        _ => row.try_get::<Option<String>, _>(name)?.map(Value::String),
    };
    Ok(v.unwrap_or(Value::Null))
}

fn decode_record(registry: &Registry, rt: &RecordType, row: &PgRow) -> Result<Record, StoreError> {
    let mut values = HashMap::with_capacity(rt.fields.len());
    for field in &rt.fields {
        let value = match &field.relation {
            Relation::None => FieldValue::Scalar(decode_scalar(row, &field.name, field.kind)?),
            Relation::ForeignKey(target) => {
                let pk = decode_scalar(row, &field.name, target.primary_key_kind)?;
                if pk.is_null() {
                    FieldValue::ForeignKey(None)
                } else {
                    let target_rt = registry
                        .get(&target.name)
                        .ok_or_else(|| StoreError::UnknownRecordType(target.name.clone()))?;
                    let display_value = if target_rt.display_field.is_some() {
                        row.try_get::<Option<String>, _>(format!("{}{}", field.name, DISPLAY_ALIAS_SUFFIX).as_str())?
                            .map(Value::String)
                    } else {
                        None
                    };
                    let display = target_rt.display_from_parts(&pk, display_value.as_ref());
                    FieldValue::ForeignKey(Some(RelatedRef { pk, display }))
                }
            }
            Relation::ManyToMany(..) => match row.try_get::<Option<Value>, _>(field.name.as_str())? {
                Some(Value::Array(keys)) => FieldValue::ManyToMany(keys),
                _ => FieldValue::ManyToMany(Vec::new()),
            },
        };
        values.insert(field.name.clone(), value);
    }
    let pk = match values.get(&rt.primary_key) {
        Some(FieldValue::Scalar(v)) if !v.is_null() => v.clone(),
        _ => return Err(StoreError::MissingPrimaryKey),
    };
    Ok(Record::loaded(rt, pk, values))
}

async fn fetch_one_record(
    conn: &mut PgConnection,
    registry: &Registry,
    rt: &RecordType,
    id: &Value,
    scope: &Scope,
) -> Result<Option<Record>, StoreError> {
    let q = select_records(registry, rt, scope, None, Some(id))?;
    let rows = fetch_rows(conn, &q).await?;
    rows.first().map(|row| decode_record(registry, rt, row)).transpose()
}

/// Record store backed by PostgreSQL tables laid out per the registry.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    registry: Arc<Registry>,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, registry: Arc<Registry>) -> Self {
        Self { pool, registry }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
            registry: self.registry.clone(),
        })
    }

    async fn query(&self, record_type: &RecordType, spec: &QuerySpec) -> Result<Vec<Record>, StoreError> {
        let q = select_records(&self.registry, record_type, &spec.filters, spec.sort.as_ref(), None)?;
        let mut conn = self.pool.acquire().await?;
        let rows = fetch_rows(&mut *conn, &q).await?;
        rows.iter()
            .map(|row| decode_record(&self.registry, record_type, row))
            .collect()
    }

    async fn fetch(&self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_one_record(&mut *conn, &self.registry, record_type, id, scope).await
    }

    async fn delete(&self, record_type: &RecordType, id: &Value) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for q in delete_record(&self.registry, record_type, id) {
            execute(&mut *tx, &q).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// One database transaction. Dropping it without `commit` rolls back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    registry: Arc<Registry>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn fetch(&mut self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        fetch_one_record(&mut *self.tx, &self.registry, record_type, id, scope).await
    }

    async fn save(&mut self, record_type: &RecordType, record: &mut Record) -> Result<(), StoreError> {
        if !record.is_persisted() {
            let q = insert_record(record_type, record);
            let rows = fetch_rows(&mut *self.tx, &q).await?;
            let pk_field = record_type.primary_key_field();
            let row = rows.first().ok_or(StoreError::MissingPrimaryKey)?;
            let pk = decode_scalar(row, &pk_field.name, pk_field.kind)?;
            if pk.is_null() {
                return Err(StoreError::MissingPrimaryKey);
            }
            record.mark_persisted(pk);
            return Ok(());
        }
        let Some(q) = update_record(record_type, record) else {
            return Ok(());
        };
        if execute(&mut *self.tx, &q).await? == 0 {
            return Err(StoreError::Backend(format!("{} no longer exists", record_type.name)));
        }
        Ok(())
    }

    async fn clear_related(&mut self, record_type: &RecordType, field: &FieldDescriptor, pk: &Value) -> Result<(), StoreError> {
        let q = clear_links(record_type, field, pk)?;
        execute(&mut *self.tx, &q).await?;
        Ok(())
    }

    async fn add_related(
        &mut self,
        record_type: &RecordType,
        field: &FieldDescriptor,
        pk: &Value,
        targets: &[Value],
    ) -> Result<(), StoreError> {
        if targets.is_empty() {
            return Ok(());
        }
        let q = insert_links(record_type, field, pk, targets)?;
        execute(&mut *self.tx, &q).await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Create the database named in `database_url` when it does not exist yet, connecting through the
/// `postgres` maintenance database.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = split_database_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| StoreError::Backend(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name.replace('"', "\"\"")))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

/// Split a connection URL into the maintenance-database URL and the target database name.
fn split_database_url(url: &str) -> Result<(String, String), StoreError> {
    let scheme_end = url.find("://").map_or(0, |i| i + 3);
    let path_start = url
        .get(scheme_end..)
        .and_then(|rest| rest.find('/'))
        .map(|i| scheme_end + i + 1)
        .ok_or_else(|| StoreError::Backend("DATABASE_URL has no database path".into()))?;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let (db_name, query) = match path_and_query.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (path_and_query, None),
    };
    let base = url.get(..path_start).unwrap_or(url);
    let admin_url = match query {
        Some(q) => format!("{}postgres?{}", base, q),
        None => format!("{}postgres", base),
    };
    Ok((admin_url, db_name.trim().to_string()))
}
