//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and link-table statements from resolved record types.

use crate::coerce::value_to_text;
use crate::query::SortSpec;
use crate::record::{FieldValue, Record};
use crate::schema::{FieldDescriptor, RecordType, Registry, Relation, ScalarKind};
use crate::sql::params::{filter_term, pg_cast, text_param};
use crate::store::{Scope, StoreError};
use serde_json::Value;

/// Alias suffix of the display-string column selected for a foreign key.
pub const DISPLAY_ALIAS_SUFFIX: &str = "__display";

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from the registry).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Table name, schema-qualified when it contains a dot.
fn qualified_table(table: &str) -> String {
    table.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a text parameter and return its placeholder, cast for `kind`.
    fn push_param(&mut self, kind: ScalarKind, v: Option<String>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match pg_cast(kind) {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// SELECT expression that yields the native wire form of a column: integers as int8, floats as float8,
/// booleans as-is, temporal values as ISO-8601 text, JSON as json, everything else as text.
pub fn wire_expr(kind: ScalarKind, column: &str) -> String {
    use ScalarKind::*;
    match kind {
        AutoField | BigAutoField | IntegerField | BigIntegerField | SmallIntegerField | PositiveIntegerField
        | PositiveSmallIntegerField => format!("{}::int8", column),
        FloatField => format!("{}::float8", column),
        BooleanField | NullBooleanField => column.to_string(),
        DateField | DateTimeField | TimeField => format!("to_json({}) #>> '{{}}'", column),
        JSONField => format!("to_json({})", column),
        _ => format!("{}::text", column),
    }
}

fn main_col(column: &str) -> String {
    format!("{}.{}", MAIN_ALIAS, quoted(column))
}

fn unknown_field(rt: &RecordType, field: &str) -> StoreError {
    StoreError::UnknownField {
        record_type: rt.name.clone(),
        field: field.to_string(),
    }
}

fn target_type<'a>(registry: &'a Registry, name: &str) -> Result<&'a RecordType, StoreError> {
    registry
        .get(name)
        .map(|rt| rt.as_ref())
        .ok_or_else(|| StoreError::UnknownRecordType(name.to_string()))
}

/// Kind used for a field's stored column: a foreign key stores the target's primary key.
pub fn column_kind(field: &FieldDescriptor) -> ScalarKind {
    match &field.relation {
        Relation::ForeignKey(t) | Relation::ManyToMany(t, _) => t.primary_key_kind,
        Relation::None => field.kind,
    }
}

fn select_list(registry: &Registry, rt: &RecordType) -> Result<Vec<String>, StoreError> {
    let pk_col = main_col(&rt.primary_key_field().column);
    let mut parts = Vec::with_capacity(rt.fields.len() + 2);
    for field in &rt.fields {
        match &field.relation {
            Relation::None => {
                parts.push(format!("{} AS {}", wire_expr(field.kind, &main_col(&field.column)), quoted(&field.name)));
            }
            Relation::ForeignKey(target) => {
                let fk = main_col(&field.column);
                parts.push(format!("{} AS {}", wire_expr(target.primary_key_kind, &fk), quoted(&field.name)));
                let target_rt = target_type(registry, &target.name)?;
                if let Some(display_field) = target_rt.display_field.as_deref().and_then(|f| target_rt.field(f)) {
                    parts.push(format!(
                        "(SELECT t.{}::text FROM {} t WHERE t.{} = {}) AS {}",
                        quoted(&display_field.column),
                        qualified_table(&target_rt.table),
                        quoted(&target_rt.primary_key_field().column),
                        fk,
                        quoted(&format!("{}{}", field.name, DISPLAY_ALIAS_SUFFIX))
                    ));
                }
            }
            Relation::ManyToMany(target, through) => {
                let link_target = format!("l.{}", quoted(&through.target_column));
                parts.push(format!(
                    "(SELECT COALESCE(json_agg({} ORDER BY l.{}), '[]'::json) FROM {} l WHERE l.{} = {}) AS {}",
                    wire_expr(target.primary_key_kind, &link_target),
                    quoted(&through.target_column),
                    qualified_table(&through.table),
                    quoted(&through.source_column),
                    pk_col,
                    quoted(&field.name)
                ));
            }
        }
    }
    Ok(parts)
}

/// SELECT records with equality filters, optional primary key match and ordering.
/// Filter and sort fields are checked against the record type before anything is built.
pub fn select_records(
    registry: &Registry,
    rt: &RecordType,
    filters: &Scope,
    sort: Option<&SortSpec>,
    id: Option<&Value>,
) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let pk = rt.primary_key_field();
    let pk_col = main_col(&pk.column);

    let mut where_parts = Vec::new();
    if let Some(id) = id {
        let ph = q.push_param(pk.kind, value_to_text(id));
        where_parts.push(format!("{} = {}", pk_col, ph));
    }
    for (name, term) in filters {
        let field = rt.field(name).ok_or_else(|| unknown_field(rt, name))?;
        let kind = column_kind(field);
        match &field.relation {
            Relation::ManyToMany(_, through) => {
                let n = q.push_param(ScalarKind::Other, Some(filter_term(kind, term)));
                where_parts.push(format!(
                    "EXISTS (SELECT 1 FROM {} l WHERE l.{} = {} AND {} = {})",
                    qualified_table(&through.table),
                    quoted(&through.source_column),
                    pk_col,
                    wire_expr(ScalarKind::Other, &format!("l.{}", quoted(&through.target_column))),
                    n
                ));
            }
            _ => {
                let n = q.push_param(ScalarKind::Other, Some(filter_term(kind, term)));
                where_parts.push(format!("({})::text = {}", wire_expr(kind, &main_col(&field.column)), n));
            }
        }
    }

    let mut order = Vec::new();
    if let Some(sort) = sort {
        let field = rt
            .field(&sort.field)
            .filter(|f| !f.is_many_to_many())
            .ok_or_else(|| unknown_field(rt, &sort.field))?;
        let dir = if sort.descending { "DESC" } else { "ASC" };
        order.push(format!("{} {}", main_col(&field.column), dir));
    }
    order.push(format!("{} ASC", pk_col));

    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    q.sql = format!(
        "SELECT {} FROM {} {}{} ORDER BY {}",
        select_list(registry, rt)?.join(", "),
        qualified_table(&rt.table),
        MAIN_ALIAS,
        where_clause,
        order.join(", ")
    );
    Ok(q)
}

/// Stored value of a non-many-to-many field, if the record carries one.
fn column_value(record: &Record, field: &FieldDescriptor) -> Option<Value> {
    match record.get(&field.name)? {
        FieldValue::Scalar(v) => Some(v.clone()),
        FieldValue::ForeignKey(related) => Some(related.as_ref().map(|r| r.pk.clone()).unwrap_or(Value::Null)),
        FieldValue::ManyToMany(_) => None,
    }
}

/// INSERT the record's own columns. Fields the record has no value for are omitted so the database
/// default applies; the primary key is omitted until one is assigned.
pub fn insert_record(rt: &RecordType, record: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = rt.primary_key_field();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for field in rt.fields.iter().filter(|f| !f.is_many_to_many()) {
        let value = if field.name == pk.name {
            record.pk().cloned()
        } else {
            column_value(record, field)
        };
        let Some(value) = value else { continue };
        let kind = column_kind(field);
        placeholders.push(q.push_param(kind, text_param(kind, &value)));
        cols.push(quoted(&field.column));
    }
    let returning = format!("{} AS {}", wire_expr(pk.kind, &quoted(&pk.column)), quoted(&pk.name));
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", qualified_table(&rt.table), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(&rt.table),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE the record's own columns by primary key. `None` when there is nothing to set.
pub fn update_record(rt: &RecordType, record: &Record) -> Option<QueryBuf> {
    let mut q = QueryBuf::new();
    let pk = rt.primary_key_field();
    let mut sets = Vec::new();
    for field in rt.fields.iter().filter(|f| !f.is_many_to_many() && f.name != pk.name) {
        let Some(value) = column_value(record, field) else { continue };
        let kind = column_kind(field);
        let ph = q.push_param(kind, text_param(kind, &value));
        sets.push(format!("{} = {}", quoted(&field.column), ph));
    }
    if sets.is_empty() {
        return None;
    }
    let id = q.push_param(pk.kind, record.pk().and_then(value_to_text));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        qualified_table(&rt.table),
        sets.join(", "),
        quoted(&pk.column),
        id
    );
    Some(q)
}

/// DELETE every link of a many-to-many field for one source record.
pub fn clear_links(rt: &RecordType, field: &FieldDescriptor, pk: &Value) -> Result<QueryBuf, StoreError> {
    let Relation::ManyToMany(_, through) = &field.relation else {
        return Err(unknown_field(rt, &field.name));
    };
    let mut q = QueryBuf::new();
    let ph = q.push_param(rt.primary_key_field().kind, value_to_text(pk));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        qualified_table(&through.table),
        quoted(&through.source_column),
        ph
    );
    Ok(q)
}

/// INSERT links from one source record to each target.
pub fn insert_links(rt: &RecordType, field: &FieldDescriptor, pk: &Value, targets: &[Value]) -> Result<QueryBuf, StoreError> {
    let Relation::ManyToMany(target, through) = &field.relation else {
        return Err(unknown_field(rt, &field.name));
    };
    let mut q = QueryBuf::new();
    let source_kind = rt.primary_key_field().kind;
    let rows: Vec<String> = targets
        .iter()
        .map(|t| {
            let s = q.push_param(source_kind, value_to_text(pk));
            let t = q.push_param(target.primary_key_kind, value_to_text(t));
            format!("({}, {})", s, t)
        })
        .collect();
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES {}",
        qualified_table(&through.table),
        quoted(&through.source_column),
        quoted(&through.target_column),
        rows.join(", ")
    );
    Ok(q)
}

/// Statements removing a record and every link that mentions it, in execution order.
pub fn delete_record(registry: &Registry, rt: &RecordType, id: &Value) -> Vec<QueryBuf> {
    let pk = rt.primary_key_field();
    let mut out = Vec::new();
    for field in rt.many_to_many_fields() {
        if let Ok(q) = clear_links(rt, field, id) {
            out.push(q);
        }
    }
    for other in &registry.types {
        for field in other.many_to_many_fields() {
            let Relation::ManyToMany(target, through) = &field.relation else { continue };
            if target.name != rt.name {
                continue;
            }
            let mut q = QueryBuf::new();
            let ph = q.push_param(pk.kind, value_to_text(id));
            q.sql = format!(
                "DELETE FROM {} WHERE {} = {}",
                qualified_table(&through.table),
                quoted(&through.target_column),
                ph
            );
            out.push(q);
        }
    }
    let mut q = QueryBuf::new();
    let ph = q.push_param(pk.kind, value_to_text(id));
    q.sql = format!("DELETE FROM {} WHERE {} = {}", qualified_table(&rt.table), quoted(&pk.column), ph);
    out.push(q);
    out
}
