//! In-process record store. Transactions work on a private copy of the tables and hold the store lock
//! until commit or rollback, so they are serializable.

use super::{RecordStore, Scope, StoreError, StoreTransaction};
use crate::coerce::{compare_values, matches_term, value_to_text};
use crate::query::QuerySpec;
use crate::record::{FieldValue, Record, RelatedRef};
use crate::schema::{FieldDescriptor, RecordType, Registry, Relation, ScalarKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug)]
struct StoredRow {
    pk: Value,
    /// Field name → stored value; foreign keys hold the target's primary key.
    columns: HashMap<String, Value>,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<String, StoredRow>>,
    /// (record type, field) → source key → target primary keys.
    links: HashMap<(String, String), HashMap<String, Vec<Value>>>,
    sequences: HashMap<String, i64>,
}

fn key(v: &Value) -> String {
    value_to_text(v).unwrap_or_else(|| "null".into())
}

fn unknown_field(rt: &RecordType, field: &str) -> StoreError {
    StoreError::UnknownField {
        record_type: rt.name.clone(),
        field: field.to_string(),
    }
}

fn is_integer_kind(kind: ScalarKind) -> bool {
    use ScalarKind::*;
    matches!(
        kind,
        AutoField
            | BigAutoField
            | IntegerField
            | BigIntegerField
            | SmallIntegerField
            | PositiveIntegerField
            | PositiveSmallIntegerField
    )
}

impl Tables {
    fn row(&self, record_type: &str, id: &Value) -> Option<&StoredRow> {
        self.rows.get(record_type)?.get(&key(id))
    }

    fn related_keys(&self, rt: &RecordType, field: &str, source: &str) -> Vec<Value> {
        self.links
            .get(&(rt.name.clone(), field.to_string()))
            .and_then(|by_source| by_source.get(source))
            .cloned()
            .unwrap_or_default()
    }

    fn materialize(&self, registry: &Registry, rt: &RecordType, row: &StoredRow) -> Record {
        let source = key(&row.pk);
        let mut values = HashMap::with_capacity(rt.fields.len());
        for field in &rt.fields {
            let value = match &field.relation {
                Relation::None => FieldValue::Scalar(row.columns.get(&field.name).cloned().unwrap_or(Value::Null)),
                Relation::ForeignKey(target) => {
                    let related = row
                        .columns
                        .get(&field.name)
                        .filter(|v| !v.is_null())
                        .and_then(|fk| {
                            let target_rt = registry.get(&target.name)?;
                            let target_row = self.row(&target.name, fk)?;
                            let display_value = target_rt
                                .display_field
                                .as_ref()
                                .and_then(|f| target_row.columns.get(f));
                            Some(RelatedRef {
                                pk: target_row.pk.clone(),
                                display: target_rt.display_from_parts(&target_row.pk, display_value),
                            })
                        });
                    FieldValue::ForeignKey(related)
                }
                Relation::ManyToMany(target, _) => {
                    let mut keys: Vec<Value> = self
                        .related_keys(rt, &field.name, &source)
                        .into_iter()
                        .filter(|k| self.row(&target.name, k).is_some())
                        .collect();
                    keys.sort_by(compare_values);
                    FieldValue::ManyToMany(keys)
                }
            };
            values.insert(field.name.clone(), value);
        }
        Record::loaded(rt, row.pk.clone(), values)
    }

    fn row_matches(&self, rt: &RecordType, row: &StoredRow, filters: &Scope) -> bool {
        filters.iter().all(|(name, term)| {
            let Some(field) = rt.field(name) else { return false };
            match &field.relation {
                Relation::ManyToMany(..) => self
                    .related_keys(rt, name, &key(&row.pk))
                    .iter()
                    .any(|k| matches_term(k, term)),
                _ => matches_term(row.columns.get(name).unwrap_or(&Value::Null), term),
            }
        })
    }

    fn fetch(&self, registry: &Registry, rt: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        check_filters(rt, scope)?;
        Ok(self
            .row(&rt.name, id)
            .filter(|row| self.row_matches(rt, row, scope))
            .map(|row| self.materialize(registry, rt, row)))
    }

    fn next_sequence(&mut self, rt: &RecordType) -> i64 {
        let max_existing = self
            .rows
            .get(&rt.name)
            .map(|rows| rows.values().filter_map(|r| r.pk.as_i64()).max().unwrap_or(0))
            .unwrap_or(0);
        let seq = self.sequences.entry(rt.name.clone()).or_insert(0);
        *seq = (*seq).max(max_existing) + 1;
        *seq
    }

    fn save(&mut self, rt: &RecordType, record: &mut Record) -> Result<(), StoreError> {
        let pk = match (record.is_persisted(), record.pk().cloned()) {
            (true, Some(pk)) => pk,
            (true, None) => return Err(StoreError::MissingPrimaryKey),
            (false, Some(pk)) => {
                if self.row(&rt.name, &pk).is_some() {
                    return Err(StoreError::Backend(format!(
                        "duplicate primary key {} for {}",
                        key(&pk),
                        rt.name
                    )));
                }
                pk
            }
            (false, None) if is_integer_kind(rt.primary_key_field().kind) => Value::from(self.next_sequence(rt)),
            (false, None) => return Err(StoreError::MissingPrimaryKey),
        };

        let table = self.rows.entry(rt.name.clone()).or_default();
        let mut columns = table.get(&key(&pk)).map(|r| r.columns.clone()).unwrap_or_default();
        for field in rt.fields.iter().filter(|f| !f.is_many_to_many()) {
            let value = match record.get(&field.name) {
                Some(FieldValue::Scalar(v)) => v.clone(),
                Some(FieldValue::ForeignKey(related)) => related.as_ref().map(|r| r.pk.clone()).unwrap_or(Value::Null),
                Some(FieldValue::ManyToMany(_)) | None => {
                    columns.entry(field.name.clone()).or_insert(Value::Null);
                    continue;
                }
            };
            columns.insert(field.name.clone(), value);
        }
        columns.insert(rt.primary_key.clone(), pk.clone());
        table.insert(
            key(&pk),
            StoredRow {
                pk: pk.clone(),
                columns,
            },
        );
        record.mark_persisted(pk);
        Ok(())
    }

    fn links_for(&mut self, rt: &RecordType, field: &FieldDescriptor, pk: &Value) -> Result<&mut Vec<Value>, StoreError> {
        if self.row(&rt.name, pk).is_none() {
            return Err(StoreError::Backend(format!(
                "{} {} must be saved before relating {}",
                rt.name,
                key(pk),
                field.name
            )));
        }
        Ok(self
            .links
            .entry((rt.name.clone(), field.name.clone()))
            .or_default()
            .entry(key(pk))
            .or_default())
    }

    fn delete(&mut self, registry: &Registry, rt: &RecordType, id: &Value) {
        let k = key(id);
        if let Some(rows) = self.rows.get_mut(&rt.name) {
            rows.remove(&k);
        }
        for field in rt.many_to_many_fields() {
            if let Some(by_source) = self.links.get_mut(&(rt.name.clone(), field.name.clone())) {
                by_source.remove(&k);
            }
        }
        // Links from other types pointing at the deleted record.
        for other in &registry.types {
            for field in other.many_to_many_fields() {
                if field.target().map(|t| t.name.as_str()) != Some(rt.name.as_str()) {
                    continue;
                }
                if let Some(by_source) = self.links.get_mut(&(other.name.clone(), field.name.clone())) {
                    for targets in by_source.values_mut() {
                        targets.retain(|t| key(t) != k);
                    }
                }
            }
        }
    }
}

fn check_filters(rt: &RecordType, filters: &Scope) -> Result<(), StoreError> {
    match filters.keys().find(|name| rt.field(name).is_none()) {
        Some(name) => Err(unknown_field(rt, name)),
        None => Ok(()),
    }
}

fn check_query(rt: &RecordType, spec: &QuerySpec) -> Result<(), StoreError> {
    check_filters(rt, &spec.filters)?;
    if let Some(sort) = &spec.sort {
        match rt.field(&sort.field) {
            Some(f) if !f.is_many_to_many() => {}
            _ => return Err(unknown_field(rt, &sort.field)),
        }
    }
    Ok(())
}

/// Record store kept entirely in memory. Cloning shares the same data.
#[derive(Clone)]
pub struct MemoryStore {
    registry: Arc<Registry>,
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }

    /// Number of stored records of a type.
    pub async fn count(&self, record_type: &str) -> usize {
        self.tables.lock().await.rows.get(record_type).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(MemoryTransaction {
            guard,
            working,
            registry: self.registry.clone(),
        })
    }

    async fn query(&self, record_type: &RecordType, spec: &QuerySpec) -> Result<Vec<Record>, StoreError> {
        check_query(record_type, spec)?;
        let tables = self.tables.lock().await;
        let Some(rows) = tables.rows.get(&record_type.name) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<&StoredRow> = rows
            .values()
            .filter(|row| tables.row_matches(record_type, row, &spec.filters))
            .collect();
        matched.sort_by(|a, b| compare_values(&a.pk, &b.pk));
        if let Some(sort) = &spec.sort {
            matched.sort_by(|a, b| {
                let null = Value::Null;
                let ord = compare_values(
                    a.columns.get(&sort.field).unwrap_or(&null),
                    b.columns.get(&sort.field).unwrap_or(&null),
                );
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(matched
            .into_iter()
            .map(|row| tables.materialize(&self.registry, record_type, row))
            .collect())
    }

    async fn fetch(&self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        self.tables.lock().await.fetch(&self.registry, record_type, id, scope)
    }

    async fn delete(&self, record_type: &RecordType, id: &Value) -> Result<(), StoreError> {
        self.tables.lock().await.delete(&self.registry, record_type, id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    registry: Arc<Registry>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn fetch(&mut self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        self.working.fetch(&self.registry, record_type, id, scope)
    }

    async fn save(&mut self, record_type: &RecordType, record: &mut Record) -> Result<(), StoreError> {
        self.working.save(record_type, record)
    }

    async fn clear_related(&mut self, record_type: &RecordType, field: &FieldDescriptor, pk: &Value) -> Result<(), StoreError> {
        self.working.links_for(record_type, field, pk)?.clear();
        Ok(())
    }

    async fn add_related(
        &mut self,
        record_type: &RecordType,
        field: &FieldDescriptor,
        pk: &Value,
        targets: &[Value],
    ) -> Result<(), StoreError> {
        let target = field.target().ok_or_else(|| unknown_field(record_type, &field.name))?;
        if let Some(missing) = targets.iter().find(|t| self.working.row(&target.name, t).is_none()) {
            return Err(StoreError::Backend(format!("{} {} does not exist", target.name, key(missing))));
        }
        let links = self.working.links_for(record_type, field, pk)?;
        for t in targets {
            if !links.iter().any(|existing| key(existing) == key(t)) {
                links.push(t.clone());
            }
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, working, .. } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
