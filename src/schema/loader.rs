//! Build the registry from in-memory config or from a schema JSON file.

use crate::error::ConfigError;
use crate::schema::resolved::{FieldDescriptor, RecordType, Registry, Relation, RelationTarget, Through};
use crate::schema::types::*;
use crate::schema::{primary_key_name, validate};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build resolved registry from schema config. Validates first; every failure is a registration-time error.
pub fn resolve(config: &SchemaConfig) -> Result<Registry, ConfigError> {
    validate(config)?;

    let targets: HashMap<&str, RelationTarget> = config
        .record_types
        .iter()
        .filter_map(|rt| {
            let pk = primary_key_name(rt)?;
            let kind = rt.fields.iter().find(|f| f.name == pk)?.kind;
            Some((
                rt.name.as_str(),
                RelationTarget {
                    name: rt.name.clone(),
                    primary_key: pk.to_string(),
                    primary_key_kind: kind,
                },
            ))
        })
        .collect();

    let mut registry = Registry::default();
    for rt in &config.record_types {
        let primary_key = primary_key_name(rt)
            .ok_or_else(|| ConfigError::MissingPrimaryKey(rt.name.clone()))?
            .to_string();
        let table = table_name(rt);

        let mut fields = Vec::with_capacity(rt.fields.len());
        for f in &rt.fields {
            let relation = if let Some(target) = &f.foreign_key {
                Relation::ForeignKey(lookup_target(&targets, target)?)
            } else if let Some(target) = &f.many_to_many {
                let through = through_for(rt, &table, f);
                Relation::ManyToMany(lookup_target(&targets, target)?, through)
            } else {
                Relation::None
            };
            let column = match (&f.column, &relation) {
                (Some(c), _) => c.clone(),
                (None, Relation::ForeignKey(_)) => format!("{}_id", f.name),
                (None, _) => f.name.clone(),
            };
            fields.push(FieldDescriptor {
                name: f.name.clone(),
                kind: f.kind,
                relation,
                nullable: f.nullable,
                column,
            });
        }

        let resolved = Arc::new(RecordType {
            name: rt.name.clone(),
            table,
            path_segment: rt.path_segment.clone().unwrap_or_else(|| rt.name.to_lowercase()),
            primary_key,
            fields,
            display_field: rt.display_field.clone(),
            owner_field: rt.owner_field.clone(),
            fields_override: rt.serialised_fields.clone(),
            serializer: None,
        });
        tracing::debug!(record_type = %resolved.name, fields = resolved.fields.len(), "registered record type");
        registry.by_name.insert(resolved.name.clone(), resolved.clone());
        registry.by_path.insert(resolved.path_segment.clone(), resolved.clone());
        registry.types.push(resolved);
    }
    Ok(registry)
}

/// Parse a schema JSON document and resolve it.
pub fn resolve_str(json: &str) -> Result<Registry, ConfigError> {
    let config: SchemaConfig = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    resolve(&config)
}

/// Read, parse and resolve a schema JSON file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<Registry, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    resolve_str(&text)
}

fn table_name(rt: &RecordTypeConfig) -> String {
    rt.table.clone().unwrap_or_else(|| rt.name.to_lowercase())
}

fn lookup_target(targets: &HashMap<&str, RelationTarget>, name: &str) -> Result<RelationTarget, ConfigError> {
    targets.get(name).cloned().ok_or_else(|| ConfigError::MissingReference {
        kind: "record type",
        id: name.to_string(),
    })
}

fn through_for(rt: &RecordTypeConfig, table: &str, f: &FieldConfig) -> Through {
    let given = f.through.clone().unwrap_or_default();
    let source = rt.name.to_lowercase();
    let target = f.many_to_many.as_deref().unwrap_or_default().to_lowercase();
    let (default_source, default_target) = if source == target {
        (format!("from_{}_id", source), format!("to_{}_id", target))
    } else {
        (format!("{}_id", source), format!("{}_id", target))
    };
    Through {
        table: given.table.unwrap_or_else(|| format!("{}_{}", table, f.name)),
        source_column: given.source_column.unwrap_or(default_source),
        target_column: given.target_column.unwrap_or(default_target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarKind;

    const LIBRARY: &str = r#"{
        "record_types": [
            {"name": "Author", "display_field": "name", "fields": [
                {"name": "id", "type": "AutoField"},
                {"name": "name", "type": "CharField"}
            ]},
            {"name": "Book", "table": "library_book", "fields": [
                {"name": "isbn", "type": "CharField", "primary_key": true},
                {"name": "author", "foreign_key": "Author", "nullable": true},
                {"name": "related", "many_to_many": "Book"},
                {"name": "weight", "type": "MysteryField"}
            ]}
        ]
    }"#;

    #[test]
    fn resolves_relations_and_storage_defaults() {
        let registry = resolve_str(LIBRARY).expect("valid schema");
        let book = registry.get("Book").expect("book registered");
        assert_eq!(book.primary_key, "isbn");
        assert_eq!(book.path_segment, "book");

        let author = book.field("author").expect("author field");
        assert_eq!(author.column, "author_id");
        match &author.relation {
            Relation::ForeignKey(t) => {
                assert_eq!(t.name, "Author");
                assert_eq!(t.primary_key, "id");
                assert_eq!(t.primary_key_kind, ScalarKind::AutoField);
            }
            other => panic!("expected foreign key, got {other:?}"),
        }

        match &book.field("related").expect("related").relation {
            Relation::ManyToMany(_, through) => {
                assert_eq!(through.table, "library_book_related");
                assert_eq!(through.source_column, "from_book_id");
                assert_eq!(through.target_column, "to_book_id");
            }
            other => panic!("expected many-to-many, got {other:?}"),
        }
        assert_eq!(book.field("weight").expect("weight").kind, ScalarKind::Other);
    }

    #[test]
    fn rejects_type_without_primary_key() {
        let err = resolve_str(r#"{"record_types": [{"name": "Loose", "fields": [{"name": "label"}]}]}"#)
            .expect_err("no primary key");
        assert!(matches!(err, ConfigError::MissingPrimaryKey(ref name) if name == "Loose"));
    }

    #[test]
    fn rejects_unknown_relation_target() {
        let err = resolve_str(
            r#"{"record_types": [{"name": "A", "fields": [{"name": "id"}, {"name": "b", "foreign_key": "B"}]}]}"#,
        )
        .expect_err("unknown target");
        assert!(matches!(err, ConfigError::MissingReference { .. }));
    }

    #[test]
    fn rejects_relation_valued_owner_field() {
        let err = resolve_str(
            r#"{"record_types": [{"name": "A", "owner_field": "a", "fields": [
                {"name": "id"}, {"name": "a", "foreign_key": "A"}
            ]}]}"#,
        )
        .expect_err("owner must be scalar");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn replacement_must_keep_its_primary_key() {
        let mut registry = resolve_str(LIBRARY).expect("valid schema");
        let mut author = registry.get("Author").expect("author").as_ref().clone();
        author.primary_key = "missing".into();
        assert!(!registry.replace(author));
        assert_eq!(registry.get("Author").expect("author").primary_key_field().name, "id");

        let author = registry.get("Author").expect("author").as_ref().clone();
        assert!(registry.replace(author));
        assert_eq!(registry.types().len(), 2);
    }
}
