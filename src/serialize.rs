//! Record → flat wire record, and record collections → collection envelope.

use crate::record::{FieldValue, FlatRecord, Record};
use crate::response::{CollectionEnvelope, MetaData};
use crate::schema::{FieldMeta, RecordType, Relation};
use crate::wire::{field_wire_type, WIRE_STRING};
use serde_json::Value;

pub const DISPLAY_SUFFIX: &str = "__unicode";

/// Field metadata for the grid. A configured override is returned verbatim.
pub fn field_metadata(rt: &RecordType) -> Vec<FieldMeta> {
    if let Some(fields) = &rt.fields_override {
        return fields.clone();
    }
    let mut fields = Vec::with_capacity(rt.fields.len());
    for field in &rt.fields {
        fields.push(FieldMeta::new(field.name.clone(), field_wire_type(field)));
        if field.is_foreign_key() {
            fields.push(FieldMeta::new(format!("{}{}", field.name, DISPLAY_SUFFIX), WIRE_STRING));
        }
    }
    fields
}

pub fn to_flat_record(rt: &RecordType, record: &Record) -> FlatRecord {
    if let Some(serializer) = &rt.serializer {
        return serializer.call(record);
    }
    let mut flat = FlatRecord::new();
    for field in &rt.fields {
        let value = record.get(&field.name);
        match &field.relation {
            Relation::ForeignKey(_) => {
                let related = match value {
                    Some(FieldValue::ForeignKey(Some(r))) => Some(r),
                    _ => None,
                };
                flat.insert(field.name.clone(), related.map(|r| r.pk.clone()).unwrap_or(Value::Null));
                flat.insert(
                    format!("{}{}", field.name, DISPLAY_SUFFIX),
                    Value::String(related.map(|r| r.display.clone()).unwrap_or_default()),
                );
            }
            Relation::ManyToMany(..) => {
                let keys = match value {
                    Some(FieldValue::ManyToMany(keys)) => keys.clone(),
                    _ => Vec::new(),
                };
                flat.insert(field.name.clone(), Value::Array(keys));
            }
            Relation::None => {
                let scalar = match value {
                    Some(FieldValue::Scalar(v)) => v.clone(),
                    _ => Value::Null,
                };
                flat.insert(field.name.clone(), scalar);
            }
        }
    }
    flat
}

pub fn to_envelope(rt: &RecordType, records: &[Record]) -> CollectionEnvelope {
    CollectionEnvelope {
        meta_data: MetaData {
            root: "rows",
            id_property: rt.primary_key.clone(),
            success_property: "success",
            fields: field_metadata(rt),
        },
        rows: records.iter().map(|r| to_flat_record(rt, r)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RelatedRef;
    use crate::schema::resolve_str;
    use serde_json::json;

    fn registry() -> crate::schema::Registry {
        resolve_str(
            r#"{"record_types": [
                {"name": "Author", "display_field": "name", "fields": [
                    {"name": "id", "type": "AutoField"}, {"name": "name", "type": "CharField"}
                ]},
                {"name": "Tag", "fields": [{"name": "id", "type": "AutoField"}]},
                {"name": "Book", "fields": [
                    {"name": "id", "type": "AutoField"},
                    {"name": "title", "type": "CharField"},
                    {"name": "author", "foreign_key": "Author", "nullable": true},
                    {"name": "tags", "many_to_many": "Tag"}
                ]}
            ]}"#,
        )
        .expect("valid schema")
    }

    #[test]
    fn metadata_adds_display_field_after_foreign_keys() {
        let registry = registry();
        let book = registry.get("Book").expect("book");
        let names: Vec<(String, String)> = field_metadata(book).into_iter().map(|f| (f.name, f.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("id".to_string(), "int".to_string()),
                ("title".to_string(), "auto".to_string()),
                ("author".to_string(), "int".to_string()),
                ("author__unicode".to_string(), "string".to_string()),
                ("tags".to_string(), "auto".to_string()),
            ]
        );
    }

    #[test]
    fn flat_record_renders_relations() {
        let registry = registry();
        let book = registry.get("Book").expect("book");
        let mut record = Record::loaded(book, json!(4), Default::default());
        record.set("title", FieldValue::Scalar(json!("Dune")));
        record.set(
            "author",
            FieldValue::ForeignKey(Some(RelatedRef {
                pk: json!(1),
                display: "Frank Herbert".into(),
            })),
        );
        record.set("tags", FieldValue::ManyToMany(vec![json!(2), json!(3)]));

        let flat = to_flat_record(book, &record);
        assert_eq!(
            Value::Object(flat),
            json!({"id": 4, "title": "Dune", "author": 1, "author__unicode": "Frank Herbert", "tags": [2, 3]})
        );
    }

    #[test]
    fn unset_foreign_key_renders_null_and_empty_display() {
        let registry = registry();
        let book = registry.get("Book").expect("book");
        let record = Record::loaded(book, json!(9), Default::default());
        let flat = to_flat_record(book, &record);
        assert_eq!(flat.get("author"), Some(&Value::Null));
        assert_eq!(flat.get("author__unicode"), Some(&json!("")));
        assert_eq!(flat.get("tags"), Some(&json!([])));
    }

    #[test]
    fn overrides_are_used_verbatim() {
        let mut registry = registry();
        let mut tag = registry.get("Tag").expect("tag").as_ref().clone();
        tag.fields_override = Some(vec![FieldMeta::new("label", "string")]);
        let tag = tag.with_serializer(|r| {
            let mut flat = FlatRecord::new();
            flat.insert("label".into(), json!(format!("tag-{}", r.pk().cloned().unwrap_or_default())));
            flat
        });
        assert!(registry.replace(tag));
        let tag = registry.get("Tag").expect("tag");

        let envelope = to_envelope(tag, &[Record::loaded(tag, json!(5), Default::default())]);
        assert_eq!(envelope.meta_data.fields, vec![FieldMeta::new("label", "string")]);
        assert_eq!(envelope.meta_data.id_property, "id");
        assert_eq!(Value::Object(envelope.rows[0].clone()), json!({"label": "tag-5"}));
    }
}
