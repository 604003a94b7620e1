//! End-to-end tests of the JSON grid routes against the in-memory store.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use gridstore_sdk::schema::FieldDescriptor;
use gridstore_sdk::store::{MemoryTransaction, Scope};
use gridstore_sdk::{
    app, resolve_str, AppOptions, HeaderIdentity, MemoryStore, QuerySpec, Record, RecordStore, RecordType, Registry,
    StatusCheck, StoreError, StoreTransaction,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SCHEMA: &str = r#"{"record_types": [
    {"name": "Author", "display_field": "name", "fields": [
        {"name": "id", "type": "AutoField"},
        {"name": "name", "type": "CharField"}
    ]},
    {"name": "Tag", "display_field": "label", "fields": [
        {"name": "id", "type": "AutoField"},
        {"name": "label", "type": "CharField"}
    ]},
    {"name": "Book", "fields": [
        {"name": "id", "type": "AutoField"},
        {"name": "title", "type": "CharField"},
        {"name": "pages", "type": "PositiveIntegerField", "nullable": true},
        {"name": "published", "type": "DateField", "nullable": true},
        {"name": "author", "foreign_key": "Author", "nullable": true},
        {"name": "tags", "many_to_many": "Tag"}
    ]},
    {"name": "Note", "owner_field": "owner", "fields": [
        {"name": "id", "type": "AutoField"},
        {"name": "body", "type": "TextField"},
        {"name": "owner", "type": "CharField"}
    ]}
]}"#;

fn registry() -> Arc<Registry> {
    Arc::new(resolve_str(SCHEMA).expect("valid schema"))
}

fn router<S: RecordStore>(store: S, registry: Arc<Registry>) -> Router {
    router_with(store, registry, &AppOptions::default())
}

fn router_with<S: RecordStore>(store: S, registry: Arc<Registry>, options: &AppOptions) -> Router {
    app(Arc::new(store), registry, Arc::new(HeaderIdentity::default()), options).expect("router")
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn call(app: &Router, method: Method, uri: &str, user: Option<&str>, body: Option<(&str, String)>) -> Reply {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header("X-Remote-User", user);
    }
    let request = match body {
        Some((content_type, body)) => request
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body)),
        None => request.body(Body::empty()),
    }
    .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Reply { status, headers, body }
}

async fn get(app: &Router, uri: &str) -> Reply {
    call(app, Method::GET, uri, Some("alice"), None).await
}

async fn post(app: &Router, uri: &str, data: Value) -> Reply {
    let body = json!({ "data": data }).to_string();
    call(app, Method::POST, uri, Some("alice"), Some(("application/json", body))).await
}

async fn put(app: &Router, uri: &str, data: Value) -> Reply {
    let body = json!({ "data": data }).to_string();
    call(app, Method::PUT, uri, Some("alice"), Some(("application/json", body))).await
}

async fn seed_tags(app: &Router, labels: &[&str]) -> Vec<Value> {
    let mut ids = Vec::new();
    for label in labels {
        let reply = post(app, "/api/tag/json", json!({ "label": label })).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        ids.push(reply.body["data"]["id"].clone());
    }
    ids
}

fn titles(reply: &Reply) -> Vec<Value> {
    reply.body["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|row| row["title"].clone())
        .collect()
}

#[tokio::test]
async fn create_then_read_returns_identical_record() {
    let app = router(MemoryStore::new(registry()), registry());
    let author = post(&app, "/api/author/json", json!({ "name": "Le Guin" })).await;
    assert_eq!(author.status, StatusCode::OK);
    assert_eq!(
        author.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/json; charset=UTF-8")
    );
    assert_eq!(author.body["message"], "Created new record.");
    let tags = seed_tags(&app, &["fantasy"]).await;

    let created = post(
        &app,
        "/api/book/json",
        json!({
            "title": "A Wizard of Earthsea",
            "pages": "183",
            "published": "1968-11-01",
            "author": author.body["data"]["id"],
            "tags": tags,
        }),
    )
    .await;
    assert_eq!(created.status, StatusCode::OK, "{}", created.body);
    assert_eq!(created.body["success"], true);
    let data = &created.body["data"];
    assert_eq!(data["pages"], 183);
    assert_eq!(data["author"], 1);
    assert_eq!(data["author__unicode"], "Le Guin");
    assert_eq!(data["tags"], json!([1]));

    let read = get(&app, "/api/book/json?_dc=1290000000").await;
    assert_eq!(read.status, StatusCode::OK);
    let meta = &read.body["metaData"];
    assert_eq!(meta["root"], "rows");
    assert_eq!(meta["idProperty"], "id");
    assert_eq!(meta["successProperty"], "success");
    assert_eq!(
        meta["fields"],
        json!([
            {"name": "id", "type": "int"},
            {"name": "title", "type": "auto"},
            {"name": "pages", "type": "int"},
            {"name": "published", "type": "date"},
            {"name": "author", "type": "int"},
            {"name": "author__unicode", "type": "string"},
            {"name": "tags", "type": "auto"}
        ])
    );
    assert_eq!(read.body["rows"], json!([data]));
}

#[tokio::test]
async fn update_of_missing_record_is_not_found_and_changes_nothing() {
    let app = router(MemoryStore::new(registry()), registry());
    post(&app, "/api/book/json", json!({ "title": "Dune" })).await;

    let reply = put(&app, "/api/book/json/42", json!({ "title": "Emma" })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, json!({"success": false, "message": "The record could not be found."}));

    let read = get(&app, "/api/book/json").await;
    assert_eq!(titles(&read), vec![json!("Dune")]);
}

#[tokio::test]
async fn unknown_filter_field_is_a_client_error() {
    let app = router(MemoryStore::new(registry()), registry());
    let reply = get(&app, "/api/book/json?colour=red").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, json!({"success": false, "message": "Bad search term."}));

    let reply = get(&app, "/api/book/json?sort=colour&dir=asc").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn filters_match_on_equality() {
    let app = router(MemoryStore::new(registry()), registry());
    post(&app, "/api/book/json", json!({ "title": "Dune", "pages": 412 })).await;
    post(&app, "/api/book/json", json!({ "title": "Emma", "pages": 474 })).await;
    let reply = get(&app, "/api/book/json?pages=474&_DC=5").await;
    assert_eq!(titles(&reply), vec![json!("Emma")]);
}

#[tokio::test]
async fn many_to_many_update_replaces_the_whole_set() {
    let app = router(MemoryStore::new(registry()), registry());
    let tags = seed_tags(&app, &["a", "b", "c"]).await;
    let created = post(&app, "/api/book/json", json!({ "title": "Dune", "tags": [tags[0], tags[1]] })).await;
    assert_eq!(created.body["data"]["tags"], json!([1, 2]));

    let updated = put(&app, "/api/book/json/1", json!({ "tags": [tags[2]] })).await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.body);
    assert_eq!(updated.body["success"], true);
    assert_eq!(updated.body["data"]["tags"], json!([3]));
    assert!(updated.body.get("message").is_none());

    let read = get(&app, "/api/book/json").await;
    assert_eq!(read.body["rows"][0]["tags"], json!([3]));
}

#[tokio::test]
async fn descending_sort_reverses_ascending_order() {
    let app = router(MemoryStore::new(registry()), registry());
    for (title, pages) in [("b", 3), ("a", 1), ("c", 2)] {
        post(&app, "/api/book/json", json!({ "title": title, "pages": pages })).await;
    }
    let asc = titles(&get(&app, "/api/book/json?sort=pages&dir=ASC").await);
    let mut desc = titles(&get(&app, "/api/book/json?sort=pages&dir=desc").await);
    assert_eq!(asc, vec![json!("a"), json!("c"), json!("b")]);
    desc.reverse();
    assert_eq!(asc, desc);
}

#[tokio::test]
async fn create_accepts_form_encoded_body() {
    let app = router(MemoryStore::new(registry()), registry());
    seed_tags(&app, &["a", "b"]).await;
    let reply = call(
        &app,
        Method::POST,
        "/api/book/json",
        Some("alice"),
        Some((
            "application/x-www-form-urlencoded",
            "title=Dune&pages=412&published=&tags=1&tags=2".to_string(),
        )),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let data = &reply.body["data"];
    assert_eq!(data["title"], "Dune");
    assert_eq!(data["pages"], 412);
    assert_eq!(data["published"], Value::Null);
    assert_eq!(data["tags"], json!([1, 2]));
}

#[tokio::test]
async fn blank_form_many_to_many_value_creates_no_links() {
    let app = router(MemoryStore::new(registry()), registry());
    seed_tags(&app, &["a"]).await;
    let reply = call(
        &app,
        Method::POST,
        "/api/book/json",
        Some("alice"),
        Some(("application/x-www-form-urlencoded", "title=Dune&tags=".to_string())),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.body["data"]["tags"], json!([]));
}

#[tokio::test]
async fn unparseable_create_reports_exception() {
    let app = router(MemoryStore::new(registry()), registry());
    let reply = call(
        &app,
        Method::POST,
        "/api/book/json",
        Some("alice"),
        Some(("application/json", r#"{"title": "Dune"}"#.to_string())),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["success"], false);
    assert_eq!(reply.body["message"], "Unable to parse incoming record.");
    assert!(reply.body["exception"].is_string());

    let reply = post(&app, "/api/book/json", json!({ "author": 7 })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["exception"].as_str().is_some_and(|e| e.contains("Author")));
}

#[tokio::test]
async fn invalid_update_value_is_rejected_without_exception() {
    let app = router(MemoryStore::new(registry()), registry());
    post(&app, "/api/book/json", json!({ "title": "Dune", "pages": 412 })).await;
    let reply = put(&app, "/api/book/json/1", json!({ "pages": "many" })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, json!({"success": false, "message": "Unable to parse incoming record."}));

    let reply = call(
        &app,
        Method::PUT,
        "/api/book/json/1",
        Some("alice"),
        Some(("application/x-www-form-urlencoded", "pages=3".to_string())),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let read = get(&app, "/api/book/json").await;
    assert_eq!(read.body["rows"][0]["pages"], 412);
}

#[tokio::test]
async fn delete_removes_record() {
    let app = router(MemoryStore::new(registry()), registry());
    post(&app, "/api/book/json", json!({ "title": "Dune" })).await;
    let reply = call(&app, Method::DELETE, "/api/book/json/1", Some("alice"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"success": true, "message": "Record deleted."}));

    let again = call(&app, Method::DELETE, "/api/book/json/1", Some("alice"), None).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
    assert_eq!(titles(&get(&app, "/api/book/json").await), Vec::<Value>::new());
}

#[tokio::test]
async fn unsupported_methods_list_allowed_ones() {
    let app = router(MemoryStore::new(registry()), registry());
    let member = call(&app, Method::PATCH, "/api/book/json/5", Some("alice"), None).await;
    assert_eq!(member.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(member.headers.get(header::ALLOW).and_then(|v| v.to_str().ok()), Some("PUT, DELETE"));
    assert_eq!(
        member.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/json; charset=UTF-8")
    );
    assert_eq!(member.body, json!({"success": false, "message": "Method not allowed."}));

    let collection = call(&app, Method::PATCH, "/api/book/json", Some("alice"), None).await;
    assert_eq!(collection.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(collection.headers.get(header::ALLOW).and_then(|v| v.to_str().ok()), Some("GET, POST"));
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let app = router(MemoryStore::new(registry()), registry());
    assert_eq!(get(&app, "/api/planet/json").await.status, StatusCode::NOT_FOUND);
    let reply = put(&app, "/api/book/json/abc", json!({})).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_without_identity_are_forbidden() {
    let app = router(MemoryStore::new(registry()), registry());
    let reply = call(&app, Method::GET, "/api/book/json", None, None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["success"], false);
}

#[tokio::test]
async fn owner_field_scopes_records_to_the_caller() {
    let app = router(MemoryStore::new(registry()), registry());
    let created = post(&app, "/api/note/json", json!({ "body": "mine", "owner": "mallory" })).await;
    assert_eq!(created.body["data"]["owner"], "alice");

    let bob_read = call(&app, Method::GET, "/api/note/json", Some("bob"), None).await;
    assert_eq!(bob_read.body["rows"], json!([]));
    let bob_update = call(
        &app,
        Method::PUT,
        "/api/note/json/1",
        Some("bob"),
        Some(("application/json", json!({"data": {"body": "theirs"}}).to_string())),
    )
    .await;
    assert_eq!(bob_update.status, StatusCode::NOT_FOUND);
    let bob_delete = call(&app, Method::DELETE, "/api/note/json/1", Some("bob"), None).await;
    assert_eq!(bob_delete.status, StatusCode::NOT_FOUND);

    let alice_read = get(&app, "/api/note/json?owner=bob").await;
    assert_eq!(alice_read.body["rows"][0]["body"], "mine");
}

#[tokio::test]
async fn common_routes_respond() {
    let app = router(MemoryStore::new(registry()), registry());
    let health = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(health.body, json!({"status": "ok"}));
    let ready = call(&app, Method::GET, "/ready", None, None).await;
    assert_eq!(ready.status, StatusCode::OK);
    let status = call(&app, Method::GET, "/status", None, None).await;
    assert_eq!(status.status, StatusCode::OK);
    assert_eq!(status.body, json!("Project is running OK\n"));
}

/// Status check with a fixed outcome; `None` makes the check itself error.
struct FixedCheck {
    name: &'static str,
    outcome: Option<bool>,
}

#[async_trait]
impl StatusCheck for FixedCheck {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        self.outcome.ok_or_else(|| "mail relay unreachable".into())
    }
}

#[tokio::test]
async fn status_reports_the_first_failing_check() {
    let options = |checks: Vec<Arc<dyn StatusCheck>>| AppOptions {
        status_checks: checks,
        ..AppOptions::default()
    };

    let app = router_with(
        MemoryStore::new(registry()),
        registry(),
        &options(vec![
            Arc::new(FixedCheck { name: "disk", outcome: Some(true) }),
            Arc::new(FixedCheck { name: "queue", outcome: Some(false) }),
            Arc::new(FixedCheck { name: "mail", outcome: None }),
        ]),
    );
    let reply = call(&app, Method::GET, "/status", None, None).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body, json!("Status check failed: queue"));

    let app = router_with(
        MemoryStore::new(registry()),
        registry(),
        &options(vec![Arc::new(FixedCheck { name: "mail", outcome: None })]),
    );
    let reply = call(&app, Method::GET, "/status", None, None).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body, json!("Exception in status check: mail"));

    let app = router_with(
        MemoryStore::new(registry()),
        registry(),
        &options(vec![Arc::new(FixedCheck { name: "disk", outcome: Some(true) })]),
    );
    let reply = call(&app, Method::GET, "/status", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

/// Memory store whose transactions fail every link write.
#[derive(Clone)]
struct FailingLinks(MemoryStore);

struct FailingLinksTx(MemoryTransaction);

#[async_trait]
impl RecordStore for FailingLinks {
    type Tx = FailingLinksTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(FailingLinksTx(self.0.begin().await?))
    }

    async fn query(&self, record_type: &RecordType, spec: &QuerySpec) -> Result<Vec<Record>, StoreError> {
        self.0.query(record_type, spec).await
    }

    async fn fetch(&self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        self.0.fetch(record_type, id, scope).await
    }

    async fn delete(&self, record_type: &RecordType, id: &Value) -> Result<(), StoreError> {
        self.0.delete(record_type, id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.0.ping().await
    }
}

#[async_trait]
impl StoreTransaction for FailingLinksTx {
    async fn fetch(&mut self, record_type: &RecordType, id: &Value, scope: &Scope) -> Result<Option<Record>, StoreError> {
        self.0.fetch(record_type, id, scope).await
    }

    async fn save(&mut self, record_type: &RecordType, record: &mut Record) -> Result<(), StoreError> {
        self.0.save(record_type, record).await
    }

    async fn clear_related(&mut self, record_type: &RecordType, field: &FieldDescriptor, pk: &Value) -> Result<(), StoreError> {
        self.0.clear_related(record_type, field, pk).await
    }

    async fn add_related(
        &mut self,
        _record_type: &RecordType,
        _field: &FieldDescriptor,
        _pk: &Value,
        _targets: &[Value],
    ) -> Result<(), StoreError> {
        Err(StoreError::Backend("link table unavailable".into()))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.0.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.0.rollback().await
    }
}

#[tokio::test]
async fn failed_link_write_rolls_back_the_saved_record() {
    let registry = registry();
    let memory = MemoryStore::new(registry.clone());
    let app = router(FailingLinks(memory.clone()), registry.clone());
    seed_tags(&app, &["a"]).await;

    let reply = post(&app, "/api/book/json", json!({ "title": "Dune", "tags": [1] })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["message"], "Unable to parse incoming record.");
    assert!(reply.body["exception"].as_str().is_some_and(|e| e.contains("link table unavailable")));
    assert_eq!(memory.count("Book").await, 0);

    // Records without links still go through.
    let reply = post(&app, "/api/book/json", json!({ "title": "Emma" })).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(memory.count("Book").await, 1);
}

#[tokio::test]
async fn failed_link_resolution_rolls_back_the_saved_record() {
    let registry = registry();
    let memory = MemoryStore::new(registry.clone());
    let app = router(memory.clone(), registry);
    seed_tags(&app, &["a"]).await;

    let reply = post(&app, "/api/book/json", json!({ "title": "Dune", "tags": [1, 99] })).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(memory.count("Book").await, 0);
    assert_eq!(get(&app, "/api/book/json").await.body["rows"], json!([]));
}

#[tokio::test]
async fn failed_link_write_on_update_leaves_the_record_unchanged() {
    let registry = registry();
    let memory = MemoryStore::new(registry.clone());
    let app = router(FailingLinks(memory.clone()), registry.clone());
    seed_tags(&app, &["a"]).await;
    let created = post(&app, "/api/book/json", json!({ "title": "Dune" })).await;
    assert_eq!(created.status, StatusCode::OK);

    let reply = put(&app, "/api/book/json/1", json!({ "title": "X", "tags": [1] })).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body, json!({"success": false, "message": "An internal error occurred."}));
    assert!(reply.body.get("exception").is_none());
    assert_eq!(titles(&get(&app, "/api/book/json").await), vec![json!("Dune")]);
}

#[tokio::test]
async fn missing_relation_target_on_update_is_not_found_and_rolls_back() {
    let app = router(MemoryStore::new(registry()), registry());
    seed_tags(&app, &["a"]).await;
    post(&app, "/api/book/json", json!({ "title": "Dune", "tags": [1] })).await;

    let reply = put(&app, "/api/book/json/1", json!({ "title": "X", "tags": [99] })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, json!({"success": false, "message": "The record could not be found."}));

    let reply = put(&app, "/api/book/json/1", json!({ "title": "X", "author": 7 })).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let read = get(&app, "/api/book/json").await;
    assert_eq!(titles(&read), vec![json!("Dune")]);
    assert_eq!(read.body["rows"][0]["tags"], json!([1]));
}
