//! Cross-module scenarios: query dispatch with access control,
//! reference expansion, plugin fields and the token lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use weft::auth::{password, Authenticator, GrantRequest};
use weft::config::AuthConfig;
use weft::context::Context;
use weft::error::Error;
use weft::model::{FieldPlugin, ModelSchema};
use weft::storage::memory::MemoryModel;
use weft::storage::Storage;

const USER_MODEL: &str = r#"
name: User
properties:
  id: {type: string}
  name: {type: string}
  mail: {type: string}
  password: {type: string}
access:
  operations:
    read: u.id == i.id
    update: u.id == i.id
    list: "false"
    create: "false"
  fields:
    password: "false"
"#;

const POST_MODEL: &str = r"
name: Post
properties:
  id: {type: string}
  title: {type: string}
  author:
    type: string
    references: User
";

fn storage_fixture() -> Arc<Storage> {
    let storage = Arc::new(Storage::new("User"));

    let users = MemoryModel::new(ModelSchema::from_yaml(USER_MODEL).unwrap());
    users.seed(vec![
        json!({"id": "u1", "name": "Alice", "mail": "alice@example.com",
               "password": password::hash("Welcome!")}),
        json!({"id": "u2", "name": "Bob", "mail": "bob@example.com",
               "password": password::hash("hunter2")}),
    ]);
    storage.register_model(Arc::new(users));

    let posts = MemoryModel::new(ModelSchema::from_yaml(POST_MODEL).unwrap());
    posts.seed(vec![
        json!({"id": "p1", "title": "Hello", "author": "u1"}),
        json!({"id": "p2", "title": "Again", "author": "u1"}),
    ]);
    storage.register_model(Arc::new(posts));

    storage.register_model(Arc::new(MemoryModel::new(
        ModelSchema::from_yaml("name: AuthnToken").unwrap(),
    )));

    storage
}

fn alice() -> Context {
    Context::new(json!({"id": "u1", "name": "Alice", "mail": "alice@example.com"}))
}

// ── admin / context-free dispatch ───────────────────────────────────────

#[tokio::test]
async fn admin_create_returns_an_id() {
    let storage = storage_fixture();
    let result = storage
        .query(
            r#"{createUser(name: "Carol", mail: "carol@example.com", password: "pw") {id}}"#,
            None,
            None,
        )
        .await
        .unwrap();
    assert!(result["createUser"]["id"].is_string());
}

#[tokio::test]
async fn admin_list_sees_everything() {
    let storage = storage_fixture();
    let result = storage
        .query("{users: listUser {name}}", None, None)
        .await
        .unwrap();
    assert_eq!(
        result["users"],
        json!([{"name": "Alice"}, {"name": "Bob"}])
    );
}

#[tokio::test]
async fn count_returns_a_scalar() {
    let storage = storage_fixture();
    let result = storage
        .query(r#"{n: countPost(author: "u1")}"#, None, None)
        .await
        .unwrap();
    assert_eq!(result["n"], json!(2));
}

#[tokio::test]
async fn unknown_entity_is_an_error() {
    let storage = storage_fixture();
    let err = storage
        .query("{listWidget}", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownEntity(name) if name == "Widget"));
}

#[tokio::test]
async fn unknown_field_is_an_error() {
    let storage = storage_fixture();
    let err = storage
        .query(r#"{User(id: "u1") {shoeSize}}"#, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField { field, .. } if field == "shoeSize"));
}

// ── access control with a context ───────────────────────────────────────

#[tokio::test]
async fn user_reads_own_record() {
    let storage = storage_fixture();
    let ctx = alice();
    let result = storage
        .query(r#"{me: User(id: "u1") {name}}"#, Some(&ctx), None)
        .await
        .unwrap();
    assert_eq!(result["me"], json!({"name": "Alice"}));
}

#[tokio::test]
async fn bare_user_read_binds_the_caller() {
    let storage = storage_fixture();
    let ctx = alice();
    let result = storage
        .query("{me: User {mail}}", Some(&ctx), None)
        .await
        .unwrap();
    assert_eq!(result["me"]["mail"], json!("alice@example.com"));
}

#[tokio::test]
async fn reading_another_user_is_denied() {
    let storage = storage_fixture();
    let ctx = alice();
    let err = storage
        .query(r#"{other: User(id: "u2") {name}}"#, Some(&ctx), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn listing_users_is_denied_for_contexts() {
    let storage = storage_fixture();
    let ctx = alice();
    let err = storage
        .query("{listUser {name}}", Some(&ctx), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));
}

#[tokio::test]
async fn password_field_is_denied_even_on_own_record() {
    let storage = storage_fixture();
    let ctx = alice();
    let err = storage
        .query(r#"{me: User(id: "u1") {password}}"#, Some(&ctx), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::PermissionDenied { field: Some(ref f), .. } if f == "password")
    );
}

#[tokio::test]
async fn partial_failure_collects_per_alias_errors() {
    let storage = storage_fixture();
    let ctx = alice();
    let outcome = storage
        .execute_query(
            r#"{me: User(id: "u1") {name} other: User(id: "u2") {name}}"#,
            Some(&ctx),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.data["me"], json!({"name": "Alice"}));
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].alias, "other");
    assert_eq!(outcome.status(), 403);
}

// ── reference expansion and plugin fields ───────────────────────────────

#[tokio::test]
async fn reference_field_expands_into_target_entity() {
    let storage = storage_fixture();
    let result = storage
        .query(r#"{post: Post(id: "p1") {title, author {name}}}"#, None, None)
        .await
        .unwrap();
    assert_eq!(
        result["post"],
        json!({"title": "Hello", "author": {"name": "Alice"}})
    );
}

#[tokio::test]
async fn reference_without_selection_stays_a_key() {
    let storage = storage_fixture();
    let result = storage
        .query(r#"{post: Post(id: "p1") {author}}"#, None, None)
        .await
        .unwrap();
    assert_eq!(result["post"], json!({"author": "u1"}));
}

struct PostCount {
    storage: Arc<Storage>,
}

#[async_trait]
impl FieldPlugin for PostCount {
    fn name(&self) -> &str {
        "post-count"
    }

    async fn resolve(
        &self,
        _entity: &str,
        _field: &str,
        id: &Value,
        _user: Option<&Value>,
    ) -> weft::Result<Value> {
        self.storage
            .query("{n: countPost(author: ?)}", None, Some(&json!([id])))
            .await
            .map(|result| result["n"].clone())
    }
}

#[tokio::test]
async fn plugin_field_resolves_through_registered_resolver() {
    let storage = storage_fixture();
    let schema = ModelSchema::from_yaml(
        r"
name: Author
properties:
  id: {type: string}
  name: {type: string}
  postCount:
    type: integer
    plugin: post-count
",
    )
    .unwrap();
    let authors = MemoryModel::new(schema);
    authors.seed(vec![json!({"id": "u1", "name": "Alice"})]);
    storage.register_model(Arc::new(authors));
    storage.register_plugin(Arc::new(PostCount {
        storage: Arc::clone(&storage),
    }));

    let result = storage
        .query(r#"{a: Author(id: "u1") {name, postCount}}"#, None, None)
        .await
        .unwrap();
    assert_eq!(result["a"], json!({"name": "Alice", "postCount": 2}));
}

// ── token lifecycle ─────────────────────────────────────────────────────

fn authenticator(storage: Arc<Storage>) -> Authenticator {
    let mut config = AuthConfig::default();
    config
        .admins
        .insert("admin".to_string(), password::hash("secret"));
    Authenticator::new(storage, config)
}

#[tokio::test]
async fn token_exchange_then_authenticated_query() {
    let storage = storage_fixture();
    let auth = authenticator(Arc::clone(&storage));

    let response = auth
        .issue_token(&GrantRequest {
            grant_type: "password".to_string(),
            username: "alice@example.com".to_string(),
            password: "Welcome!".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.token_type, "bearer");

    let header = format!("Bearer {}", response.access_token);
    let ctx = auth.authenticate(Some(&header)).await.unwrap().unwrap();

    let result = storage
        .query("{me: User {name}}", Some(&ctx), None)
        .await
        .unwrap();
    assert_eq!(result["me"], json!({"name": "Alice"}));
}

#[tokio::test]
async fn wrong_password_yields_401() {
    let storage = storage_fixture();
    let auth = authenticator(storage);
    let err = auth
        .issue_token(&GrantRequest {
            grant_type: "password".to_string(),
            username: "alice@example.com".to_string(),
            password: "wrong".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn basic_admin_bypasses_access_rules() {
    let storage = storage_fixture();
    let auth = authenticator(Arc::clone(&storage));

    let header = format!(
        "Basic {}",
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            "admin:secret"
        )
    );
    let ctx = auth.authenticate(Some(&header)).await.unwrap();
    assert!(ctx.is_none());

    // Context-free dispatch: the list rule that denies users does not apply.
    let result = storage
        .query("{users: listUser {name}}", ctx.as_ref(), None)
        .await
        .unwrap();
    assert_eq!(result["users"].as_array().unwrap().len(), 2);
}
