//! Script DSL scenarios against the in-memory backend, including the
//! bundled script definitions.

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use weft::context::Context;
use weft::error::Error;
use weft::model::ModelSchema;
use weft::script::ScriptSet;
use weft::storage::memory::MemoryModel;
use weft::storage::Storage;

fn token_storage() -> (Arc<Storage>, Arc<MemoryModel>) {
    let storage = Arc::new(Storage::new("User"));
    let tokens = Arc::new(MemoryModel::new(
        ModelSchema::from_yaml("name: AuthnToken").unwrap(),
    ));
    storage.register_model(Arc::clone(&tokens) as _);
    (storage, tokens)
}

#[tokio::test]
async fn bundled_purge_script_deletes_expired_tokens() {
    let (storage, tokens) = token_storage();
    tokens.seed(vec![
        json!({"id": "t1", "token": "a", "userId": "u1", "expiresAt": 1}),
        json!({"id": "t2", "token": "b", "userId": "u1", "expiresAt": 4_102_444_800i64}),
        json!({"id": "t3", "token": "c", "userId": "u2", "expiresAt": 2}),
    ]);

    let set = ScriptSet::new(storage, reqwest::Client::new());
    let loaded = set
        .load_directory(Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts")))
        .unwrap();
    assert!(loaded >= 1);

    let purge = set.get("purge-expired-tokens").expect("bundled script");
    assert!(purge.schedule().is_some());

    purge.run(json!({})).await.unwrap();
    assert_eq!(tokens.len(), 1);
}

#[tokio::test]
async fn bundled_purge_script_handles_empty_storage() {
    let (storage, tokens) = token_storage();
    let set = ScriptSet::new(storage, reqwest::Client::new());
    set.load_directory(Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts")))
        .unwrap();

    let purge = set.get("purge-expired-tokens").unwrap();
    purge.run(json!({})).await.unwrap();
    assert!(tokens.is_empty());
}

#[tokio::test]
async fn model_postprocessor_script_reshapes_query_results() {
    let storage = Arc::new(Storage::new("User"));
    let notes = MemoryModel::new(
        ModelSchema::from_yaml(
            r"
name: Note
properties:
  id: {type: string}
  text: {type: string}
postprocess: summarize
",
        )
        .unwrap(),
    );
    notes.seed(vec![
        json!({"id": "1", "text": "a"}),
        json!({"id": "2", "text": "b"}),
    ]);
    storage.register_model(Arc::new(notes));

    let set = ScriptSet::new(Arc::clone(&storage), reqwest::Client::new());
    set.register(json!({
        "name": "summarize",
        "steps": [{"object": {"items": "", "total": {"length": {}}}}]
    }))
    .unwrap();
    storage.set_script_runner(set);

    let result = storage.query("{notes: listNote}", None, None).await.unwrap();
    assert_eq!(result["notes"]["total"], json!(2));
    assert_eq!(result["notes"]["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn script_chains_query_and_transform_steps() {
    let storage = Arc::new(Storage::new("User"));
    let posts = MemoryModel::new(
        ModelSchema::from_yaml(
            r"
name: Post
properties:
  id: {type: string}
  title: {type: string}
",
        )
        .unwrap(),
    );
    posts.seed(vec![
        json!({"id": "p1", "title": "first"}),
        json!({"id": "p2", "title": "second"}),
    ]);
    storage.register_model(Arc::new(posts));

    let set = ScriptSet::new(storage, reqwest::Client::new());
    let script = set
        .register(json!({
            "name": "titles",
            "steps": [
                {"query": "{posts: listPost {title}}"},
                {"object": {"titles": {"get": "/result/posts", "map": "/title"}}},
                {"object": {"titles": "/titles", "line": {"get": "/titles", "join": {"separator": ", "}}}}
            ]
        }))
        .unwrap();

    let out = script.run(json!({})).await.unwrap();
    assert_eq!(out["titles"], json!(["first", "second"]));
    assert_eq!(out["line"], json!("first, second"));
}

#[tokio::test]
async fn run_in_context_exposes_the_caller_to_storage() {
    let storage = Arc::new(Storage::new("User"));
    let users = MemoryModel::new(
        ModelSchema::from_yaml(
            r"
name: User
properties:
  id: {type: string}
  name: {type: string}
access:
  operations:
    read: u.id == i.id
",
        )
        .unwrap(),
    );
    users.seed(vec![
        json!({"id": "u1", "name": "Alice"}),
        json!({"id": "u2", "name": "Bob"}),
    ]);
    storage.register_model(Arc::new(users));
    let set = ScriptSet::new(storage, reqwest::Client::new());

    let guarded = set
        .register(json!({
            "name": "peek-guarded",
            "steps": [{"query": {
                "query": "{other: User(id: \"u2\")}",
                "runInContext": true
            }}]
        }))
        .unwrap();
    let admin = set
        .register(json!({
            "name": "peek-admin",
            "steps": [{"query": "{other: User(id: \"u2\")}"}]
        }))
        .unwrap();

    let ctx = Context::new(json!({"id": "u1"}));

    // With the context passed through, storage sees the caller and the
    // access rule denies reading someone else's record.
    let err = guarded.run_in(json!({}), Some(&ctx)).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));

    // The default is admin semantics, context or not.
    let out = admin.run_in(json!({}), Some(&ctx)).await.unwrap();
    assert_eq!(out["result"]["other"]["name"], json!("Bob"));
}

#[tokio::test]
async fn debug_trace_covers_query_steps() {
    let (storage, tokens) = token_storage();
    tokens.seed(vec![json!({"id": "t1", "token": "x", "userId": "u1"})]);

    let set = ScriptSet::new(storage, reqwest::Client::new());
    let script = set
        .register(json!({
            "name": "snapshot",
            "steps": [
                {"query": "{tokens: listAuthnToken}"},
                {"object": {"count": {"get": "/result/tokens", "length": {}}}}
            ]
        }))
        .unwrap();

    let (out, trace) = script.run_debug(json!({})).await.unwrap();
    assert_eq!(out, json!({"count": 1}));
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].definition["query"], json!("{tokens: listAuthnToken}"));
    assert_eq!(trace[1].output, json!({"count": 1}));
}
