//! HTTP boundary: token issuance, the query endpoint and file routes.
//!
//! Handlers stay thin; everything of substance happens in the storage
//! façade, the script runtime and the authentication facade. File
//! entities follow the convention of declaring `data` (base64 payload),
//! `fileName` and `contentType` fields.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{Authenticator, GrantRequest};
use crate::config::Config;
use crate::context::Context;
use crate::model::ModelSchema;
use crate::script::scheduler::Scheduler;
use crate::script::ScriptSet;
use crate::storage::memory::MemoryModel;
use crate::storage::Storage;
use crate::{Error, Result};

/// Shared handler state.
#[derive(Clone)]
struct AppState {
    storage: Arc<Storage>,
    auth: Arc<Authenticator>,
}

/// The composed platform: storage, scripts, authentication and the
/// HTTP surface.
pub struct Server {
    config: Config,
    state: AppState,
    scripts: Arc<ScriptSet>,
    scheduler: Scheduler,
}

impl Server {
    /// Compose the platform from configuration: load model schemas into
    /// the bundled in-memory backend, load scripts, wire the facades.
    pub fn new(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::new(config.auth.user_model.clone()));
        let models = load_models(&storage, FsPath::new(&config.definitions.models_dir))?;

        let scripts = ScriptSet::new(Arc::clone(&storage), config.http_client()?);
        let loaded = scripts.load_directory(FsPath::new(&config.definitions.scripts_dir))?;
        storage.set_script_runner(Arc::clone(&scripts) as _);

        let auth = Arc::new(Authenticator::new(
            Arc::clone(&storage),
            config.auth.clone(),
        ));

        let mut scheduler = Scheduler::new();
        scheduler.start(&scripts.all());

        info!(models, scripts = loaded, "Platform composed");
        Ok(Self {
            config,
            state: AppState { storage, auth },
            scripts,
            scheduler,
        })
    }

    /// The storage façade (for embedding and tests).
    #[must_use]
    pub fn storage(&self) -> Arc<Storage> {
        Arc::clone(&self.state.storage)
    }

    /// The script registry.
    #[must_use]
    pub fn scripts(&self) -> Arc<ScriptSet> {
        Arc::clone(&self.scripts)
    }

    /// Serve until ctrl-c, then drain scheduled runs.
    pub async fn run(self) -> Result<()> {
        let app = Router::new()
            .route("/token", post(token))
            .route("/graphql", get(graphql_get).post(graphql_post))
            .route("/file/{entity}", post(file_upload).put(file_put))
            .route("/file/{entity}/{id}", get(file_download))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        let address = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&address).await?;
        info!(%address, "Listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Draining scheduled script runs");
        self.scheduler.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Load every model schema in a directory into the in-memory backend.
fn load_models(storage: &Arc<Storage>, dir: &FsPath) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        match ModelSchema::from_yaml(&content) {
            Ok(schema) => {
                storage.register_model(Arc::new(MemoryModel::new(schema)));
                count += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to load model"),
        }
    }
    Ok(count)
}

// ── handlers ────────────────────────────────────────────────────────────

fn error_response(error: &Error) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status == StatusCode::UNAUTHORIZED {
        // Credential failures answer with an empty body.
        return status.into_response();
    }
    (status, Json(json!({"error": error.to_string()}))).into_response()
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Option<Context>> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.auth.authenticate(header).await
}

async fn token(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let grant: GrantRequest = match serde_json::from_value(body) {
        Ok(grant) => grant,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response()
        }
    };
    match state.auth.issue_token(&grant).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct GraphqlParams {
    q: String,
}

#[derive(Deserialize)]
struct GraphqlBody {
    query: String,
    #[serde(default)]
    arguments: Option<Value>,
}

async fn run_graphql(
    state: AppState,
    headers: HeaderMap,
    query: String,
    arguments: Option<Value>,
) -> Response {
    let context = match authenticate(&state, &headers).await {
        Ok(context) => context,
        Err(error) => return error_response(&error),
    };
    match state
        .storage
        .execute_query(&query, context.as_ref(), arguments.as_ref())
        .await
    {
        Ok(outcome) => {
            if outcome.errors.is_empty() {
                Json(outcome.data).into_response()
            } else {
                let status = StatusCode::from_u16(outcome.status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = json!({
                    "data": outcome.data,
                    "errors": outcome.error_payload(),
                });
                (status, Json(body)).into_response()
            }
        }
        Err(error) => error_response(&error),
    }
}

async fn graphql_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<GraphqlParams>,
) -> Response {
    run_graphql(state, headers, params.q, None).await
}

async fn graphql_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GraphqlBody>,
) -> Response {
    run_graphql(state, headers, body.query, body.arguments).await
}

async fn create_file_item(
    state: &AppState,
    context: Option<&Context>,
    entity: &str,
    mut params: Map<String, Value>,
) -> Result<Value> {
    let bindings: Vec<String> = params.keys().map(|k| format!("{k}: ${k}")).collect();
    let query = format!("{{file: create{entity}({})}}", bindings.join(", "));
    let arguments = Value::Object(std::mem::take(&mut params));
    let result = state
        .storage
        .query(&query, context, Some(&arguments))
        .await?;
    Ok(json!({"id": result["file"]["id"]}))
}

async fn file_upload(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let context = match authenticate(&state, &headers).await {
        Ok(context) => context,
        Err(error) => return error_response(&error),
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.file_name().is_none() {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let Ok(bytes) = field.bytes().await else {
            return StatusCode::BAD_REQUEST.into_response();
        };

        let mut params = Map::new();
        params.insert("data".to_string(), json!(BASE64.encode(&bytes)));
        params.insert("fileName".to_string(), json!(file_name));
        params.insert("contentType".to_string(), json!(content_type));
        return match create_file_item(&state, context.as_ref(), &entity, params).await {
            Ok(created) => Json(created).into_response(),
            Err(error) => error_response(&error),
        };
    }
    StatusCode::BAD_REQUEST.into_response()
}

async fn file_put(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let context = match authenticate(&state, &headers).await {
        Ok(context) => context,
        Err(error) => return error_response(&error),
    };

    let Some(model) = state.storage.model(&entity) else {
        return error_response(&Error::UnknownEntity(entity));
    };
    let schema = model.schema();

    let mut params = Map::new();
    params.insert("data".to_string(), json!(BASE64.encode(&body)));
    if let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        params.insert("contentType".to_string(), json!(content_type));
    }

    // X-Meta-<Field> headers carry JSON values for declared fields;
    // headers naming unknown fields are silently ignored.
    for (name, value) in &headers {
        let Some(meta_name) = name.as_str().strip_prefix("x-meta-") else {
            continue;
        };
        let Some(field) = schema
            .field_names()
            .into_iter()
            .find(|f| f.eq_ignore_ascii_case(meta_name))
        else {
            continue;
        };
        let Ok(raw) = value.to_str() else {
            continue;
        };
        let parsed = serde_json::from_str(raw).unwrap_or_else(|_| json!(raw));
        params.insert(field, parsed);
    }

    match create_file_item(&state, context.as_ref(), &entity, params).await {
        Ok(created) => Json(created).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn file_download(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let context = match authenticate(&state, &headers).await {
        Ok(context) => context,
        Err(error) => return error_response(&error),
    };

    let query = format!("{{file: {entity}(id: ?)}}");
    let item = match state
        .storage
        .query(&query, context.as_ref(), Some(&json!([id])))
        .await
    {
        Ok(result) => result["file"].clone(),
        Err(error) => return error_response(&error),
    };
    if item.is_null() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(data) = item.get("data").and_then(Value::as_str) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(bytes) = BASE64.decode(data) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let content_type = item
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream")
        .to_string();
    let file_name = item
        .get("fileName")
        .and_then(Value::as_str)
        .unwrap_or("download")
        .to_string();

    (
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
            (header::CONTENT_LENGTH, bytes.len().to_string()),
        ],
        bytes,
    )
        .into_response()
}
