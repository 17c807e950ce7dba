use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{Map, Value};
use server_api::{
    create_record, delete_record, get_record, list_public, list_records, patch_record,
    resolve_collection, save_collection, update_record, ApiContext,
};
use shared::{
    domain::RecordId,
    error::{ApiError, ErrorCode},
    protocol::{Envelope, ListQuery, RecordDocument},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type Rejection = (StatusCode, Json<Envelope<()>>);
type EnvelopeResult<T> = Result<Json<Envelope<T>>, Rejection>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_filter))
        .init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
        max_body_bytes: settings.max_body_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/public/:collection", get(http_list_public))
        .route(
            "/api/:collection",
            get(http_list_records)
                .post(http_create_record)
                .put(http_save_collection),
        )
        .route(
            "/api/:collection/:key",
            get(http_get_record)
                .put(http_update_record)
                .patch(http_patch_record)
                .delete(http_delete_record),
        )
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

fn reject(err: ApiError) -> Rejection {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status != StatusCode::NOT_FOUND {
        warn!(code = ?err.code, message = %err.message, "request rejected");
    }
    (status, Json(Envelope::failure(err)))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Rejection> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            warn!("request body over the size limit");
            let err = ApiError::new(ErrorCode::Validation, "request body is too large");
            return (StatusCode::PAYLOAD_TOO_LARGE, Json(Envelope::failure(err)));
        }
        reject(ApiError::new(
            ErrorCode::Validation,
            format!("invalid request body: {}", rejection.body_text()),
        ))
    })
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_list_public(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> EnvelopeResult<Vec<RecordDocument>> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let records = list_public(&state.api, kind).await.map_err(reject)?;
    Ok(Json(Envelope::ok(records)))
}

async fn http_list_records(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
) -> EnvelopeResult<Vec<RecordDocument>> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let records = list_records(&state.api, kind, &query)
        .await
        .map_err(reject)?;
    Ok(Json(Envelope::ok(records)))
}

async fn http_create_record(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    payload: Result<Json<RecordDocument>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<RecordDocument>>), Rejection> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let doc = json_body(payload)?;
    let created = create_record(&state.api, kind, doc).await.map_err(reject)?;
    info!(collection = %kind, slug = %created.slug, "record created");
    Ok((StatusCode::CREATED, Json(Envelope::ok(created))))
}

async fn http_save_collection(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    payload: Result<Json<Vec<RecordDocument>>, JsonRejection>,
) -> EnvelopeResult<Vec<RecordDocument>> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let docs = json_body(payload)?;
    let saved = save_collection(&state.api, kind, docs)
        .await
        .map_err(reject)?;
    info!(collection = %kind, count = saved.len(), "collection saved");
    Ok(Json(Envelope::ok(saved)))
}

async fn http_get_record(
    State(state): State<Arc<AppState>>,
    Path((collection, slug)): Path<(String, String)>,
) -> EnvelopeResult<RecordDocument> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let record = get_record(&state.api, kind, &slug).await.map_err(reject)?;
    Ok(Json(Envelope::ok(record)))
}

async fn http_update_record(
    State(state): State<Arc<AppState>>,
    Path((collection, slug)): Path<(String, String)>,
    payload: Result<Json<RecordDocument>, JsonRejection>,
) -> EnvelopeResult<RecordDocument> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let doc = json_body(payload)?;
    let updated = update_record(&state.api, kind, &slug, doc)
        .await
        .map_err(reject)?;
    Ok(Json(Envelope::ok(updated)))
}

async fn http_patch_record(
    State(state): State<Arc<AppState>>,
    Path((collection, key)): Path<(String, String)>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> EnvelopeResult<RecordDocument> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    let id = key.parse::<i64>().map(RecordId).map_err(|_| {
        reject(ApiError::new(
            ErrorCode::Validation,
            format!("'{key}' is not a record id"),
        ))
    })?;
    let patch = json_body(payload)?;
    let patched = patch_record(&state.api, kind, id, patch)
        .await
        .map_err(reject)?;
    Ok(Json(Envelope::ok(patched)))
}

async fn http_delete_record(
    State(state): State<Arc<AppState>>,
    Path((collection, key)): Path<(String, String)>,
) -> EnvelopeResult<()> {
    let kind = resolve_collection(&collection).map_err(reject)?;
    delete_record(&state.api, kind, &key)
        .await
        .map_err(reject)?;
    info!(collection = %kind, key, "record deleted");
    Ok(Json(Envelope::ack()))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
