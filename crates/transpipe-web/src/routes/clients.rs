//! Client (case) CRUD and export. This is the thin ambient layer needed to
//! actually exercise the `Store` trait's existing
//! `{insert,get,list,delete}_client` methods over HTTP.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use crate::dto::{ClientResponse, CreateClientRequest};
use crate::helpers::{ResultExt, RouteResult};
use crate::state::AppState;

fn now_string() -> String {
    let since_epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    since_epoch.as_secs().to_string()
}

/// `POST /clients`.
pub async fn create(State(state): State<Arc<AppState>>, Json(body): Json<CreateClientRequest>) -> RouteResult<Json<ClientResponse>> {
    let now = now_string();
    let client = transpipe_core::model::Client {
        id: Uuid::new_v4().to_string(),
        name: body.name,
        archived: false,
        created_at: now.clone(),
        updated_at: now,
    };
    let inserted = state.store.insert_client(client)?;
    Ok(Json(inserted.into()))
}

/// `GET /clients`.
pub async fn list(State(state): State<Arc<AppState>>) -> RouteResult<Json<Vec<ClientResponse>>> {
    let clients = state.store.list_clients()?;
    Ok(Json(clients.into_iter().map(Into::into).collect()))
}

/// `GET /clients/{id}`.
pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<ClientResponse>> {
    let client = state.store.get_client(&id)?;
    Ok(Json(client.into()))
}

/// `DELETE /clients/{id}`. Cascades material file removal.
pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<()> {
    for material in state.store.list_materials(&id)? {
        state.blobs.delete_all(&material.id)?;
        state.store.delete_material(&material.id)?;
    }
    state.store.delete_client(&id)?;
    Ok(())
}

/// `GET /clients/{client_id}/export`. Returns a ZIP attachment.
pub async fn export(State(state): State<Arc<AppState>>, Path(client_id): Path<String>) -> RouteResult<Response> {
    let store = state.store.clone();
    let blobs = state.blobs.clone();
    let (archive_name, bytes) =
        tokio::task::spawn_blocking(move || transpipe_core::export_client(store.as_ref(), blobs.as_ref(), &client_id))
            .await
            .or_internal_error()??;

    Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{archive_name}\""))
        .body(Body::from(bytes))
        .or_internal_error()
}
