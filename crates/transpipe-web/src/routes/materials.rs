//! Material ingress and listing routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use axum_extra::extract::Multipart;
use tracing::{info, warn};
use transpipe_core::model::MaterialKind;

use crate::dto::{AddUrlsRequest, MaterialListResponse, MaterialResponse, TranslateAck, TranslateRequest};
use crate::helpers::{ResultExt, RouteResult};
use crate::state::AppState;

/// `POST /clients/{client_id}/materials/upload` (multipart, field `file`,
/// repeatable). Infers `MaterialKind` from content type; for a PDF this
/// returns the `N` page stubs immediately.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    mut multipart: Multipart,
) -> RouteResult<Json<MaterialListResponse>> {
    let mut created = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string).unwrap_or_default();
        let bytes = field.bytes().await.or_internal_error()?.to_vec();

        let kind = if content_type == "application/pdf" || filename.as_deref().is_some_and(|f| f.ends_with(".pdf")) {
            MaterialKind::Pdf
        } else {
            MaterialKind::Image
        };

        let materials = state.orchestrator.ingest_upload(&client_id, kind, filename, bytes).await?;
        created.extend(materials);
    }
    info!("uploaded {} material(s) for client {client_id}", created.len());
    Ok(Json(MaterialListResponse(created)))
}

/// `POST /clients/{client_id}/materials/urls`. Each URL spawns an
/// independent web-capture task; a single bad URL does not
/// fail the whole batch.
pub async fn add_urls(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(body): Json<AddUrlsRequest>,
) -> RouteResult<Json<MaterialListResponse>> {
    let mut created = Vec::with_capacity(body.urls.len());
    for url in &body.urls {
        match state.orchestrator.web_capture(&client_id, url).await {
            Ok(material) => created.push(material),
            Err(e) => warn!("skipping url {url} for client {client_id}: {e}"),
        }
    }
    Ok(Json(MaterialListResponse(created)))
}

/// `GET /clients/{client_id}/materials`, served from the store's
/// list cache.
pub async fn list(State(state): State<Arc<AppState>>, Path(client_id): Path<String>) -> RouteResult<Json<MaterialListResponse>> {
    let materials = state.store.list_materials(&client_id)?;
    Ok(Json(MaterialListResponse(materials)))
}

/// `GET /materials/{id}`.
pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialResponse>> {
    let material = state.store.get_material(&id)?;
    Ok(Json(material.into()))
}

/// `DELETE /materials/{id}`. Cascades file removal.
pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<()> {
    let material = state.store.get_material(&id)?;
    state.blobs.delete_all(&id)?;
    state.store.delete_material(&id)?;
    state.store.invalidate_materials_cache(&material.client_id);
    Ok(())
}

/// `POST /clients/{client_id}/materials/translate`. Submits an OCR task for
/// every material in `{uploaded, split_completed}` (or the explicit
/// `material_ids` subset) and returns immediately with zero counts; work
/// proceeds in the background and is reported over SSE.
pub async fn translate_all(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(body): Json<TranslateRequest>,
) -> RouteResult<Json<TranslateAck>> {
    let targets = match body.material_ids {
        Some(ids) => ids,
        None => state
            .store
            .list_materials(&client_id)?
            .into_iter()
            .filter(|m| {
                matches!(
                    m.processing_step,
                    transpipe_core::ProcessingStep::Uploaded | transpipe_core::ProcessingStep::SplitCompleted
                )
            })
            .map(|m| m.id)
            .collect(),
    };

    let count = targets.len();
    for id in targets {
        if let Err(e) = state.orchestrator.start_translation(&id).await {
            tracing::warn!("failed to start translation for {id}: {e}");
        }
    }
    Ok(Json(TranslateAck {
        success_count: 0,
        failed_count: 0,
        message: format!("queued {count} material(s) for translation"),
    }))
}
