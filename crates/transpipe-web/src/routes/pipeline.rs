//! Per-material pipeline actions: entity recognition, LLM
//! refinement, confirm/unconfirm, rotate, and the region/final-image save
//! endpoints the browser-side editor posts back to.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use axum_extra::extract::Multipart;

use crate::dto::{ConfirmEntitiesRequest, ConfirmRequest, MaterialListResponse, MaterialResponse, SaveRegionsRequest};
use crate::helpers::{ResultExt, RouteResult};
use crate::state::AppState;

/// `POST /materials/{id}/entity-recognition/fast`.
pub async fn entity_recognition_fast(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialResponse>> {
    let material = state.orchestrator.recognize_entities(&id, false).await?;
    Ok(Json(material.into()))
}

/// `POST /materials/{id}/entity-recognition/deep`.
pub async fn entity_recognition_deep(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialResponse>> {
    let material = state.orchestrator.recognize_entities(&id, true).await?;
    Ok(Json(material.into()))
}

/// `POST /materials/{id}/confirm-entities`. Auto-chains into LLM refinement
/// and applies to every unconfirmed sibling sharing a `pdf_session_id`.
pub async fn confirm_entities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmEntitiesRequest>,
) -> RouteResult<Json<MaterialListResponse>> {
    let materials = state.orchestrator.confirm_entities(&id, body).await?;
    Ok(Json(MaterialListResponse(materials)))
}

/// `POST /materials/{id}/llm-translate`.
pub async fn llm_translate(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialResponse>> {
    let material = state.orchestrator.llm_translate(&id).await?;
    Ok(Json(material.into()))
}

/// `POST /materials/{id}/retranslate`. Global reset action.
pub async fn retranslate(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialResponse>> {
    let material = state.orchestrator.retranslate(&id).await?;
    Ok(Json(material.into()))
}

/// `POST /materials/{id}/rotate`.
pub async fn rotate(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialResponse>> {
    let material = state.orchestrator.rotate(&id)?;
    Ok(Json(material.into()))
}

/// `POST /materials/{id}/confirm`. Body may include `{translation_type:
/// "api"|"latex"}`; applies to every sibling sharing the material's
/// `pdf_session_id`.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmRequest>,
) -> RouteResult<Json<MaterialListResponse>> {
    let selected = body.translation_type.map(Into::into);
    let materials = state.orchestrator.confirm(&id, selected)?;
    Ok(Json(MaterialListResponse(materials)))
}

/// `POST /materials/{id}/unconfirm`.
pub async fn unconfirm(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> RouteResult<Json<MaterialListResponse>> {
    let materials = state.orchestrator.unconfirm(&id)?;
    Ok(Json(MaterialListResponse(materials)))
}

/// `POST /materials/{id}/save-regions`. Persists the browser-side editor's
/// region overlay without advancing the state machine.
pub async fn save_regions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SaveRegionsRequest>,
) -> RouteResult<Json<MaterialResponse>> {
    let current = state.store.get_material(&id)?;
    let updated = state.store.update_material(&id, current.version, &|m| {
        m.edited_regions = Some(body.regions.clone());
        m.has_edited_version = true;
        m.selected_result = Some(transpipe_core::model::SelectedResult::Api);
    })?;
    Ok(Json(updated.into()))
}

/// `POST /materials/{id}/save-final-image` (multipart, field `final_image`).
/// The browser has already rasterized the edited overlay; this just persists the upload.
pub async fn save_final_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> RouteResult<Json<MaterialResponse>> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("final_image") {
            continue;
        }
        let bytes = field.bytes().await.or_internal_error()?;
        let path = state.blobs.save(&id, "final.jpg", &bytes)?;
        let current = state.store.get_material(&id)?;
        let updated = state.store.update_material(&id, current.version, &|m| {
            m.final_image_path = Some(path.clone());
            m.has_edited_version = true;
        })?;
        return Ok(Json(updated.into()));
    }
    Err(transpipe_core::Error::Validation("no final_image field in multipart body".to_string()).into())
}
