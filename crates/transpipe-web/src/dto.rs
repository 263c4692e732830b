//! JSON request/response bodies for the HTTP surface. Kept separate from
//! `transpipe_core::model` so the wire format can evolve independently of
//! the persisted shape.

use serde::{Deserialize, Serialize};
use transpipe_core::model::{Client, EntityUserEdits, Material, SelectedResult};

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ClientResponse {
    pub id: String,
    pub name: String,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Client> for ClientResponse {
    fn from(c: Client) -> Self {
        Self { id: c.id, name: c.name, archived: c.archived, created_at: c.created_at, updated_at: c.updated_at }
    }
}

#[derive(Debug, Serialize)]
pub struct MaterialResponse(pub Material);

impl From<Material> for MaterialResponse {
    fn from(m: Material) -> Self {
        Self(m)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct MaterialListResponse(pub Vec<Material>);

#[derive(Debug, Deserialize)]
pub struct AddUrlsRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub material_ids: Option<Vec<String>>,
}

/// Mirrors the shape of `Event::TranslationCompleted`: the endpoint returns
/// immediately with zero counts, since actual completion is
/// reported later over the client's SSE room, not in this response.
#[derive(Debug, Serialize)]
pub struct TranslateAck {
    pub success_count: usize,
    pub failed_count: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub translation_type: Option<SelectedResultWire>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectedResultWire {
    Api,
    Latex,
}

impl From<SelectedResultWire> for SelectedResult {
    fn from(w: SelectedResultWire) -> Self {
        match w {
            SelectedResultWire::Api => Self::Api,
            SelectedResultWire::Latex => Self::Latex,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SaveRegionsRequest {
    pub regions: Vec<transpipe_core::model::EditedRegion>,
}

pub type ConfirmEntitiesRequest = EntityUserEdits;
