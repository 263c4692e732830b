//! The Store (component B): persists clients and materials, enforces
//! optimistic-lock updates, and fronts `list_materials` with a short-lived
//! cache. All operations are synchronous to the caller — sled
//! access is local-disk and fast enough not to warrant an async facade.

mod sled_store;

pub use sled_store::SledStore;

use std::sync::Arc;

use crate::error::Result;
use crate::model::{Client, Material};

/// Changes to apply inside one optimistic-lock `update_material` call. The
/// closure receives a `&mut Material` already at `expected_version` and
/// mutates it in place; the store handles version bump and `updated_at`.
pub type MaterialMutator<'a> = dyn FnOnce(&mut Material) + 'a;

pub trait Store: Send + Sync {
    fn get_material(&self, id: &str) -> Result<Material>;
    fn list_materials(&self, client_id: &str) -> Result<Vec<Material>>;
    fn insert_material(&self, material: Material) -> Result<Material>;
    fn update_material(
        &self,
        id: &str,
        expected_version: u64,
        apply: &MaterialMutator<'_>,
    ) -> Result<Material>;
    fn delete_material(&self, id: &str) -> Result<()>;
    fn invalidate_materials_cache(&self, client_id: &str);

    fn get_client(&self, id: &str) -> Result<Client>;
    fn list_clients(&self) -> Result<Vec<Client>>;
    fn insert_client(&self, client: Client) -> Result<Client>;
    fn delete_client(&self, id: &str) -> Result<()>;

    /// All materials sharing a `pdf_session_id`, ordered by page number.
    /// Used for sibling propagation (confirm/unconfirm, entity guidance).
    fn list_pdf_siblings(&self, pdf_session_id: &str) -> Result<Vec<Material>>;
}

pub type SharedStore = Arc<dyn Store>;
