//! Transpipe core library.
//!
//! This crate owns the material processing pipeline's domain logic:
//! - the material/client data model and its persistent `Store`
//! - the pure processing-step state machine
//! - the room-scoped event bus used to stream progress to clients
//! - provider clients for OCR, LLM refinement, entity recognition and web
//!   capture
//! - PDF ingestion (rasterization) and image processing
//! - export packaging
//!
//! `transpipe-web` and `transpipe-cli` are thin front ends over this crate.

pub mod blob;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod image_proc;
pub mod model;
pub mod orchestrator;
pub mod pdf;
pub mod providers;
pub mod state_machine;
pub mod store;
pub mod util;

pub use blob::{BlobStore, FsBlobStore};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use events::{Event, EventBus, Room};
pub use export::export_client;
pub use model::{Client, Material};
pub use orchestrator::Orchestrator;
pub use providers::Providers;
pub use state_machine::{Action, ProcessingStep};
pub use store::{SharedStore, Store};
