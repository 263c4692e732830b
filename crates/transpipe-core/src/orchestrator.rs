//! The Orchestrator (component C): drives materials through the state
//! machine by calling provider clients, with a per-material lock
//! (component E) and a bounded worker pool (component F) serializing
//! concurrent stage transitions per material. Auto-chained actions (e.g.
//! `confirm_entities` chaining into `start_llm`) are always fresh
//! `tokio::spawn` submissions, never in-stage continuations.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{error, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, Room};
use crate::model::{
    EntityRecognitionResult, EntityUserEdits, LlmTranslationEntry, Material, MaterialKind, RecognizedEntity, Region,
    TranslationGuidance, TranslationStatistics, TranslationTextInfo,
};
use crate::providers::Providers;
use crate::state_machine::{initial_step, transition, Action, ProcessingStep, TransitionContext};
use crate::store::SharedStore;

/// Per-material async mutex table plus the global worker-pool semaphore.
#[derive(Clone)]
pub struct Orchestrator {
    store: SharedStore,
    events: EventBus,
    providers: Providers,
    blobs: Arc<dyn BlobStore>,
    config: AppConfig,
    semaphore: Arc<Semaphore>,
    locks: Arc<DashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(store: SharedStore, events: EventBus, providers: Providers, blobs: Arc<dyn BlobStore>, config: AppConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_pool_size));
        Self { store, events, providers, blobs, config, semaphore, locks: Arc::new(DashMap::new()) }
    }

    fn lock_for(&self, material_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.entry(material_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    // =========================================================================
    // State-machine plumbing
    // =========================================================================

    /// Apply `action` to the material's current step, writing the result
    /// through the optimistic-lock `Store::update_material`. `extra`
    /// applies any data changes (e.g. storing the OCR result) as part of
    /// the same write. Returns the updated row and any auto-chained action.
    fn transition_material(
        &self,
        material_id: &str,
        action: Action,
        ctx: TransitionContext,
        extra: impl FnOnce(&mut Material),
    ) -> Result<(Material, Option<Action>)> {
        let current = self.store.get_material(material_id)?;
        let t = transition(current.processing_step, action, ctx)?;
        let expected_version = current.version;
        let updated = self.store.update_material(material_id, expected_version, &|m: &mut Material| {
            m.processing_step = t.to;
            if t.clears_intermediate {
                clear_intermediate_fields(m);
            }
            extra(m);
            m.sync_status();
        })?;
        Ok((updated, t.auto_next))
    }

    fn publish_updated(&self, material: &Material) {
        let event = Event::MaterialUpdated {
            material_id: material.id.clone(),
            status: material.status.clone(),
            processing_step: material.processing_step.as_str().to_string(),
            progress: material.progress,
            translated_path: material.translated_image_path.clone(),
            translation_info: material.translation_text_info.as_ref().and_then(|i| serde_json::to_value(i).ok()),
            file_path: material.file_path.clone(),
        };
        self.events.publish(Room::material(&material.id), event.clone());
        self.events.publish(Room::client(&material.client_id), event);
    }

    fn publish_error(&self, material_id: &str, client_id: &str, error: &Error) {
        let event = Event::MaterialError { material_id: material_id.to_string(), error: error.to_string() };
        self.events.publish(Room::material(material_id), event.clone());
        self.events.publish(Room::client(client_id), event);
    }

    /// Acquire the per-material lock without blocking; a held lock means a
    /// stage is already advancing this material.
    fn try_begin(&self, material_id: &str) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        self.lock_for(material_id)
            .try_lock_owned()
            .map_err(|_| Error::Conflict(format!("material {material_id} already has a stage in progress")))
    }

    async fn acquire_worker_permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore should never be closed")
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Ingest an uploaded image or PDF. Images are
    /// downscaled/re-encoded under the configured budget and land at
    /// `Uploaded`. PDFs are split into `N` sibling `Material` rows at
    /// `Splitting` immediately, sharing a fresh
    /// `pdf_session_id`; a background task then rasterizes each page and
    /// advances that page's own row to `SplitCompleted` as it completes.
    pub async fn ingest_upload(
        &self,
        client_id: &str,
        kind: MaterialKind,
        original_filename: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<Vec<Material>> {
        match kind {
            MaterialKind::Image => {
                let id = Uuid::new_v4().to_string();
                let now = now_string();
                let processed = crate::image_proc::prepare_upload(&bytes, &self.config.image_limits)?;
                let path = self.blobs.save(&id, "original.jpg", &processed)?;
                let step = initial_step(kind);
                let material = Material {
                    id,
                    client_id: client_id.to_string(),
                    kind,
                    file_path: Some(path),
                    url: None,
                    original_filename,
                    status: step.display_status().to_string(),
                    processing_step: step,
                    translation_text_info: None,
                    llm_translation_result: None,
                    translation_error: None,
                    entity_recognition_enabled: false,
                    entity_recognition_mode: crate::model::EntityRecognitionMode::Standard,
                    entity_recognition_result: None,
                    entity_recognition_confirmed: false,
                    entity_recognition_triggered: false,
                    entity_user_edits: None,
                    entity_recognition_error: None,
                    edited_regions: None,
                    final_image_path: None,
                    has_edited_version: false,
                    selected_result: None,
                    pdf_session_id: None,
                    pdf_page_number: None,
                    pdf_total_pages: None,
                    pdf_original_file: None,
                    original_pdf_path: None,
                    translated_image_path: None,
                    progress: 0,
                    version: 1,
                    created_at: now.clone(),
                    updated_at: now,
                };
                Ok(vec![self.store.insert_material(material)?])
            }
            MaterialKind::Pdf => {
                let doc = crate::pdf::PdfDocument::from_bytes(bytes.clone())?;
                let page_count = doc.page_count();
                if page_count == 0 {
                    return Err(Error::Validation("PDF has no pages".to_string()));
                }
                #[allow(clippy::cast_possible_truncation)]
                let total_pages = page_count as u32;

                let session_id = Uuid::new_v4().to_string();
                let original_pdf_path = self.blobs.save(&session_id, "original.pdf", &bytes)?;

                let mut pages = Vec::with_capacity(page_count);
                for page_num in 0..page_count {
                    let now = now_string();
                    let step = ProcessingStep::Splitting;
                    let material = Material {
                        id: Uuid::new_v4().to_string(),
                        client_id: client_id.to_string(),
                        kind: MaterialKind::Pdf,
                        file_path: None,
                        url: None,
                        original_filename: original_filename.clone(),
                        status: step.display_status().to_string(),
                        processing_step: step,
                        translation_text_info: None,
                        llm_translation_result: None,
                        translation_error: None,
                        entity_recognition_enabled: false,
                        entity_recognition_mode: crate::model::EntityRecognitionMode::Standard,
                        entity_recognition_result: None,
                        entity_recognition_confirmed: false,
                        entity_recognition_triggered: false,
                        entity_user_edits: None,
                        entity_recognition_error: None,
                        edited_regions: None,
                        final_image_path: None,
                        has_edited_version: false,
                        selected_result: None,
                        pdf_session_id: Some(session_id.clone()),
                        #[allow(clippy::cast_possible_truncation)]
                        pdf_page_number: Some(page_num as u32 + 1),
                        pdf_total_pages: Some(total_pages),
                        pdf_original_file: original_filename.clone(),
                        original_pdf_path: Some(original_pdf_path.clone()),
                        translated_image_path: None,
                        progress: 0,
                        version: 1,
                        created_at: now.clone(),
                        updated_at: now,
                    };
                    pages.push(self.store.insert_material(material)?);
                }

                self.spawn_split_stage(pages.clone(), bytes);
                Ok(pages)
            }
            MaterialKind::Webpage => Err(Error::Validation(
                "webpage materials are created via web_capture, not ingest_upload".to_string(),
            )),
        }
    }

    fn spawn_split_stage(&self, pages: Vec<Material>, pdf_bytes: Vec<u8>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let _permit = orchestrator.acquire_worker_permit().await;
            orchestrator.run_split_stage(&pages, &pdf_bytes).await;
        });
    }

    /// Rasterize each page and advance its own row to `SplitCompleted`. A
    /// page whose rendering fails is logged and left at `Splitting` rather
    /// than transitioned: the canonical transition table has no
    /// `split-fail` action, so a fabricated one would be ungrounded.
    async fn run_split_stage(&self, pages: &[Material], pdf_bytes: &[u8]) {
        let doc = match crate::pdf::PdfDocument::from_bytes(pdf_bytes.to_vec()) {
            Ok(doc) => doc,
            Err(e) => {
                error!("failed to reopen PDF for splitting: {e}");
                return;
            }
        };
        let renderer = crate::pdf::PageRenderer::new(&doc);

        for (page_num, page) in pages.iter().enumerate() {
            let result: Result<()> = (|| {
                let jpeg = renderer.render_page_jpeg(page_num, &self.config.image_limits)?;
                let path = self.blobs.save(&page.id, "page.jpg", &jpeg)?;
                let (updated, _) = self.transition_material(&page.id, Action::SplitSuccess, TransitionContext::default(), |m| {
                    m.file_path = Some(path.clone());
                })?;
                self.publish_updated(&updated);
                Ok(())
            })();
            if let Err(e) = result {
                error!("failed to split page {page_num} of material {}: {e}", page.id);
            }
        }
    }

    /// Capture a webpage: creates the material directly at
    /// `Translated` once the capture provider returns, since the provider
    /// performs translation as part of the capture.
    pub async fn web_capture(&self, client_id: &str, url: &str) -> Result<Material> {
        let now = now_string();
        let id = Uuid::new_v4().to_string();
        let material = Material {
            id: id.clone(),
            client_id: client_id.to_string(),
            kind: MaterialKind::Webpage,
            file_path: None,
            url: Some(url.to_string()),
            original_filename: None,
            status: ProcessingStep::Translating.display_status().to_string(),
            processing_step: ProcessingStep::Translating,
            translation_text_info: None,
            llm_translation_result: None,
            translation_error: None,
            entity_recognition_enabled: false,
            entity_recognition_mode: crate::model::EntityRecognitionMode::Standard,
            entity_recognition_result: None,
            entity_recognition_confirmed: false,
            entity_recognition_triggered: false,
            entity_user_edits: None,
            entity_recognition_error: None,
            edited_regions: None,
            final_image_path: None,
            has_edited_version: false,
            selected_result: None,
            pdf_session_id: None,
            pdf_page_number: None,
            pdf_total_pages: None,
            pdf_original_file: None,
            original_pdf_path: None,
            translated_image_path: None,
            progress: 0,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
        };
        let inserted = self.store.insert_material(material)?;

        let orchestrator = self.clone();
        let material_id = inserted.id.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let _permit = orchestrator.acquire_worker_permit().await;
            if let Err(e) = orchestrator.run_web_capture_stage(&material_id, &url).await {
                warn!("web capture failed for {material_id}: {e}");
                let client_id = orchestrator
                    .store
                    .get_material(&material_id)
                    .map(|m| m.client_id)
                    .unwrap_or_default();
                orchestrator.publish_error(&material_id, &client_id, &e);
                let _ = orchestrator.transition_material(&material_id, Action::OcrFail, TransitionContext::default(), |m| {
                    m.translation_error = Some(e.to_string());
                });
            }
        });

        Ok(inserted)
    }

    async fn run_web_capture_stage(&self, material_id: &str, url: &str) -> Result<()> {
        let capture = tokio::time::timeout(
            Duration::from_secs(self.config.timeouts.web_capture_secs),
            self.providers.web_capture.capture(url),
        )
        .await
        .map_err(|_| Error::StageTimeout("web_capture"))??;

        let original_path = self.blobs.save(material_id, "original.pdf", &capture.original_pdf)?;
        let translated_path = self.blobs.save(material_id, "translated.pdf", &capture.translated_pdf)?;

        let (updated, _) = self.transition_material(material_id, Action::OcrSuccess, TransitionContext::default(), |m| {
            m.original_pdf_path = Some(original_path);
            m.translated_image_path = Some(translated_path.clone());
            m.file_path = Some(translated_path);
        })?;
        self.publish_updated(&updated);
        Ok(())
    }

    // =========================================================================
    // Translate (OCR stage)
    // =========================================================================

    pub async fn start_translation(&self, material_id: &str) -> Result<Material> {
        self.begin_stage(material_id, Action::StartTranslate, Self::run_ocr_stage).await
    }

    pub async fn retranslate(&self, material_id: &str) -> Result<Material> {
        self.begin_stage(material_id, Action::Retranslate, Self::run_ocr_stage).await
    }

    async fn begin_stage(
        &self,
        material_id: &str,
        start_action: Action,
        run: impl FnOnce(Orchestrator, String) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + 'static,
    ) -> Result<Material> {
        let guard = self.try_begin(material_id)?;
        let (updated, _) = self.transition_material(material_id, start_action, TransitionContext::default(), |_| {})?;
        self.publish_updated(&updated);

        let orchestrator = self.clone();
        let id = material_id.to_string();
        tokio::spawn(async move {
            let _permit = orchestrator.acquire_worker_permit().await;
            let _guard = guard;
            run(orchestrator, id).await;
        });

        Ok(updated)
    }

    fn run_ocr_stage(self, material_id: String) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            if let Err(e) = self.execute_ocr_stage(&material_id).await {
                self.fail_stage(&material_id, Action::OcrFail, e).await;
            }
        })
    }

    async fn execute_ocr_stage(&self, material_id: &str) -> Result<()> {
        let material = self.store.get_material(material_id)?;
        let path = material.file_path.clone().ok_or_else(|| Error::Validation("material has no file".to_string()))?;
        let bytes = self.blobs.load(&path)?;

        let ocr_result = tokio::time::timeout(
            Duration::from_secs(self.config.timeouts.ocr_secs),
            self.providers.ocr.recognize(&bytes, &self.config.source_lang, &self.config.target_lang),
        )
        .await
        .map_err(|_| Error::StageTimeout("ocr"))??;

        let regions: Vec<Region> = ocr_result
            .regions
            .into_iter()
            .enumerate()
            .map(|(i, r)| Region { id: format!("r{i}"), src: r.src, dst: r.dst, points: r.points, line_count: r.line_count })
            .collect();

        let statistics = TranslationStatistics {
            region_count: regions.len(),
            character_count: regions.iter().map(|r| r.src.chars().count()).sum(),
        };

        let info = TranslationTextInfo {
            regions,
            source_lang: self.config.source_lang.as_str().to_string(),
            target_lang: self.config.target_lang.as_str().to_string(),
            statistics,
        };

        let (updated, _) = self.transition_material(material_id, Action::OcrSuccess, TransitionContext::default(), |m| {
            m.translation_text_info = Some(info);
            m.progress = 100;
        })?;
        self.publish_updated(&updated);
        Ok(())
    }

    async fn fail_stage(&self, material_id: &str, fail_action: Action, error: Error) {
        error!("stage failed for {material_id}: {error}");
        let client_id = self.store.get_material(material_id).map(|m| m.client_id).unwrap_or_default();
        self.publish_error(material_id, &client_id, &error);
        let result = self.transition_material(material_id, fail_action, TransitionContext::default(), |m| {
            m.translation_error = Some(error.to_string());
        });
        if let Ok((updated, _)) = result {
            self.publish_updated(&updated);
        }
    }

    // =========================================================================
    // Entity recognition
    // =========================================================================

    pub async fn recognize_entities(&self, material_id: &str, deep: bool) -> Result<Material> {
        let guard = self.try_begin(material_id)?;
        let (updated, _) =
            self.transition_material(material_id, Action::StartEntityRecognize, TransitionContext::default(), |m| {
                m.entity_recognition_mode =
                    if deep { crate::model::EntityRecognitionMode::Deep } else { crate::model::EntityRecognitionMode::Standard };
                m.entity_recognition_triggered = true;
            })?;
        self.publish_updated(&updated);

        let orchestrator = self.clone();
        let id = material_id.to_string();
        tokio::spawn(async move {
            let _permit = orchestrator.acquire_worker_permit().await;
            orchestrator.run_entity_stage(&id, deep, guard).await;
        });

        Ok(updated)
    }

    async fn run_entity_stage(&self, material_id: &str, deep: bool, guard: tokio::sync::OwnedMutexGuard<()>) {
        match self.execute_entity_stage(material_id, deep, guard).await {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!("entity recognition recoverable failure for {material_id}: {e}");
                let client_id = self.store.get_material(material_id).map(|m| m.client_id).unwrap_or_default();
                self.publish_error(material_id, &client_id, &e);
                if let Ok((updated, _)) =
                    self.transition_material(material_id, Action::ErRecoverableFail, TransitionContext::default(), |m| {
                        m.entity_recognition_error = Some(e.to_string());
                    })
                {
                    self.publish_updated(&updated);
                }
            }
            Err(e) => self.fail_stage(material_id, Action::ErFatal, e).await,
        }
    }

    async fn execute_entity_stage(
        &self,
        material_id: &str,
        deep: bool,
        guard: tokio::sync::OwnedMutexGuard<()>,
    ) -> Result<()> {
        let material = self.store.get_material(material_id)?;
        let info = material.translation_text_info.ok_or_else(|| {
            Error::Validation("entity recognition requires a completed OCR pass".to_string())
        })?;
        let text = info.regions.iter().map(|r| r.src.as_str()).collect::<Vec<_>>().join("\n");

        let mut entities = tokio::time::timeout(
            Duration::from_secs(self.config.timeouts.entity_recognition_secs),
            self.providers.entity_recognition.recognize(&text, deep),
        )
        .await
        .map_err(|_| Error::StageTimeout("entity_recognition"))??;

        // Standard mode returns entities without English names; fill them
        // in with a follow-up LLM call, tolerating failure.
        if !deep {
            let missing: Vec<String> =
                entities.iter().filter(|e| e.english_name.is_none()).map(|e| e.chinese_name.clone()).collect();
            if !missing.is_empty() {
                match self.providers.llm.propose_english_names(&missing).await {
                    Ok(proposed) => {
                        let names: std::collections::HashMap<String, String> = proposed.into_iter().collect();
                        for entity in &mut entities {
                            if entity.english_name.is_none() {
                                entity.english_name = names.get(&entity.chinese_name).cloned();
                            }
                        }
                    }
                    Err(e) => warn!("english-name proposal failed for {material_id}, leaving names unset: {e}"),
                }
            }
        }

        let result = EntityRecognitionResult { entities: entities.clone(), mode: if deep { "deep" } else { "standard" }.to_string() };

        let (updated, _) = self.transition_material(material_id, Action::ErSuccess, TransitionContext::default(), |m| {
            m.entity_recognition_result = Some(result);
        })?;
        self.publish_updated(&updated);

        // Release the per-material lock before the deep-mode auto-confirm
        // below: `confirm_entities` auto-chains into `llm_translate` on a
        // fresh `tokio::spawn`, which takes this same material's lock via a
        // non-blocking `try_begin` — held past this point, that spawn would
        // race this guard's drop and lose.
        drop(guard);

        // Deep mode auto-confirms the recognized entities and auto-chains
        // into the LLM stage, reusing the same
        // confirm-entities path (and its sibling propagation) a user-driven
        // confirm would take.
        if deep {
            let edits = EntityUserEdits {
                entities: serde_json::to_value(&entities).unwrap_or_default(),
                translation_guidance: bucket_entities_into_guidance(&entities),
            };
            if let Err(e) = self.confirm_entities(material_id, edits).await {
                warn!("deep-mode auto-confirm failed for {material_id}: {e}");
            }
        }
        Ok(())
    }

    /// Confirm the user's entity edits and auto-chain into LLM refinement.
    /// PDF-linked siblings still sitting at `entity_pending_confirm` receive
    /// the same edits and are transitioned too.
    pub async fn confirm_entities(&self, material_id: &str, edits: EntityUserEdits) -> Result<Vec<Material>> {
        let current = self.store.get_material(material_id)?;
        let mut targets = vec![material_id.to_string()];
        if let Some(session_id) = &current.pdf_session_id {
            let siblings = self.store.list_pdf_siblings(session_id)?;
            for sibling in siblings {
                if sibling.id != material_id && sibling.processing_step == ProcessingStep::EntityPendingConfirm {
                    targets.push(sibling.id);
                }
            }
        }

        let mut updated_materials = Vec::with_capacity(targets.len());
        for id in &targets {
            let edits = edits.clone();
            let result = self.transition_material(id, Action::ConfirmEntities, TransitionContext::default(), move |m| {
                m.entity_user_edits = Some(edits);
                m.entity_recognition_confirmed = true;
            });
            let (updated, auto_next) = match result {
                Ok(pair) => pair,
                Err(e) if id != material_id => {
                    warn!("skipping sibling {id} during confirm_entities: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.publish_updated(&updated);

            if auto_next == Some(Action::StartLlm) {
                let orchestrator = self.clone();
                let chained_id = id.clone();
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.llm_translate(&chained_id).await {
                        warn!("auto-chained llm_translate failed for {chained_id}: {e}");
                    }
                });
            }
            updated_materials.push(updated);
        }

        Ok(updated_materials)
    }

    // =========================================================================
    // LLM refinement
    // =========================================================================

    pub async fn llm_translate(&self, material_id: &str) -> Result<Material> {
        let guard = self.try_begin(material_id)?;
        let (updated, _) = self.transition_material(material_id, Action::StartLlm, TransitionContext::default(), |_| {})?;
        self.publish_updated(&updated);

        let orchestrator = self.clone();
        let id = material_id.to_string();
        tokio::spawn(async move {
            let _permit = orchestrator.acquire_worker_permit().await;
            let _guard = guard;
            if let Err(e) = orchestrator.execute_llm_stage(&id).await {
                orchestrator.fail_stage(&id, Action::LlmFail, e).await;
            }
        });

        Ok(updated)
    }

    async fn execute_llm_stage(&self, material_id: &str) -> Result<()> {
        let material = self.store.get_material(material_id)?;
        let info = material
            .translation_text_info
            .ok_or_else(|| Error::Validation("llm refinement requires a completed OCR pass".to_string()))?;
        let guidance = material.entity_user_edits.as_ref().map(|e| e.translation_guidance.clone());

        let sources: Vec<(String, String)> = info.regions.iter().map(|r| (r.id.clone(), r.src.clone())).collect();
        let batch_size = self.config.llm_batch_size.max(1);

        let mut translated = std::collections::HashMap::new();
        for chunk in sources.chunks(batch_size) {
            let lines = tokio::time::timeout(
                Duration::from_secs(self.config.timeouts.llm_batch_secs),
                self.providers.llm.optimize_batch(chunk, guidance.as_ref()),
            )
            .await
            .map_err(|_| Error::StageTimeout("llm_batch"))??;
            for line in lines {
                translated.insert(line.id, line.translation);
            }
        }

        // normalized dst -> id, so a swapped translation (the LLM echoing
        // another region's OCR line back under the wrong id) can be
        // detected below.
        let dst_to_id: std::collections::HashMap<String, &str> =
            info.regions.iter().map(|r| (r.dst.trim().to_lowercase(), r.id.as_str())).collect();

        let entries: Vec<LlmTranslationEntry> = info
            .regions
            .iter()
            .map(|r| {
                let region_id = r.id.as_str();
                let translation = match translated.get(&r.id) {
                    Some(t) => match dst_to_id.get(&t.trim().to_lowercase()) {
                        Some(&owner_id) if owner_id != region_id => {
                            warn!("llm swapped translation for region {region_id} of {material_id} with region {owner_id}'s, falling back to its own ocr dst");
                            r.dst.clone()
                        }
                        _ => t.clone(),
                    },
                    None => {
                        warn!("llm omitted region {region_id} of {material_id}, falling back to its own ocr dst");
                        r.dst.clone()
                    }
                };
                LlmTranslationEntry { id: r.id.clone(), translation, original: r.src.clone() }
            })
            .collect();

        let (updated, _) = self.transition_material(material_id, Action::LlmSuccess, TransitionContext::default(), |m| {
            m.llm_translation_result = Some(entries);
        })?;
        self.publish_updated(&updated);
        Ok(())
    }

    // =========================================================================
    // Confirm / unconfirm / rotate
    // =========================================================================

    /// Confirm a material. For PDF-linked materials this
    /// applies to every sibling sharing the `pdf_session_id`, per the
    /// "confirming/unconfirming any page applies to all siblings
    /// atomically" invariant — applied as a best-effort sweep
    /// over each sibling's own CAS write rather than a single cross-row
    /// transaction, since the store has no multi-key transaction primitive
    /// (see DESIGN.md). A sibling not in a confirmable step is skipped and
    /// logged rather than aborting the whole batch.
    pub fn confirm(&self, material_id: &str, selected_result: Option<crate::model::SelectedResult>) -> Result<Vec<Material>> {
        let current = self.store.get_material(material_id)?;
        let targets = self.sibling_group(&current);
        let mut updated_materials = Vec::with_capacity(targets.len());
        for id in targets {
            match self.transition_material(&id, Action::Confirm, TransitionContext::default(), |m| {
                m.selected_result = selected_result;
            }) {
                Ok((updated, _)) => {
                    self.publish_updated(&updated);
                    updated_materials.push(updated);
                }
                Err(e) if id != material_id => warn!("skipping sibling {id} during confirm: {e}"),
                Err(e) => return Err(e),
            }
        }
        Ok(updated_materials)
    }

    pub fn unconfirm(&self, material_id: &str) -> Result<Vec<Material>> {
        let current = self.store.get_material(material_id)?;
        let targets = self.sibling_group(&current);
        let mut updated_materials = Vec::with_capacity(targets.len());
        for id in targets {
            let sibling = self.store.get_material(&id)?;
            let ctx = TransitionContext { has_llm_result: sibling.llm_translation_result.is_some() };
            match self.transition_material(&id, Action::Unconfirm, ctx, |_| {}) {
                Ok((updated, _)) => {
                    self.publish_updated(&updated);
                    updated_materials.push(updated);
                }
                Err(e) if id != material_id => warn!("skipping sibling {id} during unconfirm: {e}"),
                Err(e) => return Err(e),
            }
        }
        Ok(updated_materials)
    }

    /// `material_id` plus every other row sharing its `pdf_session_id`, or
    /// just `material_id` alone for non-PDF materials.
    fn sibling_group(&self, material: &Material) -> Vec<String> {
        match &material.pdf_session_id {
            Some(session_id) => self
                .store
                .list_pdf_siblings(session_id)
                .map(|siblings| siblings.into_iter().map(|m| m.id).collect())
                .unwrap_or_else(|_| vec![material.id.clone()]),
            None => vec![material.id.clone()],
        }
    }

    /// Rotate an image material 90 degrees clockwise (global action):
    /// re-encodes the file in place and resets to `Uploaded`.
    pub fn rotate(&self, material_id: &str) -> Result<Material> {
        let current = self.store.get_material(material_id)?;
        let path = current.file_path.clone().ok_or_else(|| Error::Validation("material has no file".to_string()))?;
        let bytes = self.blobs.load(&path)?;
        let rotated = crate::image_proc::rotate_clockwise(&bytes, &self.config.image_limits)?;
        let new_path = self.blobs.save(material_id, "original.jpg", &rotated)?;

        let (updated, _) = self.transition_material(material_id, Action::Rotate, TransitionContext::default(), |m| {
            m.file_path = Some(new_path.clone());
        })?;
        self.publish_updated(&updated);
        Ok(updated)
    }

    pub fn save_entity_user_edits(&self, material_id: &str, edits: EntityUserEdits) -> Result<Material> {
        let current = self.store.get_material(material_id)?;
        let updated = self.store.update_material(material_id, current.version, &|m: &mut Material| {
            m.entity_user_edits = Some(edits);
        })?;
        self.publish_updated(&updated);
        Ok(updated)
    }
}

fn clear_intermediate_fields(m: &mut Material) {
    m.translation_text_info = None;
    m.llm_translation_result = None;
    m.translation_error = None;
    m.entity_recognition_result = None;
    m.entity_recognition_confirmed = false;
    m.entity_recognition_triggered = false;
    m.entity_user_edits = None;
    m.entity_recognition_error = None;
    m.edited_regions = None;
    m.final_image_path = None;
    m.has_edited_version = false;
    m.selected_result = None;
    m.progress = 0;
}

/// Bucket deep-mode entities into the four `translationGuidance` categories
/// by their provider-assigned `source` label.
/// An entity with no recognized category lands under `terms`.
fn bucket_entities_into_guidance(entities: &[RecognizedEntity]) -> TranslationGuidance {
    let mut guidance = TranslationGuidance::default();
    for entity in entities {
        let Some(english_name) = &entity.english_name else { continue };
        let line = format!("{} -> {}", entity.chinese_name, english_name);
        match entity.source.as_deref() {
            Some("person") => guidance.persons.push(line),
            Some("location") => guidance.locations.push(line),
            Some("organization") => guidance.organizations.push(line),
            _ => guidance.terms.push(line),
        }
    }
    guidance
}

fn now_string() -> String {
    let since_epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}", since_epoch.as_secs())
}
