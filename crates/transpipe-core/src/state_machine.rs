//! The pipeline state machine: a pure function over `(current_step, action)`.
//!
//! Structured around a `TRANSITIONS` table plus global actions and
//! `is_processing_state` / `is_waiting_user_input` classifiers, including
//! an explicit `splitting -> split_completed` auto step and rotate/
//! retranslate global resets.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Canonical processing step. This is the single source of truth for a
/// material's lifecycle; `Material::status` is always derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Uploaded,
    Splitting,
    SplitCompleted,
    Translating,
    Translated,
    EntityRecognizing,
    EntityPendingConfirm,
    EntityConfirmed,
    LlmTranslating,
    LlmTranslated,
    Confirmed,
    Failed,
}

impl ProcessingStep {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Splitting => "splitting",
            Self::SplitCompleted => "split_completed",
            Self::Translating => "translating",
            Self::Translated => "translated",
            Self::EntityRecognizing => "entity_recognizing",
            Self::EntityPendingConfirm => "entity_pending_confirm",
            Self::EntityConfirmed => "entity_confirmed",
            Self::LlmTranslating => "llm_translating",
            Self::LlmTranslated => "llm_translated",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// The canonical display status. Identity mapping today; kept distinct
    /// from `as_str` so a future UI-facing relabeling doesn't have to touch
    /// the wire representation of `processing_step` itself.
    #[must_use]
    pub const fn display_status(self) -> &'static str {
        self.as_str()
    }

    /// A background task owns the row and is actively advancing it.
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(
            self,
            Self::Splitting | Self::Translating | Self::EntityRecognizing | Self::LlmTranslating
        )
    }

    /// The pipeline is parked waiting for an explicit user action.
    #[must_use]
    pub const fn is_waiting_user(self) -> bool {
        matches!(
            self,
            Self::EntityPendingConfirm | Self::Uploaded | Self::SplitCompleted
        )
    }

    /// The user may confirm the result or send it back into the pipeline.
    #[must_use]
    pub const fn is_reviewable(self) -> bool {
        matches!(self, Self::Translated | Self::EntityConfirmed | Self::LlmTranslated)
    }
}

impl std::fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action submitted to the state machine, either by the orchestrator
/// (stage outcomes) or by a user-facing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    StartTranslate,
    OcrSuccess,
    OcrFail,
    StartEntityRecognize,
    ErSuccess,
    ErRecoverableFail,
    ErFatal,
    ConfirmEntities,
    StartLlm,
    LlmSuccess,
    LlmFail,
    Confirm,
    Unconfirm,
    Retranslate,
    Rotate,
    SplitSuccess,
}

/// Transition classification, mirroring the source's `TransitionType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Normal,
    Skip,
    Reset,
    Retry,
    Auto,
    Rollback,
}

/// Extra facts the caller must supply for transitions whose destination
/// depends on more than `(step, action)` — currently only `unconfirm`,
/// which returns to `llm_translated` or `translated` depending on whether
/// an LLM result exists on the row.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub has_llm_result: bool,
}

/// The result of a successful transition.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub to: ProcessingStep,
    pub kind: TransitionKind,
    /// Whether the caller should clear derived/intermediate fields
    /// (translation results, entity data, edited regions) as part of
    /// applying this transition.
    pub clears_intermediate: bool,
    /// A follow-up action the orchestrator should submit as a fresh task
    /// once this transition's write commits.
    pub auto_next: Option<Action>,
}

impl Transition {
    const fn new(to: ProcessingStep, kind: TransitionKind) -> Self {
        Self { to, kind, clears_intermediate: false, auto_next: None }
    }

    const fn clearing(mut self) -> Self {
        self.clears_intermediate = true;
        self
    }

    const fn chaining(mut self, next: Action) -> Self {
        self.auto_next = Some(next);
        self
    }
}

/// The initial step for a freshly created material, by ingress kind.
#[must_use]
pub const fn initial_step(kind: crate::model::MaterialKind) -> ProcessingStep {
    match kind {
        crate::model::MaterialKind::Pdf => ProcessingStep::Splitting,
        crate::model::MaterialKind::Image | crate::model::MaterialKind::Webpage => {
            ProcessingStep::Uploaded
        }
    }
}

/// Apply `action` to a material currently at `step`. Pure: no I/O, no side
/// effects, deterministic given `ctx`.
pub fn transition(step: ProcessingStep, action: Action, ctx: TransitionContext) -> Result<Transition> {
    use Action::{
        Confirm, ConfirmEntities, ErFatal, ErRecoverableFail, ErSuccess, LlmFail, LlmSuccess,
        OcrFail, OcrSuccess, Retranslate, Rotate, SplitSuccess, StartEntityRecognize, StartLlm,
        StartTranslate, Unconfirm,
    };
    use ProcessingStep::{
        Confirmed, EntityConfirmed, EntityPendingConfirm, EntityRecognizing, Failed,
        LlmTranslated, LlmTranslating, SplitCompleted, Splitting, Translated, Translating,
        Uploaded,
    };
    use TransitionKind::{Auto, Normal, Reset, Retry, Rollback, Skip};

    // Global actions: allowed from any reachable state.
    match action {
        Retranslate => return Ok(Transition::new(Translating, Retry).clearing()),
        Rotate => return Ok(Transition::new(Uploaded, Reset).clearing()),
        _ => {}
    }

    match (step, action) {
        (Splitting, SplitSuccess) => Ok(Transition::new(SplitCompleted, Auto)),
        (Uploaded | SplitCompleted, StartTranslate) => Ok(Transition::new(Translating, Normal)),
        (Translating, OcrSuccess) => Ok(Transition::new(Translated, Auto)),
        (Translating, OcrFail) => Ok(Transition::new(Failed, Auto)),
        (Translated, StartEntityRecognize) => Ok(Transition::new(EntityRecognizing, Normal)),
        (EntityRecognizing, ErSuccess) => Ok(Transition::new(EntityPendingConfirm, Auto)),
        (EntityRecognizing, ErRecoverableFail) => Ok(Transition::new(Translated, Skip)),
        (EntityRecognizing, ErFatal) => Ok(Transition::new(Failed, Auto)),
        (EntityPendingConfirm, ConfirmEntities) => {
            Ok(Transition::new(EntityConfirmed, Normal).chaining(StartLlm))
        }
        (Translated | EntityConfirmed, StartLlm) => Ok(Transition::new(LlmTranslating, Normal)),
        (LlmTranslating, LlmSuccess) => Ok(Transition::new(LlmTranslated, Auto)),
        (LlmTranslating, LlmFail) => Ok(Transition::new(Failed, Auto)),
        (Translated | LlmTranslated, Confirm) => Ok(Transition::new(Confirmed, Normal)),
        (Confirmed, Unconfirm) => {
            let to = if ctx.has_llm_result { LlmTranslated } else { Translated };
            Ok(Transition::new(to, Rollback))
        }
        _ => Err(Error::Validation(format!(
            "action {action:?} is not valid from step {step:?}"
        ))),
    }
}

/// Normalize a legacy status string (pre-rewrite schema, occasionally
/// Chinese-labeled) into a canonical `ProcessingStep`. Unknown values are
/// logged and passed through as `Uploaded` so ingestion never panics on
/// unrecognized historical data.
#[must_use]
pub fn normalize_legacy_step(raw: &str) -> ProcessingStep {
    match raw {
        "uploaded" | "added" | "已上传" => ProcessingStep::Uploaded,
        "splitting" | "拆分中" => ProcessingStep::Splitting,
        "split_completed" | "拆分完成" => ProcessingStep::SplitCompleted,
        "translating" | "翻译中" => ProcessingStep::Translating,
        "translated" | "已翻译" => ProcessingStep::Translated,
        "entity_recognizing" | "实体识别中" => ProcessingStep::EntityRecognizing,
        "entity_pending_confirm" | "待确认实体" => ProcessingStep::EntityPendingConfirm,
        "entity_confirmed" | "实体已确认" => ProcessingStep::EntityConfirmed,
        "llm_translating" | "LLM优化中" => ProcessingStep::LlmTranslating,
        "llm_translated" | "LLM优化完成" => ProcessingStep::LlmTranslated,
        "confirmed" | "已确认" => ProcessingStep::Confirmed,
        "failed" | "失败" => ProcessingStep::Failed,
        other => {
            tracing::warn!("unknown legacy processing_step {other:?}, defaulting to uploaded");
            ProcessingStep::Uploaded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_translate_from_uploaded() {
        let t = transition(ProcessingStep::Uploaded, Action::StartTranslate, TransitionContext::default()).unwrap();
        assert_eq!(t.to, ProcessingStep::Translating);
        assert_eq!(t.kind, TransitionKind::Normal);
    }

    #[test]
    fn start_translate_from_split_completed() {
        let t = transition(ProcessingStep::SplitCompleted, Action::StartTranslate, TransitionContext::default()).unwrap();
        assert_eq!(t.to, ProcessingStep::Translating);
    }

    #[test]
    fn confirm_entities_auto_chains_llm() {
        let t = transition(
            ProcessingStep::EntityPendingConfirm,
            Action::ConfirmEntities,
            TransitionContext::default(),
        )
        .unwrap();
        assert_eq!(t.to, ProcessingStep::EntityConfirmed);
        assert_eq!(t.auto_next, Some(Action::StartLlm));
    }

    #[test]
    fn er_recoverable_fail_skips_back_to_translated() {
        let t = transition(
            ProcessingStep::EntityRecognizing,
            Action::ErRecoverableFail,
            TransitionContext::default(),
        )
        .unwrap();
        assert_eq!(t.to, ProcessingStep::Translated);
        assert_eq!(t.kind, TransitionKind::Skip);
    }

    #[test]
    fn unconfirm_prefers_llm_result_when_present() {
        let t = transition(
            ProcessingStep::Confirmed,
            Action::Unconfirm,
            TransitionContext { has_llm_result: true },
        )
        .unwrap();
        assert_eq!(t.to, ProcessingStep::LlmTranslated);

        let t = transition(
            ProcessingStep::Confirmed,
            Action::Unconfirm,
            TransitionContext { has_llm_result: false },
        )
        .unwrap();
        assert_eq!(t.to, ProcessingStep::Translated);
    }

    #[test]
    fn retranslate_and_rotate_are_global() {
        for step in [
            ProcessingStep::Translated,
            ProcessingStep::LlmTranslated,
            ProcessingStep::Confirmed,
            ProcessingStep::Failed,
        ] {
            let t = transition(step, Action::Retranslate, TransitionContext::default()).unwrap();
            assert_eq!(t.to, ProcessingStep::Translating);
            assert!(t.clears_intermediate);

            let t = transition(step, Action::Rotate, TransitionContext::default()).unwrap();
            assert_eq!(t.to, ProcessingStep::Uploaded);
            assert!(t.clears_intermediate);
        }
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let err = transition(ProcessingStep::Uploaded, Action::Confirm, TransitionContext::default());
        assert!(err.is_err());
    }

    #[test]
    fn classification_matches_spec_table() {
        assert!(ProcessingStep::Translating.is_processing());
        assert!(ProcessingStep::EntityRecognizing.is_processing());
        assert!(!ProcessingStep::Translated.is_processing());

        assert!(ProcessingStep::EntityPendingConfirm.is_waiting_user());
        assert!(ProcessingStep::Uploaded.is_waiting_user());
        assert!(!ProcessingStep::Translating.is_waiting_user());

        assert!(ProcessingStep::Translated.is_reviewable());
        assert!(ProcessingStep::LlmTranslated.is_reviewable());
        assert!(!ProcessingStep::Confirmed.is_reviewable());
    }

    #[test]
    fn normalizes_legacy_chinese_statuses() {
        assert_eq!(normalize_legacy_step("已翻译"), ProcessingStep::Translated);
        assert_eq!(normalize_legacy_step("unknown_value"), ProcessingStep::Uploaded);
    }
}
