//! Error taxonomy for the deliberation pipeline.
//!
//! `ConfigMissing` and `PromptTooLarge` are fatal and surface at the
//! boundary before any stage runs. Every other variant is recorded into
//! `DecisionTrace.errors` by the orchestrator and never unwinds a run.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CouncilError {
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    #[error("prompt exceeds maximum size of {limit} bytes (got {actual})")]
    PromptTooLarge { limit: usize, actual: usize },

    #[error("model `{model_id}` transient error: {message}")]
    ModelTransient { model_id: String, message: String },

    #[error("model `{model_id}` permanent error: {message}")]
    ModelPermanent { model_id: String, message: String },

    #[error("model `{model_id}` timed out")]
    ModelTimeout { model_id: String },

    #[error("failed to parse judge `{judge_id}` output: {reason}")]
    ParseFailure { judge_id: String, reason: String },

    #[error("consensus undefined: no non-partial judgements")]
    ConsensusUndefined,

    #[error("conversation store failure: {0}")]
    StoreFailure(String),

    #[error("client disconnected")]
    ClientDisconnected,
}

impl CouncilError {
    /// True for the two boundary errors that must abort before any stage runs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CouncilError::ConfigMissing(_) | CouncilError::PromptTooLarge { .. }
        )
    }
}

pub type CouncilResult<T> = Result<T, CouncilError>;
