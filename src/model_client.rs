//! The single external abstraction over the upstream model gateway.
//!
//! Mirrors the teacher crate's single-method inference trait
//! (`CoreMlInvoker`), generalized from one hardcoded CoreML path to any
//! named model. The trait has exactly one operation by design (§9 of the
//! spec): no retry, no batching, no state. Retry and fan-out live one layer
//! up in `StageRunner`.

use std::time::Duration;

use async_trait::async_trait;

/// Classification of a failed model call. Only `Transient` and `Timeout`
/// are retryable by `StageRunner`; `Permanent` never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    Transient,
    Permanent,
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: ModelErrorKind::Timeout,
            message: "deadline exceeded".to_string(),
        }
    }
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Issue one prompt to one named model and return its text, or a
/// classified error. Implementations MUST honour `deadline` themselves —
/// `complete` must not block past it.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        deadline: Duration,
    ) -> Result<String, ModelError>;
}
