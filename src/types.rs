//! Core data model shared by every component (§3 of the spec).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CouncilError, CouncilResult};
use crate::roles::Role;

/// Labels are bounded to single uppercase letters; `N > 26` is rejected
/// explicitly rather than guessed at (§9 open question).
pub const MAX_LABELS: usize = 26;

/// An opaque, size-bounded user prompt. Construction is the only place the
/// byte-limit invariant is enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(text: impl Into<String>, max_bytes: usize) -> CouncilResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CouncilError::PromptTooLarge {
                limit: max_bytes,
                actual: 0,
            });
        }
        let actual = text.len();
        if actual > max_bytes {
            return Err(CouncilError::PromptTooLarge {
                limit: max_bytes,
                actual,
            });
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One council member: a model id paired with the role it plays in Stage 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilMember {
    pub model_id: String,
    pub role: Role,
}

/// Bounded retry policy shared by every `StageRunner` call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

/// Process-wide, validated run configuration (§3 `CouncilConfig`).
#[derive(Debug, Clone)]
pub struct CouncilConfig {
    pub council: Vec<CouncilMember>,
    pub chairman_model_id: String,
    pub adjudicator_model_id: Option<String>,
    pub stage1_timeout: Duration,
    pub stage2_timeout: Duration,
    pub stage3_timeout: Duration,
    pub title_timeout: Duration,
    pub max_prompt_bytes: usize,
    pub retry: RetryPolicy,
}

impl CouncilConfig {
    pub fn validate(&self) -> CouncilResult<()> {
        if self.council.is_empty() {
            return Err(CouncilError::ConfigMissing(
                "council must have at least one member".to_string(),
            ));
        }
        if self.council.len() > MAX_LABELS {
            return Err(CouncilError::ConfigMissing(format!(
                "council of {} exceeds the supported label set of {}",
                self.council.len(),
                MAX_LABELS
            )));
        }
        if self.chairman_model_id.trim().is_empty() {
            return Err(CouncilError::ConfigMissing(
                "chairman_model_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One council member's Stage-1 output. Immutable once constructed;
/// produced exactly once per council member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage1Answer {
    pub model_id: String,
    pub role: Role,
    pub text: Option<String>,
    pub error: Option<StageErrorInfo>,
    pub latency_ms: u64,
}

impl Stage1Answer {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Why a judge's ranking could not be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    EmptyText,
    LineCount,
    Placeholder,
    RankingInvalid,
    ModelError,
    Timeout,
}

/// Per-label critique extracted from a judge's raw text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub strength: String,
    pub flaw: String,
    pub evidence_tokens: Vec<String>,
    pub evidence_ok: bool,
    pub placeholder: bool,
}

/// One Stage-2 judge's parsed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub model_id: String,
    pub raw_text: String,
    pub ranking_text: String,
    pub parsed_ranking: Vec<char>,
    pub per_label_critiques: BTreeMap<char, Critique>,
    pub partial: bool,
    pub partial_reason: Option<PartialReason>,
    pub format_fix_used: bool,
    pub coerced: bool,
    pub adjudicator: bool,
}

impl Judgement {
    /// Fraction of this judge's labels whose critique carried evidence that
    /// is verifiably present in the corresponding Stage-1 text.
    pub fn evidence_ok_ratio(&self) -> f64 {
        if self.per_label_critiques.is_empty() {
            return 0.0;
        }
        let ok = self
            .per_label_critiques
            .values()
            .filter(|c| c.evidence_ok)
            .count();
        ok as f64 / self.per_label_critiques.len() as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub label: char,
    pub reason: String,
    pub dimension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub label: char,
    pub point: String,
    pub reason: String,
}

/// The Chairman's synthesis. An empty/default value (model_id `""`, no
/// base_label) is the well-formed representation of "Stage 3 did not
/// produce a result" — emptiness is the signal, never a placeholder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage3Result {
    pub model_id: String,
    pub text: String,
    pub base_label: Option<char>,
    pub contributors: Vec<Contribution>,
    pub rejections: Vec<Rejection>,
}

impl Stage3Result {
    pub fn is_empty(&self) -> bool {
        self.model_id.is_empty() && self.text.is_empty() && self.base_label.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationRecord {
    pub triggered_reason: String,
    pub result: Judgement,
}

/// The persisted, user-visible audit record (`meta`/`metadata`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub label_to_model: BTreeMap<char, String>,
    pub aggregate_rankings: BTreeMap<char, f64>,
    pub model_roles: BTreeMap<String, Role>,
    pub errors: Vec<String>,
    pub top1_consensus: Option<char>,
    pub evidence_ok_rate: f64,
    pub partial_rate: f64,
    pub adjudication: Option<AdjudicationRecord>,
}

/// The stable, five-field assistant message shape (§6).
#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub stage1: Vec<Stage1Answer>,
    pub stage2: Vec<Judgement>,
    pub stage3: Stage3Result,
    pub meta: DecisionTrace,
    pub metadata: DecisionTrace,
}

impl AssistantMessage {
    pub fn new(
        stage1: Vec<Stage1Answer>,
        stage2: Vec<Judgement>,
        stage3: Stage3Result,
        trace: DecisionTrace,
    ) -> Self {
        Self {
            role: "assistant",
            stage1,
            stage2,
            stage3,
            meta: trace.clone(),
            metadata: trace,
        }
    }
}
