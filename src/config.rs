//! Environment-variable configuration surface (SPEC_FULL.md §3.1).
//!
//! Grounded in the teacher crate's `CouncilConfig::default()` pattern
//! (`council/src/lib.rs`), generalized to read from the process
//! environment instead of being hardcoded, and loaded via `dotenvy` the
//! way the broader teacher workspace's binaries do.

use std::env;
use std::time::Duration;

use crate::error::{CouncilError, CouncilResult};
use crate::roles::Role;
use crate::types::{CouncilConfig, CouncilMember, RetryPolicy};

const DEFAULT_MAX_PROMPT_BYTES: usize = 16 * 1024;
const DEFAULT_STAGE1_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STAGE2_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STAGE3_TIMEOUT_MS: u64 = 45_000;
const DEFAULT_TITLE_TIMEOUT_MS: u64 = 8_000;

const ROLE_ROTATION: [Role; 4] = [Role::Builder, Role::Skeptic, Role::Minimalist, Role::Auditor];

/// Raw environment-sourced configuration, validated before being turned
/// into a `CouncilConfig`.
#[derive(Debug, Clone)]
pub struct CouncilEnvConfig {
    pub models: Vec<String>,
    pub chairman_model: String,
    pub adjudicator_model: Option<String>,
    pub api_key: String,
    pub max_prompt_bytes: usize,
    pub stage1_timeout_ms: u64,
    pub stage2_timeout_ms: u64,
    pub stage3_timeout_ms: u64,
    pub title_timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl CouncilEnvConfig {
    /// Load from the process environment. Loads a `.env` file first, if
    /// present, without overriding already-set variables.
    pub fn from_env() -> CouncilResult<Self> {
        let _ = dotenvy::dotenv();

        let models_raw = require_var("COUNCIL_MODELS")?;
        let models: Vec<String> = models_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if models.is_empty() {
            return Err(CouncilError::ConfigMissing(
                "COUNCIL_MODELS must list at least one model id".to_string(),
            ));
        }

        let chairman_model = require_var("CHAIRMAN_MODEL")?;
        let adjudicator_model = env::var("ADJUDICATOR_MODEL").ok().filter(|s| !s.is_empty());
        let api_key = require_var("MODEL_API_KEY")?;

        let max_prompt_bytes = optional_usize("MAX_PROMPT_BYTES", DEFAULT_MAX_PROMPT_BYTES)?;
        let stage1_timeout_ms = optional_u64("STAGE1_TIMEOUT_MS", DEFAULT_STAGE1_TIMEOUT_MS)?;
        let stage2_timeout_ms = optional_u64("STAGE2_TIMEOUT_MS", DEFAULT_STAGE2_TIMEOUT_MS)?;
        let stage3_timeout_ms = optional_u64("STAGE3_TIMEOUT_MS", DEFAULT_STAGE3_TIMEOUT_MS)?;
        let title_timeout_ms = optional_u64("TITLE_TIMEOUT_MS", DEFAULT_TITLE_TIMEOUT_MS)?;

        let retry = RetryPolicy {
            max_attempts: optional_u64("RETRY_MAX_ATTEMPTS", 3)? as u32,
            backoff_base: Duration::from_millis(optional_u64("RETRY_BACKOFF_BASE_MS", 200)?),
            backoff_cap: Duration::from_millis(optional_u64("RETRY_BACKOFF_CAP_MS", 5_000)?),
        };

        Ok(Self {
            models,
            chairman_model,
            adjudicator_model,
            api_key,
            max_prompt_bytes,
            stage1_timeout_ms,
            stage2_timeout_ms,
            stage3_timeout_ms,
            title_timeout_ms,
            retry,
        })
    }

    /// Assign council roles to models round-robin over
    /// `{Builder, Skeptic, Minimalist, Auditor}` in the order the models
    /// were listed, and turn the whole thing into a validated
    /// `CouncilConfig`.
    pub fn into_council_config(self) -> CouncilResult<CouncilConfig> {
        let council = self
            .models
            .iter()
            .enumerate()
            .map(|(i, model_id)| CouncilMember {
                model_id: model_id.clone(),
                role: ROLE_ROTATION[i % ROLE_ROTATION.len()],
            })
            .collect();

        let config = CouncilConfig {
            council,
            chairman_model_id: self.chairman_model,
            adjudicator_model_id: self.adjudicator_model,
            stage1_timeout: Duration::from_millis(self.stage1_timeout_ms),
            stage2_timeout: Duration::from_millis(self.stage2_timeout_ms),
            stage3_timeout: Duration::from_millis(self.stage3_timeout_ms),
            title_timeout: Duration::from_millis(self.title_timeout_ms),
            max_prompt_bytes: self.max_prompt_bytes,
            retry: self.retry,
        };
        config.validate()?;
        Ok(config)
    }
}

fn require_var(name: &str) -> CouncilResult<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CouncilError::ConfigMissing(name.to_string()))
}

fn optional_usize(name: &str, default: usize) -> CouncilResult<usize> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| CouncilError::ConfigMissing(format!("{name} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}

fn optional_u64(name: &str, default: u64) -> CouncilResult<u64> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| CouncilError::ConfigMissing(format!("{name} must be a non-negative integer"))),
        Err(_) => Ok(default),
    }
}
