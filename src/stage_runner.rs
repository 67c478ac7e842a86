//! Fan-out/fan-in primitive shared by Stage 1 and Stage 2 (§4.6).
//!
//! Replaces the teacher's `CircuitBreaker`/`RetryExecutor` pair
//! (`resilience.rs`) with the narrower retry-with-backoff behaviour the
//! spec actually calls for: no circuit breaker, since a single stage run
//! never outlives one request.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model_client::{ModelClient, ModelError, ModelErrorKind};
use crate::types::RetryPolicy;

/// One unit of work: a model id paired with the prompts to send it.
#[derive(Debug, Clone)]
pub struct StageTask {
    pub model_id: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Ok { text: String, latency_ms: u64 },
    Err { kind: ModelErrorKind, message: String },
    Canceled,
}

/// Runs a batch of `StageTask`s concurrently against a shared
/// `ModelClient`, with a per-task deadline and bounded retry on
/// transient/timeout errors. Results are returned in the same order as
/// the input tasks regardless of completion order.
pub struct StageRunner {
    client: Arc<dyn ModelClient>,
    retry: RetryPolicy,
}

impl StageRunner {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub async fn run_all(
        &self,
        tasks: Vec<StageTask>,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Vec<TaskOutcome> {
        let futures = tasks.into_iter().map(|task| {
            let client = Arc::clone(&self.client);
            let retry = self.retry.clone();
            let cancel = cancel.clone();
            async move { run_one(client, task, deadline, retry, cancel).await }
        });
        join_all(futures).await
    }
}

async fn run_one(
    client: Arc<dyn ModelClient>,
    task: StageTask,
    deadline: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> TaskOutcome {
    let start = tokio::time::Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return TaskOutcome::Canceled;
        }

        let call = client.complete(&task.model_id, &task.system_prompt, &task.user_prompt, deadline);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskOutcome::Canceled,
            result = call => result,
        };

        match outcome {
            Ok(text) => {
                return TaskOutcome::Ok {
                    text,
                    latency_ms: start.elapsed().as_millis() as u64,
                };
            }
            Err(err) => {
                let retryable = matches!(err.kind, ModelErrorKind::Transient | ModelErrorKind::Timeout);
                if !retryable || attempt >= retry.max_attempts {
                    return terminal_error(err);
                }
                warn!(
                    model_id = %task.model_id,
                    attempt,
                    kind = ?err.kind,
                    "retrying model call after error"
                );
                let backoff = backoff_for_attempt(attempt, &retry);
                debug!(model_id = %task.model_id, backoff_ms = backoff.as_millis() as u64, "backing off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TaskOutcome::Canceled,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

fn terminal_error(err: ModelError) -> TaskOutcome {
    TaskOutcome::Err {
        kind: err.kind,
        message: err.message,
    }
}

/// `min(cap, base * 2^(attempt-1))` with full jitter: a uniform random
/// draw between zero and the computed cap.
fn backoff_for_attempt(attempt: u32, retry: &RetryPolicy) -> Duration {
    let exp = retry.backoff_base.as_millis().saturating_mul(1u128 << (attempt - 1).min(20));
    let capped = exp.min(retry.backoff_cap.as_millis());
    let capped = capped as u64;
    if capped == 0 {
        return Duration::from_millis(0);
    }
    let jittered = rand::thread_rng().gen_range(0..=capped);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyClient {
        fail_times: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for FlakyClient {
        async fn complete(
            &self,
            _model_id: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _deadline: Duration,
        ) -> Result<String, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ModelError::transient("flaky"))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    struct PermanentFailClient;

    #[async_trait]
    impl ModelClient for PermanentFailClient {
        async fn complete(
            &self,
            _model_id: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _deadline: Duration,
        ) -> Result<String, ModelError> {
            Err(ModelError::permanent("nope"))
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let client = Arc::new(FlakyClient {
            fail_times: 2,
            calls: AtomicUsize::new(0),
        });
        let runner = StageRunner::new(client, RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        });
        let tasks = vec![StageTask {
            model_id: "m".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "usr".to_string(),
        }];
        let results = runner.run_all(tasks, Duration::from_secs(1), CancellationToken::new()).await;
        assert!(matches!(results[0], TaskOutcome::Ok { .. }));
    }

    #[tokio::test]
    async fn permanent_errors_never_retry() {
        let client = Arc::new(PermanentFailClient);
        let runner = StageRunner::new(client, RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        });
        let tasks = vec![StageTask {
            model_id: "m".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "usr".to_string(),
        }];
        let results = runner.run_all(tasks, Duration::from_secs(1), CancellationToken::new()).await;
        assert!(matches!(results[0], TaskOutcome::Err { kind: ModelErrorKind::Permanent, .. }));
    }

    #[tokio::test]
    async fn order_preserved_across_concurrent_tasks() {
        let client = Arc::new(FlakyClient {
            fail_times: 0,
            calls: AtomicUsize::new(0),
        });
        let runner = StageRunner::new(client, RetryPolicy::default());
        let tasks: Vec<StageTask> = (0..5)
            .map(|i| StageTask {
                model_id: format!("m{i}"),
                system_prompt: "sys".to_string(),
                user_prompt: "usr".to_string(),
            })
            .collect();
        let results = runner.run_all(tasks, Duration::from_secs(1), CancellationToken::new()).await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| matches!(r, TaskOutcome::Ok { .. })));
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let client = Arc::new(FlakyClient {
            fail_times: 0,
            calls: AtomicUsize::new(0),
        });
        let runner = StageRunner::new(client, RetryPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let tasks = vec![StageTask {
            model_id: "m".to_string(),
            system_prompt: "sys".to_string(),
            user_prompt: "usr".to_string(),
        }];
        let results = runner.run_all(tasks, Duration::from_secs(1), cancel).await;
        assert!(matches!(results[0], TaskOutcome::Canceled));
    }
}
