//! Ties every component together into the seven-step deliberation
//! pipeline (§4.7): validate, Stage 1 fan-out, anonymize, Stage 2
//! fan-out + consensus + optional adjudication, Stage 3 synthesis,
//! title, persist, stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adjudication::{build_adjudicator_prompt, build_judge_prompt, should_adjudicate, RUBRIC_DIMENSIONS};
use crate::anonymizer::LabelMap;
use crate::consensus::{self, ConsensusMetrics};
use crate::error::{CouncilError, CouncilResult};
use crate::events::{Event, EventSink};
use crate::model_client::ModelClient;
use crate::ranking_parser;
use crate::roles::Role;
use crate::stage_runner::{StageRunner, StageTask, TaskOutcome};
use crate::store::ConversationStore;
use crate::title;
use crate::types::{
    AdjudicationRecord, AssistantMessage, Contribution, CouncilConfig, DecisionTrace, Judgement,
    PartialReason, Prompt, Rejection, Stage1Answer, Stage3Result, StageErrorInfo,
};

pub struct Orchestrator {
    config: CouncilConfig,
    model_client: Arc<dyn ModelClient>,
    runner: StageRunner,
    store: Arc<dyn ConversationStore>,
}

impl Orchestrator {
    pub fn new(
        config: CouncilConfig,
        model_client: Arc<dyn ModelClient>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let runner = StageRunner::new(Arc::clone(&model_client), config.retry.clone());
        Self {
            config,
            model_client,
            runner,
            store,
        }
    }

    #[instrument(skip(self, sink, cancel), fields(conversation_id = %conversation_id))]
    pub async fn run(
        &self,
        raw_prompt: &str,
        conversation_id: Uuid,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> CouncilResult<AssistantMessage> {
        // Once the client disconnects we stop trying to deliver further
        // events, but the run itself keeps going: the trace still has to
        // be computed and persisted (§4.8, §8 "client disconnects after
        // stage2_complete -> run completes, trace persisted").
        let mut connected = true;

        let prompt = match Prompt::new(raw_prompt, self.config.max_prompt_bytes) {
            Ok(p) => p,
            Err(err) => {
                self.emit(&sink, &cancel, &mut connected, Event::Error { message: err.to_string() }).await;
                return Err(err);
            }
        };

        let mut errors: Vec<String> = Vec::new();

        self.emit(&sink, &cancel, &mut connected, Event::Stage1Start).await;
        let stage1_answers = self.run_stage1(prompt.as_str(), &cancel).await;
        for answer in &stage1_answers {
            if let Some(err) = &answer.error {
                errors.push(format!("stage1:{}: {}", answer.model_id, err.message));
            }
        }
        self.emit(
            &sink,
            &cancel,
            &mut connected,
            Event::Stage1Complete { data: stage1_answers.clone() },
        )
        .await;

        let label_map = LabelMap::build(&stage1_answers)?;
        let labels = label_map.labels();
        let public_answers = label_map.to_public(&stage1_answers);
        let public_answers_json = serde_json::to_string(&public_answers)
            .map_err(|e| CouncilError::StoreFailure(e.to_string()))?;
        let stage1_texts: BTreeMap<char, String> =
            public_answers.iter().map(|a| (a.label, a.text.clone())).collect();

        if label_map.is_empty() {
            warn!("no council member produced a usable Stage 1 answer; continuing with a degraded response");
        }

        self.emit(&sink, &cancel, &mut connected, Event::Stage2Start).await;
        let mut judgements = if label_map.is_empty() {
            Vec::new()
        } else {
            self.run_stage2(prompt.as_str(), &public_answers_json, &labels, &stage1_texts, &cancel)
                .await
        };
        for j in &judgements {
            if let Some(reason) = j.partial_reason {
                if matches!(reason, PartialReason::ModelError | PartialReason::Timeout) {
                    errors.push(format!("stage2:{}: {:?}", j.model_id, reason));
                }
            }
        }

        let mut metrics = consensus::score(&judgements, &labels);
        let mut adjudication_record = None;
        if !label_map.is_empty() {
            if let Some(reason) = should_adjudicate(&metrics) {
                if let Some(adjudicator_model) = self.config.adjudicator_model_id.clone() {
                    if let Some(mut verdict) = self
                        .run_adjudicator(
                            &adjudicator_model,
                            prompt.as_str(),
                            &public_answers_json,
                            &judgements,
                            &labels,
                            &stage1_texts,
                            &cancel,
                        )
                        .await
                    {
                        verdict.adjudicator = true;
                        judgements.push(verdict.clone());
                        metrics = consensus::score(&judgements, &labels);
                        adjudication_record = Some(AdjudicationRecord {
                            triggered_reason: reason.label().to_string(),
                            result: verdict,
                        });
                    } else {
                        errors.push(format!("adjudication:{adjudicator_model}: call failed"));
                    }
                } else {
                    warn!(reason = reason.label(), "adjudication triggered but no adjudicator configured");
                }
            }
        }

        let model_roles: BTreeMap<String, Role> = self
            .config
            .council
            .iter()
            .map(|m| (m.model_id.clone(), m.role))
            .collect();

        let trace_so_far = DecisionTrace {
            label_to_model: label_map.as_map(),
            aggregate_rankings: metrics.aggregate_rank.clone(),
            model_roles: model_roles.clone(),
            errors: errors.clone(),
            top1_consensus: metrics.top1_consensus,
            evidence_ok_rate: metrics.evidence_ok_rate,
            partial_rate: metrics.partial_rate,
            adjudication: adjudication_record.clone(),
        };
        self.emit(
            &sink,
            &cancel,
            &mut connected,
            Event::Stage2Complete {
                data: judgements.clone(),
                metadata: trace_so_far,
            },
        )
        .await;

        self.emit(&sink, &cancel, &mut connected, Event::Stage3Start).await;
        let stage3 = if label_map.is_empty() {
            Stage3Result::default()
        } else {
            self.run_stage3(prompt.as_str(), &public_answers_json, &judgements, &metrics, &labels, &cancel)
                .await
        };
        if !label_map.is_empty() && stage3.is_empty() {
            errors.push(format!("stage3:{}: call failed", self.config.chairman_model_id));
        }
        self.emit(&sink, &cancel, &mut connected, Event::Stage3Complete { data: stage3.clone() }).await;

        let title = title::generate_title(
            Arc::clone(&self.model_client),
            &self.config.chairman_model_id,
            prompt.as_str(),
            self.config.title_timeout,
        )
        .await;
        self.emit(&sink, &cancel, &mut connected, Event::TitleComplete { title }).await;

        let trace = DecisionTrace {
            label_to_model: label_map.as_map(),
            aggregate_rankings: metrics.aggregate_rank,
            model_roles,
            errors,
            top1_consensus: metrics.top1_consensus,
            evidence_ok_rate: metrics.evidence_ok_rate,
            partial_rate: metrics.partial_rate,
            adjudication: adjudication_record,
        };

        let message = AssistantMessage::new(stage1_answers, judgements, stage3, trace);

        let persisted = match serde_json::to_value(&message) {
            Ok(value) => self.store.append_message(conversation_id, value).await,
            Err(e) => Err(crate::store::StoreError::Io(e.to_string())),
        };
        if let Err(err) = persisted {
            let message_text = format!("failed to persist decision trace: {err}");
            warn!(error = %err, "failed to persist decision trace");
            self.emit(&sink, &cancel, &mut connected, Event::Error { message: message_text.clone() }).await;
            return Err(CouncilError::StoreFailure(message_text));
        }

        self.emit(&sink, &cancel, &mut connected, Event::Complete { message: message.clone() }).await;
        info!("deliberation complete");
        Ok(message)
    }

    async fn run_stage1(&self, prompt: &str, cancel: &CancellationToken) -> Vec<Stage1Answer> {
        let tasks: Vec<StageTask> = self
            .config
            .council
            .iter()
            .map(|member| StageTask {
                model_id: member.model_id.clone(),
                system_prompt: member.role.system_prompt().to_string(),
                user_prompt: prompt.to_string(),
            })
            .collect();

        let outcomes = self
            .runner
            .run_all(tasks, self.config.stage1_timeout, cancel.clone())
            .await;

        self.config
            .council
            .iter()
            .zip(outcomes)
            .map(|(member, outcome)| match outcome {
                TaskOutcome::Ok { text, latency_ms } => Stage1Answer {
                    model_id: member.model_id.clone(),
                    role: member.role,
                    text: Some(text),
                    error: None,
                    latency_ms,
                },
                TaskOutcome::Err { kind, message } => Stage1Answer {
                    model_id: member.model_id.clone(),
                    role: member.role,
                    text: None,
                    error: Some(StageErrorInfo {
                        kind: format!("{kind:?}").to_lowercase(),
                        message,
                    }),
                    latency_ms: 0,
                },
                TaskOutcome::Canceled => Stage1Answer {
                    model_id: member.model_id.clone(),
                    role: member.role,
                    text: None,
                    error: Some(StageErrorInfo {
                        kind: "canceled".to_string(),
                        message: "run canceled before completion".to_string(),
                    }),
                    latency_ms: 0,
                },
            })
            .collect()
    }

    async fn run_stage2(
        &self,
        prompt: &str,
        public_answers_json: &str,
        labels: &[char],
        stage1_texts: &BTreeMap<char, String>,
        cancel: &CancellationToken,
    ) -> Vec<Judgement> {
        let judge_prompt = build_judge_prompt(prompt, public_answers_json);
        let tasks: Vec<StageTask> = self
            .config
            .council
            .iter()
            .map(|member| StageTask {
                model_id: member.model_id.clone(),
                system_prompt: Role::Judge.system_prompt().to_string(),
                user_prompt: judge_prompt.clone(),
            })
            .collect();

        let outcomes = self
            .runner
            .run_all(tasks, self.config.stage2_timeout, cancel.clone())
            .await;

        self.config
            .council
            .iter()
            .zip(outcomes)
            .map(|(member, outcome)| match outcome {
                TaskOutcome::Ok { text, .. } => {
                    let mut j = ranking_parser::parse(&member.model_id, &text, labels, stage1_texts);
                    j.model_id = member.model_id.clone();
                    j
                }
                TaskOutcome::Err { .. } => {
                    let mut j = ranking_parser::judgement_for_model_failure(PartialReason::ModelError);
                    j.model_id = member.model_id.clone();
                    j
                }
                TaskOutcome::Canceled => {
                    let mut j = ranking_parser::judgement_for_model_failure(PartialReason::Timeout);
                    j.model_id = member.model_id.clone();
                    j
                }
            })
            .collect()
    }

    async fn run_adjudicator(
        &self,
        adjudicator_model: &str,
        prompt: &str,
        public_answers_json: &str,
        stage2_judgements: &[Judgement],
        labels: &[char],
        stage1_texts: &BTreeMap<char, String>,
        cancel: &CancellationToken,
    ) -> Option<Judgement> {
        let judgements_json = serde_json::to_string(stage2_judgements).unwrap_or_default();
        let task = StageTask {
            model_id: adjudicator_model.to_string(),
            system_prompt: Role::Adjudicator.system_prompt().to_string(),
            user_prompt: build_adjudicator_prompt(prompt, public_answers_json, &judgements_json),
        };
        let outcomes = self
            .runner
            .run_all(vec![task], self.config.stage2_timeout, cancel.clone())
            .await;
        match outcomes.into_iter().next()? {
            TaskOutcome::Ok { text, .. } => {
                Some(ranking_parser::parse(adjudicator_model, &text, labels, stage1_texts))
            }
            _ => None,
        }
    }

    async fn run_stage3(
        &self,
        prompt: &str,
        public_answers_json: &str,
        judgements: &[Judgement],
        metrics: &ConsensusMetrics,
        labels: &[char],
        cancel: &CancellationToken,
    ) -> Stage3Result {
        let judgements_json = serde_json::to_string(judgements).unwrap_or_default();
        let aggregate_ranks_json = serde_json::to_string(&metrics.aggregate_rank).unwrap_or_default();
        let base_label = metrics.top1_consensus.or_else(|| labels.first().copied());
        let user_prompt = format!(
            "Original request:\n{prompt}\n\n\
             Anonymized council responses:\n{public_answers_json}\n\n\
             Judge rankings and critiques:\n{judgements_json}\n\n\
             Consensus base response: {}\n\
             Aggregate ranks (mean position per label, lower is better): {aggregate_ranks_json}\n\n\
             Reason explicitly against these rubric dimensions: {}.\n\n\
             Synthesize one final answer for the user.",
            base_label.map(|l| format!("Response {l}")).unwrap_or_else(|| "none".to_string()),
            RUBRIC_DIMENSIONS.join(", "),
        );
        let task = StageTask {
            model_id: self.config.chairman_model_id.clone(),
            system_prompt: Role::Chairman.system_prompt().to_string(),
            user_prompt,
        };
        let outcomes = self
            .runner
            .run_all(vec![task], self.config.stage3_timeout, cancel.clone())
            .await;

        match outcomes.into_iter().next() {
            Some(TaskOutcome::Ok { text, .. }) => Stage3Result {
                model_id: self.config.chairman_model_id.clone(),
                text,
                base_label,
                contributors: Vec::<Contribution>::new(),
                rejections: Vec::<Rejection>::new(),
            },
            _ => Stage3Result::default(),
        }
    }

    /// Emit one event if the client is still connected. A failed delivery
    /// trips `cancel` (so in-flight and future model calls short-circuit)
    /// and marks the client as disconnected so later calls skip emitting
    /// — but never interrupts the orchestration itself, since the trace
    /// must still be assembled and persisted (§4.8, §5).
    async fn emit(&self, sink: &Arc<dyn EventSink>, cancel: &CancellationToken, connected: &mut bool, event: Event) {
        if !*connected {
            return;
        }
        if !sink.emit(event).await {
            *connected = false;
            cancel.cancel();
        }
    }
}
