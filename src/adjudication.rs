//! Decides whether the council's judgements warrant a fifth, independent
//! opinion, and builds that opinion's prompt (§4.5).

use crate::consensus::ConsensusMetrics;

const TOP1_SUPPORT_FLOOR: f64 = 0.60;
const EVIDENCE_OK_FLOOR: f64 = 0.75;
const PARTIAL_RATE_CEILING: f64 = 0.10;

/// The rubric dimensions an Adjudicator (and the Chairman) reasons
/// against, in the exact order named by §4.5.
pub const RUBRIC_DIMENSIONS: [&str; 6] = [
    "correctness",
    "completeness",
    "actionability",
    "risk_safety",
    "clarity",
    "contract_compliance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    LowTop1Support,
    LowEvidenceOkRate,
    HighPartialRate,
    ExtremeDivergence,
}

impl TriggerReason {
    /// The exact string form used in the decision trace and assertions.
    pub fn label(&self) -> &'static str {
        match self {
            TriggerReason::LowTop1Support => "top1_support<0.60",
            TriggerReason::LowEvidenceOkRate => "evidence_ok_rate<0.75",
            TriggerReason::HighPartialRate => "partial_rate>0.10",
            TriggerReason::ExtremeDivergence => "divergence_extreme",
        }
    }
}

/// Evaluate the trigger conditions in priority order and return the first
/// that fires. All four are independent OR conditions; order only affects
/// which single reason string gets recorded when more than one is true.
pub fn should_adjudicate(metrics: &ConsensusMetrics) -> Option<TriggerReason> {
    if metrics.top1_support < TOP1_SUPPORT_FLOOR {
        return Some(TriggerReason::LowTop1Support);
    }
    if metrics.evidence_ok_rate < EVIDENCE_OK_FLOOR {
        return Some(TriggerReason::LowEvidenceOkRate);
    }
    if metrics.partial_rate > PARTIAL_RATE_CEILING {
        return Some(TriggerReason::HighPartialRate);
    }
    if metrics.divergence_extreme {
        return Some(TriggerReason::ExtremeDivergence);
    }
    None
}

/// Build the user prompt handed to a Stage-2 Judge: the original request
/// plus the anonymized Stage-1 answers it is ranking.
pub fn build_judge_prompt(original_prompt: &str, public_answers_json: &str) -> String {
    format!(
        "Original request:\n{original_prompt}\n\n\
         Anonymized council responses (JSON array of {{label, text}}):\n{public_answers_json}\n\n\
         Produce your ranking using the required format."
    )
}

/// Build the user prompt handed to the Adjudicator. Unlike a Judge, the
/// Adjudicator is only ever called in because the judges disagreed, so it
/// also receives every judge's rationale and ranking plus the rubric it
/// must reason against (§4.5) — without these it would just be another
/// blind judge, defeating its tie-breaking purpose.
pub fn build_adjudicator_prompt(
    original_prompt: &str,
    public_answers_json: &str,
    stage2_judgements_json: &str,
) -> String {
    format!(
        "Original request:\n{original_prompt}\n\n\
         Anonymized council responses (JSON array of {{label, text}}):\n{public_answers_json}\n\n\
         The council's judges disagreed. Their rationales and rankings:\n{stage2_judgements_json}\n\n\
         Reason explicitly against these rubric dimensions: {}.\n\n\
         Produce your ranking using the required format.",
        RUBRIC_DIMENSIONS.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metrics(top1_support: f64, evidence_ok_rate: f64, partial_rate: f64, divergence_extreme: bool) -> ConsensusMetrics {
        ConsensusMetrics {
            top1_consensus: Some('A'),
            top1_support,
            aggregate_rank: BTreeMap::new(),
            partial_rate,
            evidence_ok_rate,
            divergence_extreme,
        }
    }

    #[test]
    fn healthy_consensus_does_not_trigger() {
        let m = metrics(0.75, 0.9, 0.0, false);
        assert_eq!(should_adjudicate(&m), None);
    }

    #[test]
    fn low_top1_support_triggers() {
        let m = metrics(0.5, 0.9, 0.0, false);
        assert_eq!(should_adjudicate(&m), Some(TriggerReason::LowTop1Support));
        assert_eq!(should_adjudicate(&m).unwrap().label(), "top1_support<0.60");
    }

    #[test]
    fn low_evidence_rate_triggers() {
        let m = metrics(0.9, 0.5, 0.0, false);
        assert_eq!(should_adjudicate(&m), Some(TriggerReason::LowEvidenceOkRate));
    }

    #[test]
    fn high_partial_rate_triggers() {
        let m = metrics(0.9, 0.9, 0.2, false);
        assert_eq!(should_adjudicate(&m), Some(TriggerReason::HighPartialRate));
    }

    #[test]
    fn extreme_divergence_triggers_when_nothing_else_does() {
        let m = metrics(0.9, 0.9, 0.0, true);
        assert_eq!(should_adjudicate(&m), Some(TriggerReason::ExtremeDivergence));
    }

    #[test]
    fn boundary_values_are_not_violations() {
        let m = metrics(0.60, 0.75, 0.10, false);
        assert_eq!(should_adjudicate(&m), None);
    }

    #[test]
    fn adjudicator_prompt_carries_stage2_rationales_and_rubric() {
        let prompt = build_adjudicator_prompt("do the thing", "[{\"label\":\"A\",\"text\":\"x\"}]", "[{\"model_id\":\"m\"}]");
        assert!(prompt.contains("[{\"model_id\":\"m\"}]"));
        for dimension in RUBRIC_DIMENSIONS {
            assert!(prompt.contains(dimension), "missing rubric dimension {dimension}");
        }
    }

    #[test]
    fn judge_prompt_does_not_require_stage2_data() {
        let prompt = build_judge_prompt("do the thing", "[]");
        assert!(prompt.contains("do the thing"));
    }
}
