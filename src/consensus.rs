//! Aggregates Stage-2 judgements into the scalar signals that drive
//! adjudication and the decision trace (§4.4).

use std::collections::BTreeMap;

use crate::types::Judgement;

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusMetrics {
    pub top1_consensus: Option<char>,
    pub top1_support: f64,
    pub aggregate_rank: BTreeMap<char, f64>,
    pub partial_rate: f64,
    pub evidence_ok_rate: f64,
    pub divergence_extreme: bool,
}

/// Score a full set of Stage-2 judgements against the known label set.
/// `labels` must be sorted ascending; it is the tie-break order for
/// `top1_consensus` and the fallback order when no judgement is usable.
pub fn score(judgements: &[Judgement], labels: &[char]) -> ConsensusMetrics {
    let total = judgements.len().max(1);
    let non_partial: Vec<&Judgement> = judgements.iter().filter(|j| !j.partial).collect();

    let evidence_ok_rate = if judgements.is_empty() {
        0.0
    } else {
        judgements.iter().map(Judgement::evidence_ok_ratio).sum::<f64>() / judgements.len() as f64
    };
    let partial_rate = (judgements.len() - non_partial.len()) as f64 / total as f64;

    if non_partial.is_empty() {
        return ConsensusMetrics {
            top1_consensus: None,
            top1_support: 0.0,
            aggregate_rank: BTreeMap::new(),
            partial_rate,
            evidence_ok_rate,
            divergence_extreme: true,
        };
    }

    let mut top1_counts: BTreeMap<char, usize> = labels.iter().map(|&l| (l, 0)).collect();
    for j in &non_partial {
        if let Some(&first) = j.parsed_ranking.first() {
            *top1_counts.entry(first).or_insert(0) += 1;
        }
    }
    let max_count = top1_counts.values().copied().max().unwrap_or(0);
    let top1_consensus = top1_counts
        .iter()
        .filter(|(_, &count)| count == max_count)
        .map(|(&label, _)| label)
        .min(); // lexicographic tie-break

    let top1_support = max_count as f64 / non_partial.len() as f64;

    let mut position_sums: BTreeMap<char, f64> = BTreeMap::new();
    let mut position_counts: BTreeMap<char, usize> = BTreeMap::new();
    for j in &non_partial {
        for (idx, &label) in j.parsed_ranking.iter().enumerate() {
            *position_sums.entry(label).or_insert(0.0) += (idx + 1) as f64;
            *position_counts.entry(label).or_insert(0) += 1;
        }
    }
    let aggregate_rank: BTreeMap<char, f64> = labels
        .iter()
        .map(|&label| {
            let sum = position_sums.get(&label).copied().unwrap_or(0.0);
            let count = position_counts.get(&label).copied().unwrap_or(0);
            let mean = if count == 0 { 0.0 } else { sum / count as f64 };
            (label, mean)
        })
        .collect();

    // No two judges share the same top-1 pick; vacuously true when there is
    // at most one non-partial judgement to compare.
    let divergence_extreme = max_count <= 1;

    ConsensusMetrics {
        top1_consensus,
        top1_support,
        aggregate_rank,
        partial_rate,
        evidence_ok_rate,
        divergence_extreme,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Critique, PartialReason};
    use std::collections::BTreeMap as Map;

    fn judgement(ranking: &[char], partial: bool) -> Judgement {
        Judgement {
            model_id: "m".to_string(),
            raw_text: String::new(),
            ranking_text: String::new(),
            parsed_ranking: ranking.to_vec(),
            per_label_critiques: Map::new(),
            partial,
            partial_reason: if partial { Some(PartialReason::RankingInvalid) } else { None },
            format_fix_used: false,
            coerced: false,
            adjudicator: false,
        }
    }

    fn judgement_with_evidence(ranking: &[char], evidence_ok: bool) -> Judgement {
        let mut j = judgement(ranking, false);
        for &label in ranking {
            j.per_label_critiques.insert(
                label,
                Critique {
                    strength: "s".into(),
                    flaw: "f".into(),
                    evidence_tokens: vec![],
                    evidence_ok,
                    placeholder: false,
                },
            );
        }
        j
    }

    #[test]
    fn unanimous_top1_has_full_support_and_no_divergence() {
        let labels = vec!['A', 'B', 'C'];
        let js = vec![
            judgement(&['A', 'B', 'C'], false),
            judgement(&['A', 'C', 'B'], false),
            judgement(&['A', 'B', 'C'], false),
        ];
        let m = score(&js, &labels);
        assert_eq!(m.top1_consensus, Some('A'));
        assert_eq!(m.top1_support, 1.0);
        assert!(!m.divergence_extreme);
    }

    #[test]
    fn two_one_one_split_does_not_trigger_extreme_divergence() {
        let labels = vec!['A', 'B', 'C', 'D'];
        let js = vec![
            judgement(&['A', 'B', 'C', 'D'], false),
            judgement(&['A', 'C', 'B', 'D'], false),
            judgement(&['B', 'A', 'C', 'D'], false),
            judgement(&['C', 'A', 'B', 'D'], false),
        ];
        let m = score(&js, &labels);
        assert_eq!(m.top1_consensus, Some('A'));
        assert!((m.top1_support - 0.5).abs() < f64::EPSILON);
        assert!(!m.divergence_extreme);
    }

    #[test]
    fn all_partial_yields_undefined_consensus() {
        let labels = vec!['A', 'B'];
        let js = vec![judgement(&[], true), judgement(&[], true)];
        let m = score(&js, &labels);
        assert_eq!(m.top1_consensus, None);
        assert_eq!(m.top1_support, 0.0);
        assert!(m.divergence_extreme);
        assert_eq!(m.partial_rate, 1.0);
    }

    #[test]
    fn tie_break_is_lexicographic() {
        let labels = vec!['A', 'B'];
        let js = vec![judgement(&['A', 'B'], false), judgement(&['B', 'A'], false)];
        let m = score(&js, &labels);
        assert_eq!(m.top1_consensus, Some('A'));
        assert!(m.divergence_extreme);
    }

    #[test]
    fn evidence_ok_rate_averages_across_all_judgements_including_partial() {
        let labels = vec!['A'];
        let js = vec![
            judgement_with_evidence(&['A'], true),
            judgement(&[], true), // no critiques -> ratio 0.0
        ];
        let m = score(&js, &labels);
        assert!((m.evidence_ok_rate - 0.5).abs() < f64::EPSILON);
    }
}
