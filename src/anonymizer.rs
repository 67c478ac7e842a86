//! Maps real models to opaque labels for Stage 2, and back for the
//! decision trace. Pure and non-blocking (§5).

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{CouncilError, CouncilResult};
use crate::types::{Stage1Answer, MAX_LABELS};

#[derive(Debug, Clone, Serialize)]
pub struct PublicAnswer {
    pub label: char,
    pub text: String,
}

/// A bijection between `{A, B, C, ...}` and the council models that
/// produced a non-error Stage-1 answer, in council-config index order.
#[derive(Debug, Clone)]
pub struct LabelMap {
    label_to_model: Vec<(char, String)>,
    model_to_label: HashMap<String, char>,
}

impl LabelMap {
    /// Build the map, skipping any answer whose `error` is set. Ordering of
    /// labels follows `answers`' order (the council-config index order).
    pub fn build(answers: &[Stage1Answer]) -> CouncilResult<Self> {
        let non_error: Vec<&Stage1Answer> = answers.iter().filter(|a| !a.is_error()).collect();
        if non_error.len() > MAX_LABELS {
            return Err(CouncilError::ConfigMissing(format!(
                "{} non-errored answers exceed the supported label set of {}",
                non_error.len(),
                MAX_LABELS
            )));
        }
        let mut label_to_model = Vec::with_capacity(non_error.len());
        let mut model_to_label = HashMap::with_capacity(non_error.len());
        for (i, answer) in non_error.into_iter().enumerate() {
            let label = (b'A' + i as u8) as char;
            label_to_model.push((label, answer.model_id.clone()));
            model_to_label.insert(answer.model_id.clone(), label);
        }
        Ok(Self {
            label_to_model,
            model_to_label,
        })
    }

    pub fn label_for(&self, model_id: &str) -> Option<char> {
        self.model_to_label.get(model_id).copied()
    }

    pub fn model_for(&self, label: char) -> Option<&str> {
        self.label_to_model
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, m)| m.as_str())
    }

    /// Labels in deterministic ascending order.
    pub fn labels(&self) -> Vec<char> {
        self.label_to_model.iter().map(|(l, _)| *l).collect()
    }

    pub fn len(&self) -> usize {
        self.label_to_model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_to_model.is_empty()
    }

    pub fn as_map(&self) -> std::collections::BTreeMap<char, String> {
        self.label_to_model.iter().cloned().collect()
    }

    /// Non-error Stage-1 answers rendered without any real model id —
    /// the only view ever handed to a Stage-2 judge prompt.
    pub fn to_public(&self, answers: &[Stage1Answer]) -> Vec<PublicAnswer> {
        let mut by_model: HashMap<&str, &Stage1Answer> = HashMap::new();
        for answer in answers {
            if !answer.is_error() {
                by_model.insert(&answer.model_id, answer);
            }
        }
        self.label_to_model
            .iter()
            .filter_map(|(label, model_id)| {
                by_model.get(model_id.as_str()).map(|answer| PublicAnswer {
                    label: *label,
                    text: answer.text.clone().unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::Role;

    fn answer(model_id: &str, text: Option<&str>, err: bool) -> Stage1Answer {
        Stage1Answer {
            model_id: model_id.to_string(),
            role: Role::Builder,
            text: text.map(|t| t.to_string()),
            error: if err {
                Some(crate::types::StageErrorInfo {
                    kind: "permanent".to_string(),
                    message: "boom".to_string(),
                })
            } else {
                None
            },
            latency_ms: 10,
        }
    }

    #[test]
    fn skips_errored_answers_and_assigns_in_order() {
        let answers = vec![
            answer("gpt", Some("a"), false),
            answer("broken", None, true),
            answer("claude", Some("c"), false),
        ];
        let map = LabelMap::build(&answers).unwrap();
        assert_eq!(map.labels(), vec!['A', 'B']);
        assert_eq!(map.model_for('A'), Some("gpt"));
        assert_eq!(map.model_for('B'), Some("claude"));
        assert_eq!(map.label_for("broken"), None);
    }

    #[test]
    fn to_public_carries_only_label_and_text() {
        let answers = vec![answer("gpt-4o", Some("hello"), false)];
        let map = LabelMap::build(&answers).unwrap();
        let public = map.to_public(&answers);
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].label, 'A');
        assert_eq!(public[0].text, "hello");
        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("gpt-4o"), "PublicAnswer has no model_id field to leak");
    }

    #[test]
    fn rejects_more_than_26_non_error_answers() {
        let answers: Vec<Stage1Answer> = (0..27)
            .map(|i| answer(&format!("m{i}"), Some("x"), false))
            .collect();
        assert!(LabelMap::build(&answers).is_err());
    }
}
