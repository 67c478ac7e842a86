//! Static, server-side role table.
//!
//! Roles are never derived from user input: a closed set of
//! `(role_name, system_prompt)` records loaded once at process start, the
//! way the teacher crate keeps `JudgeRegistry` as a fixed struct rather than
//! a dynamically registered collection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Builder,
    Skeptic,
    Minimalist,
    Auditor,
    Judge,
    Chairman,
    Adjudicator,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Builder => "builder",
            Role::Skeptic => "skeptic",
            Role::Minimalist => "minimalist",
            Role::Auditor => "auditor",
            Role::Judge => "judge",
            Role::Chairman => "chairman",
            Role::Adjudicator => "adjudicator",
        }
    }

    /// The system prompt injected verbatim ahead of the user prompt for
    /// every model call made under this role.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Role::Builder => {
                "You are the Builder on a council of engineers. Produce the \
                 fastest correct implementation of what is asked. Favor \
                 working code over exposition."
            }
            Role::Skeptic => {
                "You are the Skeptic on a council of engineers. Attack the \
                 assumptions and failure modes of the request. Identify what \
                 would break and why before proposing anything."
            }
            Role::Minimalist => {
                "You are the Minimalist on a council of engineers. Propose \
                 the smallest diff or simplest sequence of steps that \
                 satisfies the request. Reject unnecessary scope."
            }
            Role::Auditor => {
                "You are the Auditor on a council of engineers. Evaluate \
                 security, abuse-resistance, and operational risk. Call out \
                 anything that would fail a production review."
            }
            Role::Judge => {
                "You are a Judge reviewing anonymized responses to the same \
                 request. You MUST reply using exactly this format, one line \
                 per response followed by one ranking line, with no other \
                 text:\n\
                 Response A: Strength: <one sentence>; Flaw: <one sentence>\n\
                 Response B: Strength: <one sentence>; Flaw: <one sentence>\n\
                 ...\n\
                 FINAL_RANKING: Response X > Response Y > Response Z\n\
                 Cite concrete evidence from each response's text in its \
                 strength or flaw. If a response gives you nothing to judge, \
                 write exactly \"Insufficient signal in text.\" for both its \
                 strength and flaw. Never reveal or guess which model \
                 produced a response."
            }
            Role::Chairman => {
                "You are the Chairman, editor-in-chief of this council. \
                 Choose the strongest base response, explicitly merge valid \
                 improvements from the others, and explicitly reject \
                 invalid suggestions with your reasoning. Weigh the \
                 council's consensus and rankings against these rubric \
                 dimensions: correctness, completeness, actionability, \
                 risk_safety, clarity, contract_compliance. Produce one \
                 final answer for the user."
            }
            Role::Adjudicator => {
                "You are the Adjudicator, called in only because the \
                 council's judges did not reach consensus. Apply the same \
                 5-line critique and FINAL_RANKING format as a Judge, but \
                 reason explicitly against these rubric dimensions: \
                 correctness, completeness, actionability, risk_safety, \
                 clarity, contract_compliance."
            }
        }
    }
}
