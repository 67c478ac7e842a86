//! Stage-2 contract parser (§4.3). The hardest local algorithm in the
//! system: turns one judge's raw text into a structured `Judgement`,
//! repairing what it safely can and marking the rest `partial`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Critique, Judgement, PartialReason};

const PLACEHOLDER_SENTINEL: &str = "insufficient signal in text";
const MIN_TOKEN_LEN: usize = 4;

static CRITIQUE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)response\s+([A-Za-z]{1,2})\s*:\s*(.*?)(?=response\s+[A-Za-z]{1,2}\s*:|final_ranking\s*:|\z)")
        .unwrap()
});
static STRENGTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)strength\s*:\s*(.*?)(?:;\s*flaw\s*:|\z)").unwrap());
static FLAW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)flaw\s*:\s*(.*)").unwrap());
static FINAL_RANKING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^.*final_ranking\s*:\s*(.*)$").unwrap());
static RANKING_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)response\s+([A-Za-z]{1,2})").unwrap());
static TIE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)response\s+[A-Za-z]{1,2}\s*=").unwrap());
static BACKTICK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());
static DQUOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{3,}").unwrap());

/// Collapse runs of whitespace to single spaces and trim. Used both to
/// normalize judge text before parsing and to normalize Stage-1 text
/// before the evidence substring check, so "contiguous substring" means
/// the same thing on both sides.
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Parse one judge's raw output against the expected label set `labels`
/// (sorted ascending, e.g. `['A','B','C','D']`). `stage1_texts` maps each
/// label to the Stage-1 answer text it stands for, for the evidence rule.
pub fn parse(
    judge_model_id: &str,
    raw_text: &str,
    labels: &[char],
    stage1_texts: &BTreeMap<char, String>,
) -> Judgement {
    let _ = judge_model_id; // caller fills `model_id` on the returned struct
    let trimmed = raw_text.trim();

    if trimmed.is_empty() {
        return empty_judgement(raw_text, PartialReason::EmptyText);
    }

    let expected_lines = labels.len() + 1;
    let lines = non_empty_lines(trimmed);

    // Strict pass: exactly N+1 lines, each critique line addressed to the
    // label at its position, in order.
    let strict = try_strict(&lines, labels);

    let (critique_blocks, ranking_line, format_fix_used) = match strict {
        Some((blocks, ranking)) => (blocks, ranking, false),
        None => {
            // Format-fix pass: regex-scan the whole text regardless of line
            // breaks. Only counts as a fix if it recovers every label's
            // critique plus a FINAL_RANKING line — i.e. only fires when
            // strict parsing would have failed (coercion monotonicity).
            match try_format_fix(trimmed, labels) {
                Some((blocks, ranking)) => (blocks, ranking, true),
                None => {
                    return Judgement {
                        raw_text: raw_text.to_string(),
                        ranking_text: String::new(),
                        parsed_ranking: Vec::new(),
                        per_label_critiques: BTreeMap::new(),
                        partial: true,
                        partial_reason: Some(PartialReason::LineCount),
                        format_fix_used: false,
                        coerced: false,
                        adjudicator: false,
                        model_id: String::new(),
                    };
                }
            }
        }
    };

    let mut critiques: BTreeMap<char, Critique> = BTreeMap::new();
    let mut placeholder_count = 0usize;
    for &label in labels {
        let body = critique_blocks.get(&label).cloned().unwrap_or_default();
        let critique = build_critique(&body, label, stage1_texts);
        if critique.placeholder {
            placeholder_count += 1;
        }
        critiques.insert(label, critique);
    }

    let placeholder_ratio = placeholder_count as f64 / labels.len() as f64;
    let mut partial = false;
    let mut partial_reason = None;
    if placeholder_ratio > 0.25 {
        partial = true;
        partial_reason = Some(PartialReason::Placeholder);
    }

    let (parsed_ranking, coerced) = parse_ranking(&ranking_line, labels);
    if parsed_ranking.is_empty() && !partial {
        partial = true;
        partial_reason = Some(PartialReason::RankingInvalid);
    }

    Judgement {
        model_id: String::new(),
        raw_text: raw_text.to_string(),
        ranking_text: ranking_line,
        parsed_ranking,
        per_label_critiques: critiques,
        partial,
        partial_reason,
        format_fix_used,
        coerced,
        adjudicator: false,
    }
}

/// Build the Judgement for a judge whose call failed before producing any
/// text (model error or timeout) — the parser is never invoked on such
/// text, but this keeps the partial-reason taxonomy centralized.
pub fn judgement_for_model_failure(reason: PartialReason) -> Judgement {
    empty_judgement("", reason)
}

fn empty_judgement(raw_text: &str, reason: PartialReason) -> Judgement {
    Judgement {
        model_id: String::new(),
        raw_text: raw_text.to_string(),
        ranking_text: String::new(),
        parsed_ranking: Vec::new(),
        per_label_critiques: BTreeMap::new(),
        partial: true,
        partial_reason: Some(reason),
        format_fix_used: false,
        coerced: false,
        adjudicator: false,
    }
}

/// Strict line-mode parse: line `i` (0-based) must open with
/// `Response <labels[i]>:` and the last line must be FINAL_RANKING.
fn try_strict(lines: &[&str], labels: &[char]) -> Option<(BTreeMap<char, String>, String)> {
    if lines.len() != labels.len() + 1 {
        return None;
    }
    let mut blocks = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        let line = lines[i];
        let prefix = format!("response {}:", label.to_ascii_lowercase());
        if !line.to_ascii_lowercase().starts_with(&prefix) {
            return None;
        }
        let body = line[prefix.len()..].trim().to_string();
        blocks.insert(label, body);
    }
    let last = lines[labels.len()];
    if !last.to_ascii_lowercase().starts_with("final_ranking:") {
        return None;
    }
    Some((blocks, last.to_string()))
}

/// Format-fix pass: regex-scan the normalized text for every
/// `Response <L>: ...` block up to the next block or FINAL_RANKING, plus
/// the FINAL_RANKING line itself, regardless of how the source wrapped
/// lines.
fn try_format_fix(text: &str, labels: &[char]) -> Option<(BTreeMap<char, String>, String)> {
    let mut blocks = BTreeMap::new();
    for cap in CRITIQUE_BLOCK_RE.captures_iter(text) {
        let label_raw = cap.get(1)?.as_str().to_ascii_uppercase();
        let mut chars = label_raw.chars();
        let label = chars.next()?;
        if chars.next().is_some() {
            continue; // two-letter labels (AA, AB, ...) unsupported (N<=26)
        }
        if !labels.contains(&label) {
            continue;
        }
        let body = normalize_whitespace(cap.get(2)?.as_str());
        blocks.entry(label).or_insert(body);
    }
    if blocks.len() != labels.len() {
        return None;
    }
    let ranking_caps = FINAL_RANKING_RE.captures(text)?;
    let ranking_line = format!("FINAL_RANKING: {}", ranking_caps.get(1)?.as_str().trim());
    Some((blocks, ranking_line))
}

fn build_critique(body: &str, label: char, stage1_texts: &BTreeMap<char, String>) -> Critique {
    let normalized_body = normalize_whitespace(body);
    let placeholder = normalized_body
        .to_ascii_lowercase()
        .contains(PLACEHOLDER_SENTINEL);

    let strength = STRENGTH_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| normalize_whitespace(m.as_str()))
        .unwrap_or_default();
    let flaw = FLAW_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| normalize_whitespace(m.as_str()))
        .unwrap_or_default();

    let mut tokens = extract_tokens(&strength);
    tokens.extend(extract_tokens(&flaw));
    tokens.sort();
    tokens.dedup();

    let source_text = stage1_texts
        .get(&label)
        .map(|t| normalize_whitespace(t))
        .unwrap_or_default();
    let evidence_ok = !placeholder
        && tokens
            .iter()
            .any(|token| !source_text.is_empty() && source_text.contains(token.as_str()));

    Critique {
        strength,
        flaw,
        evidence_tokens: tokens,
        evidence_ok,
        placeholder,
    }
}

/// Deterministic tokenizer: backtick spans, double-quoted spans, and
/// identifier-like tokens of length >= 4 (§4.3 step 5; threshold is a
/// documented choice, not a proven value).
fn extract_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for cap in BACKTICK_RE.captures_iter(text) {
        tokens.push(cap[1].to_string());
    }
    for cap in DQUOTE_RE.captures_iter(text) {
        tokens.push(cap[1].to_string());
    }
    for m in IDENT_RE.find_iter(text) {
        if m.as_str().len() >= MIN_TOKEN_LEN {
            tokens.push(m.as_str().to_string());
        }
    }
    tokens
}

/// Parse the FINAL_RANKING line into an ordered label permutation. Returns
/// `(ranking, coerced)`; an empty `ranking` means parsing failed even after
/// coercion.
fn parse_ranking(ranking_line: &str, labels: &[char]) -> (Vec<char>, bool) {
    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::new();
    for cap in RANKING_TOKEN_RE.captures_iter(ranking_line) {
        let raw = cap[1].to_ascii_uppercase();
        if raw.len() != 1 {
            continue;
        }
        let label = raw.chars().next().unwrap();
        if seen.insert(label) {
            ordered.push(label);
        }
    }

    let is_strict_permutation = !TIE_RE.is_match(ranking_line)
        && ordered.len() == labels.len()
        && ordered.iter().all(|l| labels.contains(l));
    if is_strict_permutation {
        return (ordered, false);
    }

    // Coercion: drop anything not in the known label set, then append any
    // missing labels in alphabetical order.
    let mut coerced: Vec<char> = ordered.into_iter().filter(|l| labels.contains(l)).collect();
    for &label in labels {
        if !coerced.contains(&label) {
            coerced.push(label);
        }
    }
    if coerced.len() == labels.len() {
        (coerced, true)
    } else {
        (Vec::new(), true)
    }
}

/// Reconstruct the canonical 5-line block a non-partial Judgement implies.
/// `parse(serialize(parse(x))) == parse(x)` for any well-formed input
/// (§8's parser-idempotence law).
pub fn serialize_for_reparse(labels: &[char], judgement: &Judgement) -> String {
    let mut lines = Vec::with_capacity(labels.len() + 1);
    for &label in labels {
        let critique = judgement.per_label_critiques.get(&label);
        let (strength, flaw) = critique
            .map(|c| (c.strength.clone(), c.flaw.clone()))
            .unwrap_or_default();
        lines.push(format!("Response {label}: Strength: {strength}; Flaw: {flaw}"));
    }
    let ranking = judgement
        .parsed_ranking
        .iter()
        .map(|l| format!("Response {l}"))
        .collect::<Vec<_>>()
        .join(" > ");
    lines.push(format!("FINAL_RANKING: {ranking}"));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels4() -> Vec<char> {
        vec!['A', 'B', 'C', 'D']
    }

    fn stage1() -> BTreeMap<char, String> {
        let mut m = BTreeMap::new();
        m.insert('A', "uses a HashMap for lookups".to_string());
        m.insert('B', "relies on a sorted Vec and binary search".to_string());
        m.insert('C', "no caching, recomputes every call".to_string());
        m.insert('D', "adds a bloom filter before the HashMap".to_string());
        m
    }

    #[test]
    fn strict_well_formed_block_parses_cleanly() {
        let text = "Response A: Strength: Uses `HashMap` for O(1) lookups; Flaw: No bound check\n\
                     Response B: Strength: Handles sorted input via binary search; Flaw: O(n) insert\n\
                     Response C: Strength: Simple; Flaw: Recomputes every call, slow\n\
                     Response D: Strength: Adds a bloom filter; Flaw: Extra memory\n\
                     FINAL_RANKING: Response B > Response A > Response D > Response C";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(!j.partial);
        assert!(!j.format_fix_used);
        assert!(!j.coerced);
        assert_eq!(j.parsed_ranking, vec!['B', 'A', 'D', 'C']);
        assert!(j.per_label_critiques[&'A'].evidence_ok);
    }

    #[test]
    fn wrapped_lines_trigger_format_fix_not_partial() {
        let text = "Response A: Strength: Uses HashMap; Flaw: none Response B: Strength: sorted Vec; \
                     Flaw: slow insert Response C: Strength: simple; Flaw: recomputes Response D: \
                     Strength: bloom filter; Flaw: memory\n\
                     FINAL_RANKING: Response A > Response B > Response C > Response D";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(j.format_fix_used);
        assert!(!j.partial);
        assert_eq!(j.parsed_ranking, vec!['A', 'B', 'C', 'D']);
    }

    #[test]
    fn placeholder_majority_marks_partial() {
        let text = "Response A: Strength: Insufficient signal in text.; Flaw: Insufficient signal in text.\n\
                     Response B: Strength: Insufficient signal in text.; Flaw: Insufficient signal in text.\n\
                     Response C: Strength: Insufficient signal in text.; Flaw: Insufficient signal in text.\n\
                     Response D: Strength: Handles edge cases; Flaw: verbose\n\
                     FINAL_RANKING: Response D > Response A > Response B > Response C";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(j.partial);
        assert_eq!(j.partial_reason, Some(PartialReason::Placeholder));
    }

    #[test]
    fn unparseable_ranking_is_partial_with_empty_ranking() {
        let text = "Response A: Strength: x; Flaw: y\n\
                     Response B: Strength: x; Flaw: y\n\
                     Response C: Strength: x; Flaw: y\n\
                     Response D: Strength: x; Flaw: y\n\
                     FINAL_RANKING: no idea, pass";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(j.partial);
        assert_eq!(j.partial_reason, Some(PartialReason::RankingInvalid));
        assert!(j.parsed_ranking.is_empty());
    }

    #[test]
    fn missing_label_in_ranking_is_coerced() {
        let text = "Response A: Strength: x; Flaw: y\n\
                     Response B: Strength: x; Flaw: y\n\
                     Response C: Strength: x; Flaw: y\n\
                     Response D: Strength: x; Flaw: y\n\
                     FINAL_RANKING: Response B > Response A > Response D";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(j.coerced);
        assert!(!j.partial);
        assert_eq!(j.parsed_ranking, vec!['B', 'A', 'D', 'C']);
    }

    #[test]
    fn duplicate_label_in_ranking_is_coerced() {
        let text = "Response A: Strength: x; Flaw: y\n\
                     Response B: Strength: x; Flaw: y\n\
                     Response C: Strength: x; Flaw: y\n\
                     Response D: Strength: x; Flaw: y\n\
                     FINAL_RANKING: Response A > Response A > Response B > Response C";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(j.coerced);
        assert_eq!(j.parsed_ranking, vec!['A', 'B', 'C', 'D']);
    }

    #[test]
    fn tie_syntax_is_never_accepted_as_is() {
        let text = "Response A: Strength: x; Flaw: y\n\
                     Response B: Strength: x; Flaw: y\n\
                     Response C: Strength: x; Flaw: y\n\
                     Response D: Strength: x; Flaw: y\n\
                     FINAL_RANKING: Response A = Response B > Response C > Response D";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert!(j.coerced);
    }

    #[test]
    fn empty_text_is_partial() {
        let j = parse("judge-1", "   ", &labels4(), &stage1());
        assert!(j.partial);
        assert_eq!(j.partial_reason, Some(PartialReason::EmptyText));
    }

    #[test]
    fn evidence_failure_yields_zero_ratio() {
        let text = "Response A: Strength: totally unrelated gibberish; Flaw: zyxwvut\n\
                     Response B: Strength: totally unrelated gibberish; Flaw: zyxwvut\n\
                     Response C: Strength: totally unrelated gibberish; Flaw: zyxwvut\n\
                     Response D: Strength: totally unrelated gibberish; Flaw: zyxwvut\n\
                     FINAL_RANKING: Response A > Response B > Response C > Response D";
        let j = parse("judge-1", text, &labels4(), &stage1());
        assert_eq!(j.evidence_ok_ratio(), 0.0);
    }

    #[test]
    fn parser_idempotence_on_well_formed_input() {
        let text = "Response A: Strength: Uses HashMap; Flaw: none\n\
                     Response B: Strength: sorted Vec; Flaw: slow insert\n\
                     Response C: Strength: simple; Flaw: recomputes\n\
                     Response D: Strength: bloom filter; Flaw: memory\n\
                     FINAL_RANKING: Response B > Response A > Response D > Response C";
        let first = parse("judge-1", text, &labels4(), &stage1());
        let roundtrip_text = serialize_for_reparse(&labels4(), &first);
        let second = parse("judge-1", &roundtrip_text, &labels4(), &stage1());
        assert_eq!(first.parsed_ranking, second.parsed_ranking);
        assert_eq!(first.partial, second.partial);
        assert_eq!(first.per_label_critiques.len(), second.per_label_critiques.len());
    }
}
