//! Parsing of Generated Text
//!
//! Every structured shape the tutor expects back from the generation provider
//! is parsed here, in pure functions with no network dependency. The grammars:
//!
//! - Explanations: three `[SECTION:<name>]` headers, each followed by the
//!   section body, in presentation order (definition, technical, examples).
//! - Evaluations: line-prefixed `VERDICT:`, `JUSTIFICATION:`, `CORRECTION:`
//!   fields; an absent or unrecognized verdict grades as wrong.
//! - Keyword lists: a JSON array of strings, optionally wrapped in a Markdown
//!   code fence.
//! - Classifications: a single keyword located anywhere in the reply.
//!
//! Anything that does not fit its grammar returns `None` (or the documented
//! default for classifications) so the call site can substitute its fallback.

use crate::generation::{Evaluation, Explanation, Intent, Relevance, Verdict};

/// Splits a structured explanation into its three sections.
///
/// Returns `None` when fewer than three `[SECTION:...]` blocks are present.
/// Extra sections beyond the first three are folded into the examples block.
pub fn split_sections(text: &str) -> Option<Explanation> {
    let mut sections: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("[SECTION:") {
            if rest.contains(']') {
                if let Some(done) = current.take() {
                    sections.push(done);
                }
                current = Some(String::new());
                continue;
            }
        }
        if let Some(body) = current.as_mut() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        }
    }
    if let Some(done) = current.take() {
        sections.push(done);
    }

    let mut sections: Vec<String> = sections
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sections.len() < 3 {
        return None;
    }
    let examples = sections.split_off(2).join("\n\n");
    let technical = sections.pop().unwrap_or_default();
    let definition = sections.pop().unwrap_or_default();
    Some(Explanation {
        definition,
        technical,
        examples,
    })
}

/// Extracts the verdict block from a grading reply.
///
/// Missing fields default to empty; a missing correction falls back to the
/// justification; a missing or unknown verdict defaults to [`Verdict::Wrong`].
pub fn parse_evaluation(text: &str) -> Evaluation {
    let mut verdict = Verdict::Wrong;
    let mut justification = String::new();
    let mut correction = String::new();

    for line in text.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        if let Some(rest) = field_after(line, &upper, "VERDICT:") {
            verdict = match rest.to_uppercase().as_str() {
                "CORRECT" => Verdict::Correct,
                "PARTIAL" => Verdict::Partial,
                _ => Verdict::Wrong,
            };
        } else if let Some(rest) = field_after(line, &upper, "JUSTIFICATION:") {
            justification = rest.to_string();
        } else if let Some(rest) = field_after(line, &upper, "CORRECTION:") {
            correction = rest.to_string();
        }
    }

    if correction.is_empty() {
        correction = justification.clone();
    }
    Evaluation {
        verdict,
        justification,
        correction,
    }
}

fn field_after<'a>(line: &'a str, upper: &str, prefix: &str) -> Option<&'a str> {
    if upper.starts_with(prefix) {
        Some(line[prefix.len()..].trim())
    } else {
        None
    }
}

/// Parses a keyword list: a JSON array of strings, lowercased.
///
/// Tolerates a surrounding Markdown code fence. Returns `None` for anything
/// that is not a non-empty array of non-empty strings.
pub fn parse_keywords(text: &str) -> Option<Vec<String>> {
    let body = strip_code_fence(text.trim());
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let items = value.as_array()?;
    let keywords: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if keywords.is_empty() || keywords.len() != items.len() {
        return None;
    }
    Some(keywords)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .trim_end()
        .trim_end_matches("```")
        .trim()
}

/// Classifies the student's intent from the provider's one-word reply.
/// Unrecognized replies default to [`Intent::Other`].
pub fn parse_intent(text: &str) -> Intent {
    let upper = text.to_uppercase();
    if upper.contains("ASKING_QUESTION") {
        Intent::AskingQuestion
    } else if upper.contains("ACKNOWLEDGEMENT") {
        Intent::Acknowledgement
    } else {
        Intent::Other
    }
}

/// Classifies relevance from the provider's one-word reply.
/// Unrecognized replies default to [`Relevance::Irrelevant`].
pub fn parse_relevance(text: &str) -> Relevance {
    let upper = text.trim().to_uppercase();
    // "IRRELEVANT" contains "RELEVANT", so the negative case is checked first.
    if upper.contains("IRRELEVANT") {
        Relevance::Irrelevant
    } else if upper.contains("RELEVANT") {
        Relevance::Relevant
    } else {
        Relevance::Irrelevant
    }
}
