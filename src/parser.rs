//! Response payload parser.
//!
//! Accepts either a structured JSON mapping or free text and produces a
//! canonical `Response`, or a field-keyed list of reasons it couldn't.
//! Pure functions over data, no I/O, never panics on bad input.

use crate::types::{Choice, ItemCode, Principle, Response, RunId};
use serde_json::Value;
use std::collections::HashSet;

/// One rejected field and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub reason: String,
}

/// Hard failure: the payload could not be turned into a canonical
/// `Response` at all.
#[derive(Debug, Clone, Default)]
pub struct ParseError {
    pub issues: Vec<FieldIssue>,
}

impl ParseError {
    fn single(field: &str, reason: &str) -> Self {
        ParseError {
            issues: vec![FieldIssue {
                field: field.to_string(),
                reason: reason.to_string(),
            }],
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{}: {}", issue.field, issue.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Soft issue: the payload was still accepted, but something was
/// coerced, truncated, or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub field: String,
    pub message: String,
}

const MAX_RATIONALE_CHARS: usize = 200;
const MAX_PRINCIPLES: usize = 3;

/// camelCase/snake_case alias table for dynamic payload tolerance
///. Each row is tried in order; the first present key wins.
const FIELD_ALIASES: &[&[&str]] = &[
    &["choice"],
    &["forced_choice", "forcedChoice"],
    &["permissibility"],
    &["confidence"],
    &["principles"],
    &["rationale"],
    &["info_needed", "infoNeeded"],
    &["response_time_ms", "responseTimeMs"],
];

fn lookup<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n))
}

/// Parse a structured response payload into a canonical `Response`.
///
/// `grm_category` and the three judge booleans are not supplied here:
/// they are filled in later by the `Judge` collaborator, so this parser
/// initializes them to the cold-start default (0, false, false, false)
/// pending judging.
pub fn parse_response(
    raw: &Value,
    run_id: RunId,
    item_code: ItemCode,
    axis: crate::types::AxisCode,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(Response, Vec<ParseWarning>), ParseError> {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    let choice_raw = lookup(raw, FIELD_ALIASES[0])
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase());
    let choice = match choice_raw.as_deref().and_then(Choice::parse) {
        Some(c) => c,
        None => {
            issues.push(FieldIssue {
                field: "choice".to_string(),
                reason: "choice_unrecognized".to_string(),
            });
            Choice::A
        }
    };

    let forced_choice = lookup(raw, FIELD_ALIASES[1])
        .and_then(|v| v.as_str())
        .and_then(|s| match s.trim().to_uppercase().as_str() {
            "A" => Some(crate::types::ForcedChoice::A),
            "B" => Some(crate::types::ForcedChoice::B),
            _ => None,
        })
        .unwrap_or_else(|| choice.as_forced());

    let permissibility = match lookup(raw, FIELD_ALIASES[2]).and_then(Value::as_f64) {
        Some(p) if (0.0..=100.0).contains(&p) => p,
        Some(_) => {
            issues.push(FieldIssue {
                field: "permissibility".to_string(),
                reason: "field_out_of_range".to_string(),
            });
            0.0
        }
        None => {
            issues.push(FieldIssue {
                field: "permissibility".to_string(),
                reason: "field_out_of_range".to_string(),
            });
            0.0
        }
    };

    let confidence = match lookup(raw, FIELD_ALIASES[3]).and_then(Value::as_f64) {
        Some(c) if (0.0..=100.0).contains(&c) => c,
        Some(_) => {
            issues.push(FieldIssue {
                field: "confidence".to_string(),
                reason: "field_out_of_range".to_string(),
            });
            0.0
        }
        None => {
            issues.push(FieldIssue {
                field: "confidence".to_string(),
                reason: "field_out_of_range".to_string(),
            });
            0.0
        }
    };

    if !issues.is_empty() {
        return Err(ParseError { issues });
    }

    let principles = parse_principles(lookup(raw, FIELD_ALIASES[4]), &mut warnings);

    let rationale_raw = lookup(raw, FIELD_ALIASES[5])
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let rationale = if rationale_raw.chars().count() > MAX_RATIONALE_CHARS {
        warnings.push(ParseWarning {
            field: "rationale".to_string(),
            message: "truncated to 200 characters".to_string(),
        });
        rationale_raw.chars().take(MAX_RATIONALE_CHARS).collect()
    } else {
        rationale_raw
    };

    let info_needed: Vec<String> = lookup(raw, FIELD_ALIASES[6])
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let response_time_ms = lookup(raw, FIELD_ALIASES[7])
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let response = Response {
        run_id,
        item_code,
        axis,
        choice,
        forced_choice,
        permissibility,
        confidence,
        principles,
        rationale,
        info_needed,
        response_time_ms,
        grm_category: 0,
        mentions_both_poles: false,
        identifies_non_obvious: false,
        recognizes_residue: false,
        submitted_at: now,
    };

    Ok((response, warnings))
}

fn parse_principles(value: Option<&Value>, warnings: &mut Vec<ParseWarning>) -> Vec<Principle> {
    let Some(arr) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in arr {
        let Some(tag) = v.as_str() else { continue };
        let lower = tag.trim().to_lowercase();
        if !seen.insert(lower.clone()) {
            continue;
        }
        match Principle::parse(&lower) {
            Some(p) => {
                if out.len() < MAX_PRINCIPLES {
                    out.push(p);
                }
            }
            None => warnings.push(ParseWarning {
                field: "principles".to_string(),
                message: format!("unknown principle tag `{tag}` kept but excluded from analyses"),
            }),
        }
        if out.len() >= MAX_PRINCIPLES {
            break;
        }
    }
    out
}

/// Best-effort extraction of a choice letter from free text, e.g.
/// "I choose option B because...". Returns `choice_unrecognized` on
/// failure.
pub fn parse_free_text_choice(text: &str) -> Result<Choice, ParseError> {
    let lower = text.to_lowercase();
    let patterns = ["i choose option", "i choose", "option", "my choice is", "choice:"];
    for pat in patterns {
        if let Some(idx) = lower.find(pat) {
            let rest = &lower[idx + pat.len()..];
            for ch in rest.chars() {
                if ch.is_whitespace() || ch == ':' {
                    continue;
                }
                if let Some(c) = Choice::parse(&ch.to_string()) {
                    return Ok(c);
                }
                break;
            }
        }
    }
    Err(ParseError::single("choice", "choice_unrecognized"))
}

/// Look up a field in a dynamic-payload object by any of its aliases.
pub fn lookup_alias<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a Value> {
    lookup(obj, names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AxisCode;
    use serde_json::json;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    #[test]
    fn parses_canonical_payload() {
        let raw = json!({
            "choice": "b",
            "permissibility": 62.0,
            "confidence": 80.0,
            "principles": ["Consequentialist", "care", "care"],
            "rationale": "a".repeat(250),
            "info_needed": ["more context"],
            "response_time_ms": 4200,
        });
        let (resp, warnings) = parse_response(
            &raw,
            RunId::new(),
            ItemCode::from("item-1"),
            AxisCode::from("axis-1"),
            now(),
        )
        .unwrap();

        assert_eq!(resp.choice, Choice::B);
        assert_eq!(resp.forced_choice, crate::types::ForcedChoice::B);
        assert_eq!(resp.principles.len(), 2);
        assert_eq!(resp.rationale.chars().count(), 200);
        assert!(warnings.iter().any(|w| w.field == "rationale"));
    }

    #[test]
    fn rejects_out_of_range_permissibility() {
        let raw = json!({"choice": "A", "permissibility": 250.0, "confidence": 10.0});
        let err = parse_response(
            &raw,
            RunId::new(),
            ItemCode::from("item-1"),
            AxisCode::from("axis-1"),
            now(),
        )
        .unwrap_err();
        assert!(err.issues.iter().any(|i| i.field == "permissibility"));
    }

    #[test]
    fn default_forced_choice_from_primary() {
        let raw = json!({"choice": "C", "permissibility": 10.0, "confidence": 10.0});
        let (resp, _) = parse_response(
            &raw,
            RunId::new(),
            ItemCode::from("item-1"),
            AxisCode::from("axis-1"),
            now(),
        )
        .unwrap();
        assert_eq!(resp.forced_choice, crate::types::ForcedChoice::A);
    }

    #[test]
    fn unknown_principle_kept_as_warning_not_error() {
        let raw = json!({
            "choice": "A", "permissibility": 10.0, "confidence": 10.0,
            "principles": ["utilitarian_plus"],
        });
        let (resp, warnings) = parse_response(
            &raw,
            RunId::new(),
            ItemCode::from("item-1"),
            AxisCode::from("axis-1"),
            now(),
        )
        .unwrap();
        assert!(resp.principles.is_empty());
        assert!(warnings.iter().any(|w| w.message.contains("utilitarian_plus")));
    }

    #[test]
    fn free_text_extraction() {
        assert_eq!(
            parse_free_text_choice("After much thought, I choose option D.").unwrap(),
            Choice::D
        );
        assert!(parse_free_text_choice("I have no idea what to say.").is_err());
    }
}
