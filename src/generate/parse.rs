//! Response parsing and message policy validation
//!
//! The model's output is untrusted free-form text. This module turns it into
//! an [`AggregatedCommitResponse`] that always covers every input file:
//! unknown files are dropped, duplicate claims are resolved first-claim-wins,
//! policy-violating messages are corrected or replaced with deterministic
//! fallbacks, and a total parse failure degrades to one fallback group per
//! file rather than an error.

use super::{AggregatedCommitResponse, CommitGroup, Suggestion};
use crate::diff::ChangeRecord;
use crate::error::GenerateError;
use crate::sanitize::SanitizedRecord;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Confidence assigned to groups synthesized locally (parse failures,
/// unclaimed files, withheld files).
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f64 = 0.7;

const MIN_MESSAGE_WORDS: usize = 3;
const MAX_MESSAGE_WORDS: usize = 20;

/// Corrected scoped-prefix messages shorter than this are rejected outright.
const MIN_CORRECTED_CHARS: usize = 10;

/// Expected wire shape. Anything that doesn't deserialize into this —
/// missing `groups`, wrong types — is a uniform parse failure; we don't
/// probe alternative shapes.
#[derive(Deserialize)]
struct WireResponse {
    groups: Vec<WireGroup>,
}

#[derive(Deserialize)]
struct WireGroup {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse raw model output into a validated, total-coverage response.
///
/// `records` is the original (pre-sanitization) change set; `sanitized` is
/// the position-aligned list that was shown to the model. The two are used
/// to map the model's placeholder names back to real paths and to derive
/// fallback messages from each file's change shape.
pub fn parse_response(
    raw: &str,
    records: &[ChangeRecord],
    sanitized: &[SanitizedRecord],
) -> AggregatedCommitResponse {
    let wire = match parse_wire(raw) {
        Ok(wire) => wire,
        // Unusable output: every input file becomes its own fallback group.
        Err(err) => {
            eprintln!("  Warning: {}; using fallback messages", err);
            return fallback_response(records);
        }
    };

    // Placeholder -> original path, position-aligned with the prompt's
    // file listing.
    let lookup: HashMap<&str, &PathBuf> = sanitized
        .iter()
        .map(|s| (s.placeholder.as_str(), &s.original_path))
        .collect();
    let by_path: HashMap<&PathBuf, &ChangeRecord> =
        records.iter().map(|r| (&r.path, r)).collect();

    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut groups: Vec<CommitGroup> = Vec::new();

    for wire_group in wire.groups {
        let mut files: Vec<PathBuf> = Vec::new();
        for name in &wire_group.files {
            // Unknown names and duplicate claims are silently dropped;
            // the first group to claim a file keeps it.
            let Some(path) = lookup.get(name.trim()) else {
                continue;
            };
            if claimed.insert((*path).clone()) {
                files.push((*path).clone());
            }
        }
        if files.is_empty() {
            continue;
        }

        let first = by_path.get(&files[0]).copied();
        let confidence = wire_group
            .confidence
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);
        let suggestion = match validate_message(&wire_group.message) {
            MessageOutcome::Accepted(message) => Suggestion {
                message,
                description: wire_group.description,
                tag: None,
                confidence,
            },
            MessageOutcome::Rejected => Suggestion {
                message: first
                    .map(fallback_message)
                    .unwrap_or_else(|| "Update project files".to_string()),
                description: wire_group.description,
                tag: Some("fallback".to_string()),
                confidence,
            },
        };

        groups.push(CommitGroup { files, suggestion });
    }

    // Total coverage: any file the model didn't claim becomes a singleton
    // fallback group, in input order.
    for record in records {
        if !claimed.contains(&record.path) {
            groups.push(fallback_group(record));
        }
    }

    AggregatedCommitResponse {
        groups,
        usage: None,
    }
}

/// Parse raw text into the expected wire shape. Missing JSON and shape
/// mismatches are both a uniform `Parse` error; `parse_response` absorbs
/// it at the boundary rather than surfacing it.
fn parse_wire(raw: &str) -> Result<WireResponse, GenerateError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| GenerateError::Parse("no JSON object in model output".to_string()))?;
    serde_json::from_str(json)
        .map_err(|e| GenerateError::Parse(format!("unexpected response shape: {}", e)))
}

/// Response used when the model's output is entirely unusable.
pub fn fallback_response(records: &[ChangeRecord]) -> AggregatedCommitResponse {
    AggregatedCommitResponse {
        groups: records.iter().map(fallback_group).collect(),
        usage: None,
    }
}

/// A singleton group with a deterministic message for one file.
pub fn fallback_group(record: &ChangeRecord) -> CommitGroup {
    CommitGroup {
        files: vec![record.path.clone()],
        suggestion: Suggestion {
            message: fallback_message(record),
            description: None,
            tag: Some("fallback".to_string()),
            confidence: FALLBACK_CONFIDENCE,
        },
    }
}

/// Deterministic message derived from a file's change shape.
pub fn fallback_message(record: &ChangeRecord) -> String {
    let name = record.file_name();
    if record.is_new {
        format!("Add new file {}", name)
    } else if record.is_deleted {
        format!("Remove unused file {}", name)
    } else if record.is_renamed {
        match &record.old_path {
            Some(old) => format!("Rename {} to {}", old.display(), record.path.display()),
            None => format!("Rename and update {}", name),
        }
    } else if record.addition_ratio() > 0.7 {
        format!("Expand functionality in {}", name)
    } else if record.addition_ratio() < 0.3 {
        format!("Clean up and simplify {}", name)
    } else {
        format!("Update implementation of {}", name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  MESSAGE POLICY
// ═══════════════════════════════════════════════════════════════════════════

enum MessageOutcome {
    /// Message passed policy, possibly after prefix correction.
    Accepted(String),
    Rejected,
}

const PREFIX_TOKENS: &[&str] = &[
    "feat:", "fix:", "chore:", "docs:", "style:", "refactor:", "perf:", "test:", "build:", "ci:",
    "revert:", "merge:",
];

fn scoped_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[a-z]+\([^)]*\):\s*").unwrap())
}

/// Validate one message against format policy.
///
/// A scoped conventional-commit prefix (`word(scope):`) is stripped and the
/// remainder capitalized; the correction is kept only if more than
/// `MIN_CORRECTED_CHARS` characters survive. Bare prefix tokens reject the
/// message outright. Whatever survives must land in the 3-20 word range.
fn validate_message(message: &str) -> MessageOutcome {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return MessageOutcome::Rejected;
    }

    let candidate = if let Some(found) = scoped_prefix_re().find(trimmed) {
        let rest = capitalize(trimmed[found.end()..].trim());
        if rest.chars().count() <= MIN_CORRECTED_CHARS {
            return MessageOutcome::Rejected;
        }
        rest
    } else {
        let lower = trimmed.to_lowercase();
        if PREFIX_TOKENS.iter().any(|p| lower.starts_with(p)) {
            return MessageOutcome::Rejected;
        }
        trimmed.to_string()
    };

    let words = candidate.split_whitespace().count();
    if (MIN_MESSAGE_WORDS..=MAX_MESSAGE_WORDS).contains(&words) {
        MessageOutcome::Accepted(candidate)
    } else {
        MessageOutcome::Rejected
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  JSON EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Find the first balanced `{...}` substring, tracking string literals so
/// braces inside quoted values don't break the depth count.
fn extract_json_object(text: &str) -> Option<&str> {
    let clean = strip_markdown_fences(text);
    let start = clean.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in clean[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&clean[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}
