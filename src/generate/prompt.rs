//! Prompt construction
//!
//! Serializes a sanitized change set plus grouping policy into a
//! deterministic payload: same input, same bytes. The payload is bounded;
//! exceeding the limit is a validation error and nothing is sent.

use super::prompts::COMMIT_GROUPING_SYSTEM;
use crate::error::GenerateError;
use crate::sanitize::SanitizedRecord;

/// Hard upper bound on the full payload (system + user), in characters.
pub const MAX_PROMPT_CHARS: usize = 60_000;

/// Per-file diff text budget inside the payload.
const PER_FILE_DIFF_CHARS: usize = 4_000;

/// At most this many redaction warnings are shown in the privacy notice.
const MAX_PRIVACY_SAMPLES: usize = 5;

/// A ready-to-send instruction payload.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: &'static str,
    pub user: String,
}

impl Prompt {
    pub fn char_count(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

/// Build the generation prompt from a sanitized change set.
///
/// Emits a privacy-disclosure notice on stderr when the sanitizer altered
/// any file's content, so the user knows redaction happened before anything
/// left the machine.
pub fn build_prompt(sanitized: &[SanitizedRecord]) -> Result<Prompt, GenerateError> {
    disclose_redactions(sanitized);

    let mut user = String::from("Group these changed files into logical commits.\n\nFILES:\n");
    for record in sanitized {
        user.push_str(&format!(
            "\n### {} ({}, +{} -{})\n```diff\n{}\n```\n",
            record.placeholder,
            status_label(record),
            record.additions,
            record.deletions,
            truncate_content(&record.content, PER_FILE_DIFF_CHARS)
        ));
    }

    let prompt = Prompt {
        system: COMMIT_GROUPING_SYSTEM,
        user,
    };

    let chars = prompt.char_count();
    if chars > MAX_PROMPT_CHARS {
        return Err(GenerateError::Validation(format!(
            "prompt is {} characters (limit {}); reduce the change set",
            chars, MAX_PROMPT_CHARS
        )));
    }

    Ok(prompt)
}

fn status_label(record: &SanitizedRecord) -> &'static str {
    if record.is_new {
        "new"
    } else if record.is_deleted {
        "deleted"
    } else if record.is_renamed {
        "renamed"
    } else {
        "modified"
    }
}

fn disclose_redactions(sanitized: &[SanitizedRecord]) {
    let warnings: Vec<&String> = sanitized
        .iter()
        .filter(|r| r.modified)
        .flat_map(|r| r.warnings.iter())
        .collect();
    if warnings.is_empty() {
        return;
    }

    eprintln!(
        "  Privacy: {} redaction(s) applied before sending:",
        warnings.len()
    );
    for warning in warnings.iter().take(MAX_PRIVACY_SAMPLES) {
        eprintln!("    - {}", warning);
    }
    if warnings.len() > MAX_PRIVACY_SAMPLES {
        eprintln!("    ... and {} more", warnings.len() - MAX_PRIVACY_SAMPLES);
    }
}

/// Truncate diff text for prompt safety, keeping the beginning and end.
fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let head: String = content.chars().take(max_chars / 2).collect();
    let tail_rev: String = content.chars().rev().take(max_chars / 2).collect();
    let tail: String = tail_rev.chars().rev().collect();
    format!("{}\n\n... [truncated] ...\n\n{}", head, tail)
}
