//! Commit message generation pipeline
//!
//! The public entry point wires the orchestration core together:
//! cache lookup → in-flight dedup → prompt build → retry with model
//! fallback → parse/validate. Callers construct one [`CommitGenerator`] at
//! startup and pass it around; there are no global singletons.

pub mod client;
pub mod models;
pub mod parse;
pub mod prompt;
pub mod prompts;
pub mod retry;

use crate::batch::{Batcher, DEFAULT_BATCH_WINDOW};
use crate::cache::{cache_key, SuggestionCache};
use crate::diff::{self, ChangeRecord};
use crate::error::GenerateError;
use crate::sanitize::{should_skip, Sanitizer};
use client::GenerationEndpoint;
use models::FALLBACK_MODEL;
use retry::{INITIAL_RETRY_DELAY, MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One candidate commit message with the files it covers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    /// 3-20 words by policy.
    pub message: String,
    pub description: Option<String>,
    /// Optional classification tag (e.g. "fallback" for synthesized messages).
    pub tag: Option<String>,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// A set of files proposed to share one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitGroup {
    /// Ordered, unique file paths. Across a response, every input file
    /// appears in exactly one group.
    pub files: Vec<PathBuf>,
    pub suggestion: Suggestion,
}

/// The validated, total-coverage result returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCommitResponse {
    pub groups: Vec<CommitGroup>,
    /// Token/cost accounting from the upstream call. `None` on cache hits
    /// and locally synthesized responses.
    pub usage: Option<models::Usage>,
}

impl AggregatedCommitResponse {
    pub fn all_files(&self) -> Vec<&PathBuf> {
        self.groups.iter().flat_map(|g| g.files.iter()).collect()
    }
}

/// Orchestrates the full pipeline. The fallback model gets exactly one
/// extra attempt after primary retries exhaust.
pub struct CommitGenerator<C: GenerationEndpoint + 'static> {
    client: Arc<C>,
    cache: Arc<SuggestionCache>,
    sanitizer: Sanitizer,
    batcher: Batcher<AggregatedCommitResponse, GenerateError>,
    model: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<C: GenerationEndpoint + 'static> CommitGenerator<C> {
    pub fn new(client: C, cache: Arc<SuggestionCache>, model: String) -> Self {
        Self {
            client: Arc::new(client),
            cache,
            sanitizer: Sanitizer::new(),
            batcher: Batcher::new(),
            model,
            max_attempts: MAX_ATTEMPTS,
            retry_delay: INITIAL_RETRY_DELAY,
        }
    }

    /// Override retry pacing (tests shrink the delays).
    pub fn with_retry_policy(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = delay;
        self
    }

    /// Generate grouped commit messages for a change set.
    ///
    /// Always returns a response covering every input file, except when the
    /// input itself fails validation or both model tiers fail outright.
    pub async fn generate(
        &self,
        records: &[ChangeRecord],
        base_dir: &Path,
    ) -> Result<AggregatedCommitResponse, GenerateError> {
        diff::validate_records(records)?;

        // Files the sanitizer refuses to send are withheld up front and
        // re-attached as fallback groups at the end.
        let mut sendable = Vec::new();
        let mut withheld = Vec::new();
        for record in records {
            let decision = should_skip(&record.path, &record.content);
            if decision.skip {
                if let Some(reason) = &decision.reason {
                    eprintln!(
                        "  Withholding {} from the model: {}",
                        record.path.display(),
                        reason
                    );
                }
                withheld.push(record.clone());
            } else {
                sendable.push(record.clone());
            }
        }

        if sendable.is_empty() {
            // Nothing can be sent upstream; synthesize locally.
            return Ok(parse::fallback_response(records));
        }

        let key = cache_key(&sendable);

        let mut response = match self.lookup_cached(&key, &sendable) {
            Some(hit) => hit,
            None => {
                let response = self
                    .generate_uncached(key.clone(), sendable.clone(), base_dir.to_path_buf())
                    .await?;
                self.store_cached(&key, &response);
                response
            }
        };

        for record in &withheld {
            response.groups.push(parse::fallback_group(record));
        }
        Ok(response)
    }

    async fn generate_uncached(
        &self,
        key: String,
        records: Vec<ChangeRecord>,
        base_dir: PathBuf,
    ) -> Result<AggregatedCommitResponse, GenerateError> {
        let client = Arc::clone(&self.client);
        let sanitized = self.sanitizer.sanitize_all(&records, &base_dir);
        let prompt = prompt::build_prompt(&sanitized)?;
        let model = self.model.clone();
        let max_attempts = self.max_attempts;
        let retry_delay = self.retry_delay;
        let budget = request_timeout(&records);

        self.batcher
            .batch(
                &key,
                move || async move {
                    let primary = retry::with_retry(max_attempts, retry_delay, |_attempt| {
                        call_with_timeout(&*client, &model, &prompt, budget)
                    })
                    .await;

                    let reply = match primary {
                        Ok(reply) => reply,
                        Err(err) if err.is_retryable() => {
                            // One shot with the fallback model; its failure
                            // is the caller's hard error.
                            call_with_timeout(&*client, FALLBACK_MODEL, &prompt, budget).await?
                        }
                        Err(err) => return Err(err),
                    };

                    let mut response = parse::parse_response(&reply.content, &records, &sanitized);
                    response.usage = reply.usage;
                    Ok(response)
                },
                DEFAULT_BATCH_WINDOW,
            )
            .await
    }

    fn lookup_cached(
        &self,
        key: &str,
        records: &[ChangeRecord],
    ) -> Option<AggregatedCommitResponse> {
        let suggestions = self.cache.get(key)?;
        rebuild_groups(&suggestions, records)
    }

    fn store_cached(&self, key: &str, response: &AggregatedCommitResponse) {
        let suggestions: Vec<Suggestion> = response
            .groups
            .iter()
            .map(|g| {
                let mut s = g.suggestion.clone();
                // Encode coverage in the tag sidecar so a hit can rebuild
                // the grouping. See `rebuild_groups`.
                s.tag = Some(encode_sidecar(&g.files, g.suggestion.tag.as_deref()));
                s
            })
            .collect();
        self.cache.set(key, &suggestions);
    }

    /// Current cache statistics, for `--stats`.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }
}

const FILES_TAG_PREFIX: &str = "files:";

/// Encode a group's file coverage plus its original tag into the sidecar
/// field. Paths are joined with U+001F and the original tag follows a
/// U+001E; both are control characters assumed never to appear in paths.
fn encode_sidecar(files: &[PathBuf], original_tag: Option<&str>) -> String {
    let joined: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    let mut encoded = format!("{}{}", FILES_TAG_PREFIX, joined.join("\u{1f}"));
    if let Some(tag) = original_tag {
        encoded.push('\u{1e}');
        encoded.push_str(tag);
    }
    encoded
}

fn decode_sidecar(tag: &str) -> Option<(Vec<PathBuf>, Option<String>)> {
    let rest = tag.strip_prefix(FILES_TAG_PREFIX)?;
    let (files_part, original_tag) = match rest.split_once('\u{1e}') {
        Some((files, tag)) => (files, Some(tag.to_string())),
        None => (rest, None),
    };
    Some((
        files_part.split('\u{1f}').map(PathBuf::from).collect(),
        original_tag,
    ))
}

/// Rebuild a grouped response from cached suggestions. Returns `None` (a
/// miss) when the cached coverage no longer matches the current file set,
/// so a collision or a partial overlap never yields a malformed response.
fn rebuild_groups(
    suggestions: &[Suggestion],
    records: &[ChangeRecord],
) -> Option<AggregatedCommitResponse> {
    let mut expected: Vec<&PathBuf> = records.iter().map(|r| &r.path).collect();
    expected.sort();

    let mut groups = Vec::new();
    let mut covered: Vec<PathBuf> = Vec::new();
    for suggestion in suggestions {
        let (files, original_tag) = decode_sidecar(suggestion.tag.as_deref()?)?;
        covered.extend(files.iter().cloned());
        let mut clean = suggestion.clone();
        clean.tag = original_tag;
        groups.push(CommitGroup {
            files,
            suggestion: clean,
        });
    }

    covered.sort();
    let covered_refs: Vec<&PathBuf> = covered.iter().collect();
    if covered_refs != expected {
        return None;
    }

    Some(AggregatedCommitResponse {
        groups,
        usage: None,
    })
}

async fn call_with_timeout<C: GenerationEndpoint + ?Sized>(
    client: &C,
    model: &str,
    prompt: &prompt::Prompt,
    budget: Duration,
) -> Result<client::LlmReply, GenerateError> {
    match tokio::time::timeout(budget, client.generate(model, prompt.system, &prompt.user)).await {
        Ok(result) => result,
        Err(_) => Err(GenerateError::Timeout(budget.as_secs())),
    }
}

/// Per-request upper bound derived from the payload: file count, changed
/// line totals, and raw diff size all lengthen the budget, clamped to a
/// bounded range.
pub fn request_timeout(records: &[ChangeRecord]) -> Duration {
    let files = records.len() as u64;
    let lines: u64 = records
        .iter()
        .map(|r| (r.additions + r.deletions) as u64)
        .sum();
    let chars: u64 = records
        .iter()
        .map(|r| r.content.chars().count() as u64)
        .sum();
    let secs = 20 + files * 2 + lines / 500 + chars / 10_000;
    Duration::from_secs(secs.clamp(30, 120))
}
