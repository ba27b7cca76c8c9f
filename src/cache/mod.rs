//! Suggestion cache for comet
//!
//! Persists generated commit suggestions keyed by a digest of the change set,
//! so identical or near-identical diffs never re-query the model.
//!
//! # Error Handling
//!
//! Cache operations are designed to be best-effort. Durable-tier failures
//! (missing directory, corrupt file, serialization error) degrade to a cache
//! miss or a no-op write because:
//! - Cache failure is recoverable (suggestions will be regenerated)
//! - We never want a cache problem to fail a generation request
//!
//! This is a design rule, not an accident: `get` returns `Option`, `set`
//! swallows and logs persist failures.

use crate::diff::ChangeRecord;
use crate::error::GenerateError;
use crate::generate::Suggestion;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Bump when `CacheEntry` changes shape; mismatched entries are discarded.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Durable entries older than this are treated as absent.
const RETENTION_DAYS: i64 = 7;

/// Serialized entries larger than this are zstd-compressed on disk.
const COMPRESSION_THRESHOLD_BYTES: usize = 1024;

const ZSTD_LEVEL: i32 = 3;
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

// ═══════════════════════════════════════════════════════════════════════════
//  CACHE KEY - content-addressed digest of a change set
// ═══════════════════════════════════════════════════════════════════════════

/// Derive a stable 16-hex-character key for a set of change records.
///
/// The digest covers a sorted per-file composite of path, addition and
/// deletion counts, the add/del ratio rounded to two decimals, and a
/// whitespace-normalized hash of the diff text. Sorting by path makes the key
/// identical across permutations of the input; normalizing whitespace makes
/// formatting-only diffs hit the same entry.
///
/// Collisions are possible at truncated-SHA-256 probability and are not
/// guarded against; a collision serves a wrong cached suggestion set.
pub fn cache_key(records: &[ChangeRecord]) -> String {
    let mut parts: Vec<String> = records
        .iter()
        .map(|r| {
            format!(
                "{}|{}|{}|{:.2}|{}",
                r.path.display(),
                r.additions,
                r.deletions,
                r.addition_ratio(),
                content_digest(&r.content)
            )
        })
        .collect();
    parts.sort();

    let mut hasher = Sha256::new();
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

/// Digest of diff content with consecutive whitespace collapsed, so
/// indentation and line-ending churn doesn't defeat the cache.
fn content_digest(content: &str) -> String {
    let mut normalized = String::with_capacity(content.len());
    let mut in_whitespace = false;
    for c in content.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                normalized.push(' ');
                in_whitespace = true;
            }
        } else {
            normalized.push(c);
            in_whitespace = false;
        }
    }
    let digest = Sha256::digest(normalized.trim().as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

// ═══════════════════════════════════════════════════════════════════════════
//  TIERED CACHE - in-memory tier over a one-file-per-key durable tier
// ═══════════════════════════════════════════════════════════════════════════

/// A cached suggestion set with the metadata needed to judge validity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub suggestions: Vec<Suggestion>,
    pub created_at: DateTime<Utc>,
    pub version: u32,
    /// Whether the durable copy of this entry was written compressed.
    pub compressed: bool,
}

impl CacheEntry {
    fn new(suggestions: Vec<Suggestion>) -> Self {
        Self {
            suggestions,
            created_at: Utc::now(),
            version: CACHE_FORMAT_VERSION,
            compressed: false,
        }
    }

    fn is_valid(&self) -> bool {
        if self.version != CACHE_FORMAT_VERSION {
            return false;
        }
        let age = Utc::now().signed_duration_since(self.created_at);
        age < Duration::days(RETENTION_DAYS)
    }
}

/// Hit/miss counters accumulated since construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Entries currently resident in the memory tier.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Two-tier suggestion cache.
///
/// Constructed once at startup and passed by reference to consumers; there is
/// no global instance. The memory tier is process-local; the durable tier is
/// one file per key under the user cache directory. No cross-process locking
/// is taken on the durable tier — two processes racing on the same key do
/// last-write-wins, acceptable for an optimization-only store.
pub struct SuggestionCache {
    dir: PathBuf,
    memory: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SuggestionCache {
    /// Cache rooted at the standard per-user location
    /// (e.g. `~/.cache/comet/suggestions`).
    pub fn new() -> Self {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("comet")
            .join("suggestions");
        Self::with_dir(dir)
    }

    /// Cache rooted at an explicit directory (used by tests).
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            dir,
            memory: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a suggestion set. Memory tier first; on miss, the durable
    /// tier, validating format version and age. A valid durable hit is
    /// promoted into the memory tier. Never errors: any durable-tier problem
    /// is a miss.
    pub fn get(&self, key: &str) -> Option<Vec<Suggestion>> {
        {
            let memory = self.memory.lock().unwrap();
            if let Some(entry) = memory.get(key) {
                if entry.is_valid() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.suggestions.clone());
                }
            }
        }

        match self.read_durable(key) {
            Some(entry) if entry.is_valid() => {
                let suggestions = entry.suggestions.clone();
                self.memory
                    .lock()
                    .unwrap()
                    .insert(key.to_string(), entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(suggestions)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a suggestion set in both tiers. The durable write is
    /// best-effort: failures are logged and swallowed.
    pub fn set(&self, key: &str, suggestions: &[Suggestion]) {
        let mut entry = CacheEntry::new(suggestions.to_vec());

        if let Err(err) = self.write_durable(key, &mut entry) {
            eprintln!("  Warning: failed to persist suggestion cache: {}", err);
        }

        self.memory.lock().unwrap().insert(key.to_string(), entry);
    }

    /// Empty the memory tier. The durable tier is deliberately left alone so
    /// it keeps paying off across sessions.
    pub fn clear(&self) {
        self.memory.lock().unwrap().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.memory.lock().unwrap().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Delete durable entries that are expired or format-mismatched.
    /// Returns the number of files removed.
    pub fn prune_expired(&self) -> usize {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let stale = match read_entry_file(&path) {
                Some(entry) => !entry.is_valid(),
                None => true,
            };
            if stale && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn read_durable(&self, key: &str) -> Option<CacheEntry> {
        read_entry_file(&self.entry_path(key))
    }

    /// Durable-tier failures are always `Cache` errors; `set` logs and
    /// swallows them so persistence trouble never fails a generation.
    fn write_durable(&self, key: &str, entry: &mut CacheEntry) -> Result<(), GenerateError> {
        let io_err = |e: std::io::Error| GenerateError::Cache(e.to_string());
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let plain =
            serde_json::to_vec(entry).map_err(|e| GenerateError::Cache(e.to_string()))?;
        let bytes = if plain.len() > COMPRESSION_THRESHOLD_BYTES {
            entry.compressed = true;
            // Re-serialize so the stored flag reflects what's on disk.
            let flagged =
                serde_json::to_vec(entry).map_err(|e| GenerateError::Cache(e.to_string()))?;
            zstd::encode_all(flagged.as_slice(), ZSTD_LEVEL).map_err(io_err)?
        } else {
            plain
        };

        write_atomic(&self.entry_path(key), &bytes).map_err(io_err)
    }
}

impl Default for SuggestionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and decode one durable entry. Compressed entries are detected by the
/// zstd magic number rather than a separate file extension.
fn read_entry_file(path: &Path) -> Option<CacheEntry> {
    let bytes = fs::read(path).ok()?;
    let json = if bytes.starts_with(&ZSTD_MAGIC) {
        zstd::decode_all(bytes.as_slice()).ok()?
    } else {
        bytes
    };
    serde_json::from_slice(&json).ok()
}

/// Write via a temp file + rename so a crash never leaves a torn entry.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, adds: usize, dels: usize, content: &str) -> ChangeRecord {
        ChangeRecord::new(path, adds, dels, content.to_string())
    }

    fn suggestion(message: &str) -> Suggestion {
        Suggestion {
            message: message.to_string(),
            description: None,
            tag: None,
            confidence: 0.9,
        }
    }

    fn test_cache() -> (SuggestionCache, TempDir) {
        let dir = TempDir::new().unwrap();
        (SuggestionCache::with_dir(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn test_key_is_stable_across_permutations() {
        let a = record("src/a.rs", 3, 1, "+foo\n-bar");
        let b = record("src/b.rs", 0, 2, "-baz");
        let c = record("README.md", 5, 0, "+docs");

        let forward = cache_key(&[a.clone(), b.clone(), c.clone()]);
        let backward = cache_key(&[c, b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 16);
    }

    #[test]
    fn test_key_ignores_whitespace_only_changes() {
        let original = record("src/a.rs", 2, 1, "+fn main()  {\n+    body\n}");
        let reflowed = record("src/a.rs", 2, 1, "+fn main() {\n+  body }");
        assert_eq!(cache_key(&[original]), cache_key(&[reflowed]));
    }

    #[test]
    fn test_key_changes_with_content() {
        let a = record("src/a.rs", 1, 0, "+alpha");
        let b = record("src/a.rs", 1, 0, "+beta");
        assert_ne!(cache_key(&[a]), cache_key(&[b]));
    }

    #[test]
    fn test_round_trip() {
        let (cache, _dir) = test_cache();
        let suggestions = vec![suggestion("Add retry logic to the client")];
        cache.set("abc123", &suggestions);

        let loaded = cache.get("abc123").unwrap();
        assert_eq!(loaded[0].message, "Add retry logic to the client");
    }

    #[test]
    fn test_durable_tier_survives_memory_clear() {
        let (cache, _dir) = test_cache();
        cache.set("k", &[suggestion("Update parser error handling")]);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
        // Durable hit, promoted back into memory.
        assert!(cache.get("k").is_some());
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn test_version_mismatch_is_a_miss() {
        let (cache, dir) = test_cache();
        cache.set("k", &[suggestion("Refactor cache module layout")]);
        cache.clear();

        // Rewrite the durable entry with a stale format version.
        let path = dir.path().join("k.json");
        let mut entry: CacheEntry =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        entry.version = CACHE_FORMAT_VERSION - 1;
        fs::write(&path, serde_json::to_vec(&entry).unwrap()).unwrap();

        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let (cache, dir) = test_cache();
        cache.set("k", &[suggestion("Simplify config loading path")]);
        cache.clear();

        let path = dir.path().join("k.json");
        let mut entry: CacheEntry =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        entry.created_at = Utc::now() - Duration::days(RETENTION_DAYS + 1);
        fs::write(&path, serde_json::to_vec(&entry).unwrap()).unwrap();

        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_large_payload_is_compressed_on_disk() {
        let (cache, dir) = test_cache();
        let big: Vec<Suggestion> = (0..50)
            .map(|i| {
                let mut s = suggestion("Extend integration coverage for the generation pipeline");
                s.description = Some(format!("case {}: {}", i, "x".repeat(64)));
                s
            })
            .collect();
        cache.set("big", &big);

        let bytes = fs::read(dir.path().join("big.json")).unwrap();
        assert!(bytes.starts_with(&ZSTD_MAGIC));

        cache.clear();
        let loaded = cache.get("big").unwrap();
        assert_eq!(loaded.len(), 50);
    }

    #[test]
    fn test_persist_failure_is_a_cache_error() {
        let dir = TempDir::new().unwrap();
        // A plain file where the cache directory should be.
        let blocked = dir.path().join("not-a-dir");
        fs::write(&blocked, b"x").unwrap();
        let cache = SuggestionCache::with_dir(blocked);

        let mut entry = CacheEntry::new(vec![suggestion("Persist past a blocked directory")]);
        let err = cache.write_durable("k", &mut entry).unwrap_err();
        assert!(matches!(err, GenerateError::Cache(_)));

        // The public path still lands the entry in the memory tier.
        cache.set("k", &[suggestion("Persist past a blocked directory")]);
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn test_corrupt_durable_entry_is_a_miss() {
        let (cache, dir) = test_cache();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_stats_hit_rate() {
        let (cache, _dir) = test_cache();
        cache.set("k", &[suggestion("Track cache hit rate in stats")]);
        assert!(cache.get("k").is_some());
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_prune_removes_stale_entries() {
        let (cache, dir) = test_cache();
        cache.set("fresh", &[suggestion("Keep fresh entries during pruning")]);

        let stale_path = dir.path().join("stale.json");
        let mut entry = CacheEntry::new(vec![suggestion("Drop stale entries during pruning")]);
        entry.created_at = Utc::now() - Duration::days(RETENTION_DAYS + 3);
        fs::write(&stale_path, serde_json::to_vec(&entry).unwrap()).unwrap();

        assert_eq!(cache.prune_expired(), 1);
        assert!(!stale_path.exists());
        assert!(dir.path().join("fresh.json").exists());
    }
}
