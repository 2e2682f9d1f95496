//! In-memory cache with TTL semantics

use crate::{Cache, KEY_PREFIX};
use async_trait::async_trait;
use dashmap::DashMap;
use eventide_core::{Error, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Stored {
    Bytes(Vec<u8>),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache backed by a concurrent map.
///
/// Expired entries are dropped lazily on access; `purge_expired` exists for
/// the janitor to reclaim memory on idle keys.
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    prefix: String,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_prefix(KEY_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Number of live entries (expired-but-unswept keys included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full = self.full_key(key);
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&full) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(&full);
                return Ok(None);
            }
            let bytes = match &entry.value {
                Stored::Bytes(b) => b.clone(),
                // Counters read back as their decimal rendering
                Stored::Counter(n) => n.to_string().into_bytes(),
            };
            return Ok(Some(bytes));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: Stored::Bytes(value),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.insert(self.full_key(key), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(&self.full_key(key)).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let matcher = glob_to_regex(&self.full_key(pattern))?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !matcher.is_match(key));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(pattern = pattern, removed = removed, "Cache pattern delete");
        }
        Ok(removed)
    }

    async fn increment_by(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let full = self.full_key(key);
        let now = Instant::now();

        let mut entry = self.entries.entry(full).or_insert_with(|| Entry {
            value: Stored::Counter(0),
            expires_at: None,
        });

        // An expired counter restarts from zero with no TTL
        if entry.is_expired(now) {
            entry.value = Stored::Counter(0);
            entry.expires_at = None;
        }

        let current = match entry.value {
            Stored::Counter(n) => n,
            Stored::Bytes(_) => {
                return Err(Error::Cache(format!(
                    "Key '{}' holds a non-counter value",
                    key
                )));
            }
        };

        let next = current + amount;
        entry.value = Stored::Counter(next);

        // TTL only arms on keys that do not carry one yet
        if entry.expires_at.is_none()
            && let Some(t) = ttl
        {
            entry.expires_at = Some(now + t);
        }

        Ok(next)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Translate a glob pattern (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    regex::Regex::new(&expr).map_err(|e| Error::Cache(format!("Invalid glob pattern: {}", e)))
}
