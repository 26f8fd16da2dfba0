//! Short-lived per-alert session state.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Key/value cache with per-entry expiry.
pub trait SessionCache: Send + Sync {
    fn set_with_expiry(&self, key: &str, value: Value, ttl: Duration);

    /// The live value for `key`; expired entries read as absent.
    fn get(&self, key: &str) -> Option<Value>;

    fn delete(&self, key: &str);
}

/// Cache key for an alert's final pipeline state.
pub fn session_key(alert_id: &str) -> String {
    format!("session:{alert_id}")
}

#[derive(Debug)]
struct Entry {
    value: Value,
    /// `None` when the TTL is too large to represent; the entry never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local cache. Expired entries are dropped lazily on read and on
/// every write.
#[derive(Debug, Default)]
pub struct InMemorySessionCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionCache for InMemorySessionCache {
    fn set_with_expiry(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
        debug!(key, ttl_secs = ttl.as_secs(), "Session entry stored");
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        self.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_delete() {
        let cache = InMemorySessionCache::new();
        cache.set_with_expiry("session:a", json!({"step": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("session:a"), Some(json!({"step": 1})));
        cache.delete("session:a");
        assert!(cache.get("session:a").is_none());
    }

    #[test]
    fn test_expired_entry_reads_absent() {
        let cache = InMemorySessionCache::new();
        cache.set_with_expiry("k", json!(1), Duration::ZERO);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let cache = InMemorySessionCache::new();
        cache.set_with_expiry("k", json!("kept"), Duration::from_secs(u64::MAX));
        assert_eq!(cache.get("k"), Some(json!("kept")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_refreshes_value() {
        let cache = InMemorySessionCache::new();
        cache.set_with_expiry("k", json!(1), Duration::from_secs(60));
        cache.set_with_expiry("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_session_key() {
        assert_eq!(session_key("alert-42"), "session:alert-42");
    }
}
