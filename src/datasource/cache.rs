//! TTL cache for read-only provider responses.

use crate::config::CacheOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry {
    value: JsonValue,
    inserted_at: Instant,
}

/// Bounded response cache. Values are stored as JSON so one cache serves
/// every response type; the oldest entry is evicted when full.
pub struct ResponseCache {
    ttl: Duration,
    max_size: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_options(options: &CacheOptions) -> Self {
        Self::new(Duration::from_millis(options.ttl), options.max_size)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        let value = entries.get(key)?.value.clone();
        serde_json::from_value(value).ok()
    }

    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        let Ok(value) = serde_json::to_value(value) else {
            return;
        };
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let key = key.into();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
