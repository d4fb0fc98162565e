use crate::command::store::cache::{CacheBackend, CacheError};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
struct LocalEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// In-process cache with per-key expiry, for development and tests.
#[derive(Clone, Debug, Default)]
pub struct LocalCache {
    entries: Arc<Mutex<HashMap<String, LocalEntry>>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = LocalEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };

        let mut entries = self.entries.lock().await;

        let now = Instant::now();

        entries.retain(|_, existing| !existing.is_expired(now));
        entries.insert(key.to_string(), entry);

        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entry = self.entries.lock().await.remove(key);

        Ok(entry
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);

        Ok(())
    }

    fn box_clone(&self) -> Box<dyn CacheBackend> {
        Box::new(self.clone())
    }
}
