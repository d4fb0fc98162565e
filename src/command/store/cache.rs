use crate::command::store::ServerBackend;
use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use redis::ConnectionInfo;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{future::Future, time::Duration};
use tracing::{info, warn};

mod local;
mod redis_store;

pub use local::LocalCache;
pub use redis_store::RedisCache;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Read and delete `key` in one atomic step.
    async fn take(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Return a new `Box<dyn CacheBackend>` cloned from `self`.
    fn box_clone(&self) -> Box<dyn CacheBackend>;
}

impl Clone for Box<dyn CacheBackend> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// JSON helpers over a `CacheBackend`.
#[derive(Clone)]
pub struct Cache {
    backend: Box<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_string(value)?;

        self.backend.set(key, &value, ttl).await
    }

    /// Read a JSON value. A value that fails to decode reads as absent and
    /// is removed.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(value) = self.backend.get(key).await? else {
            return Ok(None);
        };

        let decoded = decode(key, &value);

        if decoded.is_none() {
            self.backend.delete(key).await?;
        }

        Ok(decoded)
    }

    /// Read a JSON value and delete it atomically.
    pub async fn take_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let value = self.backend.take(key).await?;

        Ok(value.and_then(|value| decode(key, &value)))
    }

    /// Read-through helper: return the cached value for `key`, or run `query`
    /// and cache its result for `ttl`. Cache failures fall back to `query`.
    pub async fn cache_query<T, E, F, Fut>(&self, key: &str, ttl: Duration, query: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get_json::<T>(key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(err) => warn!("cache |> read failed for {}: {}", key, err),
        }

        let result = query().await?;

        if let Err(err) = self.set_json(key, &result, Some(ttl)).await {
            warn!("cache |> write failed for {}: {}", key, err);
        }

        Ok(result)
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Option<T> {
    match serde_json::from_str(value) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("cache |> corrupt value for {}: {}", key, err);
            None
        }
    }
}

/// Cache key for a report: `report:<kind>` with the filters appended as
/// base64 of their sorted `key:value` pairs.
pub fn report_key(kind: &str, filters: Option<&Map<String, Value>>) -> String {
    let base_key = format!("report:{}", kind);

    let Some(filters) = filters else {
        return base_key;
    };

    let mut pairs = filters
        .iter()
        .map(|(key, value)| match value {
            Value::String(value) => format!("{}:{}", key, value),
            value => format!("{}:{}", key, value),
        })
        .collect::<Vec<_>>();

    pairs.sort();

    format!("{}:{}", base_key, STANDARD.encode(pairs.join(",")))
}

pub async fn backend_cache(
    cache_backend: &str,
    connection: &ConnectionInfo,
) -> Result<Box<dyn CacheBackend>> {
    let backend: Box<dyn CacheBackend> = match ServerBackend::from(cache_backend) {
        ServerBackend::Local => Box::new(LocalCache::new()),
        ServerBackend::Redis => Box::new(RedisCache::new(connection.clone()).await?),
        _ => bail!("unknown cache backend: {}", cache_backend),
    };

    info!("cache |> backend: {}", cache_backend);

    Ok(backend)
}
