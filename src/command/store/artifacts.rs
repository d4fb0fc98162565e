use crate::command::store::{
    cache::{Cache, CacheError},
    paths::get_export_path,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::fs::{create_dir_all, metadata, read_dir, remove_file, write};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Csv,
    Pdf,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Csv => "csv",
            ArtifactKind::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Csv => "text/csv; charset=utf-8",
            ArtifactKind::Pdf => "application/pdf",
        }
    }
}

/// What a download key points at.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEntry {
    pub file_path: PathBuf,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
}

/// Metadata returned for a key without consuming it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub download_url: String,
}

/// Returned to callers once an artifact is published.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    pub key: String,
    pub filename: String,
    pub record_count: usize,
    pub download_url: String,
}

pub fn download_url(key: &str) -> String {
    format!("/api/download/{}", key)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Short-lived download keys over the cache, plus the export directory the
/// keyed files live in.
#[derive(Clone)]
pub struct DownloadRegistry {
    cache: Cache,
    export_dir: PathBuf,
    ttl: Duration,
}

impl DownloadRegistry {
    pub fn new(cache: Cache, export_dir: PathBuf, ttl: Duration) -> Self {
        Self {
            cache,
            export_dir,
            ttl,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn new_key() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn cache_key(key: &str) -> Option<String> {
        is_valid_key(key).then(|| format!("download:{}", key))
    }

    pub async fn register(&self, key: &str, entry: &DownloadEntry) -> Result<(), ArtifactError> {
        let Some(cache_key) = Self::cache_key(key) else {
            return Ok(());
        };

        self.cache
            .set_json(&cache_key, entry, Some(self.ttl))
            .await?;

        Ok(())
    }

    pub async fn info(&self, key: &str) -> Result<Option<DownloadEntry>, ArtifactError> {
        let Some(cache_key) = Self::cache_key(key) else {
            return Ok(None);
        };

        Ok(self.cache.get_json(&cache_key).await?)
    }

    /// Consume a key. Only one caller ever receives the entry.
    pub async fn claim(&self, key: &str) -> Result<Option<DownloadEntry>, ArtifactError> {
        let Some(cache_key) = Self::cache_key(key) else {
            return Ok(None);
        };

        Ok(self.cache.take_json(&cache_key).await?)
    }

    /// Write an artifact to the export directory and register a key for it.
    pub async fn publish(
        &self,
        data: Vec<u8>,
        kind: ArtifactKind,
        filename: &str,
        record_count: usize,
    ) -> Result<DownloadLink, ArtifactError> {
        let key = Self::new_key();

        create_dir_all(&self.export_dir).await?;

        let file_path = get_export_path(&self.export_dir, &key, kind.extension());

        write(&file_path, data).await?;

        let entry = DownloadEntry {
            file_path: file_path.clone(),
            filename: filename.to_string(),
            kind,
            generated_at: Utc::now(),
            record_count,
        };

        if let Err(err) = self.register(&key, &entry).await {
            if let Err(err) = remove_file(&file_path).await {
                warn!("download |> failed to remove {}: {}", file_path.display(), err);
            }

            return Err(err);
        }

        info!("download |> published {} as {}", filename, key);

        Ok(DownloadLink {
            download_url: download_url(&key),
            key,
            filename: filename.to_string(),
            record_count,
        })
    }
}

/// Remove `path` when it is a file at least `max_age` old. A file that is
/// already gone counts as not removed.
async fn prune_file(path: &Path, now: SystemTime, max_age: Duration) -> std::io::Result<bool> {
    let metadata = match metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if !metadata.is_file() {
        return Ok(false);
    }

    let age = metadata
        .modified()
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .unwrap_or_default();

    if age < max_age {
        return Ok(false);
    }

    match remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Remove export files older than `max_age`. These are artifacts whose keys
/// expired without being claimed.
pub async fn prune_exports(export_dir: &Path, max_age: Duration) -> Result<usize, std::io::Error> {
    if !export_dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();

    let mut entries = read_dir(export_dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        match prune_file(&path, now, max_age).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => warn!("download |> failed to prune {}: {}", path.display(), err),
        }
    }

    if removed > 0 {
        info!("download |> pruned {} expired artifacts", removed);
    }

    Ok(removed)
}
