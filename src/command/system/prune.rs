use crate::command::store::artifacts::prune_exports;
use anyhow::Result;
use std::{path::Path, time::Duration};
use tokio::fs::{create_dir_all, remove_dir_all};
use tracing::info;

pub async fn run(
    export_dir: &Path,
    upload_dir: &Path,
    max_age: Duration,
    all: bool,
    exports: bool,
    uploads: bool,
) -> Result<()> {
    if exports || all {
        info!("Pruning expired exports...");

        let removed = prune_exports(export_dir, max_age)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to prune exports: {}", e))?;

        info!("Removed {} expired exports", removed);
    }

    if uploads || all {
        info!("Pruning uploads...");

        if upload_dir.exists() {
            remove_dir_all(upload_dir)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to remove uploads: {}", e))?;
        }

        create_dir_all(upload_dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create uploads directory: {}", e))?;
    }

    Ok(())
}
