use chrono::Utc;
use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};

// Export paths

pub fn get_export_path(export_dir: &Path, key: &str, extension: &str) -> PathBuf {
    export_dir.join(key).with_extension(extension)
}

// Upload paths

/// Stored name for an uploaded file: `<unix millis>-<sanitized original>`.
pub fn get_upload_filename(original_name: &str) -> String {
    let name = sanitize(original_name);

    let name = if name.is_empty() {
        "upload".to_string()
    } else {
        name
    };

    format!("{}-{}", Utc::now().timestamp_millis(), name)
}

pub fn get_upload_path(upload_dir: &Path, filename: &str) -> PathBuf {
    upload_dir.join(filename)
}
