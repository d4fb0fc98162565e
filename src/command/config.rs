use crate::command::settings::{
    load_file_settings, resolve_settings, save_file_settings, ResolvedSettings, Settings,
};
use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::path::Path;

const MASK: &str = "********";

/// Subcommands for `ikated config`.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Set a value in the project file
    Set {
        /// Setting key (e.g. port, db_host, openai_model)
        key: String,
        /// Value to set
        value: String,
    },
    /// Get a resolved value
    Get {
        /// Setting key
        key: String,
    },
    /// Show every resolved value with its source
    Show,
}

fn check_key(key: &str) -> Result<()> {
    if Settings::field_names().contains(&key) {
        return Ok(());
    }

    Err(anyhow!(
        "unknown setting key '{}'. Valid keys: {}",
        key,
        Settings::field_names().join(", ")
    ))
}

/// Secrets are masked unless empty.
fn display_value(key: &str, value: &str) -> String {
    if Settings::is_secret(key) && !value.is_empty() {
        return MASK.to_string();
    }

    value.to_string()
}

pub fn handle_set(path: &Path, key: &str, value: &str) -> Result<()> {
    check_key(key)?;

    let mut settings = load_file_settings(path)?;

    settings
        .set_by_name(key, value.to_string())
        .map_err(|e| anyhow!("{}", e))?;

    save_file_settings(path, &settings)?;

    println!(
        "Set {} = {} ({})",
        key,
        display_value(key, value),
        path.display()
    );

    Ok(())
}

pub fn handle_get(path: &Path, key: &str) -> Result<()> {
    check_key(key)?;

    let resolved = resolve_settings(path)?;

    let value = resolved
        .get_by_name(key)
        .ok_or_else(|| anyhow!("unknown setting key '{}'", key))?;

    println!(
        "{} = {} ({})",
        key,
        display_value(key, &value.value),
        value.source
    );

    Ok(())
}

/// Rows of `(key, value, source)` with secrets masked.
fn rows(resolved: &ResolvedSettings) -> Vec<(&'static str, String, String)> {
    resolved
        .iter()
        .map(|(key, value)| {
            (
                key,
                display_value(key, &value.value),
                value.source.to_string(),
            )
        })
        .collect()
}

pub fn handle_show(path: &Path) -> Result<()> {
    let resolved = resolve_settings(path)?;

    let rows = rows(&resolved);

    let header_key = "KEY";
    let header_value = "VALUE";
    let header_source = "SOURCE";

    let key_width = rows
        .iter()
        .map(|(k, _, _)| k.len())
        .max()
        .unwrap_or(0)
        .max(header_key.len());
    let value_width = rows
        .iter()
        .map(|(_, v, _)| v.len())
        .max()
        .unwrap_or(0)
        .max(header_value.len());
    let source_width = rows
        .iter()
        .map(|(_, _, s)| s.len())
        .max()
        .unwrap_or(0)
        .max(header_source.len());

    println!(
        "{:<key_width$}  {:<value_width$}  {:<source_width$}",
        header_key, header_value, header_source,
    );
    println!(
        "{:<key_width$}  {:<value_width$}  {:<source_width$}",
        "-".repeat(key_width),
        "-".repeat(value_width),
        "-".repeat(source_width),
    );

    for (key, value, source) in &rows {
        println!(
            "{:<key_width$}  {:<value_width$}  {:<source_width$}",
            key, value, source,
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::settings::SettingsSource;
    use std::fs;

    #[test]
    fn set_writes_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ikated.toml");

        handle_set(&path, "db_host", "db.internal").unwrap();

        let reloaded = load_file_settings(&path).unwrap();

        assert_eq!(reloaded.db_host.as_deref(), Some("db.internal"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ikated.toml");

        let err = handle_set(&path, "nonexistent", "x").unwrap_err().to_string();

        assert!(err.contains("unknown setting key"));
        assert!(err.contains("nonexistent"));
        assert!(!path.exists());

        assert!(handle_get(&path, "nonexistent").is_err());
    }

    #[test]
    fn secrets_are_masked() {
        let mut file = Settings::default();

        file.db_password = Some("hunter2".to_string());

        let resolved = ResolvedSettings::resolve(&Settings::defaults(), &file, &Settings::default());

        let rows = rows(&resolved);

        let password = rows.iter().find(|(key, _, _)| *key == "db_password").unwrap();

        assert_eq!(password.1, MASK);
        assert_eq!(password.2, SettingsSource::File.to_string());

        let api_key = rows
            .iter()
            .find(|(key, _, _)| *key == "openai_api_key")
            .unwrap();

        assert_eq!(api_key.1, "");

        let host = rows.iter().find(|(key, _, _)| *key == "db_host").unwrap();

        assert_eq!(host.1, "localhost");
    }

    #[test]
    fn set_keeps_other_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ikated.toml");

        fs::write(&path, "[deploy]\nregion = \"sa-east-1\"\n").unwrap();

        handle_set(&path, "port", "8080").unwrap();

        let contents = fs::read_to_string(&path).unwrap();

        assert!(contents.contains("region = \"sa-east-1\""));
        assert!(contents.contains("port = \"8080\""));
    }
}
