use anyhow::{anyhow, Context, Result};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

// ---------------------------------------------------------------------------
// Settings – the shared configuration schema
// ---------------------------------------------------------------------------

/// Layered configuration schema.
///
/// Every field is `Option<T>` so that a partial layer (file or environment)
/// only carries the keys that were explicitly set. `None` means "not
/// specified in this layer".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_backend: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_port: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_backend: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_host: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_port: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_ttl: Option<String>,
}

impl Settings {
    /// All valid setting key names.
    const FIELD_NAMES: &[&str] = &[
        "port",
        "database_backend",
        "db_host",
        "db_port",
        "db_user",
        "db_password",
        "db_name",
        "cache_backend",
        "redis_host",
        "redis_port",
        "openai_api_key",
        "openai_base_url",
        "openai_model",
        "export_dir",
        "upload_dir",
        "download_ttl",
    ];

    /// Keys whose values are never printed in clear text.
    const SECRET_NAMES: &[&str] = &["db_password", "openai_api_key"];

    /// Returns the built-in defaults for every setting.
    pub fn defaults() -> Self {
        Self {
            port: Some("3333".to_string()),
            database_backend: Some("postgres".to_string()),
            db_host: Some("localhost".to_string()),
            db_port: Some("5432".to_string()),
            db_user: Some("admin".to_string()),
            db_password: Some("root".to_string()),
            db_name: Some("ikated".to_string()),
            cache_backend: Some("redis".to_string()),
            redis_host: Some("localhost".to_string()),
            redis_port: Some("6379".to_string()),
            openai_api_key: Some(String::new()),
            openai_base_url: Some("https://api.openai.com/v1".to_string()),
            openai_model: Some("gpt-4o".to_string()),
            export_dir: Some("exports".to_string()),
            upload_dir: Some("uploads".to_string()),
            download_ttl: Some("3600".to_string()),
        }
    }

    /// Returns the list of all valid setting key names.
    pub fn field_names() -> &'static [&'static str] {
        Self::FIELD_NAMES
    }

    /// Environment variable consulted for a setting key.
    pub fn env_name(name: &str) -> Option<&'static str> {
        match name {
            "port" => Some("PORT"),
            "database_backend" => Some("DATABASE_BACKEND"),
            "db_host" => Some("DB_HOST"),
            "db_port" => Some("DB_PORT"),
            "db_user" => Some("DB_USER"),
            "db_password" => Some("DB_PASSWORD"),
            "db_name" => Some("DB_NAME"),
            "cache_backend" => Some("CACHE_BACKEND"),
            "redis_host" => Some("REDIS_HOST"),
            "redis_port" => Some("REDIS_PORT"),
            "openai_api_key" => Some("OPENAI_API_KEY"),
            "openai_base_url" => Some("OPENAI_BASE_URL"),
            "openai_model" => Some("OPENAI_MODEL"),
            "export_dir" => Some("EXPORT_DIR"),
            "upload_dir" => Some("UPLOAD_DIR"),
            "download_ttl" => Some("DOWNLOAD_TTL"),
            _ => None,
        }
    }

    pub fn is_secret(name: &str) -> bool {
        Self::SECRET_NAMES.contains(&name)
    }

    fn field(&self, name: &str) -> Option<&Option<String>> {
        match name {
            "port" => Some(&self.port),
            "database_backend" => Some(&self.database_backend),
            "db_host" => Some(&self.db_host),
            "db_port" => Some(&self.db_port),
            "db_user" => Some(&self.db_user),
            "db_password" => Some(&self.db_password),
            "db_name" => Some(&self.db_name),
            "cache_backend" => Some(&self.cache_backend),
            "redis_host" => Some(&self.redis_host),
            "redis_port" => Some(&self.redis_port),
            "openai_api_key" => Some(&self.openai_api_key),
            "openai_base_url" => Some(&self.openai_base_url),
            "openai_model" => Some(&self.openai_model),
            "export_dir" => Some(&self.export_dir),
            "upload_dir" => Some(&self.upload_dir),
            "download_ttl" => Some(&self.download_ttl),
            _ => None,
        }
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "port" => Some(&mut self.port),
            "database_backend" => Some(&mut self.database_backend),
            "db_host" => Some(&mut self.db_host),
            "db_port" => Some(&mut self.db_port),
            "db_user" => Some(&mut self.db_user),
            "db_password" => Some(&mut self.db_password),
            "db_name" => Some(&mut self.db_name),
            "cache_backend" => Some(&mut self.cache_backend),
            "redis_host" => Some(&mut self.redis_host),
            "redis_port" => Some(&mut self.redis_port),
            "openai_api_key" => Some(&mut self.openai_api_key),
            "openai_base_url" => Some(&mut self.openai_base_url),
            "openai_model" => Some(&mut self.openai_model),
            "export_dir" => Some(&mut self.export_dir),
            "upload_dir" => Some(&mut self.upload_dir),
            "download_ttl" => Some(&mut self.download_ttl),
            _ => None,
        }
    }

    /// Look up a setting value by its key name.
    pub fn get_by_name(&self, name: &str) -> Option<&String> {
        self.field(name).and_then(|value| value.as_ref())
    }

    /// Set a setting value by its key name.
    ///
    /// Returns `Err` with a message if `name` is not a recognized key.
    pub fn set_by_name(&mut self, name: &str, value: String) -> Result<(), String> {
        match self.field_mut(name) {
            Some(field) => {
                *field = Some(value);
                Ok(())
            }
            None => Err(format!(
                "unknown setting key '{}'. Valid keys: {}",
                name,
                Self::FIELD_NAMES.join(", ")
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// SettingsSource – tracks where a resolved value came from
// ---------------------------------------------------------------------------

/// Identifies which configuration layer provided a resolved value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SettingsSource {
    Default,
    File,
    Env,
    Flag,
}

impl fmt::Display for SettingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File => write!(f, "file"),
            Self::Env => write!(f, "env"),
            Self::Flag => write!(f, "flag"),
        }
    }
}

// ---------------------------------------------------------------------------
// ResolvedValue / ResolvedSettings – fully-merged config with provenance
// ---------------------------------------------------------------------------

/// A single resolved configuration value paired with its source layer.
#[derive(Clone, Debug)]
pub struct ResolvedValue {
    pub value: String,
    pub source: SettingsSource,
}

/// The fully-resolved configuration after merging all layers.
#[derive(Clone, Debug)]
pub struct ResolvedSettings {
    values: Vec<(&'static str, ResolvedValue)>,
}

impl ResolvedSettings {
    /// Resolve three layers into a single `ResolvedSettings`.
    ///
    /// Precedence (highest to lowest): `env` > `file` > `defaults`.
    pub fn resolve(defaults: &Settings, file: &Settings, env: &Settings) -> Self {
        let values = Settings::FIELD_NAMES
            .iter()
            .map(|name| {
                let resolved = if let Some(v) = env.get_by_name(name) {
                    ResolvedValue {
                        value: v.clone(),
                        source: SettingsSource::Env,
                    }
                } else if let Some(v) = file.get_by_name(name) {
                    ResolvedValue {
                        value: v.clone(),
                        source: SettingsSource::File,
                    }
                } else {
                    ResolvedValue {
                        value: defaults.get_by_name(name).cloned().unwrap_or_default(),
                        source: SettingsSource::Default,
                    }
                };

                (*name, resolved)
            })
            .collect();

        Self { values }
    }

    /// Look up a resolved value by its key name.
    pub fn get_by_name(&self, name: &str) -> Option<&ResolvedValue> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Iterate resolved values in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ResolvedValue)> {
        self.values.iter().map(|(key, value)| (*key, value))
    }

    /// Replace a value with one given on the command line.
    pub fn override_with_flag(&mut self, name: &str, value: String) {
        if let Some((_, resolved)) = self.values.iter_mut().find(|(key, _)| *key == name) {
            *resolved = ResolvedValue {
                value,
                source: SettingsSource::Flag,
            };
        }
    }

    fn value(&self, name: &str) -> &str {
        self.get_by_name(name)
            .map(|resolved| resolved.value.as_str())
            .unwrap_or_default()
    }

    fn parse_value<T: std::str::FromStr>(&self, name: &str) -> Result<T>
    where
        T::Err: fmt::Display,
    {
        let value = self.value(name);

        value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow!("invalid value '{}' for setting '{}': {}", value, name, err))
    }

    /// Typed view of the settings consumed by the server.
    pub fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            port: self.parse_value("port")?,
            database_backend: self.value("database_backend").to_string(),
            database: PgConnectOptions::new()
                .host(self.value("db_host"))
                .port(self.parse_value("db_port")?)
                .username(self.value("db_user"))
                .password(self.value("db_password"))
                .database(self.value("db_name")),
            cache_backend: self.value("cache_backend").to_string(),
            redis: ConnectionInfo {
                addr: ConnectionAddr::Tcp(
                    self.value("redis_host").to_string(),
                    self.parse_value("redis_port")?,
                ),
                redis: RedisConnectionInfo::default(),
            },
            openai_api_key: self.value("openai_api_key").to_string(),
            openai_base_url: self.value("openai_base_url").trim_end_matches('/').to_string(),
            openai_model: self.value("openai_model").to_string(),
            export_dir: PathBuf::from(self.value("export_dir")),
            upload_dir: PathBuf::from(self.value("upload_dir")),
            download_ttl: Duration::from_secs(self.parse_value("download_ttl")?),
        })
    }
}

/// Settings in the shape the server needs them.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub database_backend: String,
    pub database: PgConnectOptions,
    pub cache_backend: String,
    pub redis: ConnectionInfo,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub export_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub download_ttl: Duration,
}

// ---------------------------------------------------------------------------
// Loading and saving layers
// ---------------------------------------------------------------------------

/// Load file-level settings from an `ikated.toml` file.
///
/// Reads the file at `path`, extracts the `[settings]` table, and
/// deserializes it into `Settings`. Returns `Settings::default()` if the file
/// does not exist or the `[settings]` section is absent.
pub fn load_file_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    let table: toml::Table = toml::from_str(&contents)
        .with_context(|| format!("failed to parse TOML from {}", path.display()))?;

    match table.get("settings") {
        Some(settings_value) => {
            let settings: Settings = settings_value
                .clone()
                .try_into()
                .with_context(|| "failed to deserialize [settings] table")?;
            Ok(settings)
        }
        None => Ok(Settings::default()),
    }
}

/// Save settings to the `[settings]` table of an `ikated.toml` file.
///
/// All other tables and keys in the file are preserved.
pub fn save_file_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let mut table: toml::Table = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from {}", path.display()))?
    } else {
        toml::Table::new()
    };

    let settings_value =
        toml::Value::try_from(settings).context("failed to serialize settings to TOML value")?;
    table.insert("settings".to_string(), settings_value);

    let toml_str = toml::to_string_pretty(&table).context("failed to serialize ikated.toml")?;
    fs::write(path, toml_str).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Build the environment layer through `lookup`, usually `std::env::var`.
pub fn load_env_settings<F>(lookup: F) -> Settings
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();

    for name in Settings::FIELD_NAMES {
        let Some(env_name) = Settings::env_name(name) else {
            continue;
        };

        if let Some(value) = lookup(env_name).filter(|value| !value.is_empty()) {
            if let Some(field) = settings.field_mut(name) {
                *field = Some(value);
            }
        }
    }

    settings
}

/// Convenience function: load all layers and resolve them.
pub fn resolve_settings(path: &Path) -> Result<ResolvedSettings> {
    let defaults = Settings::defaults();
    let file = load_file_settings(path)?;
    let env = load_env_settings(|name| std::env::var(name).ok());

    Ok(ResolvedSettings::resolve(&defaults, &file, &env))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
