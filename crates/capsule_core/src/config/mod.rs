use crate::error::AppError;
use crate::message::DEFAULT_PREVIEW_CHARS;
use crate::storage::json_store;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "CAPSULE_CONFIG_PATH";
const SPOOL_FILE_NAME: &str = "outbox.jsonl";

pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
pub const DEFAULT_MAIL_FROM: &str = "Digital Time Capsule <onboarding@resend.dev>";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Resend,
    Spool,
    Noop,
}

pub fn canonical_delivery_name(raw: &str) -> Option<DeliveryKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "resend" | "email" => Some(DeliveryKind::Resend),
        "" | "spool" | "outbox" | "file" => Some(DeliveryKind::Spool),
        "noop" | "none" | "off" | "disabled" => Some(DeliveryKind::Noop),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub frontend_url: Option<String>,
    #[serde(default)]
    pub unlock_interval_secs: Option<u64>,
    #[serde(default)]
    pub reminder_interval_secs: Option<u64>,
    #[serde(default)]
    pub preview_chars: Option<usize>,
    #[serde(default)]
    pub delivery: Option<String>,
    #[serde(default)]
    pub mail_from: Option<String>,
    #[serde(default)]
    pub resend_api_key: Option<String>,
    #[serde(default)]
    pub spool_path: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn frontend_url(&self) -> String {
        non_blank(&self.frontend_url)
            .unwrap_or(DEFAULT_FRONTEND_URL)
            .to_string()
    }

    pub fn unlock_interval(&self) -> Duration {
        interval_or_default(self.unlock_interval_secs)
    }

    pub fn reminder_interval(&self) -> Duration {
        interval_or_default(self.reminder_interval_secs)
    }

    pub fn preview_chars(&self) -> usize {
        self.preview_chars.unwrap_or(DEFAULT_PREVIEW_CHARS)
    }

    pub fn mail_from(&self) -> String {
        non_blank(&self.mail_from)
            .unwrap_or(DEFAULT_MAIL_FROM)
            .to_string()
    }

    pub fn log_level(&self) -> String {
        non_blank(&self.log_level)
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .to_string()
    }

    pub fn delivery_kind(&self) -> Result<DeliveryKind, AppError> {
        let raw = self.delivery.as_deref().unwrap_or("");
        canonical_delivery_name(raw)
            .ok_or_else(|| AppError::config(format!("unknown delivery channel '{}'", raw.trim())))
    }

    pub fn spool_path(&self) -> Result<PathBuf, AppError> {
        match non_blank(&self.spool_path) {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(json_store::store_path()?.with_file_name(SPOOL_FILE_NAME)),
        }
    }
}

fn interval_or_default(secs: Option<u64>) -> Duration {
    Duration::from_secs(secs.unwrap_or(DEFAULT_INTERVAL_SECS).max(1))
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub frontend_url: Option<String>,
    pub unlock_interval_secs: Option<u64>,
    pub reminder_interval_secs: Option<u64>,
    pub preview_chars: Option<usize>,
    pub delivery: Option<String>,
    pub mail_from: Option<String>,
    pub spool_path: Option<String>,
    pub log_level: Option<String>,
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("capsule")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("capsule")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config() -> Result<Config, AppError> {
    let path = config_path()?;
    load_config_from_path(&path)
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })
}

/// Process environment wins over the config file for deployment secrets and
/// endpoints.
pub fn apply_env_overrides(base: &Config) -> Config {
    apply_env_overrides_with(base, |key| std::env::var(key).ok())
}

fn apply_env_overrides_with<F>(base: &Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = base.clone();
    let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = read("FRONTEND_URL") {
        merged.frontend_url = Some(value);
    }
    if let Some(value) = read("RESEND_API_KEY") {
        merged.resend_api_key = Some(value);
    }
    if let Some(value) = read("MAIL_FROM") {
        merged.mail_from = Some(value);
    }

    merged
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();

    if let Some(value) = overrides.frontend_url.as_ref() {
        merged.frontend_url = Some(value.clone());
    }
    if let Some(value) = overrides.unlock_interval_secs {
        merged.unlock_interval_secs = Some(value);
    }
    if let Some(value) = overrides.reminder_interval_secs {
        merged.reminder_interval_secs = Some(value);
    }
    if let Some(value) = overrides.preview_chars {
        merged.preview_chars = Some(value);
    }
    if let Some(value) = overrides.delivery.as_ref() {
        merged.delivery = Some(value.clone());
    }
    if let Some(value) = overrides.mail_from.as_ref() {
        merged.mail_from = Some(value.clone());
    }
    if let Some(value) = overrides.spool_path.as_ref() {
        merged.spool_path = Some(value.clone());
    }
    if let Some(value) = overrides.log_level.as_ref() {
        merged.log_level = Some(value.clone());
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::{
        Config, ConfigOverrides, DeliveryKind, apply_env_overrides_with, canonical_delivery_name,
        load_config_from_path, load_config_with_fallback_from_path, merge_overrides,
    };
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn temp_path(file_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("capsule-{nanos}-{file_name}"))
    }

    #[test]
    fn load_config_missing_returns_defaults_without_error() {
        let path = temp_path("missing-config.json");
        let result = load_config_with_fallback_from_path(&path);

        assert_eq!(result.config, Config::default());
        assert!(result.error.is_none());
    }

    #[test]
    fn load_config_invalid_returns_defaults_and_error() {
        let path = temp_path("invalid-config.json");
        fs::write(&path, "{ invalid json ").unwrap();

        let result = load_config_with_fallback_from_path(&path);
        fs::remove_file(&path).ok();

        assert_eq!(result.config, Config::default());
        assert!(result.error.is_some());
    }

    #[test]
    fn load_config_reads_valid_file() {
        let path = temp_path("valid-config.json");
        let content = serde_json::json!({
            "frontend_url": "https://caps.example",
            "unlock_interval_secs": 30,
            "delivery": "noop"
        });
        fs::write(&path, serde_json::to_string(&content).unwrap()).unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.frontend_url(), "https://caps.example");
        assert_eq!(loaded.unlock_interval(), Duration::from_secs(30));
        assert_eq!(loaded.reminder_interval(), Duration::from_secs(60));
        assert_eq!(loaded.delivery_kind().unwrap(), DeliveryKind::Noop);
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = Config::default();

        assert_eq!(config.frontend_url(), "http://localhost:5173");
        assert_eq!(config.preview_chars(), 120);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.delivery_kind().unwrap(), DeliveryKind::Spool);
        assert!(config.mail_from().contains("onboarding@resend.dev"));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = Config {
            unlock_interval_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.unlock_interval(), Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_replace_file_values_but_ignore_blank() {
        let base = Config {
            frontend_url: Some("http://file".into()),
            mail_from: Some("file@example.com".into()),
            ..Config::default()
        };

        let merged = apply_env_overrides_with(&base, |key| match key {
            "FRONTEND_URL" => Some("https://env".to_string()),
            "MAIL_FROM" => Some("  ".to_string()),
            "RESEND_API_KEY" => Some("re_123".to_string()),
            _ => None,
        });

        assert_eq!(merged.frontend_url.as_deref(), Some("https://env"));
        assert_eq!(merged.mail_from.as_deref(), Some("file@example.com"));
        assert_eq!(merged.resend_api_key.as_deref(), Some("re_123"));
    }

    #[test]
    fn merge_overrides_preserves_base_config() {
        let base = Config {
            frontend_url: Some("http://file".into()),
            unlock_interval_secs: Some(60),
            ..Config::default()
        };
        let overrides = ConfigOverrides {
            unlock_interval_secs: Some(5),
            delivery: Some("noop".into()),
            ..ConfigOverrides::default()
        };

        let merged = merge_overrides(&base, &overrides);

        assert_eq!(base.unlock_interval_secs, Some(60));
        assert_eq!(merged.unlock_interval_secs, Some(5));
        assert_eq!(merged.frontend_url.as_deref(), Some("http://file"));
        assert_eq!(merged.delivery.as_deref(), Some("noop"));
    }

    #[test]
    fn merge_overrides_with_empty_overrides_returns_clone() {
        let base = Config {
            preview_chars: Some(40),
            ..Config::default()
        };

        let merged = merge_overrides(&base, &ConfigOverrides::default());

        assert_eq!(merged, base);
    }

    #[test]
    fn canonical_delivery_name_maps_variants() {
        assert_eq!(canonical_delivery_name("Resend"), Some(DeliveryKind::Resend));
        assert_eq!(canonical_delivery_name(" outbox "), Some(DeliveryKind::Spool));
        assert_eq!(canonical_delivery_name("off"), Some(DeliveryKind::Noop));
        assert_eq!(canonical_delivery_name("carrier-pigeon"), None);
    }
}
