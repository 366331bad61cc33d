use std::ffi::OsString;
use std::path::PathBuf;

use serde::Deserialize;

use crate::redmine::Credentials;
use crate::sort::is_valid_sort_field;

const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub issues: IssuesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ServerConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            api_key: self.api_key.clone(),
            cookie: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssuesConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_sort_field")]
    pub sort_field: String,
    #[serde(default)]
    pub ascending: bool,
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            sort_field: default_sort_field(),
            ascending: false,
        }
    }
}

/// An empty `db_path` runs without the offline cache.
#[derive(Debug, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub db_path: String,
}

impl CacheConfig {
    pub fn enabled(&self) -> bool {
        !self.db_path.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct AttachmentsConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Default)]
pub struct AppConfigOverrides {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub cache_db_path: Option<String>,
    pub logging_debug: Option<bool>,
}

impl AppConfigOverrides {
    /// Reads `FACETS_BASE_URL`, `FACETS_USERNAME`, `FACETS_PASSWORD`,
    /// `FACETS_API_KEY` and `FACETS_CACHE_DB`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            base_url: var("FACETS_BASE_URL"),
            username: var("FACETS_USERNAME"),
            password: var("FACETS_PASSWORD"),
            api_key: var("FACETS_API_KEY"),
            cache_db_path: var("FACETS_CACHE_DB"),
            logging_debug: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {path}. expected at $XDG_CONFIG_HOME/facets/config.toml or ~/.config/facets/config.toml")]
    MissingConfigFile { path: PathBuf },
    #[error("failed to resolve config path: HOME is not set and XDG_CONFIG_HOME is unset")]
    MissingHomeDirectory,
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load() -> Result<AppConfig, ConfigError> {
    let path = resolve_config_path()?;
    load_from(&path)
}

pub fn load_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    let path = path.to_path_buf();
    let raw = std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::MissingConfigFile { path: path.clone() }
        } else {
            ConfigError::ReadFailed {
                path: path.clone(),
                source,
            }
        }
    })?;

    let cfg = toml::from_str::<AppConfig>(&raw).map_err(|source| ConfigError::ParseFailed {
        path: path.clone(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn resolve_config_path() -> Result<PathBuf, ConfigError> {
    let xdg_config_home = std::env::var_os("XDG_CONFIG_HOME");
    let home = std::env::var_os("HOME");
    resolve_config_path_from_env(xdg_config_home, home)
}

fn resolve_config_path_from_env(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = xdg_config_home.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir).join("facets").join("config.toml"));
    }

    let home = home
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingHomeDirectory)?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("facets")
        .join("config.toml"))
}

impl AppConfig {
    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) -> Result<(), ConfigError> {
        if let Some(value) = &overrides.base_url {
            self.server.base_url = value.clone();
        }
        if let Some(value) = &overrides.username {
            self.server.username = Some(value.clone());
        }
        if let Some(value) = &overrides.password {
            self.server.password = Some(value.clone());
        }
        if let Some(value) = &overrides.api_key {
            self.server.api_key = Some(value.clone());
        }
        if let Some(value) = &overrides.cache_db_path {
            self.cache.db_path = value.clone();
        }
        if let Some(value) = overrides.logging_debug {
            self.logging.debug = value;
        }

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "server.base_url must not be empty".into(),
            ));
        }
        let username_set = self
            .server
            .username
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if username_set && self.server.password.is_none() {
            return Err(ConfigError::Invalid(
                "server.password is required when server.username is set".into(),
            ));
        }
        if self.issues.page_size == 0 || self.issues.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "issues.page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if !is_valid_sort_field(&self.issues.sort_field) {
            return Err(ConfigError::Invalid(format!(
                "issues.sort_field '{}' is not a sortable field",
                self.issues.sort_field
            )));
        }
        if self.attachments.download_dir.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "attachments.download_dir must not be empty".into(),
            ));
        }

        Ok(())
    }
}

const fn default_page_size() -> usize {
    25
}

fn default_sort_field() -> String {
    "updated_on".to_string()
}

fn default_download_dir() -> String {
    std::env::temp_dir()
        .join("facets-attachments")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_prefers_xdg_config_home() {
        let path = resolve_config_path_from_env(
            Some(OsString::from("/tmp/xdg-home")),
            Some(OsString::from("/tmp/home")),
        )
        .expect("xdg path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/xdg-home/facets/config.toml"));
    }

    #[test]
    fn resolve_path_falls_back_to_home_dot_config() {
        let path = resolve_config_path_from_env(None, Some(OsString::from("/tmp/home")))
            .expect("home path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/home/.config/facets/config.toml"));
    }

    #[test]
    fn resolve_path_requires_home_when_xdg_missing() {
        let err = resolve_config_path_from_env(None, None).expect_err("resolution should fail");
        assert!(matches!(err, ConfigError::MissingHomeDirectory));
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let raw = r#"
            [server]
            base_url = "https://redmine.example.org"
            api_key = "abc"
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        cfg.validate().expect("minimal config is valid");
        assert_eq!(cfg.issues.page_size, 25);
        assert_eq!(cfg.issues.sort_field, "updated_on");
        assert!(!cfg.cache.enabled());
        assert_eq!(cfg.server.credentials(), Credentials::api_key("abc"));
    }

    #[test]
    fn validate_rejects_username_without_password() {
        let raw = r#"
            [server]
            base_url = "https://redmine.example.org"
            username = "ada"
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        let err = cfg.validate().expect_err("password is required");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_rejects_bad_issue_settings() {
        let raw = r#"
            [server]
            base_url = "https://redmine.example.org"

            [issues]
            page_size = 500
            sort_field = "updated_on"
        "#;
        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let raw = r#"
            [server]
            base_url = "https://redmine.example.org"

            [issues]
            sort_field = "updated on"
        "#;
        let cfg: AppConfig = toml::from_str(raw).expect("toml should parse");
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_example_parses() {
        let raw = include_str!("../config.example.toml");
        let cfg: AppConfig = toml::from_str(raw).expect("example config should parse");
        cfg.validate().expect("example config should validate");
        assert!(cfg.cache.enabled());
    }

    #[test]
    fn apply_overrides_updates_values() {
        let raw = include_str!("../config.example.toml");
        let mut cfg: AppConfig = toml::from_str(raw).expect("example config should parse");

        let overrides = AppConfigOverrides {
            base_url: Some("https://override.example.org".into()),
            username: None,
            password: None,
            api_key: Some("override-key".into()),
            cache_db_path: Some("/tmp/override.db".into()),
            logging_debug: Some(true),
        };

        cfg.apply_overrides(&overrides)
            .expect("overrides should validate");

        assert_eq!(cfg.server.base_url, "https://override.example.org");
        assert_eq!(cfg.server.api_key.as_deref(), Some("override-key"));
        assert_eq!(cfg.cache.db_path, "/tmp/override.db");
        assert!(cfg.logging.debug);
    }
}
