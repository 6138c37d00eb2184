//! Application configuration.
//!
//! Stored as JSON at `<config dir>/flowtx/config.json`. Every field has a
//! default, so a missing or partial file still yields a usable config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::actions::DEFAULT_COMPUTE_LIMIT;
use crate::error::{ConfigError, ConfigResult};
use crate::network::Network;

/// App details shown by the wallet during connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppDetails {
    /// Display name.
    pub title: String,
    /// Homepage.
    pub url: Option<String>,
    /// Icon URL.
    pub icon: Option<String>,
    /// One-line description.
    pub description: Option<String>,
}

impl Default for AppDetails {
    fn default() -> Self {
        Self {
            title: "flowtx".to_string(),
            url: None,
            icon: None,
            description: Some("Flow transaction lifecycle client".to_string()),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Network to connect to.
    pub network: Network,
    /// Override for the network's access node.
    pub access_node: Option<String>,
    /// App details for the wallet prompt.
    pub app: AppDetails,
    /// WalletConnect project id.
    pub walletconnect_project_id: Option<String>,
    /// Default transaction computation limit.
    pub compute_limit: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            access_node: None,
            app: AppDetails::default(),
            walletconnect_project_id: None,
            compute_limit: DEFAULT_COMPUTE_LIMIT,
        }
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    /// Works, but probably not what was intended.
    Warning,
    /// Will not work.
    Error,
}

/// A problem found by [`AppConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Field path, e.g. `app.icon`.
    pub field: String,
    /// What is wrong.
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl AppConfig {
    /// Access node to use: the override if set, else the network default.
    #[must_use]
    pub fn access_node_url(&self) -> &str {
        self.access_node
            .as_deref()
            .unwrap_or_else(|| self.network.access_node())
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if let Some(node) = &self.access_node {
            check_url(&mut issues, "access_node", node);
        }
        if let Some(url) = &self.app.url {
            check_url(&mut issues, "app.url", url);
        }
        if let Some(icon) = &self.app.icon {
            check_url(&mut issues, "app.icon", icon);
        }
        if self.app.title.trim().is_empty() {
            issues.push(ConfigIssue::warning("app.title", "empty title"));
        }
        match &self.walletconnect_project_id {
            None => issues.push(ConfigIssue::warning(
                "walletconnect_project_id",
                "not set; mobile wallets cannot connect",
            )),
            Some(id) if id.len() != 32 || !id.bytes().all(|b| b.is_ascii_hexdigit()) => {
                issues.push(ConfigIssue::error(
                    "walletconnect_project_id",
                    "expected 32 hex characters",
                ));
            }
            Some(_) => {}
        }
        if self.compute_limit == 0 {
            issues.push(ConfigIssue::error("compute_limit", "must be positive"));
        }

        issues
    }

    /// Fail on the first error-level issue.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first error.
    pub fn ensure_valid(&self) -> ConfigResult<()> {
        match self
            .validate()
            .into_iter()
            .find(|i| i.level == IssueLevel::Error)
        {
            Some(issue) => Err(ConfigError::invalid(format!(
                "{}: {}",
                issue.field, issue.message
            ))),
            None => Ok(()),
        }
    }
}

fn check_url(issues: &mut Vec<ConfigIssue>, field: &str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => issues.push(ConfigIssue::error(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => issues.push(ConfigIssue::error(field, format!("invalid URL: {e}"))),
    }
}

/// Directory holding flowtx configuration.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs_next::config_dir()
        .or_else(|| dirs_next::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowtx")
}

/// Default configuration file path.
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default path.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// [`ConfigError`] if the file exists but cannot be read or parsed.
pub async fn load_config() -> ConfigResult<AppConfig> {
    load_config_from(&config_path()).await
}

/// Load configuration from `path`; a missing file yields the defaults.
///
/// # Errors
///
/// [`ConfigError`] if the file exists but cannot be read or parsed.
pub async fn load_config_from(path: &Path) -> ConfigResult<AppConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let config = serde_json::from_str(&content)?;
            debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Save configuration to the default path.
///
/// # Errors
///
/// [`ConfigError`] on IO or serialization failure.
pub async fn save_config(config: &AppConfig) -> ConfigResult<()> {
    save_config_to(config, &config_path()).await
}

/// Save configuration to `path`, creating parent directories.
///
/// # Errors
///
/// [`ConfigError`] on IO or serialization failure.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!(path = %path.display(), "configuration saved");
    Ok(())
}

/// Write the default configuration to `path` unless it already exists.
///
/// Returns `false` if a file was already present and `force` was not set.
///
/// # Errors
///
/// [`ConfigError`] on IO or serialization failure.
pub async fn init_config(path: &Path, force: bool) -> ConfigResult<bool> {
    if !force && tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    save_config_to(&AppConfig::default(), path).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use assert_fs::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.compute_limit, 1000);
        assert_eq!(config.access_node_url(), "https://rest-testnet.onflow.org");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"network": "mainnet", "app": {"title": "demo"}}"#).unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.app.title, "demo");
        assert_eq!(config.compute_limit, 1000);
        assert_eq!(config.access_node_url(), "https://rest-mainnet.onflow.org");
    }

    #[test]
    fn test_validate_reports_issues() {
        let config = AppConfig {
            access_node: Some("ftp://node".into()),
            walletconnect_project_id: Some("short".into()),
            compute_limit: 0,
            ..AppConfig::default()
        };
        let issues = config.validate();
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"access_node"));
        assert!(fields.contains(&"walletconnect_project_id"));
        assert!(fields.contains(&"compute_limit"));
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_missing_project_id_is_only_a_warning() {
        let config = AppConfig::default();
        let issues = config.validate();
        assert!(issues.iter().all(|i| i.level == IssueLevel::Warning));
        assert!(config.ensure_valid().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = AppConfig {
            network: Network::Mainnet,
            walletconnect_project_id: Some("0123456789abcdef0123456789abcdef".into()),
            ..AppConfig::default()
        };
        save_config_to(&config, &path).await.unwrap();
        assert_eq!(load_config_from(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        assert!(init_config(&path, false).await.unwrap());
        tokio::fs::write(&path, r#"{"network":"mainnet"}"#).await.unwrap();
        assert!(!init_config(&path, false).await.unwrap());
        assert_eq!(load_config_from(&path).await.unwrap().network, Network::Mainnet);
        assert!(init_config(&path, true).await.unwrap());
        assert_eq!(load_config_from(&path).await.unwrap().network, Network::Testnet);
    }
}
