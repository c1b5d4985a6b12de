//! Configuration and credential storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default Messenger API gateway
pub const DEFAULT_API_URL: &str = "https://api.refinitiv.com";

/// Default Messenger WebSocket stream endpoint
pub const DEFAULT_STREAM_URL: &str =
    "wss://api.collab.refinitiv.com/services/nt/api/messenger/v1/stream";

/// Application configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Bot account username
    pub username: String,
    /// Bot account password
    pub password: String,
    /// Messenger account AppKey (sent as the OAuth client_id)
    pub app_key: String,
    /// Usually empty; the platform issues public clients
    #[serde(default)]
    pub client_secret: String,
    /// Override for the REST API gateway
    pub api_url: Option<String>,
    /// Override for the WebSocket stream endpoint
    pub stream_url: Option<String>,
}

const CONFIG_TEMPLATE: &str = r#"# messenger-cli configuration
# Credentials come from your Messenger bot account registration.

username = "---YOUR BOT USERNAME---"
password = "---YOUR BOT PASSWORD---"
app_key = "---YOUR MESSENGER ACCOUNT APPKEY---"

# Optional endpoint overrides:
# api_url = "https://api.refinitiv.com"
# stream_url = "wss://api.collab.refinitiv.com/services/nt/api/messenger/v1/stream"
"#;

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "messenger-cli", "messenger-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Path of the persisted token cache, next to the config file
    pub fn token_cache_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("token.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            bail!(
                "No config found at {}. Run 'messenger-cli init' and fill in your bot credentials.",
                path.display()
            );
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Write a commented config template for the user to fill in.
    /// Refuses to overwrite an existing config.
    pub fn init() -> Result<PathBuf> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        if path.exists() {
            bail!("Config already exists at {}", path.display());
        }

        fs::write(&path, CONFIG_TEMPLATE).context("Failed to write config template")?;

        // Set restrictive permissions on config file (contains credentials)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(path)
    }

    /// Auth settings for the configured bot account (REST safety margin;
    /// streaming callers override the margin).
    pub fn auth_settings(&self) -> crate::auth::AuthSettings {
        let mut settings = crate::auth::AuthSettings::new(
            self.username.clone(),
            self.password.clone(),
            self.app_key.clone(),
        );
        settings.client_secret = self.client_secret.clone();
        settings
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn stream_url(&self) -> &str {
        self.stream_url.as_deref().unwrap_or(DEFAULT_STREAM_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            username = "bot@example.com"
            password = "hunter2"
            app_key = "app-key"
            "#,
        )
        .unwrap();

        assert_eq!(config.username, "bot@example.com");
        assert!(config.client_secret.is_empty());
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        assert_eq!(config.stream_url(), DEFAULT_STREAM_URL);
    }

    #[test]
    fn test_endpoint_overrides() {
        let config: Config = toml::from_str(
            r#"
            username = "bot@example.com"
            password = "hunter2"
            app_key = "app-key"
            api_url = "https://gateway.example.com"
            stream_url = "wss://stream.example.com/messenger"
            "#,
        )
        .unwrap();

        assert_eq!(config.api_url(), "https://gateway.example.com");
        assert_eq!(config.stream_url(), "wss://stream.example.com/messenger");
    }

    #[test]
    fn test_template_parses_as_config() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.username, "---YOUR BOT USERNAME---");
    }
}
