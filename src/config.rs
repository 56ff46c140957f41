//! Configuration for clario-sync (document server and sync client)

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the server's SQLite document store
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Settings for the local sync client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Document server URL; without it the client stays offline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// API token issued by `clario-sync token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Owner stamped on every task
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Path to the local SQLite store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Cap on the local store size, in SQLite pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,

    /// Connect timeout for the document server, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Human-readable name for the token
    pub name: String,
    /// The hashed API token (argon2 hash, or plain text for backwards compat)
    pub token_hash: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_db_path() -> PathBuf {
    PathBuf::from("clario-sync.sqlite")
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("clario").join("tasks.sqlite"))
        .unwrap_or_else(|| PathBuf::from("clario-tasks.sqlite"))
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            token: None,
            user_id: default_user_id(),
            store_path: default_store_path(),
            max_pages: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: default_bind(),
                port: default_port(),
            },
            database: DatabaseConfig {
                path: default_db_path(),
            },
            client: ClientConfig::default(),
            tokens: Vec::new(),
        }
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        // Check environment variable first
        if let Ok(env_path) = std::env::var("CLARIO_SYNC_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        // Check for config in current directory
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        // Check /data/config.toml (Docker default)
        let data_config = PathBuf::from("/data/config.toml");
        if data_config.exists() {
            return Ok(data_config);
        }

        // Then check XDG config
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("clario-sync");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let with_comments = format!(
            "# clario-sync configuration\n\n\
             {}\n\n\
             # Add tokens with: clario-sync token --name <device-name>\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }

    /// Check if a token is valid (supports both hashed and legacy plain tokens)
    pub fn validate_token(&self, token: &str) -> bool {
        let argon2 = Argon2::default();

        self.tokens.iter().any(|t| match PasswordHash::new(&t.token_hash) {
            Ok(parsed_hash) => argon2
                .verify_password(token.as_bytes(), &parsed_hash)
                .is_ok(),
            // Plain text comparison for hand-written configs
            Err(_) => t.token_hash == token,
        })
    }
}

/// Hash a token using argon2
pub fn hash_token(token: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(token.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash token: {}", e))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_and_plain_tokens_validate() {
        let mut cfg = Config::default();
        cfg.tokens.push(TokenConfig {
            name: "laptop".into(),
            token_hash: hash_token("cls_secret").unwrap(),
        });
        cfg.tokens.push(TokenConfig {
            name: "legacy".into(),
            token_hash: "plain".into(),
        });

        assert!(cfg.validate_token("cls_secret"));
        assert!(cfg.validate_token("plain"));
        assert!(!cfg.validate_token("nope"));
    }

    #[test]
    fn client_section_is_optional() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 4000

            [database]
            path = "docs.sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.client.user_id, "local");
        assert!(cfg.client.server_url.is_none());
        assert_eq!(cfg.client.connect_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.client.server_url = Some("http://localhost:3030".into());
        cfg.client.max_pages = Some(1024);

        cfg.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.client.server_url, cfg.client.server_url);
        assert_eq!(loaded.client.max_pages, Some(1024));
    }
}
