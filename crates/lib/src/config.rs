//! Configuration types and loading.
//!
//! Config is loaded from an optional JSON file (e.g. `~/.wingsbot/config.json`) and
//! overridden by the environment variables the manager's admin-bot unit sets
//! (`MANAGER_BOT_TOKEN`, `ADMIN_IDS`, `WINGS_MANAGER_BIN`). [`Settings::resolve`] turns
//! the raw config into the immutable settings the bot runs with.

use crate::auth::AllowList;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default path of the external manager executable.
pub const DEFAULT_MANAGER_BIN: &str = "/usr/local/bin/wingsbot-manager";

pub const ENV_BOT_TOKEN: &str = "MANAGER_BOT_TOKEN";
pub const ENV_ADMIN_IDS: &str = "ADMIN_IDS";
pub const ENV_MANAGER_BIN: &str = "WINGS_MANAGER_BIN";
pub const ENV_CONFIG_PATH: &str = "WINGS_BOT_CONFIG";

/// Startup configuration errors. Any of these is fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MANAGER_BOT_TOKEN is not set")]
    MissingToken,
    #[error("ADMIN_IDS is not set (comma-separated user IDs)")]
    MissingAdminIds,
    #[error("invalid admin id {0:?} in ADMIN_IDS (expected an integer)")]
    InvalidAdminId(String),
}

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Telegram bot settings.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Numeric Telegram user ids allowed to issue commands. Overridden by ADMIN_IDS.
    #[serde(default)]
    pub admin_ids: Vec<i64>,

    /// External manager executable and its timeouts.
    #[serde(default)]
    pub manager: ManagerConfig,

    /// HTTP listener used only in webhook mode.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Telegram bot config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    /// Bot token from BotFather. Overridden by MANAGER_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Path of the manager binary. Overridden by WINGS_MANAGER_BIN env.
    pub binary: Option<PathBuf>,

    /// Timeout for ordinary subcommands, in seconds (default 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for the interactive `create` subcommand, in seconds (default 300).
    #[serde(default = "default_create_timeout_secs")]
    pub create_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_create_timeout_secs() -> u64 {
    300
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout_secs: default_timeout_secs(),
            create_timeout_secs: default_create_timeout_secs(),
        }
    }
}

/// Bind address and port for the webhook listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port (default 8443).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1"; put a reverse proxy in front for TLS).
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    8443
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// Per-invocation timeouts for the manager binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub ordinary: Duration,
    pub create: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ordinary: Duration::from_secs(default_timeout_secs()),
            create: Duration::from_secs(default_create_timeout_secs()),
        }
    }
}

/// How updates arrive from Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// getUpdates long-poll loop.
    LongPoll,
    /// setWebhook + local HTTP listener.
    Webhook {
        url: String,
        secret: Option<String>,
        bind: String,
        port: u16,
    },
}

/// Immutable runtime settings, built once at startup.
#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    pub allow_list: AllowList,
    pub manager_binary: PathBuf,
    pub timeouts: Timeouts,
    pub transport: Transport,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"<redacted>")
            .field("allow_list", &self.allow_list)
            .field("manager_binary", &self.manager_binary)
            .field("timeouts", &self.timeouts)
            .field("transport", &self.transport)
            .finish()
    }
}

impl Settings {
    /// Resolve settings from the config file and the process environment.
    pub fn resolve(config: &Config) -> Result<Self, ConfigError> {
        Self::resolve_with(config, |key| std::env::var(key).ok())
    }

    /// Resolve settings using `env` to look up variables; env values take precedence over the file.
    pub fn resolve_with(
        config: &Config,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bot_token = non_empty(env(ENV_BOT_TOKEN))
            .or_else(|| non_empty(config.telegram.bot_token.clone()))
            .ok_or(ConfigError::MissingToken)?;

        let allow_list = match non_empty(env(ENV_ADMIN_IDS)) {
            Some(raw) => AllowList::parse(&raw)?,
            None => AllowList::new(config.admin_ids.iter().copied()),
        };
        if allow_list.is_empty() {
            return Err(ConfigError::MissingAdminIds);
        }

        let manager_binary = non_empty(env(ENV_MANAGER_BIN))
            .map(PathBuf::from)
            .or_else(|| {
                config
                    .manager
                    .binary
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty())
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANAGER_BIN));

        let timeouts = Timeouts {
            ordinary: Duration::from_secs(config.manager.timeout_secs.max(1)),
            create: Duration::from_secs(config.manager.create_timeout_secs.max(1)),
        };

        let transport = match non_empty(config.telegram.webhook_url.clone()) {
            Some(url) => Transport::Webhook {
                url,
                secret: non_empty(config.telegram.webhook_secret.clone()),
                bind: config.server.bind.trim().to_string(),
                port: config.server.port,
            },
            None => Transport::LongPoll,
        };

        Ok(Self {
            bot_token,
            allow_list,
            manager_binary,
            timeouts,
            transport,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(ENV_CONFIG_PATH).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".wingsbot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, the default path, or WINGS_BOT_CONFIG. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.telegram.bot_token = Some("file-token".to_string());
        config.admin_ids = vec![7];
        let settings = Settings::resolve_with(
            &config,
            env_of(&[
                (ENV_BOT_TOKEN, "env-token"),
                (ENV_ADMIN_IDS, "1, 2"),
                (ENV_MANAGER_BIN, "/opt/manager"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.bot_token, "env-token");
        assert!(settings.allow_list.is_authorized(Some(2)));
        assert!(!settings.allow_list.is_authorized(Some(7)));
        assert_eq!(settings.manager_binary, PathBuf::from("/opt/manager"));
        assert_eq!(settings.transport, Transport::LongPoll);
    }

    #[test]
    fn file_values_used_without_env() {
        let config: Config = serde_json::from_str(
            r#"{"telegram":{"botToken":"t"},"adminIds":[42],"manager":{"timeoutSecs":5}}"#,
        )
        .unwrap();
        let settings = Settings::resolve_with(&config, env_of(&[])).unwrap();
        assert_eq!(settings.bot_token, "t");
        assert!(settings.allow_list.is_authorized(Some(42)));
        assert_eq!(settings.manager_binary, PathBuf::from(DEFAULT_MANAGER_BIN));
        assert_eq!(settings.timeouts.ordinary, Duration::from_secs(5));
        assert_eq!(settings.timeouts.create, Duration::from_secs(300));
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = Settings::resolve_with(&Config::default(), env_of(&[(ENV_ADMIN_IDS, "1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn missing_or_blank_admin_ids_is_fatal() {
        let err = Settings::resolve_with(
            &Config::default(),
            env_of(&[(ENV_BOT_TOKEN, "t"), (ENV_ADMIN_IDS, " , ")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAdminIds));
    }

    #[test]
    fn malformed_admin_id_is_fatal() {
        let err = Settings::resolve_with(
            &Config::default(),
            env_of(&[(ENV_BOT_TOKEN, "t"), (ENV_ADMIN_IDS, "1,abc")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAdminId(ref s) if s == "abc"));
    }

    #[test]
    fn webhook_url_selects_webhook_transport() {
        let mut config = Config::default();
        config.telegram.webhook_url = Some("https://bot.example.com/telegram/webhook".to_string());
        config.telegram.webhook_secret = Some("  ".to_string());
        let settings = Settings::resolve_with(
            &config,
            env_of(&[(ENV_BOT_TOKEN, "t"), (ENV_ADMIN_IDS, "1")]),
        )
        .unwrap();
        assert_eq!(
            settings.transport,
            Transport::Webhook {
                url: "https://bot.example.com/telegram/webhook".to_string(),
                secret: None,
                bind: "127.0.0.1".to_string(),
                port: 8443,
            }
        );
    }

    #[test]
    fn debug_output_redacts_token() {
        let settings = Settings::resolve_with(
            &Config::default(),
            env_of(&[(ENV_BOT_TOKEN, "123:secret"), (ENV_ADMIN_IDS, "1")]),
        )
        .unwrap();
        let dbg = format!("{:?}", settings);
        assert!(!dbg.contains("123:secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
