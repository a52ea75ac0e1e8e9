//! Configuration for the storefront service
//!
//! Values come from the process environment, after `.env` has been loaded.

use crate::payment::{TinkoffConfig, DEFAULT_API_URL};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Main service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Public base URL, used for asset links and payment callbacks
    pub app_url: String,
    /// In-memory storage when absent
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    /// Bearer token for `/admin`; admin routes reject everything when unset
    pub admin_token: Option<String>,
    pub tinkoff_terminal_key: Option<String>,
    pub tinkoff_password: Option<String>,
    pub tinkoff_api_url: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_admin_chats: Vec<String>,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            app_url: "http://localhost:8083".to_string(),
            database_url: None,
            database_max_connections: 10,
            nats_url: None,
            admin_token: None,
            tinkoff_terminal_key: None,
            tinkoff_password: None,
            tinkoff_api_url: DEFAULT_API_URL.to_string(),
            telegram_bot_token: None,
            telegram_admin_chats: Vec::new(),
            log_json: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            port: parse(get("PORT"), "PORT", defaults.port)?,
            app_url: get("APP_URL").map(|u| u.trim_end_matches('/').to_string()).unwrap_or(defaults.app_url),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(get("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            nats_url: get("NATS_URL"),
            admin_token: get("ADMIN_TOKEN"),
            tinkoff_terminal_key: get("TINKOFF_TERMINAL_KEY"),
            tinkoff_password: get("TINKOFF_PASSWORD"),
            tinkoff_api_url: get("TINKOFF_API_URL").unwrap_or(defaults.tinkoff_api_url),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_admin_chats: get("TELEGRAM_ADMIN_CHATS")
                .map(|v| v.split(',').map(str::trim).filter(|c| !c.is_empty()).map(String::from).collect())
                .unwrap_or_default(),
            log_json: parse(get("LOG_JSON"), "LOG_JSON", false)?,
        })
    }

    /// Payment gateway settings, present only when both credentials are set.
    pub fn tinkoff(&self) -> Option<TinkoffConfig> {
        Some(TinkoffConfig {
            terminal_key: self.tinkoff_terminal_key.clone()?,
            password: self.tinkoff_password.clone()?,
            api_url: self.tinkoff_api_url.clone(),
            notification_url: self.url("/payment/notification"),
        })
    }

    /// Absolute URL for a path on this service.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.app_url, path.trim_start_matches('/'))
    }
}

fn parse<T: std::str::FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}
