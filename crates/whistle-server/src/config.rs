use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use whistle_core::AppConfig;
use whistle_util::pagination::HistoryWindow;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Allowed browser origin (the frontend URL). Unset allows any origin.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_origin: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub engine: DatabaseEngine,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Sqlite,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

impl From<DatabaseEngine> for whistle_db::DatabaseEngine {
    fn from(engine: DatabaseEngine) -> Self {
        match engine {
            DatabaseEngine::Sqlite => Self::Sqlite,
            DatabaseEngine::Postgres => Self::Postgres,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default = "default_history_limit")]
    pub history_default_limit: u32,
    #[serde(default = "default_history_max_limit")]
    pub history_max_limit: u32,
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    #[serde(default)]
    pub strict_sender_identity: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_default_limit: default_history_limit(),
            history_max_limit: default_history_max_limit(),
            storage_timeout_ms: default_storage_timeout_ms(),
            channel_buffer: default_channel_buffer(),
            strict_sender_identity: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_ws_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_ws_messages_per_minute")]
    pub max_messages_per_minute: u32,
    #[serde(default = "default_ws_typing_per_minute")]
    pub max_typing_events_per_minute: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: default_ws_max_connections(),
            max_messages_per_minute: default_ws_messages_per_minute(),
            max_typing_events_per_minute: default_ws_typing_per_minute(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:4004".into()
}
fn default_database_url() -> String {
    "sqlite://./data/whistle.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    10
}
fn default_history_limit() -> u32 {
    whistle_util::pagination::DEFAULT_HISTORY_LIMIT
}
fn default_history_max_limit() -> u32 {
    whistle_util::pagination::MAX_HISTORY_LIMIT
}
fn default_storage_timeout_ms() -> u64 {
    5_000
}
fn default_channel_buffer() -> usize {
    whistle_core::registry::DEFAULT_CHANNEL_BUFFER
}
fn default_ws_max_connections() -> usize {
    2_000
}
fn default_ws_messages_per_minute() -> u32 {
    240
}
fn default_ws_typing_per_minute() -> u32 {
    120
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} value '{}'", name, value);
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("Ignoring invalid {} value '{}'; expected true or false", name, value);
            None
        }
    }
}

fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Whistle Chat Service Configuration
# Generated automatically on first run. Edit as needed.
# Every value can be overridden with a WHISTLE_* environment variable.

[server]
bind_address = "{bind_address}"
# Frontend origin allowed by CORS. Leave unset to allow any origin.
# cors_origin = "https://app.example.com"

[database]
# "sqlite" or "postgres"
engine = "{db_engine}"
url = "{db_url}"
max_connections = {max_connections}

[chat]
history_default_limit = {history_default_limit}
history_max_limit = {history_max_limit}
storage_timeout_ms = {storage_timeout_ms}
# Outbound events buffered per client channel before new ones are dropped.
channel_buffer = {channel_buffer}
# Reject channel sends whose senderId differs from the joined user.
strict_sender_identity = {strict_sender_identity}

[gateway]
max_connections = {ws_max_connections}
max_messages_per_minute = {ws_messages}
max_typing_events_per_minute = {ws_typing}
"#,
        bind_address = config.server.bind_address,
        db_engine = config.database.engine.as_str(),
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        history_default_limit = config.chat.history_default_limit,
        history_max_limit = config.chat.history_max_limit,
        storage_timeout_ms = config.chat.storage_timeout_ms,
        channel_buffer = config.chat.channel_buffer,
        strict_sender_identity = config.chat.strict_sender_identity,
        ws_max_connections = config.gateway.max_connections,
        ws_messages = config.gateway.max_messages_per_minute,
        ws_typing = config.gateway.max_typing_events_per_minute,
    )
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("WHISTLE_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("WHISTLE_CORS_ORIGIN") {
            self.server.cors_origin = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Ok(value) = std::env::var("WHISTLE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Ok(value) = std::env::var("WHISTLE_DATABASE_ENGINE") {
            match value.trim().to_ascii_lowercase().as_str() {
                "sqlite" => self.database.engine = DatabaseEngine::Sqlite,
                "postgres" | "postgresql" => self.database.engine = DatabaseEngine::Postgres,
                _ => {
                    tracing::warn!(
                        "Ignoring invalid WHISTLE_DATABASE_ENGINE value '{}'; expected sqlite or postgres",
                        value
                    );
                }
            }
        }
        if let Some(value) = env_parse("WHISTLE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = value;
        }
        if let Some(value) = env_parse("WHISTLE_HISTORY_DEFAULT_LIMIT") {
            self.chat.history_default_limit = value;
        }
        if let Some(value) = env_parse("WHISTLE_HISTORY_MAX_LIMIT") {
            self.chat.history_max_limit = value;
        }
        if let Some(value) = env_parse("WHISTLE_STORAGE_TIMEOUT_MS") {
            self.chat.storage_timeout_ms = value;
        }
        if let Some(value) = env_parse("WHISTLE_CHANNEL_BUFFER") {
            self.chat.channel_buffer = value;
        }
        if let Some(value) = env_bool("WHISTLE_STRICT_SENDER_IDENTITY") {
            self.chat.strict_sender_identity = value;
        }
        if let Some(value) = env_parse("WHISTLE_WS_MAX_CONNECTIONS") {
            self.gateway.max_connections = value;
        }
        if let Some(value) = env_parse("WHISTLE_WS_MAX_MESSAGES_PER_MINUTE") {
            self.gateway.max_messages_per_minute = value;
        }
        if let Some(value) = env_parse("WHISTLE_WS_MAX_TYPING_EVENTS_PER_MINUTE") {
            self.gateway.max_typing_events_per_minute = value;
        }
    }

    /// Publishes gateway limits where the WebSocket layer reads them.
    pub fn export_gateway_limits(&self) {
        std::env::set_var(
            "WHISTLE_WS_MAX_CONNECTIONS",
            self.gateway.max_connections.to_string(),
        );
        std::env::set_var(
            "WHISTLE_WS_MAX_MESSAGES_PER_MINUTE",
            self.gateway.max_messages_per_minute.to_string(),
        );
        std::env::set_var(
            "WHISTLE_WS_MAX_TYPING_EVENTS_PER_MINUTE",
            self.gateway.max_typing_events_per_minute.to_string(),
        );
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            history: HistoryWindow::new(
                self.chat.history_default_limit,
                self.chat.history_max_limit,
            ),
            storage_timeout: Duration::from_millis(self.chat.storage_timeout_ms.max(1)),
            channel_buffer: self.chat.channel_buffer.max(1),
            strict_sender_identity: self.chat.strict_sender_identity,
            cors_origin: self.server.cors_origin.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{generate_config_template, Config, DatabaseConfig, DatabaseEngine};
    use std::time::Duration;

    #[test]
    fn database_defaults_to_sqlite_engine() {
        let db = DatabaseConfig::default();
        assert_eq!(db.engine, DatabaseEngine::Sqlite);
        assert!(db.url.starts_with("sqlite://"));
    }

    #[test]
    fn generated_template_parses_back_to_defaults() {
        let template = generate_config_template(&Config::default());
        let parsed: Config = toml::from_str(&template).expect("template is valid toml");
        assert_eq!(parsed.server.bind_address, "0.0.0.0:4004");
        assert_eq!(parsed.chat.history_default_limit, 50);
        assert_eq!(parsed.chat.history_max_limit, 100);
        assert_eq!(parsed.gateway.max_connections, 2_000);
        assert!(!parsed.chat.strict_sender_identity);
    }

    #[test]
    fn load_writes_template_when_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("nested").join("whistle.toml");
        let path = config_path.to_str().expect("config path utf8");
        Config::load(path).expect("load config");
        assert!(config_path.exists());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("whistle.toml");
        std::fs::write(&config_path, "[chat]\nstorage_timeout_ms = 250\n").expect("write");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        let app = config.app_config();
        assert_eq!(app.storage_timeout, Duration::from_millis(250));
        assert_eq!(app.history.max_limit, 100);
    }

    #[test]
    fn env_override_wins_over_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("whistle.toml");
        std::fs::write(&config_path, "[database]\nengine = \"sqlite\"\n").expect("write");
        std::env::set_var("WHISTLE_DATABASE_ENGINE", "postgres");
        std::env::set_var("WHISTLE_STRICT_SENDER_IDENTITY", "true");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("WHISTLE_DATABASE_ENGINE");
        std::env::remove_var("WHISTLE_STRICT_SENDER_IDENTITY");
        assert_eq!(config.database.engine, DatabaseEngine::Postgres);
        assert!(config.chat.strict_sender_identity);
    }
}
