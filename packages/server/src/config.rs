use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::{DlqConfig, QueueAppConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Default: 20.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Bearer token accepted by the admin API.
    pub admin_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: QueueAppConfig,
    #[serde(default)]
    pub dlq: DlqConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("JOBQ_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("database.url", "sqlite://jobq.db?mode=rwc")?
            // Load from config/config.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., JOBQ__AUTH__ADMIN_TOKEN)
            .add_source(Environment::with_prefix("JOBQ").separator("__"))
            .set_override_option("queue.max_attempts", std::env::var("MAX_ATTEMPTS").ok())?
            .set_override_option(
                "queue.backoff_base_ms",
                std::env::var("BACKOFF_BASE_MS").ok(),
            )?
            .build()?;

        let config: Self = s.try_deserialize()?;
        if config.queue.max_attempts == 0 {
            return Err(ConfigError::Message(
                "queue.max_attempts must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}
