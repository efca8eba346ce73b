//! Application configuration module
//! Handles environment variable loading, configuration validation, and per-role settings

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub role: NodeRole,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
    pub payouts: PayoutConfig,
    /// Set on box nodes.
    pub box_node: Option<BoxNodeConfig>,
    /// Tokens accepted from boxes; used on the backend.
    pub box_registry: BoxRegistry,
}

/// Which side of the payout saga this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Backend,
    Box,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where ledger rows and queue jobs live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub ledger: LedgerBackendKind,
    pub queue: QueueBackendKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackendKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackendKind {
    Redis,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Job queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub concurrency: usize,
    pub poll_timeout_secs: u64,
    pub prefix: String,
    /// Re-queue jobs left reserved by a previous run at startup. Only safe
    /// when this process is the sole consumer of its queues.
    pub recover_on_start: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// How concurrent payouts for the same worker are serialized around the
/// balance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceLockMode {
    PerWorker,
    None,
}

/// Payout defaults
#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub currency: String,
    pub mode: String,
    pub verification_amount: Decimal,
    pub source_account: String,
    pub balance_lock_mode: BalanceLockMode,
}

/// Identity of this box and where its backend lives.
#[derive(Debug, Clone)]
pub struct BoxNodeConfig {
    pub box_id: String,
    pub id_token: String,
    pub backend_base_url: String,
    pub backend_timeout_secs: u64,
}

/// Box tokens accepted by the backend, keyed by token.
#[derive(Debug, Clone, Default)]
pub struct BoxRegistry {
    boxes_by_token: HashMap<String, String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let role = NodeRole::from_env()?;
        let storage = StorageConfig::from_env()?;
        let database = match storage.ledger {
            LedgerBackendKind::Postgres => Some(DatabaseConfig::from_env()?),
            LedgerBackendKind::Memory => None,
        };
        let box_node = match role {
            NodeRole::Box => Some(BoxNodeConfig::from_env()?),
            NodeRole::Backend => None,
        };
        let box_registry = match role {
            NodeRole::Backend => BoxRegistry::parse(&env::var("BOX_TOKENS").unwrap_or_default())?,
            NodeRole::Box => BoxRegistry::default(),
        };

        Ok(AppConfig {
            role,
            server: ServerConfig::from_env()?,
            storage,
            database,
            queue: QueueConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payouts: PayoutConfig::from_env(role)?,
            box_node,
            box_registry,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if self.storage.queue == QueueBackendKind::Redis {
            self.queue.validate()?;
        }
        self.logging.validate()?;
        self.payouts.validate()?;
        if let Some(box_node) = &self.box_node {
            box_node.validate()?;
        }
        if self.role == NodeRole::Backend && self.box_registry.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "BOX_TOKENS must list at least one box on the backend".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

impl NodeRole {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse(&env::var("NODE_ROLE").unwrap_or_else(|_| "backend".to_string()))
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "backend" | "server" => Ok(NodeRole::Backend),
            "box" => Ok(NodeRole::Box),
            _ => Err(ConfigError::InvalidValue("NODE_ROLE".to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Backend => "backend",
            NodeRole::Box => "box",
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl StorageConfig {
    /// `SKIP_EXTERNALS=true` switches both backends to memory for local runs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let skip_externals = env::var("SKIP_EXTERNALS")
            .map(|v| v == "true")
            .unwrap_or(false);
        let default_ledger = if skip_externals { "memory" } else { "postgres" };
        let default_queue = if skip_externals { "memory" } else { "redis" };

        let ledger = match env::var("LEDGER_BACKEND")
            .unwrap_or_else(|_| default_ledger.to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => LedgerBackendKind::Postgres,
            "memory" => LedgerBackendKind::Memory,
            _ => return Err(ConfigError::InvalidValue("LEDGER_BACKEND".to_string())),
        };
        let queue = match env::var("QUEUE_BACKEND")
            .unwrap_or_else(|_| default_queue.to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => QueueBackendKind::Redis,
            "memory" => QueueBackendKind::Memory,
            _ => return Err(ConfigError::InvalidValue("QUEUE_BACKEND".to_string())),
        };

        Ok(StorageConfig { ledger, queue })
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 20,
            concurrency: 1000,
            poll_timeout_secs: 5,
            prefix: "gigpay".to_string(),
            recover_on_start: true,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(QueueConfig {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            max_connections: parse_var("QUEUE_MAX_CONNECTIONS", "20")?,
            concurrency: parse_var("QUEUE_CONCURRENCY", "1000")?,
            poll_timeout_secs: parse_var("QUEUE_POLL_TIMEOUT_SECS", "5")?,
            prefix: env::var("QUEUE_PREFIX").unwrap_or(defaults.prefix),
            recover_on_start: parse_var("QUEUE_RECOVER_ON_START", "true")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        // Basic validation of Redis URL format
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue("QUEUE_CONCURRENCY".to_string()));
        }

        if self.poll_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "QUEUE_POLL_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl BalanceLockMode {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "per_worker" => Ok(BalanceLockMode::PerWorker),
            "none" => Ok(BalanceLockMode::None),
            _ => Err(ConfigError::InvalidValue("BALANCE_LOCK_MODE".to_string())),
        }
    }
}

impl PayoutConfig {
    pub fn from_env(role: NodeRole) -> Result<Self, ConfigError> {
        let source_account = match role {
            NodeRole::Backend => required_var("GATEWAY_SOURCE_ACCOUNT")?,
            NodeRole::Box => env::var("GATEWAY_SOURCE_ACCOUNT").unwrap_or_default(),
        };

        Ok(PayoutConfig {
            currency: env::var("PAYOUT_CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            mode: env::var("PAYOUT_MODE").unwrap_or_else(|_| "IMPS".to_string()),
            verification_amount: parse_var("VERIFICATION_AMOUNT", "1")?,
            source_account,
            balance_lock_mode: BalanceLockMode::parse(
                &env::var("BALANCE_LOCK_MODE").unwrap_or_else(|_| "per_worker".to_string()),
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidValue("PAYOUT_CURRENCY".to_string()));
        }

        if self.verification_amount <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue(
                "VERIFICATION_AMOUNT must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl BoxNodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(BoxNodeConfig {
            box_id: required_var("BOX_ID")?,
            id_token: required_var("BOX_ID_TOKEN")?,
            backend_base_url: required_var("BACKEND_BASE_URL")?,
            backend_timeout_secs: parse_var("BACKEND_TIMEOUT_SECS", "30")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backend_base_url.starts_with("http://")
            && !self.backend_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "BACKEND_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.backend_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("BACKEND_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

impl BoxRegistry {
    /// Parse `box_id=token,box_id=token`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let mut boxes_by_token = HashMap::new();
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (box_id, token) = entry
                .split_once('=')
                .map(|(b, t)| (b.trim(), t.trim()))
                .filter(|(b, t)| !b.is_empty() && !t.is_empty())
                .ok_or_else(|| ConfigError::InvalidValue(format!("BOX_TOKENS entry '{}'", entry)))?;
            boxes_by_token.insert(token.to_string(), box_id.to_string());
        }
        Ok(Self { boxes_by_token })
    }

    pub fn with_box(mut self, box_id: &str, token: &str) -> Self {
        self.boxes_by_token
            .insert(token.to_string(), box_id.to_string());
        self
    }

    /// The box id a token belongs to.
    pub fn box_for_token(&self, token: &str) -> Option<&str> {
        self.boxes_by_token.get(token).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.boxes_by_token.is_empty()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_defaults_allow_a_thousand_concurrent_jobs() {
        let config = QueueConfig::default();
        assert_eq!(config.concurrency, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_rejects_non_redis_url() {
        let config = QueueConfig {
            redis_url: "http://localhost:6379".to_string(),
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_box_registry_parsing() {
        let registry = BoxRegistry::parse("box-a=tok-a, box-b = tok-b").unwrap();
        assert_eq!(registry.box_for_token("tok-a"), Some("box-a"));
        assert_eq!(registry.box_for_token("tok-b"), Some("box-b"));
        assert_eq!(registry.box_for_token("box-a"), None);

        assert!(BoxRegistry::parse("box-a").is_err());
        assert!(BoxRegistry::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_balance_lock_mode_parsing() {
        assert_eq!(
            BalanceLockMode::parse("per_worker").unwrap(),
            BalanceLockMode::PerWorker
        );
        assert_eq!(BalanceLockMode::parse("NONE").unwrap(), BalanceLockMode::None);
        assert!(BalanceLockMode::parse("global").is_err());
    }

    #[test]
    fn test_payout_config_rejects_zero_verification_amount() {
        let config = PayoutConfig {
            currency: "INR".to_string(),
            mode: "IMPS".to_string(),
            verification_amount: Decimal::ZERO,
            source_account: "2323230000000000".to_string(),
            balance_lock_mode: BalanceLockMode::PerWorker,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_role_parsing() {
        assert_eq!(NodeRole::parse("box").unwrap(), NodeRole::Box);
        assert_eq!(NodeRole::parse("Backend").unwrap(), NodeRole::Backend);
        assert!(NodeRole::parse("edge").is_err());
    }
}
