use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL for the platform database
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Transaction isolation used for every merge attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Serializable,
    RepeatableRead,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
        }
    }
}

/// Account merge settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MergeConfig {
    pub isolation: IsolationLevel,
    /// Attempts per merge, including the first. Only serialization
    /// conflicts and deadlocks are retried.
    pub max_attempts: u32,
    /// Backoff before retry N is `retry_backoff_ms * N`
    pub retry_backoff_ms: u64,
    /// Upper bound for a single attempt; the transaction is rolled back on expiry
    pub timeout_ms: Option<u64>,
    /// Applied with `SET LOCAL lock_timeout`
    pub lock_timeout_ms: Option<u64>,
    /// Schema probed for optional tables
    pub schema: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            max_attempts: 3,
            retry_backoff_ms: 50,
            timeout_ms: None,
            lock_timeout_ms: Some(5000),
            schema: "public".to_string(),
        }
    }
}

impl MergeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
