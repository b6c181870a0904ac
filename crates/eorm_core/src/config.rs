use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::DialectTag;
use crate::error::EormError;

/// Per-handle configuration: pool sizing, timeouts, monitor cadence, and
/// which cross-cutting policies are active for this database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(with = "dialect_tag_serde_impl")]
    pub dialect: DialectTag,
    pub dsn: String,
    #[serde(default = "default_max_open")]
    pub max_open: u32,
    #[serde(default = "default_max_idle")]
    pub max_idle: u32,
    #[serde(default)]
    pub conn_max_lifetime: Option<Duration>,
    #[serde(default)]
    pub query_timeout: Option<Duration>,
    #[serde(default = "default_monitor_healthy")]
    pub monitor_interval_healthy: Duration,
    #[serde(default = "default_monitor_unhealthy")]
    pub monitor_interval_unhealthy: Duration,
    #[serde(default)]
    pub timestamps_enabled: bool,
    #[serde(default)]
    pub soft_delete_enabled: bool,
    #[serde(default)]
    pub optimistic_lock_enabled: bool,
}

fn default_max_open() -> u32 {
    10
}
fn default_max_idle() -> u32 {
    2
}
fn default_monitor_healthy() -> Duration {
    Duration::from_secs(30)
}
fn default_monitor_unhealthy() -> Duration {
    Duration::from_secs(5)
}

impl DatabaseConfig {
    pub fn new(dialect: DialectTag, dsn: impl Into<String>) -> Self {
        Self {
            dialect,
            dsn: dsn.into(),
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            conn_max_lifetime: None,
            query_timeout: None,
            monitor_interval_healthy: default_monitor_healthy(),
            monitor_interval_unhealthy: default_monitor_unhealthy(),
            timestamps_enabled: false,
            soft_delete_enabled: false,
            optimistic_lock_enabled: false,
        }
    }
}

mod dialect_tag_serde_impl {
    use super::DialectTag;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(tag: &DialectTag, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(tag.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DialectTag, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.as_str() {
            "mysql" => Ok(DialectTag::MySql),
            "postgres" => Ok(DialectTag::Postgres),
            "sqlite" => Ok(DialectTag::Sqlite),
            "mssql" => Ok(DialectTag::MsSql),
            "oracle" => Ok(DialectTag::Oracle),
            other => Err(serde::de::Error::custom(format!("unknown dialect: {other}"))),
        }
    }
}

/// Process-wide defaults plus a set of named per-handle configs, loadable
/// from a JSON file the same way `AppConfigStore` loads its on-disk config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EormConfig {
    #[serde(default)]
    pub databases: Vec<NamedDatabaseConfig>,
    #[serde(default)]
    pub default_cache_backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedDatabaseConfig {
    pub name: String,
    #[serde(flatten)]
    pub config: DatabaseConfig,
}

pub struct EormConfigStore {
    path: PathBuf,
}

impl EormConfigStore {
    pub fn new() -> Result<Self, EormError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EormError::Io(std::io::Error::other("could not find config directory")))?;
        let app_dir = config_dir.join("eorm");
        fs::create_dir_all(&app_dir)?;
        Ok(Self {
            path: app_dir.join("config.json"),
        })
    }

    pub fn load(&self) -> Result<EormConfig, EormError> {
        if !self.path.exists() {
            return Ok(EormConfig::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_documented_interval_defaults() {
        let cfg = DatabaseConfig::new(DialectTag::Postgres, "postgres://localhost/db");
        assert_eq!(cfg.max_open, 10);
        assert_eq!(cfg.monitor_interval_healthy, Duration::from_secs(30));
        assert_eq!(cfg.monitor_interval_unhealthy, Duration::from_secs(5));
        assert!(cfg.query_timeout.is_none());
    }

    #[test]
    fn missing_config_file_yields_default() {
        // Constructing the store touches the real config dir; loading from
        // a path guaranteed not to exist must not error.
        let store = EormConfigStore {
            path: PathBuf::from("/nonexistent/eorm-config-test/config.json"),
        };
        let cfg = store.load().unwrap();
        assert!(cfg.databases.is_empty());
    }
}
