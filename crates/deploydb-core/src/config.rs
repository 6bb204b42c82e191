//! deploydb.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Engine;

/// Environment variable that overrides `[vault] key`.
pub const VAULT_KEY_ENV: &str = "DEPLOYDB_VAULT_KEY";

const DEFAULT_DATA_DIR: &str = "/var/lib/deploydb";
const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_READINESS_BUDGET: Duration = Duration::from_secs(120);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONCURRENT: usize = 4;
const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub vault: Option<VaultConfig>,
    pub storage: Option<StorageConfig>,
    pub files: Option<FilesConfig>,
    pub readiness: Option<ReadinessConfig>,
    pub teardown: Option<TeardownConfig>,
    pub workers: Option<WorkersConfig>,
    pub images: Option<ImagesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Base64-encoded 32-byte key.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesConfig {
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub interval: Option<String>,
    pub budget: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeardownConfig {
    pub stop_grace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub max_concurrent: Option<usize>,
    pub queue_depth: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesConfig {
    pub mysql: Option<String>,
    pub postgres: Option<String>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(VAULT_KEY_ENV) {
            if !key.trim().is_empty() {
                self.vault.get_or_insert_with(VaultConfig::default).key = Some(key);
            }
        }
    }

    pub fn vault_key(&self) -> Option<&str> {
        self.vault.as_ref()?.key.as_deref()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Path of the redb file holding deployment records.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("deploydb.redb")
    }

    /// Root directory for embedded-file databases.
    pub fn files_dir(&self) -> PathBuf {
        self.files
            .as_ref()
            .and_then(|f| f.base_dir.clone())
            .unwrap_or_else(|| self.data_dir().join("files"))
    }

    pub fn readiness_interval(&self) -> Duration {
        self.readiness
            .as_ref()
            .and_then(|r| r.interval.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_READINESS_INTERVAL)
    }

    pub fn readiness_budget(&self) -> Duration {
        self.readiness
            .as_ref()
            .and_then(|r| r.budget.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_READINESS_BUDGET)
    }

    pub fn stop_grace(&self) -> Duration {
        self.teardown
            .as_ref()
            .and_then(|t| t.stop_grace.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_STOP_GRACE)
    }

    pub fn max_concurrent(&self) -> usize {
        self.workers
            .as_ref()
            .and_then(|w| w.max_concurrent)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT)
    }

    pub fn queue_depth(&self) -> usize {
        self.workers
            .as_ref()
            .and_then(|w| w.queue_depth)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_QUEUE_DEPTH)
    }

    /// Container image for a containerized engine. `None` for sqlite.
    pub fn image(&self, engine: Engine) -> Option<String> {
        let images = self.images.clone().unwrap_or_default();
        match engine {
            Engine::Sqlite => None,
            Engine::Mysql => Some(images.mysql.unwrap_or_else(|| "mysql:8.0".to_string())),
            Engine::Postgres => {
                Some(images.postgres.unwrap_or_else(|| "postgres:15".to_string()))
            }
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config.readiness_interval(), Duration::from_secs(2));
        assert_eq!(config.readiness_budget(), Duration::from_secs(120));
        assert_eq!(config.stop_grace(), Duration::from_secs(10));
        assert_eq!(config.max_concurrent(), 4);
        assert_eq!(config.queue_depth(), 64);
        assert_eq!(config.image(Engine::Mysql).as_deref(), Some("mysql:8.0"));
        assert_eq!(config.image(Engine::Postgres).as_deref(), Some("postgres:15"));
        assert_eq!(config.image(Engine::Sqlite), None);
        assert!(config.vault_key().is_none());
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/deploydb/deploydb.redb"));
        assert_eq!(config.files_dir(), PathBuf::from("/var/lib/deploydb/files"));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[vault]
key = "abc"

[storage]
data_dir = "/tmp/deploydb"

[files]
base_dir = "/srv/sqlite"

[readiness]
interval = "500ms"
budget = "1m"

[teardown]
stop_grace = "3s"

[workers]
max_concurrent = 2
queue_depth = 8

[images]
postgres = "postgres:16-alpine"
"#;
        let config: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.vault_key(), Some("abc"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/deploydb/deploydb.redb"));
        assert_eq!(config.files_dir(), PathBuf::from("/srv/sqlite"));
        assert_eq!(config.readiness_interval(), Duration::from_millis(500));
        assert_eq!(config.readiness_budget(), Duration::from_secs(60));
        assert_eq!(config.stop_grace(), Duration::from_secs(3));
        assert_eq!(config.max_concurrent(), 2);
        assert_eq!(config.queue_depth(), 8);
        assert_eq!(
            config.image(Engine::Postgres).as_deref(),
            Some("postgres:16-alpine")
        );
        assert_eq!(config.image(Engine::Mysql).as_deref(), Some("mysql:8.0"));
    }

    #[test]
    fn zero_workers_falls_back_to_default() {
        let config: DaemonConfig =
            toml::from_str("[workers]\nmax_concurrent = 0\nqueue_depth = 0\n").unwrap();
        assert_eq!(config.max_concurrent(), 4);
        assert_eq!(config.queue_depth(), 64);
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn config_round_trips_to_toml() {
        let config = DaemonConfig {
            workers: Some(WorkersConfig {
                max_concurrent: Some(3),
                queue_depth: None,
            }),
            ..Default::default()
        };
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("max_concurrent = 3"));
    }
}
