//! Embedded-file driver: one local data file per deployment.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use deploydb_core::{ConnectionDescriptor, Engine, EngineConfig};
use deploydb_state::{Deployment, Journal};

use crate::driver::{BackendDriver, StepOutcome, TeardownReport};
use crate::error::{DriverError, DriverResult};

/// Directory used for deployments without an owner. `~` never appears in a
/// plain owner directory and `anonymous` is not hex, so nothing collides.
const ANONYMOUS_OWNER: &str = "~anonymous";
/// Prefix of hex-encoded path components.
const ENCODED_PREFIX: char = '~';
const FILE_EXTENSION: &str = "sqlite3";

/// Realizes embedded-file databases under `base_dir/{owner}/{name}.sqlite3`.
#[derive(Debug, Clone)]
pub struct EmbeddedFileDriver {
    base_dir: PathBuf,
}

impl EmbeddedFileDriver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Data file location for a deployment.
    pub fn path_for(&self, deployment: &Deployment) -> PathBuf {
        let owner = deployment
            .owner
            .as_deref()
            .map(path_component)
            .unwrap_or_else(|| ANONYMOUS_OWNER.to_string());
        self.base_dir
            .join(owner)
            .join(format!("{}.{FILE_EXTENSION}", path_component(&deployment.name)))
    }
}

fn is_plain(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A single path component for `raw`. Distinct inputs always map to
/// distinct components: plain names are used as-is, anything else is
/// hex-encoded behind a `~` prefix.
fn path_component(raw: &str) -> String {
    if is_plain(raw) {
        raw.to_string()
    } else {
        format!("{ENCODED_PREFIX}{}", hex::encode(raw))
    }
}

#[async_trait]
impl BackendDriver for EmbeddedFileDriver {
    async fn provision(
        &self,
        deployment: &Deployment,
        config: &EngineConfig,
        journal: &Journal,
    ) -> DriverResult<ConnectionDescriptor> {
        if *config != EngineConfig::EmbeddedFile {
            return Err(DriverError::Configuration(format!(
                "{} config cannot realize an embedded-file database",
                config.kind()
            )));
        }

        let path = self.path_for(deployment);
        let fs_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DriverError::Filesystem { path, source }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(fs_err(parent))?;
        }

        // Never truncate: re-provisioning must keep existing data.
        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(fs_err(path.as_path()))?;

        if existed {
            journal.log(format!("Reusing existing database file {}", path.display()));
        } else {
            journal.log(format!("Created database file {}", path.display()));
        }
        debug!(deployment_id = %deployment.id, path = %path.display(), existed, "embedded-file database ready");

        Ok(ConnectionDescriptor::File {
            engine: Engine::Sqlite,
            path,
        })
    }

    async fn teardown(&self, deployment: &Deployment, journal: &Journal) -> TeardownReport {
        let path = self.path_for(deployment);
        let action = format!("remove file {}", path.display());
        let outcome = match tokio::fs::remove_file(&path).await {
            Ok(()) => StepOutcome::Done,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                StepOutcome::Skipped("already absent".to_string())
            }
            Err(e) => StepOutcome::Failed(e.to_string()),
        };

        let mut report = TeardownReport::new();
        report.record(journal, action, outcome);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploydb_core::Mode;
    use deploydb_state::{NewDeployment, StateStore};

    fn setup(owner: Option<&str>, name: &str) -> (StateStore, Deployment, Journal) {
        let store = StateStore::open_in_memory().unwrap();
        let d = store
            .create(NewDeployment {
                owner: owner.map(str::to_string),
                name: name.to_string(),
                engine: Engine::Sqlite,
                mode: Mode::Local,
                config_secret: None,
            })
            .unwrap();
        let journal = Journal::new(store.clone(), d.id.clone());
        (store, d, journal)
    }

    #[tokio::test]
    async fn provision_creates_file_under_owner() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_store, d, journal) = setup(Some("alice"), "alice-db");

        let desc = driver
            .provision(&d, &EngineConfig::EmbeddedFile, &journal)
            .await
            .unwrap();

        let expected = dir.path().join("alice").join("alice-db.sqlite3");
        assert_eq!(
            desc,
            ConnectionDescriptor::File {
                engine: Engine::Sqlite,
                path: expected.clone(),
            }
        );
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn anonymous_owner_gets_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_store, d, _journal) = setup(None, "scratch");
        assert_eq!(
            driver.path_for(&d),
            dir.path().join("~anonymous").join("scratch.sqlite3")
        );
    }

    #[tokio::test]
    async fn owner_cannot_escape_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_store, d, _journal) = setup(Some("../../etc"), "db");
        let path = driver.path_for(&d);
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.parent().unwrap().parent().unwrap(), dir.path());
        assert_eq!(
            path,
            dir.path().join("~2e2e2f2e2e2f657463").join("db.sqlite3")
        );
    }

    #[tokio::test]
    async fn owners_differing_in_punctuation_do_not_share_files() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_s1, dotted, j1) = setup(Some("a.b"), "db");
        let (_s2, underscored, j2) = setup(Some("a_b"), "db");
        let (_s3, anonymous, _j3) = setup(None, "db");
        let (_s4, named_anonymous, _j4) = setup(Some("anonymous"), "db");

        assert_ne!(driver.path_for(&dotted), driver.path_for(&underscored));
        assert_ne!(driver.path_for(&anonymous), driver.path_for(&named_anonymous));

        driver
            .provision(&dotted, &EngineConfig::EmbeddedFile, &j1)
            .await
            .unwrap();
        driver
            .provision(&underscored, &EngineConfig::EmbeddedFile, &j2)
            .await
            .unwrap();
        assert!(driver.teardown(&dotted, &j1).await.is_clean());

        assert!(!driver.path_for(&dotted).exists());
        assert!(driver.path_for(&underscored).exists());
    }

    #[tokio::test]
    async fn reprovision_keeps_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (store, d, journal) = setup(Some("alice"), "alice-db");

        driver
            .provision(&d, &EngineConfig::EmbeddedFile, &journal)
            .await
            .unwrap();
        let path = driver.path_for(&d);
        std::fs::write(&path, b"existing rows").unwrap();

        driver
            .provision(&d, &EngineConfig::EmbeddedFile, &journal)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"existing rows");
        let last = store.logs(&d.id).unwrap().pop().unwrap();
        assert!(last.message.starts_with("Reusing existing database file"));
    }

    #[tokio::test]
    async fn teardown_then_provision_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_store, d, journal) = setup(Some("alice"), "alice-db");

        driver
            .provision(&d, &EngineConfig::EmbeddedFile, &journal)
            .await
            .unwrap();
        let path = driver.path_for(&d);
        std::fs::write(&path, b"old data").unwrap();

        let report = driver.teardown(&d, &journal).await;
        assert!(report.is_clean());
        assert!(!path.exists());

        driver
            .provision(&d, &EngineConfig::EmbeddedFile, &journal)
            .await
            .unwrap();
        assert!(std::fs::read(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_of_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_store, d, journal) = setup(Some("alice"), "never-made");

        let report = driver.teardown(&d, &journal).await;
        assert!(report.is_clean());
        assert!(matches!(report.steps[0].outcome, StepOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn server_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let driver = EmbeddedFileDriver::new(dir.path());
        let (_store, d, journal) = setup(None, "db");

        let err = driver
            .provision(&d, &EngineConfig::Server(Default::default()), &journal)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }
}
