//! Containerized driver shared by the relational engines.
//!
//! The engines differ only in their [`EngineProfile`]: image, internal port,
//! environment variables, and data directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use deploydb_core::{ConnectionDescriptor, Engine, EngineConfig, ServerConfig};
use deploydb_state::{epoch_secs, Deployment, Journal};

use crate::driver::{BackendDriver, StepOutcome, TeardownReport};
use crate::error::{DriverError, DriverResult};
use crate::readiness::ReadinessPoller;
use crate::runtime::{
    container_name, labels_for, volume_name, ContainerRuntime, ContainerSpec, RuntimeError,
    VolumeMount,
};

/// Host address published ports are bound to.
pub const LOOPBACK: &str = "127.0.0.1";

/// Per-engine container settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProfile {
    pub engine: Engine,
    pub image: String,
    pub internal_port: u16,
    pub data_dir: &'static str,
}

impl EngineProfile {
    pub fn mysql(image: impl Into<String>) -> Self {
        Self {
            engine: Engine::Mysql,
            image: image.into(),
            internal_port: 3306,
            data_dir: "/var/lib/mysql",
        }
    }

    pub fn postgres(image: impl Into<String>) -> Self {
        Self {
            engine: Engine::Postgres,
            image: image.into(),
            internal_port: 5432,
            data_dir: "/var/lib/postgresql/data",
        }
    }

    /// Profile for a containerized engine, `None` for embedded-file engines.
    pub fn for_engine(engine: Engine, image: impl Into<String>) -> Option<Self> {
        match engine {
            Engine::Mysql => Some(Self::mysql(image)),
            Engine::Postgres => Some(Self::postgres(image)),
            Engine::Sqlite => None,
        }
    }

    /// Container environment for the given credentials.
    pub fn env(&self, server: &ServerConfig, database: &str) -> Vec<String> {
        match self.engine {
            Engine::Mysql => vec![
                format!("MYSQL_ROOT_PASSWORD={}", server.root_password()),
                format!("MYSQL_DATABASE={database}"),
                format!("MYSQL_USER={}", server.username()),
                format!("MYSQL_PASSWORD={}", server.password()),
            ],
            Engine::Postgres => vec![
                format!("POSTGRES_DB={database}"),
                format!("POSTGRES_USER={}", server.username()),
                format!("POSTGRES_PASSWORD={}", server.password()),
            ],
            Engine::Sqlite => Vec::new(),
        }
    }
}

/// Runs a database server in a container and waits for its port mapping.
pub struct ContainerDriver {
    runtime: Arc<dyn ContainerRuntime>,
    profile: EngineProfile,
    poller: ReadinessPoller,
    stop_grace: Duration,
}

impl ContainerDriver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        profile: EngineProfile,
        poller: ReadinessPoller,
        stop_grace: Duration,
    ) -> Self {
        Self {
            runtime,
            profile,
            poller,
            stop_grace,
        }
    }

    /// Resolve the container to tear down: the recorded handle, else a label
    /// lookup for containers whose handle was never persisted.
    async fn resolve_container(
        &self,
        deployment: &Deployment,
        journal: &Journal,
        report: &mut TeardownReport,
    ) -> Option<String> {
        if let Some(container) = &deployment.container_ref {
            return Some(container.clone());
        }
        match self.runtime.find_container(&deployment.id).await {
            Ok(Some(container)) => {
                journal.log(format!("Found unrecorded container {container} by label"));
                Some(container)
            }
            Ok(None) => None,
            Err(e) => {
                report.record(journal, "locate container", StepOutcome::Failed(e.to_string()));
                None
            }
        }
    }
}

fn step_outcome(result: Result<(), RuntimeError>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Done,
        Err(RuntimeError::NotFound(_)) => StepOutcome::Skipped("already absent".to_string()),
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

#[async_trait]
impl BackendDriver for ContainerDriver {
    async fn provision(
        &self,
        deployment: &Deployment,
        config: &EngineConfig,
        journal: &Journal,
    ) -> DriverResult<ConnectionDescriptor> {
        let server = config.server().ok_or_else(|| {
            DriverError::Configuration(format!(
                "{} config cannot realize a {} server",
                config.kind(),
                self.profile.engine
            ))
        })?;
        let image = &self.profile.image;

        journal.log(format!("Pulling image {image}..."));
        self.runtime
            .pull_image(image)
            .await
            .map_err(|e| DriverError::ImagePull {
                image: image.clone(),
                message: e.to_string(),
            })?;
        journal.log("Image pulled.");

        let labels = labels_for(&deployment.id);
        let volume = volume_name(&deployment.id);
        let mount = match self.runtime.create_volume(&volume, &labels).await {
            Ok(()) => {
                journal.log(format!("Volume {volume} created."));
                Some(VolumeMount {
                    name: volume,
                    target: self.profile.data_dir.to_string(),
                })
            }
            Err(e) => {
                journal.warn(format!(
                    "Volume creation warning: {e}. Continuing with an anonymous volume; data will not outlive the container."
                ));
                None
            }
        };

        let database = server.database(&deployment.name);
        let spec = ContainerSpec {
            name: container_name(&deployment.id, epoch_secs()),
            image: image.clone(),
            env: self.profile.env(server, &database),
            internal_port: self.profile.internal_port,
            volume: mount,
            labels,
        };
        let container = self
            .runtime
            .run_container(&spec)
            .await
            .map_err(|e| DriverError::ContainerStart(e.to_string()))?;

        // Persist before waiting so teardown can find the container even if
        // readiness never arrives.
        journal.set_container_ref(&container)?;
        journal.log(format!("Container started: id={container} name={}", spec.name));
        info!(deployment_id = %deployment.id, %container, engine = %self.profile.engine, "container started");

        journal.log("Waiting for host port mapping...");
        let port = self
            .poller
            .wait_for_port(self.runtime.as_ref(), &container, self.profile.internal_port)
            .await?;
        journal.log(format!("DB available at {LOOPBACK}:{port}"));

        Ok(ConnectionDescriptor::Network {
            engine: self.profile.engine,
            host: LOOPBACK.to_string(),
            port,
            database,
            username: server.username().to_string(),
        })
    }

    async fn teardown(&self, deployment: &Deployment, journal: &Journal) -> TeardownReport {
        let mut report = TeardownReport::new();

        match self.resolve_container(deployment, journal, &mut report).await {
            Some(container) => {
                let stopped = self.runtime.stop_container(&container, self.stop_grace).await;
                report.record(journal, format!("stop container {container}"), step_outcome(stopped));

                let removed = self.runtime.remove_container(&container).await;
                report.record(
                    journal,
                    format!("remove container {container}"),
                    step_outcome(removed),
                );
            }
            None => report.record(
                journal,
                "stop and remove container",
                StepOutcome::Skipped("no container recorded".to_string()),
            ),
        }

        let volume = volume_name(&deployment.id);
        let removed = self.runtime.remove_volume(&volume).await;
        report.record(journal, format!("remove volume {volume}"), step_outcome(removed));

        debug!(deployment_id = %deployment.id, clean = report.is_clean(), "container teardown finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRuntime, RuntimeCall};
    use deploydb_core::Mode;
    use deploydb_state::{NewDeployment, StateStore};

    fn setup(engine: Engine) -> (StateStore, Deployment, Journal) {
        let store = StateStore::open_in_memory().unwrap();
        let d = store
            .create(NewDeployment {
                owner: Some("bob".to_string()),
                name: "bob-db".to_string(),
                engine,
                mode: Mode::Local,
                config_secret: None,
            })
            .unwrap();
        let journal = Journal::new(store.clone(), d.id.clone());
        (store, d, journal)
    }

    fn driver(runtime: Arc<MockRuntime>, profile: EngineProfile) -> ContainerDriver {
        ContainerDriver::new(
            runtime,
            profile,
            ReadinessPoller::new(Duration::from_millis(5), Duration::from_millis(100)),
            Duration::from_secs(1),
        )
    }

    fn server_config() -> EngineConfig {
        EngineConfig::Server(ServerConfig::default())
    }

    fn log_lines(store: &StateStore, id: &str) -> Vec<String> {
        store
            .logs(id)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn mysql_env_uses_fallback_credentials() {
        let env = EngineProfile::mysql("mysql:8.0").env(&ServerConfig::default(), "bob-db");
        assert_eq!(
            env,
            vec![
                "MYSQL_ROOT_PASSWORD=deploydbroot",
                "MYSQL_DATABASE=bob-db",
                "MYSQL_USER=deploydb",
                "MYSQL_PASSWORD=deploydbpass",
            ]
        );
    }

    #[test]
    fn postgres_env_uses_supplied_credentials() {
        let cfg = ServerConfig {
            db_name: Some("app".to_string()),
            db_user: Some("svc".to_string()),
            db_password: Some("pw".to_string()),
            db_root_password: None,
        };
        let env = EngineProfile::postgres("postgres:15").env(&cfg, &cfg.database("ignored"));
        assert_eq!(
            env,
            vec!["POSTGRES_DB=app", "POSTGRES_USER=svc", "POSTGRES_PASSWORD=pw"]
        );
    }

    #[tokio::test]
    async fn provision_publishes_host_port_on_loopback() {
        let rt = Arc::new(MockRuntime::new());
        let (store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt.clone(), EngineProfile::mysql("mysql:8.0"));

        let desc = driver.provision(&d, &server_config(), &journal).await.unwrap();
        match desc {
            ConnectionDescriptor::Network {
                host,
                port,
                database,
                username,
                ..
            } => {
                assert_eq!(host, "127.0.0.1");
                assert!(port > 0);
                assert_ne!(port, 3306);
                assert_eq!(database, "bob-db");
                assert_eq!(username, "deploydb");
            }
            other => panic!("unexpected descriptor: {other:?}"),
        }

        let recorded = store.get(&d.id).unwrap().container_ref.unwrap();
        let spec = rt.container_spec(&recorded).unwrap();
        assert_eq!(spec.internal_port, 3306);
        assert_eq!(
            spec.volume,
            Some(VolumeMount {
                name: volume_name(&d.id),
                target: "/var/lib/mysql".to_string(),
            })
        );
        assert!(spec.name.starts_with(&format!("deploydb_{}_", &d.id[..12])));

        let lines = log_lines(&store, &d.id);
        assert_eq!(lines[0], "Pulling image mysql:8.0...");
        assert!(lines.iter().any(|l| l.starts_with("DB available at 127.0.0.1:")));
    }

    #[tokio::test]
    async fn pull_failure_stops_before_any_container() {
        let rt = Arc::new(MockRuntime::new().with_pull_failure("pull access denied for nope"));
        let (store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt.clone(), EngineProfile::mysql("nope"));

        let err = driver.provision(&d, &server_config(), &journal).await.unwrap_err();
        assert!(matches!(err, DriverError::ImagePull { .. }));
        assert!(err.to_string().contains("pull access denied for nope"));
        assert_eq!(rt.calls(), vec![RuntimeCall::PullImage("nope".to_string())]);
        assert!(store.get(&d.id).unwrap().container_ref.is_none());
    }

    #[tokio::test]
    async fn volume_failure_is_only_a_warning() {
        let rt = Arc::new(MockRuntime::new().with_volume_failure("no space left"));
        let (store, d, journal) = setup(Engine::Postgres);
        let driver = driver(rt.clone(), EngineProfile::postgres("postgres:15"));

        driver.provision(&d, &server_config(), &journal).await.unwrap();

        let container = store.get(&d.id).unwrap().container_ref.unwrap();
        assert_eq!(rt.container_spec(&container).unwrap().volume, None);
        assert!(
            log_lines(&store, &d.id)
                .iter()
                .any(|l| l.starts_with("Volume creation warning: no space left"))
        );
    }

    #[tokio::test]
    async fn start_failure_is_reported() {
        let rt = Arc::new(MockRuntime::new().with_run_failure("port is already allocated"));
        let (store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt, EngineProfile::mysql("mysql:8.0"));

        let err = driver.provision(&d, &server_config(), &journal).await.unwrap_err();
        assert!(matches!(err, DriverError::ContainerStart(_)));
        assert!(store.get(&d.id).unwrap().container_ref.is_none());
    }

    #[tokio::test]
    async fn readiness_timeout_keeps_container_ref() {
        let rt = Arc::new(MockRuntime::new().without_port_mapping());
        let (store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt, EngineProfile::mysql("mysql:8.0"));

        let err = driver.provision(&d, &server_config(), &journal).await.unwrap_err();
        assert!(matches!(err, DriverError::ReadinessTimeout { .. }));
        assert!(store.get(&d.id).unwrap().container_ref.is_some());
    }

    #[tokio::test]
    async fn embedded_config_is_rejected() {
        let rt = Arc::new(MockRuntime::new());
        let (_store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt.clone(), EngineProfile::mysql("mysql:8.0"));

        let err = driver
            .provision(&d, &EngineConfig::EmbeddedFile, &journal)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        assert!(rt.calls().is_empty());
    }

    #[tokio::test]
    async fn teardown_removes_everything() {
        let rt = Arc::new(MockRuntime::new());
        let (store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt.clone(), EngineProfile::mysql("mysql:8.0"));
        driver.provision(&d, &server_config(), &journal).await.unwrap();

        let d = store.get(&d.id).unwrap();
        let report = driver.teardown(&d, &journal).await;
        assert!(report.is_clean());
        assert!(rt.containers().is_empty());
        assert!(rt.volumes().is_empty());
    }

    #[tokio::test]
    async fn teardown_continues_after_failed_steps() {
        let rt = Arc::new(
            MockRuntime::new()
                .with_stop_failure("timeout stopping container")
                .with_remove_failure("removal in progress"),
        );
        let (store, d, journal) = setup(Engine::Mysql);
        let driver = driver(rt.clone(), EngineProfile::mysql("mysql:8.0"));
        driver.provision(&d, &server_config(), &journal).await.unwrap();

        let d = store.get(&d.id).unwrap();
        let report = driver.teardown(&d, &journal).await;
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.steps.len(), 3);
        assert!(rt.volumes().is_empty());
        assert!(
            rt.calls()
                .contains(&RuntimeCall::RemoveVolume(volume_name(&d.id)))
        );
    }

    #[tokio::test]
    async fn teardown_finds_unrecorded_container_by_label() {
        let rt = Arc::new(MockRuntime::new());
        let (store, d, journal) = setup(Engine::Postgres);
        let driver = driver(rt.clone(), EngineProfile::postgres("postgres:15"));
        driver.provision(&d, &server_config(), &journal).await.unwrap();

        // Simulate a handle that never made it into the record.
        let mut d = store.get(&d.id).unwrap();
        d.container_ref = None;
        let report = driver.teardown(&d, &journal).await;
        assert!(report.is_clean());
        assert!(rt.containers().is_empty());
        assert!(rt.calls().contains(&RuntimeCall::FindContainer(d.id.clone())));
    }
}
