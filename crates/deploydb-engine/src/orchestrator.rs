//! Orchestrator — inbound API plus the provisioning and teardown tasks.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use deploydb_core::{
    ConnectionDescriptor, DaemonConfig, Engine, EngineConfig, Mode, validate_name,
};
use deploydb_driver::DriverError;
use deploydb_state::{
    Deployment, DeploymentId, DeploymentStatus, Journal, LogEntry, NewDeployment, StateStore,
};
use deploydb_vault::Vault;

use crate::claims::{Claim, Claims};
use crate::drivers::DriverSet;
use crate::error::{EngineError, EngineResult};
use crate::pool::{TaskFuture, TaskStats, WorkerPool};

/// A request to create a deployment.
#[derive(Debug, Clone)]
pub struct CreateDeployment {
    pub owner: Option<String>,
    pub name: String,
    pub engine: Engine,
    pub mode: Mode,
    /// `None` uses the engine's defaults.
    pub config: Option<EngineConfig>,
}

impl CreateDeployment {
    pub fn new(name: impl Into<String>, engine: Engine) -> Self {
        Self {
            owner: None,
            name: name.into(),
            engine,
            mode: Mode::Local,
            config: None,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn mode(mut self, mode: impl Into<Mode>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// The opened connection descriptor of a running deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResultView {
    Available { connection: ConnectionDescriptor },
    /// The sealed result exists but cannot be opened with the current key.
    Unreadable { reason: String },
}

/// What a caller polling a deployment gets back.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub id: DeploymentId,
    pub owner: Option<String>,
    pub name: String,
    pub engine: Engine,
    pub mode: Mode,
    pub status: DeploymentStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub container_ref: Option<String>,
    pub log: Vec<LogEntry>,
    /// Present only while running.
    pub result: Option<ResultView>,
}

/// What [`Orchestrator::recover_interrupted`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Left in `provisioning` by a previous process; now `failed`.
    pub failed: Vec<DeploymentId>,
    /// Still `pending`; queued again.
    pub redispatched: Vec<DeploymentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Provision,
    Teardown,
}

/// One unit of background work. Holds the deployment's claim until done.
struct Job {
    action: Action,
    claim: Claim,
}

struct Inner {
    store: StateStore,
    vault: Vault,
    drivers: DriverSet,
}

/// Accepts lifecycle requests and runs them on a bounded worker pool.
pub struct Orchestrator {
    inner: Arc<Inner>,
    claims: Claims,
    pool: WorkerPool<Job>,
}

impl Orchestrator {
    /// Create an orchestrator and start its workers. Must be called from
    /// within a tokio runtime.
    pub fn new(
        store: StateStore,
        vault: Vault,
        drivers: DriverSet,
        max_concurrent: usize,
        queue_depth: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            store,
            vault,
            drivers,
        });
        let worker_inner = inner.clone();
        let pool = WorkerPool::spawn(
            max_concurrent,
            queue_depth,
            Arc::new(move |job: Job| -> TaskFuture {
                let inner = worker_inner.clone();
                Box::pin(async move { inner.run(job).await })
            }),
        );
        Self {
            inner,
            claims: Claims::new(),
            pool,
        }
    }

    /// Worker limits come from `[workers]`.
    pub fn from_config(
        config: &DaemonConfig,
        store: StateStore,
        vault: Vault,
        drivers: DriverSet,
    ) -> Self {
        Self::new(
            store,
            vault,
            drivers,
            config.max_concurrent(),
            config.queue_depth(),
        )
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    // ── Inbound API ────────────────────────────────────────────────

    /// Validate, persist as `pending`, and queue provisioning.
    ///
    /// Returns as soon as the task is queued. Validation errors and a full
    /// queue are reported here; everything later is only visible through
    /// [`Orchestrator::status`].
    pub fn create_deployment(&self, request: CreateDeployment) -> EngineResult<DeploymentId> {
        validate_name(&request.name)?;
        let config = request
            .config
            .unwrap_or_else(|| EngineConfig::default_for(request.engine));
        config.check(request.engine)?;

        // Reserve first so a full queue leaves no orphaned record behind.
        let slot = self.pool.reserve()?;
        let sealed = self.inner.vault.seal(&config)?;
        let deployment = self.inner.store.create(NewDeployment {
            owner: request.owner,
            name: request.name,
            engine: request.engine,
            mode: request.mode,
            config_secret: Some(sealed),
        })?;
        let claim = self.claims.try_claim(&deployment.id).ok_or_else(|| {
            EngineError::Conflict(format!("deployment {} already has a task", deployment.id))
        })?;

        Journal::new(self.inner.store.clone(), deployment.id.clone()).log(format!(
            "Deployment created: engine={} mode={}",
            deployment.engine, deployment.mode
        ));
        slot.send(Job {
            action: Action::Provision,
            claim,
        });
        info!(deployment_id = %deployment.id, name = %deployment.name, engine = %deployment.engine, "deployment queued");
        Ok(deployment.id)
    }

    /// Queue provisioning for an existing `pending` deployment.
    pub fn dispatch_provision(&self, id: &str) -> EngineResult<()> {
        self.dispatch(id, Action::Provision, DeploymentStatus::Pending)
    }

    /// Queue teardown for a `running` deployment.
    ///
    /// Rejected while the deployment is pending, provisioning, already
    /// being torn down, or finished.
    pub fn request_teardown(&self, id: &str) -> EngineResult<()> {
        self.dispatch(id, Action::Teardown, DeploymentStatus::Running)
    }

    fn dispatch(&self, id: &str, action: Action, required: DeploymentStatus) -> EngineResult<()> {
        // Claim before reading status: a task that finishes in between
        // cannot make the check stale.
        let claim = self.claims.try_claim(id).ok_or_else(|| {
            EngineError::Conflict(format!("deployment {id} already has a task in flight"))
        })?;
        let deployment = self.inner.store.get(id)?;
        if deployment.status != required {
            return Err(EngineError::Conflict(format!(
                "deployment {id} is {}; expected {required}",
                deployment.status
            )));
        }

        self.pool.reserve()?.send(Job { action, claim });
        debug!(deployment_id = %id, ?action, "task queued");
        Ok(())
    }

    /// Current status, full log, and (when running) the opened result.
    pub fn status(&self, id: &str) -> EngineResult<StatusView> {
        let deployment = self.inner.store.get(id)?;
        let log = self.inner.store.logs(id)?;
        let result = match (&deployment.status, &deployment.result_secret) {
            (DeploymentStatus::Running, Some(sealed)) => {
                Some(match self.inner.vault.open::<ConnectionDescriptor>(sealed) {
                    Ok(connection) => ResultView::Available { connection },
                    Err(e) => ResultView::Unreadable {
                        reason: e.to_string(),
                    },
                })
            }
            _ => None,
        };
        Ok(StatusView {
            id: deployment.id,
            owner: deployment.owner,
            name: deployment.name,
            engine: deployment.engine,
            mode: deployment.mode,
            status: deployment.status,
            created_at: deployment.created_at,
            updated_at: deployment.updated_at,
            container_ref: deployment.container_ref,
            log,
            result,
        })
    }

    /// All deployments, or those of one owner. Newest first.
    pub fn list(&self, owner: Option<&str>) -> EngineResult<Vec<Deployment>> {
        let deployments = match owner {
            Some(owner) => self.inner.store.list_for_owner(owner)?,
            None => self.inner.store.list()?,
        };
        Ok(deployments)
    }

    /// Settle deployments a previous process left behind.
    ///
    /// `provisioning` ones can no longer be finished and become `failed`;
    /// `pending` ones are queued again. Deployments owned by a task in this
    /// process are left alone.
    pub fn recover_interrupted(&self) -> EngineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for deployment in self
            .inner
            .store
            .list_by_status(DeploymentStatus::Provisioning)?
        {
            let Some(_claim) = self.claims.try_claim(&deployment.id) else {
                continue;
            };
            let journal = Journal::new(self.inner.store.clone(), deployment.id.clone());
            journal.warn("Provisioning was interrupted by a daemon restart.");
            self.inner
                .store
                .update_status(&deployment.id, DeploymentStatus::Failed)?;
            report.failed.push(deployment.id);
        }

        for deployment in self.inner.store.list_by_status(DeploymentStatus::Pending)? {
            match self.dispatch_provision(&deployment.id) {
                Ok(()) => report.redispatched.push(deployment.id),
                Err(EngineError::Conflict(_)) => {}
                Err(e) => {
                    warn!(deployment_id = %deployment.id, error = %e, "could not re-dispatch pending deployment");
                    return Err(e);
                }
            }
        }

        if !report.failed.is_empty() || !report.redispatched.is_empty() {
            info!(
                failed = report.failed.len(),
                redispatched = report.redispatched.len(),
                "recovered interrupted deployments"
            );
        }
        Ok(report)
    }

    pub fn stats(&self) -> TaskStats {
        self.pool.stats()
    }

    /// Wait until no task is queued or running.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    /// Stop accepting work and wait for accepted work to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

// ── Background tasks ──────────────────────────────────────────────

impl Inner {
    async fn run(&self, job: Job) -> bool {
        let id = job.claim.id().to_string();
        match job.action {
            Action::Provision => self.run_provision(&id).await,
            Action::Teardown => self.run_teardown(&id).await,
        }
    }

    /// `pending → provisioning → running | failed`.
    async fn run_provision(&self, id: &str) -> bool {
        let journal = Journal::new(self.store.clone(), id);
        let deployment = match self.store.update_status(id, DeploymentStatus::Provisioning) {
            Ok(d) => d,
            Err(e) => {
                error!(deployment_id = %id, error = %e, "cannot start provisioning");
                return false;
            }
        };
        journal.log("Provisioner: starting");

        let outcome = self.provision(&deployment, &journal).await.and_then(|_| {
            self.store
                .update_status(id, DeploymentStatus::Running)
                .map_err(EngineError::from)
        });
        match outcome {
            Ok(_) => {
                journal.log("Provisioning complete.");
                info!(deployment_id = %id, engine = %deployment.engine, "deployment running");
                true
            }
            Err(e) => {
                journal.warn(format!("Provisioning failed: {e}"));
                self.release_partial(id, &e, &journal).await;
                // A failed deployment never carries a result.
                if let Err(e) = self.store.set_result(id, None) {
                    error!(deployment_id = %id, error = %e, "failed to clear result");
                }
                if let Err(e) = self.store.update_status(id, DeploymentStatus::Failed) {
                    error!(deployment_id = %id, error = %e, "failed to record provisioning failure");
                }
                false
            }
        }
    }

    /// Best-effort removal of what a failed provision left behind: a started
    /// container, or a volume created for one that never started.
    async fn release_partial(&self, id: &str, cause: &EngineError, journal: &Journal) {
        let deployment = match self.store.get(id) {
            Ok(d) => d,
            Err(e) => {
                error!(deployment_id = %id, error = %e, "cannot clean up failed provisioning");
                return;
            }
        };
        let start_failed = matches!(cause, EngineError::Driver(DriverError::ContainerStart(_)));
        if deployment.container_ref.is_none() && !start_failed {
            return;
        }
        let Some(driver) = self.drivers.get(deployment.engine) else {
            return;
        };

        journal.log("Cleaning up after failed provisioning.");
        let failures = driver.teardown(&deployment, journal).await.failures().count();
        if failures > 0 {
            journal.warn(format!(
                "Cleanup finished with {failures} failed step(s); manual cleanup may be needed."
            ));
        }
    }

    /// Everything between `provisioning` and `running`: the result is sealed
    /// and stored before this returns `Ok`.
    async fn provision(&self, deployment: &Deployment, journal: &Journal) -> EngineResult<()> {
        if deployment.mode != Mode::Local {
            return Err(DriverError::Configuration(format!(
                "unsupported mode: {}",
                deployment.mode
            ))
            .into());
        }
        let driver = self.drivers.get(deployment.engine).ok_or_else(|| {
            DriverError::Configuration(format!(
                "unsupported engine: {} (no driver available)",
                deployment.engine
            ))
        })?;

        let config = match &deployment.config_secret {
            Some(sealed) => self.vault.open::<EngineConfig>(sealed)?,
            None => EngineConfig::default_for(deployment.engine),
        };

        let connection = driver.provision(deployment, &config, journal).await?;
        let sealed = self.vault.seal(&connection)?;
        self.store.set_result(&deployment.id, Some(sealed))?;
        Ok(())
    }

    /// `running → deleted`, after best-effort cleanup.
    async fn run_teardown(&self, id: &str) -> bool {
        let journal = Journal::new(self.store.clone(), id);
        let deployment = match self.store.get(id) {
            Ok(d) => d,
            Err(e) => {
                error!(deployment_id = %id, error = %e, "cannot start teardown");
                return false;
            }
        };
        journal.log("Teardown started.");

        let failures = match self.drivers.get(deployment.engine) {
            Some(driver) => driver.teardown(&deployment, &journal).await.failures().count(),
            None => {
                journal.warn(format!(
                    "No driver for engine {}; nothing was cleaned up.",
                    deployment.engine
                ));
                1
            }
        };
        if failures > 0 {
            journal.warn(format!(
                "Teardown finished with {failures} failed step(s); manual cleanup may be needed."
            ));
        }

        if let Err(e) = self.store.set_result(id, None) {
            error!(deployment_id = %id, error = %e, "failed to clear result");
        }
        match self.store.update_status(id, DeploymentStatus::Deleted) {
            Ok(_) => {
                journal.log("Teardown complete.");
                info!(deployment_id = %id, failures, "deployment deleted");
                true
            }
            Err(e) => {
                error!(deployment_id = %id, error = %e, "failed to mark deployment deleted");
                false
            }
        }
    }
}
