//! StateStore — redb-backed deployment records.
//!
//! Provides typed operations over deployment records and their logs. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe deployment store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "deployment store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory deployment store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENT_LOGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Records ────────────────────────────────────────────────────

    /// Persist a new deployment in `pending`.
    pub fn create(&self, new: NewDeployment) -> StateResult<Deployment> {
        let now = epoch_secs();
        let deployment = Deployment {
            id: new_deployment_id(),
            owner: new.owner,
            name: new.name,
            engine: new.engine,
            mode: new.mode,
            status: DeploymentStatus::Pending,
            config_secret: new.config_secret,
            result_secret: None,
            container_ref: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %deployment.id, engine = %deployment.engine, "deployment created");
        Ok(deployment)
    }

    /// Get a deployment, or `None` if the id is unknown.
    pub fn find(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// Get a deployment, failing with `NotFound` for unknown ids.
    pub fn get(&self, id: &str) -> StateResult<Deployment> {
        self.find(id)?
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// List all deployments, newest first.
    pub fn list(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(results)
    }

    /// List deployments requested by `owner`, newest first.
    pub fn list_for_owner(&self, owner: &str) -> StateResult<Vec<Deployment>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|d| d.owner.as_deref() == Some(owner))
            .collect())
    }

    /// List deployments currently in `status`.
    pub fn list_by_status(&self, status: DeploymentStatus) -> StateResult<Vec<Deployment>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }

    /// Move a deployment to `next`, rejecting transitions the lifecycle does
    /// not allow.
    pub fn update_status(&self, id: &str, next: DeploymentStatus) -> StateResult<Deployment> {
        let updated = self.modify(id, |d| {
            if !d.status.can_transition_to(next) {
                return Err(StateError::InvalidTransition {
                    id: d.id.clone(),
                    from: d.status,
                    to: next,
                });
            }
            d.status = next;
            Ok(())
        })?;
        debug!(deployment_id = %id, status = %next, "status updated");
        Ok(updated)
    }

    /// Store (or clear) the sealed connection descriptor.
    pub fn set_result(&self, id: &str, sealed: Option<String>) -> StateResult<Deployment> {
        self.modify(id, |d| {
            d.result_secret = sealed;
            Ok(())
        })
    }

    /// Record the container handle assigned by the runtime.
    pub fn set_container_ref(&self, id: &str, container_ref: &str) -> StateResult<Deployment> {
        let updated = self.modify(id, |d| {
            d.container_ref = Some(container_ref.to_string());
            Ok(())
        })?;
        debug!(deployment_id = %id, %container_ref, "container ref recorded");
        Ok(updated)
    }

    /// Read-modify-write a single record inside one write transaction.
    fn modify<F>(&self, id: &str, f: F) -> StateResult<Deployment>
    where
        F: FnOnce(&mut Deployment) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deployment = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let current = table
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let Some(current) = current else {
                return Err(StateError::NotFound(id.to_string()));
            };
            let mut deployment: Deployment =
                serde_json::from_slice(&current).map_err(map_err!(Deserialize))?;
            f(&mut deployment)?;
            deployment.updated_at = epoch_secs();
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(deployment)
    }

    // ── Logs ───────────────────────────────────────────────────────

    /// Append a line to a deployment's log.
    ///
    /// The sequence number is assigned inside the write transaction, so
    /// concurrent appenders never collide or overwrite each other.
    pub fn append_log(&self, id: &str, message: &str) -> StateResult<LogEntry> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let entry = {
            let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if deployments.get(id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(id.to_string()));
            }

            let mut logs = txn.open_table(DEPLOYMENT_LOGS).map_err(map_err!(Table))?;
            let (start, end) = log_range(id);
            let seq = {
                let mut range = logs
                    .range(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?;
                match range.next_back() {
                    Some(last) => {
                        let (key, _) = last.map_err(map_err!(Read))?;
                        parse_seq(key.value())? + 1
                    }
                    None => 0,
                }
            };

            let entry = LogEntry {
                seq,
                at: epoch_secs(),
                message: message.to_string(),
            };
            let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            logs.insert(log_key(id, seq).as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            entry
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(entry)
    }

    /// All log lines of a deployment, in append order.
    pub fn logs(&self, id: &str) -> StateResult<Vec<LogEntry>> {
        let (start, end) = log_range(id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENT_LOGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let line: LogEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(line);
        }
        Ok(results)
    }
}

fn parse_seq(key: &str) -> StateResult<u64> {
    key.rsplit(':')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StateError::Deserialize(format!("malformed log key: {key}")))
}
