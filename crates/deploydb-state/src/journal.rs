//! Per-deployment log writer handed to drivers.

use tracing::{error, info, warn};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::DeploymentId;

/// Appends human-readable lines to one deployment's log and mirrors them
/// to tracing.
///
/// A failed append is reported through tracing and otherwise ignored: losing
/// a progress line must not abort the work being described.
#[derive(Clone)]
pub struct Journal {
    store: StateStore,
    id: DeploymentId,
}

impl Journal {
    pub fn new(store: StateStore, id: impl Into<DeploymentId>) -> Self {
        Self {
            store,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append an informational line.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(deployment_id = %self.id, "{message}");
        self.append(message);
    }

    /// Append a line describing a non-fatal problem.
    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(deployment_id = %self.id, "{message}");
        self.append(message);
    }

    /// Persist the container handle as soon as the runtime assigns it.
    pub fn set_container_ref(&self, container_ref: &str) -> StateResult<()> {
        self.store.set_container_ref(&self.id, container_ref)?;
        Ok(())
    }

    fn append(&self, message: &str) {
        if let Err(e) = self.store.append_log(&self.id, message) {
            error!(deployment_id = %self.id, error = %e, "failed to append deployment log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewDeployment;
    use deploydb_core::{Engine, Mode};

    #[test]
    fn journal_appends_and_records_container() {
        let store = StateStore::open_in_memory().unwrap();
        let d = store
            .create(NewDeployment {
                owner: None,
                name: "db".to_string(),
                engine: Engine::Mysql,
                mode: Mode::Local,
                config_secret: None,
            })
            .unwrap();

        let journal = Journal::new(store.clone(), d.id.clone());
        journal.log("Pulling image mysql:8.0...");
        journal.warn("Volume creation warning: exists");
        journal.set_container_ref("c0ffee").unwrap();

        let lines: Vec<_> = store
            .logs(&d.id)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            lines,
            vec!["Pulling image mysql:8.0...", "Volume creation warning: exists"]
        );
        assert_eq!(store.get(&d.id).unwrap().container_ref.as_deref(), Some("c0ffee"));
    }

    #[test]
    fn journal_for_missing_deployment_does_not_panic() {
        let store = StateStore::open_in_memory().unwrap();
        let journal = Journal::new(store, "missing");
        journal.log("nobody is listening");
        assert!(journal.set_container_ref("x").is_err());
    }
}
