//! The backend driver contract and teardown reporting.

use std::fmt;

use async_trait::async_trait;

use deploydb_core::{ConnectionDescriptor, EngineConfig};
use deploydb_state::{Deployment, Journal};

use crate::error::DriverResult;

/// Realizes and destroys one family of database engines.
///
/// Drivers may block for as long as the underlying work takes; the engine
/// only ever calls them from background workers.
#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Bring the database up and describe how to reach it.
    ///
    /// Progress lines go to `journal`. A containerized driver records the
    /// container handle through the journal as soon as it exists.
    async fn provision(
        &self,
        deployment: &Deployment,
        config: &EngineConfig,
        journal: &Journal,
    ) -> DriverResult<ConnectionDescriptor>;

    /// Best-effort removal of everything `provision` created.
    ///
    /// Every step is attempted even when an earlier one fails.
    async fn teardown(&self, deployment: &Deployment, journal: &Journal) -> TeardownReport;
}

/// What happened to one teardown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Nothing to do, e.g. the resource was already gone.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub action: String,
    pub outcome: StepOutcome,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StepOutcome::Done => write!(f, "{}: done", self.action),
            StepOutcome::Skipped(reason) => write!(f, "{}: skipped ({reason})", self.action),
            StepOutcome::Failed(error) => write!(f, "{}: failed: {error}", self.action),
        }
    }
}

/// Per-step outcomes of a teardown. Failed steps do not stop the teardown;
/// they are collected here for the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step and write it to the deployment log.
    pub fn record(&mut self, journal: &Journal, action: impl Into<String>, outcome: StepOutcome) {
        let step = TeardownStep {
            action: action.into(),
            outcome,
        };
        match step.outcome {
            StepOutcome::Failed(_) => journal.warn(step.to_string()),
            _ => journal.log(step.to_string()),
        }
        self.steps.push(step);
    }

    pub fn failures(&self) -> impl Iterator<Item = &TeardownStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    /// No step failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploydb_core::{Engine, Mode};
    use deploydb_state::{NewDeployment, StateStore};

    #[test]
    fn report_collects_failures_and_logs_every_step() {
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

        let mut report = TeardownReport::new();
        report.record(&journal, "stop container c1", StepOutcome::Done);
        report.record(
            &journal,
            "remove container c1",
            StepOutcome::Failed("device busy".to_string()),
        );
        report.record(
            &journal,
            "remove volume v1",
            StepOutcome::Skipped("already absent".to_string()),
        );

        assert!(!report.is_clean());
        assert_eq!(report.failures().count(), 1);
        let lines: Vec<_> = store
            .logs(&d.id)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            lines,
            vec![
                "stop container c1: done",
                "remove container c1: failed: device busy",
                "remove volume v1: skipped (already absent)",
            ]
        );
    }
}
