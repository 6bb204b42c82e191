//! Domain types for the deployment store.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use deploydb_core::{Engine, Mode};

/// Globally unique deployment identifier (32 lowercase hex chars).
pub type DeploymentId = String;

/// Generate a fresh deployment identifier.
pub fn new_deployment_id() -> DeploymentId {
    uuid::Uuid::new_v4().simple().to_string()
}

// ── Status ────────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
///
/// ```text
/// pending ──▶ provisioning ──▶ running ──▶ deleted
///                  │
///                  ▼
///               failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Provisioning,
    Running,
    Failed,
    Deleted,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Deleted => "deleted",
        }
    }

    /// Whether `self -> next` is an allowed transition. No state is skipped
    /// and nothing moves backward.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Running, Deleted)
        )
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Failed | DeploymentStatus::Deleted)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// One provisioning request and everything known about its realization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Requesting principal; `None` for anonymous/dev requests.
    pub owner: Option<String>,
    pub name: String,
    pub engine: Engine,
    pub mode: Mode,
    pub status: DeploymentStatus,
    /// Sealed `EngineConfig`.
    pub config_secret: Option<String>,
    /// Sealed `ConnectionDescriptor`, present only while running.
    pub result_secret: Option<String>,
    /// Container handle for containerized engines.
    pub container_ref: Option<String>,
    /// Unix timestamp (seconds) of creation.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: u64,
}

/// Caller-supplied fields for a new deployment record.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub owner: Option<String>,
    pub name: String,
    pub engine: Engine,
    pub mode: Mode,
    pub config_secret: Option<String>,
}

// ── Log ───────────────────────────────────────────────────────────

/// A single line of a deployment's human-readable log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    /// Unix timestamp (seconds) when the line was appended.
    pub at: u64,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at, self.message)
    }
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Running));
        assert!(Provisioning.can_transition_to(Failed));
        assert!(Running.can_transition_to(Deleted));
    }

    #[test]
    fn skips_and_regressions_rejected() {
        assert!(!Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Deleted));
        assert!(!Provisioning.can_transition_to(Deleted));
        assert!(!Running.can_transition_to(Provisioning));
        assert!(!Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Provisioning));
        assert!(!Deleted.can_transition_to(Running));
    }

    #[test]
    fn terminal_states() {
        assert!(Failed.is_terminal());
        assert!(Deleted.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Provisioning).unwrap(), "\"provisioning\"");
    }

    #[test]
    fn ids_are_unique_hex() {
        let a = new_deployment_id();
        let b = new_deployment_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
