//! Per-deployment ownership: at most one task works on a deployment.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use deploydb_state::DeploymentId;

/// Set of deployment ids currently owned by a queued or running task.
#[derive(Debug, Clone, Default)]
pub struct Claims {
    held: Arc<Mutex<HashSet<DeploymentId>>>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `id`, or `None` if another task already holds it.
    pub fn try_claim(&self, id: &str) -> Option<Claim> {
        if !self.lock().insert(id.to_string()) {
            return None;
        }
        Some(Claim {
            claims: self.clone(),
            id: id.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<DeploymentId>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of one deployment; released on drop.
#[derive(Debug)]
pub struct Claim {
    claims: Claims,
    id: DeploymentId,
}

impl Claim {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.id);
    }
}
