//! deploydb-engine — drives deployments through their lifecycle.
//!
//! The [`Orchestrator`] is the inbound API: it validates requests, persists
//! a `pending` record, and hands the work to a bounded [`WorkerPool`]. The
//! caller never waits for a driver; progress is observed by polling
//! [`Orchestrator::status`].
//!
//! Lifecycle:
//!
//! ```text
//! pending ──▶ provisioning ──▶ running ──▶ deleted
//!                  │
//!                  ▼
//!               failed
//! ```
//!
//! At most one task owns a deployment at a time. Driver errors never reach
//! the caller; they end up in the deployment log and as a `failed` status.

pub mod claims;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod pool;

pub use drivers::DriverSet;
pub use error::{EngineError, EngineResult};
pub use orchestrator::{
    CreateDeployment, Orchestrator, RecoveryReport, ResultView, StatusView,
};
pub use pool::{PoolError, TaskStats, WorkerPool};
