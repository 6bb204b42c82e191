//! deploydb-state — durable deployment records for deploydb.
//!
//! Backed by [redb](https://docs.rs/redb). Each provisioning request is one
//! `Deployment` record plus an append-only log.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns. Log lines
//! live in their own table under composite keys `{deployment_id}:{seq}` so a
//! deployment's log is a single ordered range scan.
//!
//! Every mutation is one redb write transaction. redb admits a single writer
//! at a time, so read-modify-write updates (status transitions, log appends)
//! never lose an update, even with a background worker and an API reader
//! touching the same id concurrently.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod journal;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use journal::Journal;
pub use store::StateStore;
pub use types::*;
