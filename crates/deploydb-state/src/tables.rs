//! redb table definitions for the deployment store.
//!
//! Both tables use `&str` keys and `&[u8]` values.

use redb::TableDefinition;

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Log entries keyed by `{deployment_id}:{seq:020}`.
///
/// The sequence number is zero-padded so lexicographic key order matches
/// append order.
pub const DEPLOYMENT_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployment_logs");

/// Build the log key for a deployment and sequence number.
pub fn log_key(deployment_id: &str, seq: u64) -> String {
    format!("{deployment_id}:{seq:020}")
}

/// Half-open key range `[start, end)` covering every log line of a deployment.
///
/// `;` sorts immediately after `:`, so the range ends right after the last
/// `{deployment_id}:` key.
pub fn log_range(deployment_id: &str) -> (String, String) {
    (format!("{deployment_id}:"), format!("{deployment_id};"))
}
