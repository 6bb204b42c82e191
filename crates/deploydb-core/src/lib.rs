pub mod config;
pub mod types;

pub use config::{parse_duration, DaemonConfig};
pub use types::*;
