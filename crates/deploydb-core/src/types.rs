//! Shared types used across deploydb crates.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default application user for containerized engines.
pub const DEFAULT_DB_USER: &str = "deploydb";
/// Default application password for containerized engines.
pub const DEFAULT_DB_PASSWORD: &str = "deploydbpass";
/// Last-resort root password when neither root nor app password is given.
pub const DEFAULT_ROOT_PASSWORD: &str = "deploydbroot";

/// Longest accepted deployment name.
pub const MAX_NAME_LEN: usize = 64;

/// Errors raised while validating requests before any work is dispatched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unsupported engine: {0}")]
    UnknownEngine(String),

    #[error("invalid deployment name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("{kind} config cannot be used with engine {engine}")]
    ConfigMismatch { engine: Engine, kind: &'static str },
}

// ── Engine ────────────────────────────────────────────────────────

/// Database engines this orchestrator knows how to realize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Single local data file, no network listener.
    Sqlite,
    /// MySQL server in a container.
    Mysql,
    /// PostgreSQL server in a container.
    Postgres,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Sqlite, Engine::Mysql, Engine::Postgres];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Mysql => "mysql",
            Engine::Postgres => "postgres",
        }
    }

    /// Whether realizing this engine needs the container runtime.
    pub fn is_containerized(&self) -> bool {
        !matches!(self, Engine::Sqlite)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            "mysql" => Ok(Engine::Mysql),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            _ => Err(TypeError::UnknownEngine(s.to_string())),
        }
    }
}

// ── Mode ──────────────────────────────────────────────────────────

/// Where a deployment is realized.
///
/// Only `local` is implemented. Any other value is accepted at creation and
/// fails the deployment once the provisioner picks it up.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    #[default]
    Local,
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Local => "local",
            Mode::Other(s) => s,
        }
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("local") {
            Mode::Local
        } else {
            Mode::Other(s)
        }
    }
}

impl From<&str> for Mode {
    fn from(s: &str) -> Self {
        Mode::from(s.to_string())
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Local => "local".to_string(),
            Mode::Other(s) => s,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Engine configuration ──────────────────────────────────────────

/// Caller-supplied creation parameters, one variant per engine family.
///
/// Sealed by the vault before it reaches the store; opened only inside the
/// provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineConfig {
    EmbeddedFile,
    Server(ServerConfig),
}

impl EngineConfig {
    /// The config a request gets when the caller supplied none.
    pub fn default_for(engine: Engine) -> Self {
        if engine.is_containerized() {
            EngineConfig::Server(ServerConfig::default())
        } else {
            EngineConfig::EmbeddedFile
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineConfig::EmbeddedFile => "embedded_file",
            EngineConfig::Server(_) => "server",
        }
    }

    /// Reject configs whose family does not match the engine.
    pub fn check(&self, engine: Engine) -> Result<(), TypeError> {
        match (self, engine.is_containerized()) {
            (EngineConfig::EmbeddedFile, false) | (EngineConfig::Server(_), true) => Ok(()),
            _ => Err(TypeError::ConfigMismatch {
                engine,
                kind: self.kind(),
            }),
        }
    }

    pub fn server(&self) -> Option<&ServerConfig> {
        match self {
            EngineConfig::Server(cfg) => Some(cfg),
            EngineConfig::EmbeddedFile => None,
        }
    }
}

/// Credentials and naming for a containerized database server.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_root_password: Option<String>,
}

impl ServerConfig {
    /// Database name, falling back to the deployment name.
    pub fn database(&self, fallback: &str) -> String {
        self.db_name
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn username(&self) -> &str {
        self.db_user.as_deref().unwrap_or(DEFAULT_DB_USER)
    }

    pub fn password(&self) -> &str {
        self.db_password.as_deref().unwrap_or(DEFAULT_DB_PASSWORD)
    }

    /// Root password: explicit root password, else app password, else default.
    pub fn root_password(&self) -> &str {
        self.db_root_password
            .as_deref()
            .or(self.db_password.as_deref())
            .unwrap_or(DEFAULT_ROOT_PASSWORD)
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &self.db_password.as_ref().map(|_| "<redacted>"))
            .field(
                "db_root_password",
                &self.db_root_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// ── Connection descriptor ─────────────────────────────────────────

/// How to reach a realized database. Sealed into the deployment record once
/// it is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionDescriptor {
    File {
        engine: Engine,
        path: PathBuf,
    },
    Network {
        engine: Engine,
        host: String,
        port: u16,
        database: String,
        username: String,
    },
}

/// Validate a caller-supplied deployment name.
///
/// Names end up in file paths and container-derived names, so only
/// `[A-Za-z0-9_-]` is allowed.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    let invalid = |reason| TypeError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}
