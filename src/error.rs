//! Error types for guildfleet

use thiserror::Error;

/// Result type for guildfleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Coarse classification that callers branch on.
///
/// Control-plane adapters are responsible for mapping their transport's raw
/// failures onto these kinds, so reconciliation never inspects status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    StaleVersion,
    Auth,
    Transport,
    Config,
    Procedure,
    Other,
}

/// guildfleet error types
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Update of {name} rejected, version {version} is out of date: {message}")]
    StaleVersion {
        name: String,
        version: u64,
        message: String,
    },

    #[error("Control plane error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: Invalid SSH private key. Error: {0}")]
    Auth(String),

    #[error("SSH connection error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported operating system: {0}")]
    UnsupportedOs(String),

    #[error("Server is inactive: {0}")]
    ServerInactive(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Deployment {0} is already finalized")]
    DeploymentFinalized(String),

    #[error("Stage \"{stage}\" failed with exit code {code}")]
    StageFailed { stage: String, code: i32 },

    #[error("Remote command exited with status {status}: {output}")]
    RemoteExit { status: u32, output: String },

    #[error("Command `{command}` failed: {output}")]
    Command { command: String, output: String },

    #[error("Metrics port is not configured for {0}")]
    MetricsPortMissing(String),

    #[error("Deployment service error: {0}")]
    Dispatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl FleetError {
    /// Project this error onto the kind hierarchy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::NotFound(_)
            | FleetError::ServerNotFound(_)
            | FleetError::DeploymentNotFound(_) => ErrorKind::NotFound,
            FleetError::Conflict(_) => ErrorKind::Conflict,
            FleetError::StaleVersion { .. } => ErrorKind::StaleVersion,
            FleetError::Auth(_) => ErrorKind::Auth,
            FleetError::Transport(_) => ErrorKind::Transport,
            FleetError::Config(_) | FleetError::MetricsPortMissing(_) => ErrorKind::Config,
            FleetError::UnsupportedOs(_)
            | FleetError::StageFailed { .. }
            | FleetError::RemoteExit { .. }
            | FleetError::Command { .. } => ErrorKind::Procedure,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
