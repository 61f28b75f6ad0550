//! Error types for discovery, tunneling and sync

use std::time::Duration;
use thiserror::Error;

use crate::spec::TargetKind;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Exit code for precondition, discovery and tunnel failures
pub const EXIT_FAILURE: i32 = 1;

/// Errors produced while orchestrating a sync
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to describe load balancer '{pool}': {message}")]
    Discovery { pool: String, message: String },

    #[error("Load balancer '{pool}' has no registered instances")]
    EmptyPool { pool: String },

    #[error("Failed to resolve public address of instance {instance_id}: {message}")]
    Resolution {
        instance_id: String,
        message: String,
    },

    #[error("Local port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("Admin client '{client}' does not support '{capability}'")]
    CapabilityMissing { client: String, capability: String },

    #[error("No {kind} spec found for project '{project}'")]
    SpecNotFound { project: String, kind: TargetKind },

    #[error("Invalid {kind} spec for project '{project}': {message}")]
    InvalidSpec {
        project: String,
        kind: TargetKind,
        message: String,
    },

    #[error("Upsert of {kind} failed with exit code {exit_code}")]
    Upsert { kind: TargetKind, exit_code: i32 },

    #[error("Invalid command '{0}'")]
    InvalidCommand(String),

    #[error("No project given")]
    NoProjects,

    #[error("Invalid project name '{0}'")]
    InvalidProject(String),

    #[error("Failed to spawn tunnel to {address}: {source}")]
    TunnelSpawn {
        address: String,
        source: std::io::Error,
    },

    #[error("Tunnel process exited before becoming ready ({status})")]
    TunnelExited { status: String },

    #[error("Tunnel on local port {port} not ready after {timeout:?}")]
    TunnelTimeout { port: u16, timeout: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn discovery(pool: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Discovery {
            pool: pool.into(),
            message: message.into(),
        }
    }

    pub fn resolution(instance_id: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Resolution {
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }

    /// Process exit code reported for this error
    ///
    /// Upsert failures surface the admin client's own exit code; everything
    /// else maps to `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Upsert { exit_code, .. } if *exit_code != 0 => *exit_code,
            _ => EXIT_FAILURE,
        }
    }
}
