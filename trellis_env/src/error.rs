//! Error types for the conductor backend contract.

use serde_json::Value;
use thiserror::Error;

/// Errors reported by a conductor backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The player could not be started
    #[error("Player spawn failed: {0}")]
    SpawnFailed(String),

    /// The backend refused to install an app
    #[error("Install rejected: {0}")]
    InstallRejected(String),

    /// The referenced player is not running
    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    /// The referenced cell is not installed
    #[error("Unknown cell: {0}")]
    UnknownCell(String),

    /// A zome call was rejected; the payload is the backend's own error body
    #[error("Call rejected: {0}")]
    CallRejected(Value),

    /// Convergence could not be observed
    #[error("Consistency error: {0}")]
    Consistency(String),
}

impl BackendError {
    /// Creates an install rejection.
    pub fn install(msg: impl Into<String>) -> Self {
        Self::InstallRejected(msg.into())
    }

    /// Creates an unknown-player error.
    pub fn unknown_player(player: impl std::fmt::Display) -> Self {
        Self::UnknownPlayer(player.to_string())
    }

    /// Creates an unknown-cell error.
    pub fn unknown_cell(cell: impl std::fmt::Display) -> Self {
        Self::UnknownCell(cell.to_string())
    }
}
