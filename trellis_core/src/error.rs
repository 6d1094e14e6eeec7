//! Error types for scenario orchestration.

use serde_json::Value;
use thiserror::Error;
use trellis_env::BackendError;

/// Errors surfaced to scenario code and recorded by the orchestrator.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Bundle name is not in the registry
    #[error("Unknown bundle: {0}")]
    UnknownBundle(String),

    /// Topology violates a structural invariant (empty app, empty agent)
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Player spawn or app install failed
    #[error("Provisioning failed: {reason}")]
    Provisioning {
        /// What was being provisioned
        reason: String,
        /// Underlying backend failure
        #[source]
        source: Option<BackendError>,
    },

    /// Backend rejected a zome call; `payload` is its error body, unmodified
    #[error("Remote call {zome}/{function} on {cell} failed: {payload}")]
    RemoteCall {
        /// Target cell
        cell: String,
        /// Zome name
        zome: String,
        /// Function name
        function: String,
        /// Backend error payload
        payload: Value,
    },

    /// Native consistency wait exceeded its bound
    #[error("Consistency not reached after {0}ms")]
    ConsistencyTimeout(u64),

    /// Native consistency requested but the backend has no signal
    #[error("Backend offers no native consistency signal")]
    ConsistencyUnavailable,

    /// A scenario with this name is already registered
    #[error("Scenario already registered: {0}")]
    DuplicateRegistration(String),

    /// Scenario exceeded its configured time bound
    #[error("Scenario timed out after {0}ms")]
    ScenarioTimeout(u64),

    /// Scenario body panicked
    #[error("Scenario panicked: {0}")]
    ScenarioPanicked(String),

    /// A middleware rejected the scenario
    #[error("Middleware {name} rejected scenario: {reason}")]
    Middleware {
        /// Middleware name
        name: String,
        /// Rejection reason
        reason: String,
    },

    /// Call result did not have the expected shape
    #[error("Unexpected call result: {0}")]
    Decode(#[from] serde_json::Error),

    /// Backend failure outside provisioning and calls
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl HarnessError {
    /// Creates a provisioning error wrapping a backend failure.
    pub fn provisioning(reason: impl Into<String>, source: BackendError) -> Self {
        Self::Provisioning {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Returns true for errors raised while provisioning (including bundle resolution).
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            Self::UnknownBundle(_) | Self::InvalidTopology(_) | Self::Provisioning { .. }
        )
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
