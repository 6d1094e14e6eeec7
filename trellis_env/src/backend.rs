//! Conductor backend contract consumed by the orchestrator.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::BackendError;
use crate::types::{AgentPubKey, BundleDescriptor, CellId, PlayerConfig, PlayerId};

/// The application runtime the orchestrator drives.
///
/// # Implementations
///
/// - **Production**: a client for a real conductor process
/// - **Simulation**: `SimConductor`, in-memory cells with simulated gossip
///
/// # Lifecycle
///
/// ```text
/// Orchestrator                Backend
///   |-- spawn_player(cfg) ------>|
///   |-- install_app(p, a, b[]) ->|-- [cell per bundle, in order]
///   |-- call(cell, zome, fn) --->|
///   |-- shutdown_player(p) ----->|
/// ```
#[async_trait]
pub trait ConductorBackend: Send + Sync + 'static {
    /// Starts a player node from the given configuration.
    async fn spawn_player(&self, config: &PlayerConfig) -> Result<PlayerId, BackendError>;

    /// Installs `bundles` as one app for `agent` on `player`.
    ///
    /// # Returns
    /// One `CellId` per bundle, in the order the bundles were given.
    async fn install_app(
        &self,
        player: PlayerId,
        agent: &AgentPubKey,
        app_id: &str,
        bundles: &[BundleDescriptor],
    ) -> Result<Vec<CellId>, BackendError>;

    /// Removes a previously installed app and its cells.
    async fn uninstall_app(&self, player: PlayerId, app_id: &str) -> Result<(), BackendError>;

    /// Invokes `function` in `zome` on `cell` with a JSON payload.
    ///
    /// # Returns
    /// * `Ok(value)` - The function's result
    /// * `Err(BackendError::CallRejected(payload))` - The runtime's error body, unmodified
    async fn call(
        &self,
        cell: &CellId,
        zome: &str,
        function: &str,
        payload: Value,
    ) -> Result<Value, BackendError>;

    /// Stops a player and releases everything it holds.
    async fn shutdown_player(&self, player: PlayerId) -> Result<(), BackendError>;

    /// Returns the backend's native convergence signal, if it has one.
    fn consistency_signal(&self) -> Option<Arc<dyn ConsistencySignal>>;
}

/// Backend-native notification that players have converged.
#[async_trait]
pub trait ConsistencySignal: Send + Sync {
    /// Resolves once every player in `players` has observed the state
    /// published by the others.
    ///
    /// # Blocking
    /// Waits without bound; callers that need a bound wrap it in a timeout.
    async fn await_consistency(&self, players: &[PlayerId]) -> Result<(), BackendError>;
}
