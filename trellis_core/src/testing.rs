//! In-crate test double for the conductor backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trellis_env::{
    AgentPubKey, BackendError, BundleDescriptor, CellId, ConductorBackend, ConsistencySignal,
    PlayerConfig, PlayerId,
};

/// Records everything the orchestrator asks of it.
///
/// Zome `echo` answers `echo` with its payload and rejects `fail`.
#[derive(Default)]
pub struct MockBackend {
    next_player: AtomicU64,
    spawns: AtomicUsize,
    fail_spawn_at: Option<usize>,
    rejected_bundles: HashSet<String>,
    short_bundles: HashSet<String>,
    fail_uninstalls: bool,
    live: Mutex<Vec<PlayerId>>,
    spawned: Mutex<Vec<PlayerId>>,
    apps: Mutex<BTreeMap<PlayerId, Vec<String>>>,
    signal: Option<Arc<MockSignal>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `index`-th spawn (0-based) fails.
    pub fn fail_spawn_at(mut self, index: usize) -> Self {
        self.fail_spawn_at = Some(index);
        self
    }

    /// Installs containing this bundle are rejected.
    pub fn reject_bundle(mut self, name: &str) -> Self {
        self.rejected_bundles.insert(name.to_string());
        self
    }

    /// Installs containing this bundle come back one cell short.
    pub fn short_bundle(mut self, name: &str) -> Self {
        self.short_bundles.insert(name.to_string());
        self
    }

    /// Every uninstall errors, leaving the app in place.
    pub fn fail_uninstalls(mut self) -> Self {
        self.fail_uninstalls = true;
        self
    }

    /// Exposes a native consistency signal.
    pub fn with_signal(mut self, signal: Arc<MockSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn live_players(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn spawn_order(&self) -> Vec<PlayerId> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn installed_apps(&self, player: PlayerId) -> usize {
        self.apps.lock().unwrap().get(&player).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl ConductorBackend for MockBackend {
    async fn spawn_player(&self, _config: &PlayerConfig) -> Result<PlayerId, BackendError> {
        let attempt = self.spawns.fetch_add(1, Ordering::SeqCst);
        if self.fail_spawn_at == Some(attempt) {
            return Err(BackendError::SpawnFailed(format!("spawn #{attempt} refused")));
        }
        let id = PlayerId::from_seed(self.next_player.fetch_add(1, Ordering::SeqCst));
        self.live.lock().unwrap().push(id);
        self.spawned.lock().unwrap().push(id);
        Ok(id)
    }

    async fn install_app(
        &self,
        player: PlayerId,
        agent: &AgentPubKey,
        app_id: &str,
        bundles: &[BundleDescriptor],
    ) -> Result<Vec<CellId>, BackendError> {
        if let Some(bad) = bundles.iter().find(|b| self.rejected_bundles.contains(&b.name)) {
            return Err(BackendError::install(format!("bundle {} rejected", bad.name)));
        }
        self.apps.lock().unwrap().entry(player).or_default().push(app_id.to_string());
        let mut cells: Vec<CellId> = bundles
            .iter()
            .map(|b| CellId {
                player,
                agent: *agent,
                dna: b.name.clone(),
            })
            .collect();
        if bundles.iter().any(|b| self.short_bundles.contains(&b.name)) {
            cells.pop();
        }
        Ok(cells)
    }

    async fn uninstall_app(&self, player: PlayerId, app_id: &str) -> Result<(), BackendError> {
        if self.fail_uninstalls {
            return Err(BackendError::install(format!("uninstall of {app_id} refused")));
        }
        if let Some(apps) = self.apps.lock().unwrap().get_mut(&player) {
            apps.retain(|a| a != app_id);
        }
        Ok(())
    }

    async fn call(
        &self,
        _cell: &CellId,
        _zome: &str,
        function: &str,
        payload: Value,
    ) -> Result<Value, BackendError> {
        match function {
            "fail" => Err(BackendError::CallRejected(json!({"kind": "rejected"}))),
            _ => Ok(payload),
        }
    }

    async fn shutdown_player(&self, player: PlayerId) -> Result<(), BackendError> {
        self.live.lock().unwrap().retain(|p| *p != player);
        self.apps.lock().unwrap().remove(&player);
        Ok(())
    }

    fn consistency_signal(&self) -> Option<Arc<dyn ConsistencySignal>> {
        self.signal.clone().map(|s| s as Arc<dyn ConsistencySignal>)
    }
}

/// Counts waits; never converges when `hang` is set.
#[derive(Default)]
pub struct MockSignal {
    pub waits: AtomicUsize,
    pub hang: bool,
}

#[async_trait]
impl ConsistencySignal for MockSignal {
    async fn await_consistency(&self, _players: &[PlayerId]) -> Result<(), BackendError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
