//! SimConductor - an in-memory conductor with simulated gossip.
//!
//! Cells of the same DNA that share a transport domain see each other's
//! published entries after the link latency. `LocalOnly` players form a
//! domain of their own; `Network` players share one per bootstrap URL and
//! network seed.

use crate::context::SimContext;
use crate::dna::{not_found, Dispatch, SimDna};
use crate::network::SimNetworkController;
use crate::oracle::ConvergenceOracle;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use trellis_env::{
    AgentPubKey, BackendError, BundleDescriptor, CellId, ConductorBackend, ConsistencySignal,
    HarnessContext, PlayerConfig, PlayerId, Transport,
};

/// Minimum delay before a lost gossip op is sent again.
const RETRANSMIT_FLOOR: Duration = Duration::from_millis(1);

/// Configuration for a simulated conductor.
#[derive(Debug, Clone)]
pub struct SimConductorConfig {
    /// DNAs the conductor can install, matched by bundle name
    pub dnas: Vec<SimDna>,

    /// Latency of every link between players
    pub latency: Duration,

    /// Loss rate of every link between players (0.0 - 1.0)
    pub loss_rate: f64,

    /// Whether the conductor exposes its convergence signal
    pub native_signal: bool,
}

impl Default for SimConductorConfig {
    fn default() -> Self {
        Self {
            dnas: vec![SimDna::scaffolding()],
            latency: Duration::ZERO,
            loss_rate: 0.0,
            native_signal: true,
        }
    }
}

/// Who can gossip with whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Domain {
    Isolated(PlayerId),
    Network {
        bootstrap_url: Option<String>,
        network_seed: Option<String>,
    },
}

impl Domain {
    fn of(player: PlayerId, config: &PlayerConfig) -> Self {
        match &config.transport {
            Transport::LocalOnly => Domain::Isolated(player),
            Transport::Network { bootstrap_url } => Domain::Network {
                bootstrap_url: bootstrap_url.clone(),
                network_seed: config.network_seed.clone(),
            },
        }
    }
}

/// A published entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// Conductor-wide publish order
    pub seq: u64,

    /// Agent that published it
    pub author: AgentPubKey,

    /// Published payload
    pub content: Value,
}

struct SimPlayer {
    label: String,
    domain: Domain,
    apps: BTreeMap<String, Vec<CellId>>,
}

pub(crate) struct CellState {
    pub(crate) domain: Domain,
    pub(crate) seen: BTreeMap<u64, Entry>,
}

/// An entry on its way to one cell.
pub(crate) struct GossipOp {
    pub(crate) from: PlayerId,
    pub(crate) to: CellId,
    entry: Entry,
    pub(crate) deliver_at: Duration,
}

#[derive(Default)]
pub(crate) struct SimState {
    next_player: u64,
    next_seq: u64,
    players: BTreeMap<PlayerId, SimPlayer>,
    pub(crate) cells: BTreeMap<CellId, CellState>,
    pub(crate) in_flight: Vec<GossipOp>,
}

/// Shared between the conductor and its convergence oracle.
pub(crate) struct ConductorCore {
    pub(crate) context: Arc<SimContext>,
    pub(crate) network: Arc<SimNetworkController>,
    dnas: BTreeMap<String, SimDna>,
    state: Mutex<SimState>,
    install_faults: Mutex<HashSet<String>>,
}

impl ConductorCore {
    pub(crate) fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, HashSet<String>> {
        self.install_faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule(&self, state: &mut SimState, from: PlayerId, to: CellId, entry: Entry) {
        let deliver_at = self.context.now() + self.network.get_latency(from, to.player);
        state.in_flight.push(GossipOp {
            from,
            to,
            entry,
            deliver_at,
        });
    }

    /// Delivers every due op whose link is up. Returns how many landed.
    pub(crate) fn pump(&self) -> usize {
        let now = self.context.now();
        let mut state = self.state();
        let mut delivered = 0;

        for mut op in std::mem::take(&mut state.in_flight) {
            if op.deliver_at > now || !self.network.can_communicate(op.from, op.to.player) {
                state.in_flight.push(op);
                continue;
            }
            if self.context.roll(self.network.get_loss(op.from, op.to.player)) {
                // Lost; the sender retransmits after another trip
                let latency = self.network.get_latency(op.from, op.to.player);
                op.deliver_at = now + latency.max(RETRANSMIT_FLOOR);
                state.in_flight.push(op);
                continue;
            }
            if let Some(cell) = state.cells.get_mut(&op.to) {
                cell.seen.insert(op.entry.seq, op.entry);
                delivered += 1;
            }
        }

        if delivered > 0 {
            debug!("Delivered {} gossip ops ({} in flight)", delivered, state.in_flight.len());
        }
        delivered
    }

    /// Earliest time an op bound for `players` can land, ignoring partitioned links.
    pub(crate) fn next_delivery(&self, players: &[PlayerId]) -> Option<Duration> {
        self.state()
            .in_flight
            .iter()
            .filter(|op| players.contains(&op.to.player))
            .filter(|op| self.network.can_communicate(op.from, op.to.player))
            .map(|op| op.deliver_at)
            .min()
    }

    /// Peers of a cell: other cells with the same DNA in the same domain.
    fn peers<'a>(
        state: &'a SimState,
        dna: &'a str,
        domain: &'a Domain,
        except: &'a CellId,
    ) -> impl Iterator<Item = (&'a CellId, &'a CellState)> + 'a {
        state
            .cells
            .iter()
            .filter(move |(id, cell)| id.dna == dna && cell.domain == *domain && *id != except)
    }

    fn publish(&self, cell: &CellId, content: Value) -> Result<Value, BackendError> {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;

        let entry = Entry {
            seq,
            author: cell.agent,
            content,
        };
        let domain = {
            let own = state
                .cells
                .get_mut(cell)
                .ok_or_else(|| BackendError::unknown_cell(cell))?;
            own.seen.insert(seq, entry.clone());
            own.domain.clone()
        };

        let targets: Vec<CellId> = Self::peers(&state, &cell.dna, &domain, cell)
            .map(|(id, _)| id.clone())
            .collect();
        for target in targets {
            self.schedule(&mut state, cell.player, target, entry.clone());
        }
        Ok(json!({ "seq": seq }))
    }

    fn list(&self, cell: &CellId) -> Result<Value, BackendError> {
        let state = self.state();
        let own = state.cells.get(cell).ok_or_else(|| BackendError::unknown_cell(cell))?;
        Ok(Value::Array(own.seen.values().map(|e| e.content.clone()).collect()))
    }

    /// Drops cells and the ops still bound for them.
    fn drop_cells(state: &mut SimState, cells: &[CellId]) {
        for cell in cells {
            state.cells.remove(cell);
        }
        state.in_flight.retain(|op| !cells.contains(&op.to));
    }
}

/// Simulated conductor backend.
///
/// Deterministic for a given seed: player ids, agent keys and loss rolls all
/// derive from the `SimContext`.
pub struct SimConductor {
    core: Arc<ConductorCore>,
    oracle: Arc<ConvergenceOracle>,
    native_signal: bool,
}

impl SimConductor {
    /// Creates a conductor on the given context.
    pub fn new(config: SimConductorConfig, context: Arc<SimContext>) -> Self {
        let network = Arc::new(SimNetworkController::new());
        network.set_default_latency(config.latency);
        network.set_default_loss(config.loss_rate);

        let core = Arc::new(ConductorCore {
            context,
            network,
            dnas: config.dnas.into_iter().map(|d| (d.name().to_string(), d)).collect(),
            state: Mutex::new(SimState::default()),
            install_faults: Mutex::new(HashSet::new()),
        });
        let oracle = Arc::new(ConvergenceOracle::new(Arc::clone(&core)));

        Self {
            core,
            oracle,
            native_signal: config.native_signal,
        }
    }

    /// Creates an Arc-wrapped conductor for sharing.
    pub fn shared(config: SimConductorConfig, context: Arc<SimContext>) -> Arc<Self> {
        Arc::new(Self::new(config, context))
    }

    /// Returns the network controller for fault injection.
    pub fn network(&self) -> &Arc<SimNetworkController> {
        &self.core.network
    }

    /// Returns the simulation context.
    pub fn context(&self) -> &Arc<SimContext> {
        &self.core.context
    }

    /// Returns the convergence oracle.
    pub fn oracle(&self) -> &Arc<ConvergenceOracle> {
        &self.oracle
    }

    /// Makes every later install of `bundle` fail.
    pub fn fail_installs_of(&self, bundle: &str) {
        self.core.faults().insert(bundle.to_string());
    }

    /// Clears injected install failures.
    pub fn clear_faults(&self) {
        self.core.faults().clear();
    }

    /// Returns the number of running players.
    pub fn live_players(&self) -> usize {
        self.core.state().players.len()
    }

    /// Returns the number of installed cells across all players.
    pub fn cell_count(&self) -> usize {
        self.core.state().cells.len()
    }

    /// Returns the number of gossip ops not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.core.state().in_flight.len()
    }

    /// Returns the entries `cell` has seen, in publish order.
    pub fn entries_seen(&self, cell: &CellId) -> Vec<Entry> {
        self.core
            .state()
            .cells
            .get(cell)
            .map(|c| c.seen.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConductorBackend for SimConductor {
    async fn spawn_player(&self, config: &PlayerConfig) -> Result<PlayerId, BackendError> {
        let mut state = self.core.state();
        let n = state.next_player;
        state.next_player += 1;

        let id = PlayerId::from_seed(self.core.context.seed().wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(n));
        let domain = Domain::of(id, config);
        debug!("Spawned {}-{} as {} ({:?})", config.label, n, id, domain);

        state.players.insert(
            id,
            SimPlayer {
                label: format!("{}-{}", config.label, n),
                domain,
                apps: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn install_app(
        &self,
        player: PlayerId,
        agent: &AgentPubKey,
        app_id: &str,
        bundles: &[BundleDescriptor],
    ) -> Result<Vec<CellId>, BackendError> {
        // Validate everything before touching state so a rejected install leaves nothing behind
        {
            let faults = self.core.faults();
            if let Some(bad) = bundles.iter().find(|b| faults.contains(&b.name)) {
                return Err(BackendError::install(format!("injected failure for bundle {}", bad.name)));
            }
        }
        if let Some(missing) = bundles.iter().find(|b| !self.core.dnas.contains_key(&b.name)) {
            return Err(BackendError::install(format!(
                "no DNA for bundle {} at {}",
                missing.name,
                missing.location.display()
            )));
        }

        let mut state = self.core.state();
        let (domain, label) = {
            let host = state
                .players
                .get(&player)
                .ok_or_else(|| BackendError::unknown_player(player))?;
            if host.apps.contains_key(app_id) {
                return Err(BackendError::install(format!("app id {} already installed", app_id)));
            }
            (host.domain.clone(), host.label.clone())
        };

        let cells: Vec<CellId> = bundles
            .iter()
            .map(|b| CellId {
                player,
                agent: *agent,
                dna: b.name.clone(),
            })
            .collect();
        let mut fresh = HashSet::new();
        if let Some(dup) = cells.iter().find(|c| state.cells.contains_key(*c) || !fresh.insert(*c)) {
            return Err(BackendError::install(format!("cell {} already installed", dup)));
        }

        for cell in &cells {
            // A new cell catches up on everything its peers have seen
            let mut backlog: BTreeMap<u64, (PlayerId, Entry)> = BTreeMap::new();
            for (id, peer) in ConductorCore::peers(&state, &cell.dna, &domain, cell) {
                for (seq, entry) in &peer.seen {
                    backlog.entry(*seq).or_insert_with(|| (id.player, entry.clone()));
                }
            }
            state.cells.insert(
                cell.clone(),
                CellState {
                    domain: domain.clone(),
                    seen: BTreeMap::new(),
                },
            );
            for (from, entry) in backlog.into_values() {
                self.core.schedule(&mut state, from, cell.clone(), entry);
            }
        }

        if let Some(host) = state.players.get_mut(&player) {
            host.apps.insert(app_id.to_string(), cells.clone());
        }
        info!("{}: installed {} ({} cells) for {}", label, app_id, cells.len(), agent);
        Ok(cells)
    }

    async fn uninstall_app(&self, player: PlayerId, app_id: &str) -> Result<(), BackendError> {
        let mut state = self.core.state();
        let cells = state
            .players
            .get_mut(&player)
            .ok_or_else(|| BackendError::unknown_player(player))?
            .apps
            .remove(app_id)
            .unwrap_or_default();
        ConductorCore::drop_cells(&mut state, &cells);
        debug!("{}: uninstalled {}", player, app_id);
        Ok(())
    }

    async fn call(
        &self,
        cell: &CellId,
        zome: &str,
        function: &str,
        payload: Value,
    ) -> Result<Value, BackendError> {
        self.core.pump();

        if !self.core.state().cells.contains_key(cell) {
            return Err(BackendError::unknown_cell(cell));
        }
        let dna = self
            .core
            .dnas
            .get(&cell.dna)
            .ok_or_else(|| BackendError::unknown_cell(cell))?;
        let behaviour = dna.function(zome, function).ok_or_else(|| not_found(zome, function))?;

        debug!("call {}/{} on {}", zome, function, cell);
        match behaviour.dispatch(payload) {
            Dispatch::Done(result) => result,
            Dispatch::Publish(content) => self.core.publish(cell, content),
            Dispatch::List => self.core.list(cell),
        }
    }

    async fn shutdown_player(&self, player: PlayerId) -> Result<(), BackendError> {
        let removed = self.core.state().players.remove(&player);
        let Some(host) = removed else {
            warn!("Shutdown of unknown player {}", player);
            return Err(BackendError::unknown_player(player));
        };

        let cells: Vec<CellId> = host.apps.into_values().flatten().collect();
        ConductorCore::drop_cells(&mut self.core.state(), &cells);
        self.core.network.forget(player);
        debug!("{} shut down ({} cells released)", host.label, cells.len());
        Ok(())
    }

    fn consistency_signal(&self) -> Option<Arc<dyn ConsistencySignal>> {
        if !self.native_signal {
            return None;
        }
        let signal: Arc<dyn ConsistencySignal> = self.oracle.clone();
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dna::TEST_ZOME;

    fn conductor(latency_ms: u64) -> SimConductor {
        let config = SimConductorConfig {
            dnas: vec![SimDna::scaffolding(), SimDna::standard("feed")],
            latency: Duration::from_millis(latency_ms),
            ..Default::default()
        };
        SimConductor::new(config, SimContext::shared(42))
    }

    fn agent(ctx: &SimContext, n: u64) -> AgentPubKey {
        AgentPubKey::from(ctx.derive_signing_key(n).verifying_key())
    }

    fn feed() -> Vec<BundleDescriptor> {
        vec![BundleDescriptor::new("feed", "/happs/feed.dna")]
    }

    #[tokio::test]
    async fn test_player_ids_are_deterministic() {
        let a = conductor(0);
        let b = conductor(0);
        let config = PlayerConfig::gen();

        let ids_a = (a.spawn_player(&config).await.unwrap(), a.spawn_player(&config).await.unwrap());
        let ids_b = (b.spawn_player(&config).await.unwrap(), b.spawn_player(&config).await.unwrap());

        assert_eq!(ids_a, ids_b);
        assert_ne!(ids_a.0, ids_a.1);
    }

    #[tokio::test]
    async fn test_install_returns_cells_in_bundle_order() {
        let sim = conductor(0);
        let player = sim.spawn_player(&PlayerConfig::gen()).await.unwrap();
        let bundles = vec![
            BundleDescriptor::new("scaffolding", "/happs/rep_dsl_test_dna.dna"),
            BundleDescriptor::new("feed", "/happs/feed.dna"),
        ];

        let cells = sim
            .install_app(player, &agent(sim.context(), 0), "app-0", &bundles)
            .await
            .unwrap();

        let dnas: Vec<_> = cells.iter().map(|c| c.dna.as_str()).collect();
        assert_eq!(dnas, vec!["scaffolding", "feed"]);
        let output = sim.call(&cells[0], "interpreter", "test_output", json!({})).await.unwrap();
        assert_eq!(output["compiled"], true);
    }

    #[tokio::test]
    async fn test_rejected_install_leaves_nothing() {
        let sim = conductor(0);
        let player = sim.spawn_player(&PlayerConfig::gen()).await.unwrap();
        let key = agent(sim.context(), 0);

        let unknown = vec![BundleDescriptor::new("ghost", "/happs/ghost.dna")];
        let err = sim.install_app(player, &key, "app-0", &unknown).await.unwrap_err();
        assert!(matches!(err, BackendError::InstallRejected(_)));

        sim.fail_installs_of("feed");
        assert!(sim.install_app(player, &key, "app-0", &feed()).await.is_err());
        assert_eq!(sim.cell_count(), 0);

        sim.clear_faults();
        sim.install_app(player, &key, "app-0", &feed()).await.unwrap();
        let err = sim.install_app(player, &key, "app-0", &feed()).await.unwrap_err();
        assert!(matches!(err, BackendError::InstallRejected(_)));
    }

    #[tokio::test]
    async fn test_unknown_function_rejects_with_body() {
        let sim = conductor(0);
        let player = sim.spawn_player(&PlayerConfig::gen()).await.unwrap();
        let cells = sim
            .install_app(player, &agent(sim.context(), 0), "app-0", &feed())
            .await
            .unwrap();

        let err = sim.call(&cells[0], TEST_ZOME, "nope", Value::Null).await.unwrap_err();
        match err {
            BackendError::CallRejected(body) => assert_eq!(body["kind"], "zome_function_not_found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_gossip_lands_after_latency() {
        let sim = conductor(50);
        let config = PlayerConfig::gen();
        let alice = sim.spawn_player(&config).await.unwrap();
        let bob = sim.spawn_player(&config).await.unwrap();
        let a = sim.install_app(alice, &agent(sim.context(), 0), "app-0", &feed()).await.unwrap();
        let b = sim.install_app(bob, &agent(sim.context(), 1), "app-1", &feed()).await.unwrap();

        sim.call(&a[0], TEST_ZOME, "publish", json!("hello")).await.unwrap();
        assert_eq!(sim.call(&b[0], TEST_ZOME, "list", Value::Null).await.unwrap(), json!([]));

        sim.context().advance_time(Duration::from_millis(50));
        assert_eq!(sim.call(&b[0], TEST_ZOME, "list", Value::Null).await.unwrap(), json!(["hello"]));
        assert_eq!(sim.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_local_only_players_do_not_gossip() {
        let sim = conductor(0);
        let local = PlayerConfig::gen().with_transport(Transport::LocalOnly);
        let alice = sim.spawn_player(&local).await.unwrap();
        let bob = sim.spawn_player(&local).await.unwrap();
        let a = sim.install_app(alice, &agent(sim.context(), 0), "app-0", &feed()).await.unwrap();
        let b = sim.install_app(bob, &agent(sim.context(), 1), "app-1", &feed()).await.unwrap();

        sim.call(&a[0], TEST_ZOME, "publish", json!(1)).await.unwrap();

        assert_eq!(sim.in_flight(), 0);
        assert!(sim.entries_seen(&b[0]).is_empty());
    }

    #[tokio::test]
    async fn test_late_cell_catches_up() {
        let sim = conductor(10);
        let config = PlayerConfig::gen();
        let alice = sim.spawn_player(&config).await.unwrap();
        let a = sim.install_app(alice, &agent(sim.context(), 0), "app-0", &feed()).await.unwrap();
        sim.call(&a[0], TEST_ZOME, "publish", json!("early")).await.unwrap();

        let bob = sim.spawn_player(&config).await.unwrap();
        let b = sim.install_app(bob, &agent(sim.context(), 1), "app-1", &feed()).await.unwrap();
        sim.context().advance_time(Duration::from_millis(10));

        assert_eq!(sim.call(&b[0], TEST_ZOME, "list", Value::Null).await.unwrap(), json!(["early"]));
    }

    #[tokio::test]
    async fn test_shutdown_releases_cells() {
        let sim = conductor(0);
        let player = sim.spawn_player(&PlayerConfig::gen()).await.unwrap();
        let cells = sim
            .install_app(player, &agent(sim.context(), 0), "app-0", &feed())
            .await
            .unwrap();

        sim.shutdown_player(player).await.unwrap();

        assert_eq!(sim.live_players(), 0);
        assert_eq!(sim.cell_count(), 0);
        let err = sim.call(&cells[0], TEST_ZOME, "echo", json!(1)).await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownCell(_)));
        assert!(sim.shutdown_player(player).await.is_err());
    }
}
