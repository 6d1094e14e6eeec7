//! Player, happ and cell handles, and the provisioning that creates them.

use crate::error::{HarnessError, HarnessResult};
use crate::topology::{AppSpec, PlayerTopology};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use trellis_env::{
    AgentPubKey, BackendError, CellId, ConductorBackend, HarnessContext, PlayerConfig, PlayerId,
    Transport,
};

/// Provisioning policy applied to every player a scenario spawns.
///
/// Middleware rewrites this before the scenario body runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningPolicy {
    /// Force every player onto the isolated local transport
    pub force_local_only: bool,
}

impl ProvisioningPolicy {
    /// Returns the effective configuration for a requested one.
    pub fn apply(&self, config: &Arc<PlayerConfig>) -> Arc<PlayerConfig> {
        if self.force_local_only && config.transport != Transport::LocalOnly {
            Arc::new(config.as_ref().clone().with_transport(Transport::LocalOnly))
        } else {
            Arc::clone(config)
        }
    }
}

/// Shared provisioning machinery for one orchestrator run.
///
/// Owns the identity counter so agent keys are derived in a stable order
/// across the whole run.
pub struct Provisioner {
    backend: Arc<dyn ConductorBackend>,
    context: Arc<dyn HarnessContext>,
    next_agent: AtomicU64,
    next_app: AtomicU64,
}

impl Provisioner {
    /// Creates a provisioner over a backend and harness context.
    pub fn new(backend: Arc<dyn ConductorBackend>, context: Arc<dyn HarnessContext>) -> Self {
        Self {
            backend,
            context,
            next_agent: AtomicU64::new(0),
            next_app: AtomicU64::new(0),
        }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<dyn ConductorBackend> {
        &self.backend
    }

    /// Returns the harness context.
    pub fn context(&self) -> &Arc<dyn HarnessContext> {
        &self.context
    }

    /// Generates the next agent identity from the harness context.
    pub fn generate_agent(&self) -> AgentPubKey {
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed);
        AgentPubKey::from(self.context.derive_signing_key(index).verifying_key())
    }

    fn next_app_id(&self, agent: &AgentPubKey) -> String {
        let index = self.next_app.fetch_add(1, Ordering::Relaxed);
        format!("app-{}-{}", index, &agent.to_string()["agent:".len()..])
    }

    /// Spawns one player per config, in order.
    ///
    /// All-or-nothing: if any spawn fails, the players already spawned by
    /// this call are shut down and no handle is returned.
    pub async fn spawn_players(
        self: &Arc<Self>,
        configs: &[Arc<PlayerConfig>],
        policy: &ProvisioningPolicy,
    ) -> HarnessResult<Vec<Player>> {
        let mut players = Vec::with_capacity(configs.len());

        for (index, requested) in configs.iter().enumerate() {
            let config = policy.apply(requested);
            match self.backend.spawn_player(&config).await {
                Ok(id) => {
                    debug!("Spawned player {} ({}) #{}", id, config.label, index);
                    players.push(Player {
                        id,
                        config,
                        provisioner: Arc::clone(self),
                    });
                }
                Err(e) => {
                    warn!("Player #{} failed to spawn, releasing {} spawned", index, players.len());
                    for player in &players {
                        if let Err(shutdown_err) = self.backend.shutdown_player(player.id).await {
                            warn!("Shutdown of {} failed: {}", player.id, shutdown_err);
                        }
                    }
                    return Err(HarnessError::provisioning(
                        format!("player #{} failed to spawn", index),
                        e,
                    ));
                }
            }
        }

        Ok(players)
    }
}

/// Handle to one provisioned player node.
#[derive(Clone)]
pub struct Player {
    id: PlayerId,
    config: Arc<PlayerConfig>,
    provisioner: Arc<Provisioner>,
}

impl Player {
    /// Returns the player's id.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Returns the effective configuration the player was spawned with.
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Installs every agent and app of `topology`, in declaration order.
    ///
    /// # Returns
    /// Happs indexed by agent, then app. Each happ's cells mirror the
    /// bundle order of its `AppSpec`.
    ///
    /// # Errors
    /// `Provisioning` if the backend rejects any install. Apps already
    /// installed by this call are uninstalled first, so nothing partial
    /// stays addressable.
    pub async fn install_agents_happs(&self, topology: &PlayerTopology) -> HarnessResult<Vec<Vec<Happ>>> {
        let mut installed: Vec<Vec<Happ>> = Vec::with_capacity(topology.agents().len());

        for (agent_index, agent_spec) in topology.agents().iter().enumerate() {
            let agent = agent_spec
                .identity()
                .unwrap_or_else(|| self.provisioner.generate_agent());
            let mut happs = Vec::with_capacity(agent_spec.apps().len());

            for app in agent_spec.apps() {
                match self.install_happ(agent, app).await {
                    Ok(happ) => happs.push(happ),
                    Err(e) => {
                        warn!(
                            "Install for agent #{} on {} failed, rolling back",
                            agent_index, self.id
                        );
                        installed.push(happs);
                        self.rollback(installed.iter().flatten()).await;
                        return Err(e);
                    }
                }
            }

            installed.push(happs);
        }

        Ok(installed)
    }

    /// Installs one app for `agent` and returns its happ.
    pub async fn install_happ(&self, agent: AgentPubKey, app: &AppSpec) -> HarnessResult<Happ> {
        let app_id = app
            .app_id()
            .map(str::to_string)
            .unwrap_or_else(|| self.provisioner.next_app_id(&agent));
        let backend = self.provisioner.backend();

        let cell_ids = backend
            .install_app(self.id, &agent, &app_id, app.bundles())
            .await
            .map_err(|e| HarnessError::provisioning(format!("install of {} on {}", app_id, self.id), e))?;

        if cell_ids.len() != app.bundles().len() {
            // The backend broke its contract; don't leave the app behind
            if let Err(e) = backend.uninstall_app(self.id, &app_id).await {
                warn!("Rollback of {} on {} failed: {}", app_id, self.id, e);
            }
            return Err(HarnessError::provisioning(
                format!("install of {} on {}", app_id, self.id),
                BackendError::install(format!(
                    "expected {} cells, got {}",
                    app.bundles().len(),
                    cell_ids.len()
                )),
            ));
        }

        let cells = cell_ids
            .into_iter()
            .zip(app.bundles())
            .map(|(id, bundle)| Cell {
                id,
                nick: bundle.cell_nick(),
                backend: Arc::clone(backend),
            })
            .collect();

        debug!("Installed {} for {} on {}", app_id, agent, self.id);
        Ok(Happ { app_id, agent, cells })
    }

    async fn rollback<'a>(&self, happs: impl Iterator<Item = &'a Happ>) {
        for happ in happs {
            if let Err(e) = self.provisioner.backend().uninstall_app(self.id, &happ.app_id).await {
                warn!("Rollback of {} on {} failed: {}", happ.app_id, self.id, e);
            }
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

/// An installed app instance: one agent's cells on one player.
#[derive(Debug, Clone)]
pub struct Happ {
    app_id: String,
    agent: AgentPubKey,
    cells: Vec<Cell>,
}

impl Happ {
    /// Returns the installed app id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the agent the app is installed for.
    pub fn agent(&self) -> AgentPubKey {
        self.agent
    }

    /// Returns the cells in bundle declaration order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Looks a cell up by its nickname.
    pub fn cell(&self, nick: &str) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.nick == nick)
    }
}

/// An addressable cell that answers zome calls.
#[derive(Clone)]
pub struct Cell {
    id: CellId,
    nick: String,
    backend: Arc<dyn ConductorBackend>,
}

impl Cell {
    /// Returns the cell id.
    pub fn id(&self) -> &CellId {
        &self.id
    }

    /// Returns the nickname derived from the bundle file name.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Calls `function` in `zome` with a serializable payload.
    ///
    /// # Errors
    /// `RemoteCall` carrying the backend's error payload if the call is rejected.
    pub async fn call<P: Serialize>(&self, zome: &str, function: &str, payload: P) -> HarnessResult<Value> {
        let payload = serde_json::to_value(payload)?;
        debug!("call {}/{} on {}", zome, function, self.id);

        self.backend
            .call(&self.id, zome, function, payload)
            .await
            .map_err(|e| match e {
                BackendError::CallRejected(payload) => HarnessError::RemoteCall {
                    cell: self.id.to_string(),
                    zome: zome.to_string(),
                    function: function.to_string(),
                    payload,
                },
                other => HarnessError::Backend(other),
            })
    }

    /// Calls and deserializes the result into `T`.
    pub async fn call_as<T, P>(&self, zome: &str, function: &str, payload: P) -> HarnessResult<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let value = self.call(zome, function, payload).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("nick", &self.nick)
            .finish()
    }
}
