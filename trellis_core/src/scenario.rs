//! Scenario context: what a scenario body can ask of the harness.

use crate::assertions::Assertions;
use crate::consistency::{ConsistencyMode, ConsistencyOutcome, ConsistencyWaiter};
use crate::error::{HarnessError, HarnessResult};
use crate::player::{Happ, Player, Provisioner, ProvisioningPolicy};
use crate::topology::InstallationTopology;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use trellis_env::{PlayerConfig, PlayerId};

/// Boxed future returned by scenario bodies.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A registered scenario body.
pub type ScenarioFn = Arc<dyn Fn(ScenarioContext, Assertions) -> BoxFuture<HarnessResult<()>> + Send + Sync>;

/// Boxes an async closure into a `ScenarioFn`.
pub fn scenario_fn<F, Fut>(body: F) -> ScenarioFn
where
    F: Fn(ScenarioContext, Assertions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HarnessResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, t| Box::pin(body(ctx, t)))
}

/// Handle given to a scenario body for provisioning and waiting.
///
/// Every player provisioned through it is tracked and shut down by the
/// orchestrator when the scenario settles, whatever the exit path.
#[derive(Clone)]
pub struct ScenarioContext {
    name: Arc<str>,
    provisioner: Arc<Provisioner>,
    waiter: Arc<ConsistencyWaiter>,
    policy: ProvisioningPolicy,
    players: Arc<Mutex<Vec<PlayerId>>>,
}

impl ScenarioContext {
    /// Creates the context for one scenario run.
    pub fn new(
        name: &str,
        provisioner: Arc<Provisioner>,
        waiter: Arc<ConsistencyWaiter>,
        policy: ProvisioningPolicy,
    ) -> Self {
        Self {
            name: Arc::from(name),
            provisioner,
            waiter,
            policy,
            players: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, Vec<PlayerId>> {
        self.players.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provisions one player per config, in order.
    ///
    /// # Errors
    /// `Provisioning` if any player fails to spawn; none of the players of
    /// this call are returned or left running.
    pub async fn players(&self, configs: &[Arc<PlayerConfig>]) -> HarnessResult<Vec<Player>> {
        let players = self.provisioner.spawn_players(configs, &self.policy).await?;
        self.tracked().extend(players.iter().map(Player::id));
        debug!("{}: {} players ready", self.name, players.len());
        Ok(players)
    }

    /// Installs a multi-player topology, one entry per player in order.
    ///
    /// # Returns
    /// Happs indexed by player, then agent, then app.
    pub async fn install_topology(
        &self,
        players: &[Player],
        topology: &InstallationTopology,
    ) -> HarnessResult<Vec<Vec<Vec<Happ>>>> {
        if players.len() != topology.players().len() {
            return Err(HarnessError::InvalidTopology(format!(
                "topology describes {} players, {} provisioned",
                topology.players().len(),
                players.len()
            )));
        }

        let mut installed = Vec::with_capacity(players.len());
        for (player, player_topology) in players.iter().zip(topology.players()) {
            installed.push(player.install_agents_happs(player_topology).await?);
        }
        Ok(installed)
    }

    /// Waits for cross-player consistency of this scenario's players.
    ///
    /// Check `consistency_mode()` to know whether the result is a real
    /// convergence or the timed approximation.
    pub async fn consistency(&self) -> HarnessResult<ConsistencyOutcome> {
        let players = self.tracked().clone();
        self.waiter.wait(&players).await
    }

    /// Returns how `consistency()` is satisfied.
    pub fn consistency_mode(&self) -> ConsistencyMode {
        self.waiter.mode()
    }

    /// Returns the ids of every player provisioned so far.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.tracked().clone()
    }

    /// Shuts down every tracked player. Returns how many were released.
    pub async fn teardown(&self) -> usize {
        let players: Vec<PlayerId> = std::mem::take(&mut *self.tracked());
        let backend = self.provisioner.backend();
        for player in &players {
            if let Err(e) = backend.shutdown_player(*player).await {
                warn!("{}: shutdown of {} failed: {}", self.name, player, e);
            }
        }
        players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleRegistry;
    use crate::consistency::ConsistencyStrategy;
    use crate::testing::MockBackend;
    use crate::topology::PlayerTopology;
    use trellis_env::{ConductorBackend, HarnessContext, TokioContext};

    fn context(backend: Arc<MockBackend>) -> ScenarioContext {
        let harness: Arc<dyn HarnessContext> = TokioContext::shared();
        let dyn_backend: Arc<dyn ConductorBackend> = backend;
        let waiter = ConsistencyWaiter::select(
            ConsistencyStrategy::default(),
            dyn_backend.as_ref(),
            harness.clone(),
            None,
        )
        .unwrap();
        ScenarioContext::new(
            "demo",
            Arc::new(Provisioner::new(dyn_backend, harness)),
            Arc::new(waiter),
            ProvisioningPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_players_are_tracked_and_torn_down() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend.clone());
        let config = Arc::new(PlayerConfig::gen());

        ctx.players(&[config.clone()]).await.unwrap();
        ctx.players(&[config.clone(), config]).await.unwrap();
        assert_eq!(ctx.player_ids().len(), 3);
        assert_eq!(backend.live_players(), 3);

        assert_eq!(ctx.teardown().await, 3);
        assert_eq!(backend.live_players(), 0);
        assert_eq!(ctx.teardown().await, 0);
    }

    #[tokio::test]
    async fn test_failed_players_call_returns_nothing() {
        let backend = Arc::new(MockBackend::new().fail_spawn_at(1));
        let ctx = context(backend.clone());
        let config = Arc::new(PlayerConfig::gen());

        let result = ctx.players(&[config.clone(), config]).await;

        assert!(matches!(result, Err(HarnessError::Provisioning { .. })));
        assert!(ctx.player_ids().is_empty());
        assert_eq!(backend.live_players(), 0);
    }

    #[tokio::test]
    async fn test_install_topology_checks_player_count() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend);
        let registry = BundleRegistry::new().with_bundle("alpha", "/happs/alpha.dna");
        let player = PlayerTopology::from_names(&registry, [[["alpha"]]]).unwrap();
        let players = ctx.players(&[Arc::new(PlayerConfig::gen())]).await.unwrap();

        let err = ctx
            .install_topology(&players, &InstallationTopology::uniform(player.clone(), 2))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTopology(_)));

        let happs = ctx
            .install_topology(&players, &InstallationTopology::uniform(player, 1))
            .await
            .unwrap();
        assert_eq!(happs[0][0][0].cells()[0].nick(), "alpha");
    }
}
