//! SimWorld - the simulation harness container.

use crate::conductor::{SimConductor, SimConductorConfig};
use crate::context::SimContext;
use crate::dna::SimDna;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use trellis_core::{
    BundleRegistry, ConsistencyStrategy, HarnessResult, MiddlewareChain, Orchestrator, OrchestratorConfig,
};
use trellis_env::PlayerConfig;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// How scenarios wait for consistency
    pub consistency: ConsistencyStrategy,

    /// Bound on native consistency waits
    pub consistency_timeout: Option<Duration>,

    /// Bound on each scenario
    pub scenario_timeout: Option<Duration>,

    /// Latency of every link between players
    pub latency: Duration,

    /// Loss rate of every link between players
    pub loss_rate: f64,

    /// Whether the conductor exposes its convergence signal
    pub native_signal: bool,

    /// DNAs the conductor can install
    pub dnas: Vec<SimDna>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            consistency: ConsistencyStrategy::Native,
            consistency_timeout: Some(Duration::from_secs(5)),
            scenario_timeout: Some(Duration::from_secs(30)),
            latency: Duration::ZERO,
            loss_rate: 0.0,
            native_signal: true,
            dnas: vec![SimDna::scaffolding(), SimDna::standard("feed")],
        }
    }
}

/// Bundles every simulation knows about, by logical name.
pub fn default_bundles() -> BundleRegistry {
    BundleRegistry::new()
        .with_bundle("scaffolding", "happs/scaffolding/rep_dsl_test_dna.dna")
        .with_bundle("feed", "happs/feed/feed.dna")
}

/// The SimWorld - context, conductor and bundles for one run.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Simulated conductor
    pub conductor: Arc<SimConductor>,

    /// Bundles scenarios may install
    pub bundles: Arc<BundleRegistry>,

    /// Player configuration shared by every scenario
    pub player_config: Arc<PlayerConfig>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        let conductor = SimConductor::shared(
            SimConductorConfig {
                dnas: config.dnas.clone(),
                latency: config.latency,
                loss_rate: config.loss_rate,
                native_signal: config.native_signal,
            },
            Arc::clone(&context),
        );

        Self {
            config,
            context,
            conductor,
            bundles: Arc::new(default_bundles()),
            player_config: Arc::new(PlayerConfig::gen()),
        }
    }

    /// Replaces the bundle registry.
    pub fn with_bundles(mut self, bundles: BundleRegistry) -> Self {
        self.bundles = Arc::new(bundles);
        self
    }

    /// Builds an orchestrator on this world's conductor and clock.
    ///
    /// # Errors
    /// `ConsistencyUnavailable` if native consistency is configured and the
    /// conductor's signal is disabled.
    pub fn orchestrator(&self, middleware: MiddlewareChain) -> HarnessResult<Orchestrator> {
        let config = OrchestratorConfig {
            consistency: self.config.consistency,
            consistency_timeout: self.config.consistency_timeout,
            scenario_timeout: self.config.scenario_timeout,
        };
        info!(
            "SimWorld seed={} latency={:?} loss={:.2}",
            self.config.seed, self.config.latency, self.config.loss_rate
        );
        Ok(Orchestrator::new(config, self.conductor.clone(), self.context.clone())?.with_middleware(middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{ConsistencyMode, HarnessError};

    #[test]
    fn test_native_without_signal_is_rejected() {
        let world = SimWorld::new(SimConfig {
            native_signal: false,
            ..Default::default()
        });
        let result = world.orchestrator(MiddlewareChain::default());
        assert!(matches!(result, Err(HarnessError::ConsistencyUnavailable)));
    }

    #[test]
    fn test_default_world_has_both_bundles() {
        let world = SimWorld::new(SimConfig::default());
        assert!(world.bundles.contains("scaffolding"));
        assert!(world.bundles.contains("feed"));
        assert_eq!(
            world.bundles.resolve("scaffolding").unwrap().cell_nick(),
            "rep_dsl_test_dna"
        );
    }

    #[tokio::test]
    async fn test_shim_world_runs_on_virtual_clock() {
        let world = SimWorld::new(SimConfig {
            consistency: ConsistencyStrategy::TimedShim {
                delay: Duration::from_millis(100),
            },
            ..Default::default()
        });
        let mut orchestrator = world.orchestrator(MiddlewareChain::default()).unwrap();
        orchestrator
            .register_scenario("shim", |s, t| async move {
                t.equal(s.consistency_mode(), ConsistencyMode::TimedApproximation, "shim mode");
                let outcome = s.consistency().await?;
                t.ok(!outcome.is_converged(), "shim never claims convergence");
                Ok(())
            })
            .unwrap();

        let summary = orchestrator.run().await;

        assert!(summary.all_passed());
        assert_eq!(summary.scenarios[0].duration_ms, 100);
    }
}
