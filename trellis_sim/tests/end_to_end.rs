//! End-to-end runs of the built-in scenarios against the simulated conductor.

use std::sync::Arc;
use std::time::Duration;
use trellis_core::{
    combine, local_only, ConsistencyStrategy, HarnessError, Middleware, MiddlewareChain, ReportingAdapter,
    ScenarioOutcome,
};
use trellis_sim::scenarios::{self, ScenarioId};
use trellis_sim::{SimConfig, SimWorld};

fn world(config: SimConfig) -> SimWorld {
    SimWorld::new(config)
}

fn isolated() -> MiddlewareChain {
    combine(vec![local_only()])
}

#[tokio::test]
async fn test_standard_catalog_passes() {
    let world = world(SimConfig::default());
    let reporter = Arc::new(ReportingAdapter::new(std::io::sink()));
    let layer: Arc<dyn Middleware> = reporter.clone();
    let mut orchestrator = world.orchestrator(combine(vec![layer, local_only()])).unwrap();
    scenarios::register_all(&mut orchestrator, &world, &ScenarioId::standard()).unwrap();

    let summary = orchestrator.run().await;

    for report in &summary.scenarios {
        assert!(report.outcome.is_passed(), "{} failed: {:?}", report.name, report.outcome);
    }
    assert_eq!(summary.len(), ScenarioId::standard().len());
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(reporter.counts().1, 0);
    assert_eq!(world.conductor.live_players(), 0);
}

#[tokio::test]
async fn test_dsl_compilation_with_timed_shim() {
    let world = world(SimConfig {
        consistency: ConsistencyStrategy::TimedShim {
            delay: Duration::from_millis(100),
        },
        ..Default::default()
    });
    let mut orchestrator = world.orchestrator(isolated()).unwrap();
    scenarios::register(&mut orchestrator, &world, ScenarioId::BasicDslCompilation).unwrap();

    let summary = orchestrator.run().await;

    let report = summary.report("basic_dsl_compilation").unwrap();
    assert!(report.outcome.is_passed());
    assert!(report.duration_ms >= 100);
    assert_eq!(report.players_released, 1);
}

#[tokio::test]
async fn test_unknown_bundle_fails_but_run_continues() {
    let world = world(SimConfig::default());
    let mut orchestrator = world.orchestrator(isolated()).unwrap();
    scenarios::register_all(
        &mut orchestrator,
        &world,
        &[ScenarioId::UnknownBundle, ScenarioId::Echo],
    )
    .unwrap();

    let summary = orchestrator.run().await;

    assert_eq!(
        summary.scenarios[0].outcome,
        ScenarioOutcome::Errored {
            reason: HarnessError::UnknownBundle("not_a_bundle".to_string()).to_string()
        }
    );
    assert_eq!(summary.scenarios[0].players_released, 1);
    assert!(summary.scenarios[1].outcome.is_passed());
    assert_ne!(summary.exit_code(), 0);
    assert_eq!(world.conductor.live_players(), 0);
}

#[tokio::test]
async fn test_install_fault_rolls_back_and_releases() {
    let world = world(SimConfig::default());
    let mut orchestrator = world.orchestrator(isolated()).unwrap();
    scenarios::register(&mut orchestrator, &world, ScenarioId::InstallFault).unwrap();

    let summary = orchestrator.run().await;

    let reason = summary.scenarios[0].outcome.reason().unwrap_or_default().to_string();
    assert!(reason.starts_with("Provisioning failed"), "{}", reason);
    assert_eq!(world.conductor.cell_count(), 0);
    assert_eq!(world.conductor.live_players(), 0);
}

#[tokio::test]
async fn test_networked_gossip_converges_natively() {
    let world = world(SimConfig {
        latency: Duration::from_millis(400),
        loss_rate: 0.3,
        ..Default::default()
    });
    let mut orchestrator = world.orchestrator(MiddlewareChain::default()).unwrap();
    scenarios::register(&mut orchestrator, &world, ScenarioId::CrossPlayerGossip).unwrap();

    let summary = orchestrator.run().await;

    let report = &summary.scenarios[0];
    assert!(report.outcome.is_passed(), "{:?}", report.outcome);
    assert!(report.duration_ms >= 400);
    assert_eq!(world.conductor.in_flight(), 0);
}

#[tokio::test]
async fn test_shim_shorter_than_latency_misses_gossip() {
    let world = world(SimConfig {
        consistency: ConsistencyStrategy::TimedShim {
            delay: Duration::from_millis(100),
        },
        latency: Duration::from_millis(500),
        ..Default::default()
    });
    let mut orchestrator = world.orchestrator(MiddlewareChain::default()).unwrap();
    scenarios::register(&mut orchestrator, &world, ScenarioId::CrossPlayerGossip).unwrap();

    let summary = orchestrator.run().await;

    assert!(matches!(summary.scenarios[0].outcome, ScenarioOutcome::Failed { .. }));
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn test_partition_times_out_native_wait() {
    let world = world(SimConfig {
        consistency_timeout: Some(Duration::from_millis(100)),
        latency: Duration::from_millis(10),
        ..Default::default()
    });
    let conductor = Arc::clone(&world.conductor);
    let config = Arc::clone(&world.player_config);
    let bundles = Arc::clone(&world.bundles);
    let mut orchestrator = world.orchestrator(MiddlewareChain::default()).unwrap();

    orchestrator
        .register_scenario("partitioned", move |s, _t| {
            let (conductor, config, bundles) = (conductor.clone(), config.clone(), bundles.clone());
            async move {
                let players = s.players(&[config.clone(), config]).await?;
                let feed = trellis_core::PlayerTopology::from_names(&bundles, [[["feed"]]])?;
                let happs = s
                    .install_topology(&players, &trellis_core::InstallationTopology::uniform(feed, 2))
                    .await?;
                conductor.network().partition(vec![players[0].id()], vec![players[1].id()]);
                happs[0][0][0].cells()[0]
                    .call(trellis_sim::TEST_ZOME, "publish", serde_json::json!("lost"))
                    .await?;
                s.consistency().await?;
                Ok(())
            }
        })
        .unwrap();

    let summary = orchestrator.run().await;

    assert_eq!(
        summary.scenarios[0].outcome,
        ScenarioOutcome::Errored {
            reason: "Consistency not reached after 100ms".to_string()
        }
    );
    assert_eq!(world.conductor.live_players(), 0);
}

#[tokio::test]
async fn test_same_seed_same_run() {
    let lossy = || SimConfig {
        seed: 7,
        latency: Duration::from_millis(50),
        loss_rate: 0.5,
        ..Default::default()
    };

    let run = |world: SimWorld| async move {
        let mut orchestrator = world.orchestrator(MiddlewareChain::default()).unwrap();
        scenarios::register_all(&mut orchestrator, &world, &ScenarioId::standard()).unwrap();
        let summary = orchestrator.run().await;
        (serde_json::to_value(&summary).unwrap(), world.context.time_ns())
    };

    let first = run(world(lossy())).await;
    let second = run(world(lossy())).await;

    assert_eq!(first, second);
}
