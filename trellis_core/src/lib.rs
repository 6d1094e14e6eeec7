//! Trellis Scenario Orchestration
//!
//! Runs multi-agent test scenarios against a conductor backend: provisions
//! players, installs application bundles per agent, forwards zome calls and
//! waits for cross-player consistency before assertions are made.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                        │
//! │   scenarios (registration order)   MiddlewareChain         │
//! │        │                       before ▼   ▲ after          │
//! │  ┌─────▼───────────────────────────────────────────────┐   │
//! │  │ ScenarioContext                                     │   │
//! │  │   players() ──► Provisioner ──► ConductorBackend    │   │
//! │  │   consistency() ──► ConsistencyWaiter               │   │
//! │  │                       native signal | timed shim    │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! │        │                                                   │
//! │   Player ─► Happ ─► Cell.call(zome, fn, payload)           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scenarios run strictly one at a time. A failing scenario is recorded in
//! the `ExecutionSummary` and the run continues with the next one; every
//! player a scenario provisioned is shut down when it settles.
//!
//! # Usage
//!
//! ```ignore
//! use trellis_core::{combine, local_only, Orchestrator, OrchestratorConfig, ReportingAdapter};
//!
//! let mut orchestrator = Orchestrator::new(OrchestratorConfig::default(), backend, context)?
//!     .with_middleware(combine(vec![Arc::new(ReportingAdapter::stdout()), local_only()]));
//!
//! orchestrator.register_scenario("basic dsl compilation", move |s, t| async move {
//!     let players = s.players(&[config.clone()]).await?;
//!     let happs = players[0].install_agents_happs(&topology).await?;
//!     let result = happs[0][0].cells()[0].call("interpreter", "test_output", json!({})).await?;
//!     s.consistency().await?;
//!     t.ok(result.is_object(), "compiled");
//!     Ok(())
//! })?;
//!
//! std::process::exit(orchestrator.run().await.exit_code());
//! ```

mod assertions;
mod bundle;
mod consistency;
mod error;
mod middleware;
mod orchestrator;
mod player;
mod scenario;
mod topology;

#[cfg(test)]
mod testing;

pub use assertions::{AssertionObserver, AssertionRecord, Assertions};
pub use bundle::{BundleManifest, BundleRegistry};
pub use consistency::{
    ConsistencyMode, ConsistencyOutcome, ConsistencyStrategy, ConsistencyWaiter, DEFAULT_SHIM_DELAY,
};
pub use error::{HarnessError, HarnessResult};
pub use middleware::{
    combine, local_only, Middleware, MiddlewareChain, NetworkIsolation, ReportingAdapter,
    ScenarioOutcome, ScenarioRun,
};
pub use orchestrator::{ExecutionSummary, Orchestrator, OrchestratorConfig, ScenarioReport};
pub use player::{Cell, Happ, Player, Provisioner, ProvisioningPolicy};
pub use scenario::{scenario_fn, BoxFuture, ScenarioContext, ScenarioFn};
pub use topology::{AgentSpec, AppSpec, InstallationTopology, PlayerTopology};
