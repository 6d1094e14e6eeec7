//! Built-in scenarios for the simulated conductor.

use crate::dna::TEST_ZOME;
use crate::world::SimWorld;

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use trellis_core::{HarnessResult, InstallationTopology, Orchestrator, PlayerTopology};
use trellis_env::Transport;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Install the DSL test DNA and compile its test program
    BasicDslCompilation,

    /// Round-trip a payload through a zome call
    Echo,

    /// Two agents on one player, apps with several bundles
    MultiAgentTopology,

    /// Entries published on one player reach the other
    CrossPlayerGossip,

    // Failure demos: these are expected to error
    /// Reference a bundle that is not registered
    UnknownBundle,

    /// The conductor rejects an install
    InstallFault,
}

impl ScenarioId {
    /// Returns every scenario.
    pub fn all() -> Vec<ScenarioId> {
        let mut all = Self::standard();
        all.extend(Self::failure_demos());
        all
    }

    /// Returns scenarios expected to pass.
    pub fn standard() -> Vec<ScenarioId> {
        vec![
            ScenarioId::BasicDslCompilation,
            ScenarioId::Echo,
            ScenarioId::MultiAgentTopology,
            ScenarioId::CrossPlayerGossip,
        ]
    }

    /// Returns scenarios that demonstrate error reporting.
    pub fn failure_demos() -> Vec<ScenarioId> {
        vec![ScenarioId::UnknownBundle, ScenarioId::InstallFault]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::BasicDslCompilation => "basic_dsl_compilation",
            ScenarioId::Echo => "echo",
            ScenarioId::MultiAgentTopology => "multi_agent_topology",
            ScenarioId::CrossPlayerGossip => "cross_player_gossip",
            ScenarioId::UnknownBundle => "unknown_bundle",
            ScenarioId::InstallFault => "install_fault",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::BasicDslCompilation => "Basic DSL program compilation: interpreter/test_output on the scaffolding DNA",
            ScenarioId::Echo => "One player, one agent, echo a payload through a zome call",
            ScenarioId::MultiAgentTopology => "Two agents on one player; cells mirror bundle order",
            ScenarioId::CrossPlayerGossip => "Two players publish; each sees the other's entry once consistent",
            ScenarioId::UnknownBundle => "💥 Unregistered bundle name: scenario errors, run continues",
            ScenarioId::InstallFault => "💥 Conductor rejects the install: scenario errors, players released",
        }
    }

    /// Returns true if this scenario is expected to error.
    pub fn is_failure_demo(&self) -> bool {
        matches!(self, ScenarioId::UnknownBundle | ScenarioId::InstallFault)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic_dsl_compilation" | "dsl" | "scaffolding" => Ok(ScenarioId::BasicDslCompilation),
            "echo" => Ok(ScenarioId::Echo),
            "multi_agent_topology" | "topology" => Ok(ScenarioId::MultiAgentTopology),
            "cross_player_gossip" | "gossip" => Ok(ScenarioId::CrossPlayerGossip),
            "unknown_bundle" => Ok(ScenarioId::UnknownBundle),
            "install_fault" => Ok(ScenarioId::InstallFault),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// Registers one built-in scenario under its name.
pub fn register(orchestrator: &mut Orchestrator, world: &SimWorld, id: ScenarioId) -> HarnessResult<()> {
    let bundles = Arc::clone(&world.bundles);
    let config = Arc::clone(&world.player_config);

    match id {
        ScenarioId::BasicDslCompilation => orchestrator.register_scenario(id.name(), move |s, t| {
            let (bundles, config) = (bundles.clone(), config.clone());
            async move {
                let players = s.players(&[config]).await?;
                let topology = PlayerTopology::from_names(&bundles, [[["scaffolding"]]])?;
                let happs = players[0].install_agents_happs(&topology).await?;
                let first_happ = &happs[0][0];

                let result = first_happ.cells()[0].call("interpreter", "test_output", json!({})).await?;
                s.consistency().await?;
                info!("did a call! {}", result);

                t.equal(first_happ.cells().len(), 1, "one cell per bundle");
                t.equal(&result["compiled"], &json!(true), "test program compiled");
                Ok(())
            }
        }),

        ScenarioId::Echo => orchestrator.register_scenario(id.name(), move |s, t| {
            let (bundles, config) = (bundles.clone(), config.clone());
            async move {
                let players = s.players(&[config]).await?;
                let topology = PlayerTopology::from_names(&bundles, [[["feed"]]])?;
                let happs = players[0].install_agents_happs(&topology).await?;

                let payload = json!({ "greeting": "hello", "n": 7 });
                let echoed = happs[0][0].cells()[0].call(TEST_ZOME, "echo", &payload).await?;
                s.consistency().await?;

                t.equal(echoed, payload, "echo returns the payload");
                Ok(())
            }
        }),

        ScenarioId::MultiAgentTopology => orchestrator.register_scenario(id.name(), move |s, t| {
            let (bundles, config) = (bundles.clone(), config.clone());
            async move {
                let players = s.players(&[config]).await?;
                let topology = PlayerTopology::from_names(
                    &bundles,
                    vec![vec![vec!["scaffolding", "feed"]], vec![vec!["feed"]]],
                )?;
                let happs = players[0].install_agents_happs(&topology).await?;

                t.equal(happs.len(), 2, "one entry per agent");
                let dnas: Vec<&str> = happs[0][0].cells().iter().map(|c| c.id().dna.as_str()).collect();
                t.equal(dnas, vec!["scaffolding", "feed"], "cells mirror bundle order");
                t.not_equal(happs[0][0].agent(), happs[1][0].agent(), "agents have distinct keys");
                t.ok(happs[0][0].cell("feed").is_some(), "cells addressable by nick");
                Ok(())
            }
        }),

        ScenarioId::CrossPlayerGossip => orchestrator.register_scenario(id.name(), move |s, t| {
            let (bundles, config) = (bundles.clone(), config.clone());
            async move {
                let players = s.players(&[config.clone(), config]).await?;
                let feed = PlayerTopology::from_names(&bundles, [[["feed"]]])?;
                let happs = s
                    .install_topology(&players, &InstallationTopology::uniform(feed, 2))
                    .await?;
                let alice = &happs[0][0][0].cells()[0];
                let bob = &happs[1][0][0].cells()[0];

                alice.call(TEST_ZOME, "publish", json!({ "from": "alice" })).await?;
                bob.call(TEST_ZOME, "publish", json!({ "from": "bob" })).await?;
                let outcome = s.consistency().await?;
                if !outcome.is_converged() {
                    warn!("consistency was approximated; gossip checks may be flaky");
                }

                let seen_by_alice: Vec<Value> = alice.call_as(TEST_ZOME, "list", Value::Null).await?;
                let seen_by_bob: Vec<Value> = bob.call_as(TEST_ZOME, "list", Value::Null).await?;

                let isolated = players.iter().all(|p| p.config().transport == Transport::LocalOnly);
                if isolated {
                    t.equal(seen_by_alice.len(), 1, "isolated alice sees only her entry");
                    t.equal(seen_by_bob.len(), 1, "isolated bob sees only his entry");
                } else {
                    t.equal(seen_by_alice.len(), 2, "alice sees both entries");
                    t.equal(seen_by_alice, seen_by_bob, "players converged on the same entries");
                }
                Ok(())
            }
        }),

        ScenarioId::UnknownBundle => orchestrator.register_scenario(id.name(), move |s, _t| {
            let (bundles, config) = (bundles.clone(), config.clone());
            async move {
                let players = s.players(&[config]).await?;
                let topology = PlayerTopology::from_names(&bundles, [[["not_a_bundle"]]])?;
                players[0].install_agents_happs(&topology).await?;
                Ok(())
            }
        }),

        ScenarioId::InstallFault => {
            let conductor = Arc::clone(&world.conductor);
            orchestrator.register_scenario(id.name(), move |s, _t| {
                let (bundles, config, conductor) = (bundles.clone(), config.clone(), conductor.clone());
                async move {
                    let players = s.players(&[config]).await?;
                    let topology = PlayerTopology::from_names(&bundles, [[["scaffolding", "feed"]]])?;

                    conductor.fail_installs_of("feed");
                    let installed = players[0].install_agents_happs(&topology).await;
                    conductor.clear_faults();
                    installed?;
                    Ok(())
                }
            })
        }
    }
}

/// Registers every scenario in `ids`, in order.
pub fn register_all(orchestrator: &mut Orchestrator, world: &SimWorld, ids: &[ScenarioId]) -> HarnessResult<()> {
    for id in ids {
        register(orchestrator, world, *id)?;
    }
    Ok(())
}
