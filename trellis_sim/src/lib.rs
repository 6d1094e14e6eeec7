//! Trellis Deterministic Simulation Harness
//!
//! This crate provides a simulated conductor so Trellis scenarios run
//! without a real runtime, deterministically from a single 64-bit seed.
//!
//! # Core Principle: Ground Truth
//!
//! All sources of non-determinism are controlled:
//! - **Time**: Virtual clock; shim sleeps and gossip latency advance it
//! - **Network**: Gossip ops with configurable latency, loss, and partitions
//! - **Identity**: Agent keys and player ids derived from the seed
//!
//! Because the conductor sees every in-flight gossip op, its
//! `ConvergenceOracle` can answer `consistency()` exactly instead of
//! sleeping and hoping.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  SimContext (virtual clock, ChaCha8 seed)                │
//! │       │                                                  │
//! │  ┌────▼───────────────────────────────────────────────┐  │
//! │  │ SimConductor                                       │  │
//! │  │   players ─► cells (SimDna zomes)                  │  │
//! │  │   gossip ops ──► SimNetworkController (faults)     │  │
//! │  │   ConvergenceOracle (native consistency signal)    │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │       ▲                                                  │
//! │  Orchestrator (trellis_core) + scenarios catalog         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trellis_sim::{scenarios, SimConfig, SimWorld};
//!
//! let world = SimWorld::new(SimConfig { seed: 42, ..Default::default() });
//! let mut orchestrator = world.orchestrator(combine(vec![local_only()]))?;
//! scenarios::register_all(&mut orchestrator, &world, &ScenarioId::standard())?;
//! let summary = orchestrator.run().await;
//! ```

mod conductor;
mod context;
mod dna;
mod exporter;
mod network;
mod oracle;
mod world;
pub mod scenarios;

pub use conductor::{Entry, SimConductor, SimConductorConfig};
pub use context::SimContext;
pub use dna::{SimDna, ZomeFunction, TEST_ZOME};
pub use exporter::{RunSettings, SimExport};
pub use network::SimNetworkController;
pub use oracle::ConvergenceOracle;
pub use world::{default_bundles, SimConfig, SimWorld};
