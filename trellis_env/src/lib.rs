//! Trellis Environment Abstraction Layer
//!
//! This crate defines the contracts the Trellis orchestrator requires from
//! the outside world, so the same scenarios can run against a **Production**
//! conductor or the deterministic **Simulation** conductor in `trellis_sim`.
//!
//! # Core Concept: The Opaque Backend
//!
//! The orchestrator never executes application code itself. It only needs:
//! - Time and identity (`HarnessContext`: `now()`, `sleep()`, `derive_signing_key()`)
//! - Provisioning and calls (`ConductorBackend`: `spawn_player()`, `install_app()`, `call()`)
//! - Optionally, a convergence signal (`ConsistencySignal`)
//!
//! In simulation every source of entropy derives from one 64-bit seed, so a
//! failing scenario is reproducible from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use trellis_env::{ConductorBackend, PlayerConfig};
//!
//! async fn smoke<B: ConductorBackend>(backend: &B) -> Result<(), BackendError> {
//!     let player = backend.spawn_player(&PlayerConfig::gen()).await?;
//!     backend.shutdown_player(player).await
//! }
//! ```

mod backend;
mod context;
mod error;
mod tokio_impl;
mod types;

pub use backend::{ConductorBackend, ConsistencySignal};
pub use context::HarnessContext;
pub use error::BackendError;
pub use tokio_impl::TokioContext;
pub use types::{AgentPubKey, BundleDescriptor, CellId, PlayerConfig, PlayerId, Transport};
