//! Harness context trait: the clock and entropy seen by the orchestrator.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::time::Duration;

/// Time and identity source for scenario execution.
///
/// The orchestrator reads time and derives agent identities only through
/// this trait, so scenarios run unchanged against a real conductor (wall
/// clock) or the simulated one (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `OsRng`
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
#[async_trait]
pub trait HarnessContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Derives a signing key for an agent identity.
    ///
    /// The simulation combines the master seed with `seed_extension` so the
    /// n-th agent of a run always gets the same key.
    ///
    /// # Arguments
    /// * `seed_extension` - A value to combine with the global seed
    fn derive_signing_key(&self, seed_extension: u64) -> SigningKey;

    /// Returns the context's seed (0 when unseeded).
    fn seed(&self) -> u64;
}
