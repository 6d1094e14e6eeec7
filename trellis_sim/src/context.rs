//! Simulation context implementing HarnessContext for deterministic runs.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use trellis_env::HarnessContext;

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// This implements `HarnessContext` using:
/// - A virtual clock that only moves when advanced (or slept on)
/// - A seeded ChaCha8 RNG for fault rolls
/// - Seed-derived agent keys, so the n-th agent of a run is always the same
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG for loss and fault rolls
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    fn clock(&self) -> MutexGuard<'_, u64> {
        self.virtual_time_ns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.clock();
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Moves the clock forward to `instant`; never moves it back.
    pub fn advance_to(&self, instant: Duration) {
        let mut time = self.clock();
        *time = (*time).max(instant.as_nanos() as u64);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.clock()
    }

    /// Returns true with probability `p`.
    pub fn roll(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_bool(p.min(1.0))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
        }
    }
}

#[async_trait]
impl HarnessContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        // Sleep advances virtual time; yield so other tasks observe it
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn derive_signing_key(&self, seed_extension: u64) -> SigningKey {
        let combined_seed = self.seed.wrapping_mul(0x517cc1b727220a95) ^ seed_extension;
        let mut key_rng = ChaCha8Rng::seed_from_u64(combined_seed);
        SigningKey::generate(&mut key_rng)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_to(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_to(Duration::from_millis(1500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_sim_context_deterministic_keys() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        // Same seed + extension = same key
        assert_eq!(ctx1.derive_signing_key(1).to_bytes(), ctx2.derive_signing_key(1).to_bytes());

        // Different extension = different key
        assert_ne!(ctx1.derive_signing_key(1).to_bytes(), ctx1.derive_signing_key(2).to_bytes());
    }

    #[test]
    fn test_sim_context_rolls_are_seeded() {
        let a = SimContext::new(7);
        let b = SimContext::new(7);
        let rolls_a: Vec<bool> = (0..32).map(|_| a.roll(0.5)).collect();
        let rolls_b: Vec<bool> = (0..32).map(|_| b.roll(0.5)).collect();
        assert_eq!(rolls_a, rolls_b);
        assert!(!a.roll(0.0));
        assert!(a.roll(1.0));
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_time() {
        let ctx = SimContext::new(1);
        let other = ctx.clone();

        ctx.sleep(Duration::from_millis(100)).await;

        // Clones share the clock
        assert_eq!(other.now(), Duration::from_millis(100));
    }
}
