//! Production implementation of HarnessContext using Tokio.

use crate::HarnessContext;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Production context backed by Tokio and OS entropy.
///
/// Time comes from the system clock, agent keys from OsRng.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HarnessContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn derive_signing_key(&self, _seed_extension: u64) -> SigningKey {
        // Unseeded: every agent gets a fresh random identity
        use rand::rngs::OsRng;
        SigningKey::generate(&mut OsRng)
    }

    fn seed(&self) -> u64 {
        0
    }
}
