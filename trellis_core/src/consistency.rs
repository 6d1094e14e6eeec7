//! Consistency waiting: backend-native convergence or a timed approximation.
//!
//! The mode is chosen once, when the orchestrator is built, and exposed to
//! scenarios as a capability flag. The timed shim gives no correctness
//! guarantee; its outcome is reported as `Approximated`, never `Converged`.

use crate::error::{HarnessError, HarnessResult};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trellis_env::{ConductorBackend, ConsistencySignal, HarnessContext, PlayerId};

/// Default delay of the timed shim.
pub const DEFAULT_SHIM_DELAY: Duration = Duration::from_millis(100);

/// How `consistency()` is satisfied; configured per orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStrategy {
    /// Wait on the backend's convergence signal
    Native,

    /// Wait a fixed delay and hope
    TimedShim {
        /// Delay before resolving
        delay: Duration,
    },
}

impl Default for ConsistencyStrategy {
    fn default() -> Self {
        ConsistencyStrategy::TimedShim {
            delay: DEFAULT_SHIM_DELAY,
        }
    }
}

/// Capability flag visible to scenario code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Backend-native convergence signal
    Native,
    /// Fixed-delay approximation
    TimedApproximation,
}

/// What a completed `consistency()` call guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyOutcome {
    /// The backend reported convergence
    Converged {
        /// Time spent waiting
        waited: Duration,
    },
    /// The shim delay elapsed; convergence is not known
    Approximated {
        /// Time spent waiting
        waited: Duration,
    },
}

impl ConsistencyOutcome {
    /// Returns true only for backend-confirmed convergence.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConsistencyOutcome::Converged { .. })
    }
}

enum WaiterKind {
    Native {
        signal: Arc<dyn ConsistencySignal>,
        timeout: Option<Duration>,
    },
    TimedShim {
        delay: Duration,
    },
}

/// Resolves `consistency()` for one orchestrator run.
pub struct ConsistencyWaiter {
    kind: WaiterKind,
    context: Arc<dyn HarnessContext>,
}

impl ConsistencyWaiter {
    /// Builds the waiter for a strategy.
    ///
    /// # Errors
    /// `ConsistencyUnavailable` if `Native` is requested and the backend has
    /// no signal. The shim is never substituted silently.
    pub fn select(
        strategy: ConsistencyStrategy,
        backend: &dyn ConductorBackend,
        context: Arc<dyn HarnessContext>,
        timeout: Option<Duration>,
    ) -> HarnessResult<Self> {
        let kind = match strategy {
            ConsistencyStrategy::Native => {
                let signal = backend
                    .consistency_signal()
                    .ok_or(HarnessError::ConsistencyUnavailable)?;
                WaiterKind::Native { signal, timeout }
            }
            ConsistencyStrategy::TimedShim { delay } => WaiterKind::TimedShim { delay },
        };
        Ok(Self { kind, context })
    }

    /// Returns the active mode.
    pub fn mode(&self) -> ConsistencyMode {
        match self.kind {
            WaiterKind::Native { .. } => ConsistencyMode::Native,
            WaiterKind::TimedShim { .. } => ConsistencyMode::TimedApproximation,
        }
    }

    /// Waits until `players` have converged (native) or the delay passed (shim).
    pub async fn wait(&self, players: &[PlayerId]) -> HarnessResult<ConsistencyOutcome> {
        let started = self.context.now();

        match &self.kind {
            WaiterKind::Native { signal, timeout } => {
                let wait = signal.await_consistency(players);
                match timeout {
                    Some(bound) => tokio::time::timeout(*bound, wait)
                        .await
                        .map_err(|_| HarnessError::ConsistencyTimeout(bound.as_millis() as u64))??,
                    None => wait.await?,
                }
                let waited = self.context.now().saturating_sub(started);
                debug!("{} players converged after {:?}", players.len(), waited);
                Ok(ConsistencyOutcome::Converged { waited })
            }
            WaiterKind::TimedShim { delay } => {
                self.context.sleep(*delay).await;
                let waited = self.context.now().saturating_sub(started);
                warn!("Consistency approximated by {:?} delay; convergence not verified", delay);
                Ok(ConsistencyOutcome::Approximated { waited })
            }
        }
    }
}
