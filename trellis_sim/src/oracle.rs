//! Convergence oracle: ground truth about gossip between simulated players.
//!
//! The oracle sees every in-flight gossip op, so it knows exactly when a set
//! of players has converged. It drives the virtual clock forward to the next
//! delivery instead of sleeping, which keeps native waits instant and
//! reproducible.

use crate::conductor::{ConductorCore, Domain};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use trellis_env::{BackendError, ConsistencySignal, HarnessContext, PlayerId};

/// Real-time poll interval while every pending op sits behind a partition.
const BLOCKED_POLL: Duration = Duration::from_millis(5);

/// Ground-truth convergence checks over a simulated conductor.
pub struct ConvergenceOracle {
    core: Arc<ConductorCore>,
}

impl ConvergenceOracle {
    pub(crate) fn new(core: Arc<ConductorCore>) -> Self {
        Self { core }
    }

    /// Returns the number of gossip ops still bound for `players`.
    pub fn pending(&self, players: &[PlayerId]) -> usize {
        self.core
            .state()
            .in_flight
            .iter()
            .filter(|op| players.contains(&op.to.player))
            .count()
    }

    /// Returns true when nothing is in flight to `players` and, among their
    /// cells, every DNA has one view per transport domain.
    pub fn is_converged(&self, players: &[PlayerId]) -> bool {
        if self.pending(players) > 0 {
            return false;
        }

        let state = self.core.state();
        let mut views: Vec<(&str, &Domain, Vec<u64>)> = Vec::new();
        for (id, cell) in state.cells.iter().filter(|(id, _)| players.contains(&id.player)) {
            let seen: Vec<u64> = cell.seen.keys().copied().collect();
            match views
                .iter()
                .position(|(dna, domain, _)| *dna == id.dna && **domain == cell.domain)
            {
                Some(i) if views[i].2 != seen => return false,
                Some(_) => {}
                None => views.push((id.dna.as_str(), &cell.domain, seen)),
            }
        }
        true
    }
}

#[async_trait]
impl ConsistencySignal for ConvergenceOracle {
    async fn await_consistency(&self, players: &[PlayerId]) -> Result<(), BackendError> {
        let started = self.core.context.now();
        loop {
            self.core.pump();
            if self.is_converged(players) {
                debug!(
                    "{} players converged after {:?} virtual",
                    players.len(),
                    self.core.context.now().saturating_sub(started)
                );
                return Ok(());
            }

            match self.core.next_delivery(players) {
                Some(at) => {
                    self.core.context.advance_to(at);
                    tokio::task::yield_now().await;
                }
                // Everything left is partitioned; wait for a heal or the caller's timeout
                None => tokio::time::sleep(BLOCKED_POLL).await,
            }
        }
    }
}
