//! Fault injection for simulated gossip between players.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use trellis_env::PlayerId;

/// Clamps a loss rate into 0.0 - 1.0; NaN counts as lossless.
fn clamp_loss(loss_rate: f64) -> f64 {
    if loss_rate.is_nan() {
        0.0
    } else {
        loss_rate.clamp(0.0, 1.0)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Network controller for fault injection.
///
/// Links are directed: setting `a -> b` leaves `b -> a` untouched. Links
/// without an override use the default latency and loss.
pub struct SimNetworkController {
    /// Latency for links without an override
    default_latency: Mutex<Duration>,

    /// Loss rate for links without an override
    default_loss: Mutex<f64>,

    /// Per-link latency
    link_latency: Arc<Mutex<HashMap<(PlayerId, PlayerId), Duration>>>,

    /// Per-link packet loss rate (0.0 - 1.0)
    link_loss: Arc<Mutex<HashMap<(PlayerId, PlayerId), f64>>>,

    /// Active partitions (players that cannot communicate)
    partitions: Arc<Mutex<Vec<(Vec<PlayerId>, Vec<PlayerId>)>>>,
}

impl SimNetworkController {
    /// Creates a controller with zero latency and no loss.
    pub fn new() -> Self {
        Self {
            default_latency: Mutex::new(Duration::ZERO),
            default_loss: Mutex::new(0.0),
            link_latency: Arc::new(Mutex::new(HashMap::new())),
            link_loss: Arc::new(Mutex::new(HashMap::new())),
            partitions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sets the latency of every link without an override.
    pub fn set_default_latency(&self, latency: Duration) {
        *lock(&self.default_latency) = latency;
    }

    /// Sets the loss rate of every link without an override.
    pub fn set_default_loss(&self, loss_rate: f64) {
        *lock(&self.default_loss) = clamp_loss(loss_rate);
    }

    /// Sets latency for a specific link.
    pub fn set_latency(&self, from: PlayerId, to: PlayerId, latency: Duration) {
        lock(&self.link_latency).insert((from, to), latency);
    }

    /// Sets packet loss rate for a link.
    pub fn set_loss(&self, from: PlayerId, to: PlayerId, loss_rate: f64) {
        lock(&self.link_loss).insert((from, to), clamp_loss(loss_rate));
    }

    /// Creates a network partition between two groups.
    pub fn partition(&self, group_a: Vec<PlayerId>, group_b: Vec<PlayerId>) {
        lock(&self.partitions).push((group_a, group_b));
    }

    /// Heals all active partitions.
    pub fn heal_all(&self) {
        lock(&self.partitions).clear();
    }

    /// Checks if two players can communicate (not partitioned).
    ///
    /// A player can always reach itself.
    pub fn can_communicate(&self, from: PlayerId, to: PlayerId) -> bool {
        if from == to {
            return true;
        }
        let partitions = lock(&self.partitions);

        !partitions.iter().any(|(group_a, group_b)| {
            let split = |x: &PlayerId, y: &PlayerId| group_a.contains(x) && group_b.contains(y);
            split(&from, &to) || split(&to, &from)
        })
    }

    /// Gets the latency for a link; zero within a player.
    pub fn get_latency(&self, from: PlayerId, to: PlayerId) -> Duration {
        if from == to {
            return Duration::ZERO;
        }
        lock(&self.link_latency)
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| *lock(&self.default_latency))
    }

    /// Gets the loss rate for a link; lossless within a player.
    pub fn get_loss(&self, from: PlayerId, to: PlayerId) -> f64 {
        if from == to {
            return 0.0;
        }
        lock(&self.link_loss)
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| *lock(&self.default_loss))
    }

    /// Drops every override and partition that mentions `player`.
    pub fn forget(&self, player: PlayerId) {
        lock(&self.link_latency).retain(|(a, b), _| *a != player && *b != player);
        lock(&self.link_loss).retain(|(a, b), _| *a != player && *b != player);
        for (group_a, group_b) in lock(&self.partitions).iter_mut() {
            group_a.retain(|p| *p != player);
            group_b.retain(|p| *p != player);
        }
    }
}

impl Default for SimNetworkController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_controller_partition() {
        let controller = SimNetworkController::new();

        let a = PlayerId::from_seed(1);
        let b = PlayerId::from_seed(2);
        let c = PlayerId::from_seed(3);

        // Initially all can communicate
        assert!(controller.can_communicate(a, b));
        assert!(controller.can_communicate(b, c));

        // Partition: {a} vs {b, c}
        controller.partition(vec![a], vec![b, c]);

        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));
        assert!(controller.can_communicate(b, c));
        assert!(controller.can_communicate(a, a));

        controller.heal_all();
        assert!(controller.can_communicate(a, b));
    }

    #[test]
    fn test_network_controller_latency() {
        let controller = SimNetworkController::new();

        let a = PlayerId::from_seed(1);
        let b = PlayerId::from_seed(2);

        assert_eq!(controller.get_latency(a, b), Duration::ZERO);

        controller.set_default_latency(Duration::from_millis(20));
        controller.set_latency(a, b, Duration::from_millis(100));
        assert_eq!(controller.get_latency(a, b), Duration::from_millis(100));

        // Reverse direction falls back to the default
        assert_eq!(controller.get_latency(b, a), Duration::from_millis(20));
        assert_eq!(controller.get_latency(a, a), Duration::ZERO);
    }

    #[test]
    fn test_forget_drops_player_overrides() {
        let controller = SimNetworkController::new();
        let a = PlayerId::from_seed(1);
        let b = PlayerId::from_seed(2);

        controller.set_loss(a, b, 2.0);
        assert_eq!(controller.get_loss(a, b), 1.0);
        controller.partition(vec![a], vec![b]);

        controller.forget(a);
        assert_eq!(controller.get_loss(a, b), 0.0);
        assert!(controller.can_communicate(a, b));
    }

    #[test]
    fn test_nan_loss_is_lossless() {
        let controller = SimNetworkController::new();
        let a = PlayerId::from_seed(1);
        let b = PlayerId::from_seed(2);

        controller.set_default_loss(f64::NAN);
        assert_eq!(controller.get_loss(a, b), 0.0);

        controller.set_loss(b, a, f64::NAN);
        assert_eq!(controller.get_loss(b, a), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn prop_loss_is_clamped(rate in -10.0f64..10.0) {
            let controller = SimNetworkController::new();
            let a = PlayerId::from_seed(1);
            let b = PlayerId::from_seed(2);

            controller.set_loss(a, b, rate);
            let loss = controller.get_loss(a, b);
            proptest::prop_assert!((0.0..=1.0).contains(&loss));
        }

        #[test]
        fn prop_partitions_are_symmetric(x in 0u64..8, y in 0u64..8) {
            let controller = SimNetworkController::new();
            let a = PlayerId::from_seed(x);
            let b = PlayerId::from_seed(y);

            controller.partition(vec![a], vec![b]);
            proptest::prop_assert_eq!(controller.can_communicate(a, b), controller.can_communicate(b, a));
            proptest::prop_assert!(controller.can_communicate(a, a));
        }
    }
}
