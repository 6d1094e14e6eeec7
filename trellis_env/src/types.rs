//! Common types shared by the orchestrator and conductor backends.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a provisioned player.
///
/// Uses UUID v4 in production and seed-derived UUIDs in simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random PlayerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic PlayerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell players apart in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Public identity of an agent, the ed25519 verifying key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentPubKey(pub [u8; 32]);

impl AgentPubKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<VerifyingKey> for AgentPubKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl std::fmt::Display for AgentPubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent:")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A resolved, installable application bundle.
///
/// Immutable once resolved. `name` is the logical name used by scenarios,
/// `location` is where the backend loads it from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleDescriptor {
    /// Logical bundle name
    pub name: String,

    /// Resolved bundle location
    pub location: PathBuf,
}

impl BundleDescriptor {
    /// Creates a descriptor for a bundle at `location`.
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Returns the cell nickname derived from the bundle file name.
    ///
    /// `../happs/scaffolding/rep_dsl_test_dna.dna` yields `rep_dsl_test_dna`:
    /// the run of word characters immediately before the `.dna` suffix. Falls
    /// back to the logical name when the location has no `.dna` file name.
    pub fn cell_nick(&self) -> String {
        self.location
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(".dna"))
            .map(|stem| {
                let start = stem
                    .char_indices()
                    .rev()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
                    .last()
                    .map(|(i, _)| i)
                    .unwrap_or(stem.len());
                &stem[start..]
            })
            .filter(|nick| !nick.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Addressable identity of an installed cell.
///
/// A cell is one bundle installed for one agent on one player.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    /// Player hosting the cell
    pub player: PlayerId,

    /// Agent the cell runs as
    pub agent: AgentPubKey,

    /// Name of the bundle the cell was installed from
    pub dna: String,
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.dna, self.agent, self.player)
    }
}

/// How a player reaches its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Real network, optionally via a bootstrap service
    Network {
        /// Bootstrap service URL
        bootstrap_url: Option<String>,
    },

    /// Isolated in-process transport; no traffic leaves the host
    LocalOnly,
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Network { bootstrap_url: None }
    }
}

/// Node configuration used to spawn a player.
///
/// Generated once per run and shared read-only across scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Label prefix used in logs
    pub label: String,

    /// Transport the player joins
    pub transport: Transport,

    /// Network seed partitioning players into separate networks
    pub network_seed: Option<String>,
}

impl PlayerConfig {
    /// Generates the default player configuration.
    pub fn gen() -> Self {
        Self {
            label: "player".to_string(),
            transport: Transport::default(),
            network_seed: None,
        }
    }

    /// Sets the network seed.
    pub fn with_network_seed(mut self, seed: impl Into<String>) -> Self {
        self.network_seed = Some(seed.into());
        self
    }

    /// Sets the transport.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self::gen()
    }
}
