//! Typed installation topology: player -> agent -> app -> bundle.
//!
//! Every level is an ordered list. Construction checks the structural
//! invariants (no empty app, no agent without apps) and resolves every
//! bundle name up front, so a bad topology fails before any install.

use crate::bundle::BundleRegistry;
use crate::error::{HarnessError, HarnessResult};
use trellis_env::{AgentPubKey, BundleDescriptor};

/// One app: an ordered, non-empty list of bundles installed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    app_id: Option<String>,
    bundles: Vec<BundleDescriptor>,
}

impl AppSpec {
    /// Creates an app from resolved bundles.
    ///
    /// # Errors
    /// `InvalidTopology` if `bundles` is empty.
    pub fn new(bundles: Vec<BundleDescriptor>) -> HarnessResult<Self> {
        if bundles.is_empty() {
            return Err(HarnessError::InvalidTopology("app has no bundles".to_string()));
        }
        Ok(Self { app_id: None, bundles })
    }

    /// Resolves bundle names through the registry and creates an app.
    pub fn from_names<S: AsRef<str>>(
        registry: &BundleRegistry,
        names: impl IntoIterator<Item = S>,
    ) -> HarnessResult<Self> {
        let bundles = names
            .into_iter()
            .map(|name| registry.resolve(name.as_ref()))
            .collect::<HarnessResult<Vec<_>>>()?;
        Self::new(bundles)
    }

    /// Sets an explicit installed app id.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Returns the explicit app id, if any.
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// Returns the bundles in declaration order.
    pub fn bundles(&self) -> &[BundleDescriptor] {
        &self.bundles
    }
}

/// One agent: an optional fixed identity and the apps installed under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    identity: Option<AgentPubKey>,
    apps: Vec<AppSpec>,
}

impl AgentSpec {
    /// Creates an agent with a generated identity.
    ///
    /// # Errors
    /// `InvalidTopology` if `apps` is empty.
    pub fn new(apps: Vec<AppSpec>) -> HarnessResult<Self> {
        if apps.is_empty() {
            return Err(HarnessError::InvalidTopology("agent has no apps".to_string()));
        }
        Ok(Self { identity: None, apps })
    }

    /// Installs under a supplied identity instead of a generated one.
    pub fn with_identity(mut self, identity: AgentPubKey) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Returns the supplied identity, if any.
    pub fn identity(&self) -> Option<AgentPubKey> {
        self.identity
    }

    /// Returns the apps in declaration order.
    pub fn apps(&self) -> &[AppSpec] {
        &self.apps
    }
}

/// Everything installed on one player, agents in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerTopology {
    agents: Vec<AgentSpec>,
}

impl PlayerTopology {
    /// Creates a player topology from agents.
    pub fn new(agents: Vec<AgentSpec>) -> Self {
        Self { agents }
    }

    /// Builds a topology from nested bundle names: agents, apps, bundles.
    ///
    /// ```ignore
    /// let topology = PlayerTopology::from_names(&registry, [[["scaffolding"]]])?;
    /// ```
    pub fn from_names<Agents, Apps, Bundles, S>(
        registry: &BundleRegistry,
        agents: Agents,
    ) -> HarnessResult<Self>
    where
        Agents: IntoIterator<Item = Apps>,
        Apps: IntoIterator<Item = Bundles>,
        Bundles: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let agents = agents
            .into_iter()
            .map(|apps| {
                let apps = apps
                    .into_iter()
                    .map(|bundles| AppSpec::from_names(registry, bundles))
                    .collect::<HarnessResult<Vec<_>>>()?;
                AgentSpec::new(apps)
            })
            .collect::<HarnessResult<Vec<_>>>()?;
        Ok(Self::new(agents))
    }

    /// Returns the agents in declaration order.
    pub fn agents(&self) -> &[AgentSpec] {
        &self.agents
    }

    /// Returns the total number of bundles across all agents and apps.
    pub fn bundle_count(&self) -> usize {
        self.agents
            .iter()
            .flat_map(|agent| agent.apps())
            .map(|app| app.bundles().len())
            .sum()
    }
}

/// Topologies for several players, one entry per player in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallationTopology {
    players: Vec<PlayerTopology>,
}

impl InstallationTopology {
    /// Creates a topology from per-player entries.
    pub fn new(players: Vec<PlayerTopology>) -> Self {
        Self { players }
    }

    /// Uses the same player topology for `count` players.
    pub fn uniform(player: PlayerTopology, count: usize) -> Self {
        Self {
            players: vec![player; count],
        }
    }

    /// Returns the per-player topologies.
    pub fn players(&self) -> &[PlayerTopology] {
        &self.players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BundleRegistry {
        BundleRegistry::new()
            .with_bundle("alpha", "/happs/alpha.dna")
            .with_bundle("beta", "/happs/beta.dna")
    }

    #[test]
    fn test_from_names_preserves_nesting_order() {
        let topology = PlayerTopology::from_names(
            &registry(),
            vec![vec![vec!["beta", "alpha"]], vec![vec!["alpha"], vec!["beta"]]],
        )
        .unwrap();

        assert_eq!(topology.agents().len(), 2);
        let first_app = &topology.agents()[0].apps()[0];
        let names: Vec<_> = first_app.bundles().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
        assert_eq!(topology.agents()[1].apps().len(), 2);
        assert_eq!(topology.bundle_count(), 4);
    }

    #[test]
    fn test_unknown_bundle_fails_before_install() {
        let err = PlayerTopology::from_names(&registry(), [[["alpha", "gamma"]]]).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownBundle(ref name) if name == "gamma"));
    }

    #[test]
    fn test_empty_app_rejected() {
        let err = AppSpec::new(Vec::new()).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTopology(_)));
    }

    #[test]
    fn test_agent_without_apps_rejected() {
        let err = AgentSpec::new(Vec::new()).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTopology(_)));
    }

    #[test]
    fn test_uniform_topology() {
        let player = PlayerTopology::from_names(&registry(), [[["alpha"]]]).unwrap();
        let topology = InstallationTopology::uniform(player, 3);
        assert_eq!(topology.players().len(), 3);
    }
}
