//! Bundle registry: logical bundle names to installable descriptors.

use crate::error::{HarnessError, HarnessResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use trellis_env::BundleDescriptor;

/// On-disk manifest mapping bundle names to paths.
///
/// ```json
/// { "bundles": { "scaffolding": "../happs/scaffolding/rep_dsl_test_dna.dna" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BundleManifest {
    /// Bundle name -> path, relative paths resolve against the manifest's directory
    pub bundles: BTreeMap<String, PathBuf>,
}

/// Resolves logical bundle names to `BundleDescriptor`s.
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bundles: BTreeMap<String, BundleDescriptor>,
}

impl BundleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bundle under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, location: impl Into<PathBuf>) -> &mut Self {
        let name = name.into();
        let descriptor = BundleDescriptor::new(name.clone(), location);
        self.bundles.insert(name, descriptor);
        self
    }

    /// Builder-style `register`.
    pub fn with_bundle(mut self, name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        self.register(name, location);
        self
    }

    /// Builds a registry from manifest JSON.
    ///
    /// Relative paths are joined onto `base_dir`.
    pub fn from_manifest_json(json: &str, base_dir: &Path) -> Result<Self, serde_json::Error> {
        let manifest: BundleManifest = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for (name, path) in manifest.bundles {
            let location = if path.is_absolute() { path } else { base_dir.join(path) };
            registry.register(name, location);
        }
        Ok(registry)
    }

    /// Resolves a bundle name.
    ///
    /// # Errors
    /// `HarnessError::UnknownBundle` if the name is not registered.
    pub fn resolve(&self, name: &str) -> HarnessResult<BundleDescriptor> {
        self.bundles
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownBundle(name.to_string()))
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.bundles.contains_key(name)
    }

    /// Returns the registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    /// Returns the number of registered bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Returns true if no bundle is registered.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
