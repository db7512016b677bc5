use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vigil_core::{CapabilitySet, Result, VigilError};

use crate::manifest::{EntryPoint, PluginManifest};
use crate::plugin::Plugin;

/// Builds a fresh plugin instance.
pub type PluginConstructor = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Maps entry points (`module.path:Symbol`) to constructors.
///
/// Plugins are compiled into the host, so "importing a module" means looking
/// its symbol up here.
#[derive(Clone, Default)]
pub struct PluginFactory {
    constructors: Arc<RwLock<HashMap<String, HashMap<String, PluginConstructor>>>>,
}

impl PluginFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under an entry point string.
    pub fn register<F>(&self, entry_point: &str, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        let ep: EntryPoint = entry_point
            .parse()
            .map_err(|e: String| VigilError::Config(format!("entry point '{entry_point}': {e}")))?;
        let previous = self
            .constructors
            .write()
            .entry(ep.module.clone())
            .or_default()
            .insert(ep.symbol.clone(), Arc::new(constructor));
        if previous.is_some() {
            warn!(entry_point = %ep, "replacing registered plugin constructor");
        } else {
            debug!(entry_point = %ep, "registered plugin constructor");
        }
        Ok(())
    }

    pub fn unregister(&self, entry_point: &EntryPoint) -> bool {
        let mut constructors = self.constructors.write();
        let Some(symbols) = constructors.get_mut(&entry_point.module) else {
            return false;
        };
        let removed = symbols.remove(&entry_point.symbol).is_some();
        if symbols.is_empty() {
            constructors.remove(&entry_point.module);
        }
        removed
    }

    pub fn contains(&self, entry_point: &EntryPoint) -> bool {
        self.constructors
            .read()
            .get(&entry_point.module)
            .is_some_and(|s| s.contains_key(&entry_point.symbol))
    }

    /// All registered entry points, sorted.
    pub fn entry_points(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .constructors
            .read()
            .iter()
            .flat_map(|(module, symbols)| symbols.keys().map(move |s| format!("{module}:{s}")))
            .collect();
        all.sort();
        all
    }

    fn constructor(&self, entry_point: &EntryPoint) -> std::result::Result<PluginConstructor, String> {
        let constructors = self.constructors.read();
        let symbols = constructors
            .get(&entry_point.module)
            .ok_or_else(|| format!("module '{}' is not registered", entry_point.module))?;
        symbols.get(&entry_point.symbol).cloned().ok_or_else(|| {
            format!(
                "symbol '{}' not found in module '{}'",
                entry_point.symbol, entry_point.module
            )
        })
    }
}

/// Turns a resolved manifest into a plugin instance.
#[derive(Clone, Default)]
pub struct Loader {
    factory: PluginFactory,
}

impl Loader {
    pub fn new(factory: PluginFactory) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &PluginFactory {
        &self.factory
    }

    /// Verify the artifact, construct a fresh instance and check that the
    /// capabilities it advertises fit within `granted`.
    pub fn load(&self, manifest: &PluginManifest, granted: &CapabilitySet) -> Result<Box<dyn Plugin>> {
        let fail = |reason: String| VigilError::Load {
            plugin: manifest.name.clone(),
            reason,
        };

        self.verify_artifact(manifest).map_err(&fail)?;

        let constructor = self.factory.constructor(&manifest.entry_point).map_err(&fail)?;
        let plugin = constructor();

        let advertised = CapabilitySet::from_tokens(plugin.get_capabilities());
        let (_, excess) = granted.partition(&advertised);
        if !excess.is_empty() {
            return Err(fail(format!("advertises capabilities outside its grant: {excess}")));
        }

        info!(
            plugin = %manifest.name,
            version = %manifest.version,
            entry_point = %manifest.entry_point,
            "plugin constructed"
        );
        Ok(plugin)
    }

    fn verify_artifact(&self, manifest: &PluginManifest) -> std::result::Result<(), String> {
        let Some(expected) = &manifest.checksum else {
            return Ok(());
        };
        let artifact = manifest
            .artifact
            .as_deref()
            .ok_or_else(|| "checksum declared without an artifact".to_string())?;
        let bytes = std::fs::read(artifact)
            .map_err(|e| format!("cannot read artifact {}: {e}", artifact.display()))?;
        if !manifest.verify_checksum(&bytes) {
            return Err(format!(
                "checksum mismatch for {}: expected {expected}",
                artifact.display()
            ));
        }
        debug!(plugin = %manifest.name, artifact = ?artifact, "artifact checksum verified");
        Ok(())
    }
}
