use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use vigil_config::PermissionsConfig;
use vigil_core::{Capability, CapabilitySet, PluginType, Result, VigilError};

use crate::manifest::PluginManifest;

/// What a plugin asked for, split into what it got and what it did not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PermissionGrant {
    pub plugin: String,
    pub granted: CapabilitySet,
    pub denied: CapabilitySet,
}

struct GrantEntry {
    plugin_type: PluginType,
    granted: CapabilitySet,
}

/// Role-based capability grants, keyed by plugin name.
///
/// A plugin's role is its category. Trusted categories get a wildcard; every
/// other category gets the safe set plus its configured type defaults, and
/// the grant is the intersection of that with what the manifest requests.
pub struct PermissionManager {
    safe: CapabilitySet,
    trusted: HashSet<PluginType>,
    type_defaults: HashMap<PluginType, CapabilitySet>,
    grants: RwLock<HashMap<String, GrantEntry>>,
}

impl PermissionManager {
    pub fn new(config: &PermissionsConfig) -> Self {
        let mut type_defaults = HashMap::new();
        for (key, caps) in &config.type_defaults {
            match key.parse::<PluginType>() {
                Ok(t) => {
                    type_defaults.insert(t, CapabilitySet::from_tokens(caps));
                }
                Err(e) => warn!(key = %key, error = %e, "ignoring permission defaults for unknown type"),
            }
        }
        Self {
            safe: CapabilitySet::from_tokens(&config.safe_capabilities),
            trusted: config.trusted_types.iter().copied().collect(),
            type_defaults,
            grants: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_trusted(&self, plugin_type: PluginType) -> bool {
        self.trusted.contains(&plugin_type)
    }

    /// Everything a plugin of this category may ever hold.
    pub fn allowed_for(&self, plugin_type: PluginType) -> CapabilitySet {
        if self.is_trusted(plugin_type) {
            return CapabilitySet::wildcard();
        }
        let mut allowed = self.safe.clone();
        if let Some(extra) = self.type_defaults.get(&plugin_type) {
            for cap in extra.iter() {
                allowed.insert(cap.clone());
            }
        }
        allowed
    }

    /// Compute the grant for a manifest without storing it.
    pub fn compute_grant(&self, manifest: &PluginManifest) -> PermissionGrant {
        if self.is_trusted(manifest.plugin_type) {
            return PermissionGrant {
                plugin: manifest.name.clone(),
                granted: CapabilitySet::wildcard(),
                denied: CapabilitySet::new(),
            };
        }
        let (granted, denied) = self
            .allowed_for(manifest.plugin_type)
            .partition(&manifest.required_permissions);
        PermissionGrant {
            plugin: manifest.name.clone(),
            granted,
            denied,
        }
    }

    /// Compute and store the grant for a manifest, replacing any earlier one.
    pub fn grant_for_manifest(&self, manifest: &PluginManifest) -> PermissionGrant {
        let grant = self.compute_grant(manifest);
        if !grant.denied.is_empty() {
            warn!(
                plugin = %manifest.name,
                plugin_type = %manifest.plugin_type,
                denied = %grant.denied,
                "requested capabilities not granted"
            );
        }
        info!(plugin = %manifest.name, granted = %grant.granted, "permissions granted");
        self.grants.write().insert(
            manifest.name.clone(),
            GrantEntry {
                plugin_type: manifest.plugin_type,
                granted: grant.granted.clone(),
            },
        );
        grant
    }

    /// Whether `plugin` currently holds `capability`. Unknown plugins hold nothing.
    pub fn check_permission(&self, plugin: &str, capability: &str) -> bool {
        self.grants
            .read()
            .get(plugin)
            .is_some_and(|e| e.granted.allows(capability))
    }

    pub fn require(&self, plugin: &str, capability: &str) -> Result<()> {
        if self.check_permission(plugin, capability) {
            Ok(())
        } else {
            debug!(plugin, capability, "permission check failed");
            Err(VigilError::PermissionDenied {
                plugin: plugin.to_string(),
                capability: capability.to_string(),
            })
        }
    }

    /// Add a capability to a live grant. The capability must be allowed for
    /// the plugin's category.
    pub fn grant(&self, plugin: &str, capability: &str) -> Result<()> {
        let mut grants = self.grants.write();
        let entry = grants
            .get_mut(plugin)
            .ok_or_else(|| VigilError::NotLoaded(plugin.to_string()))?;
        if !self.allowed_for(entry.plugin_type).allows(capability) {
            return Err(VigilError::PermissionDenied {
                plugin: plugin.to_string(),
                capability: capability.to_string(),
            });
        }
        entry.granted.insert(Capability::new(capability));
        info!(plugin, capability, "capability granted");
        Ok(())
    }

    /// Remove a capability from a live grant. Returns whether it was held.
    pub fn revoke(&self, plugin: &str, capability: &str) -> bool {
        let removed = self
            .grants
            .write()
            .get_mut(plugin)
            .is_some_and(|e| e.granted.remove(capability));
        if removed {
            info!(plugin, capability, "capability revoked");
        }
        removed
    }

    pub fn granted(&self, plugin: &str) -> Option<CapabilitySet> {
        self.grants.read().get(plugin).map(|e| e.granted.clone())
    }

    /// Drop a plugin's grant entirely.
    pub fn forget(&self, plugin: &str) {
        self.grants.write().remove(plugin);
    }
}
