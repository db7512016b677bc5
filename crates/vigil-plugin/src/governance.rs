use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use vigil_core::{Event, Result, Violation};

use crate::instance::{PluginStatus, RegistryStatus};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Freeze,
    Unfreeze,
    Rollback,
    Reload,
    Grant,
    Revoke,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::Rollback => "rollback",
            Self::Reload => "reload",
            Self::Grant => "grant",
            Self::Revoke => "revoke",
        })
    }
}

/// One governance action, kept in memory in the order it happened.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub plugin: String,
    pub reason: Option<String>,
    pub actor: String,
    pub success: bool,
}

/// Entry point for the external policy authority.
///
/// Every action returns a plain success flag and appends an audit record;
/// none of them throw on an already-satisfied end state.
pub struct GovernanceController {
    registry: Arc<Registry>,
    audit: RwLock<Vec<AuditRecord>>,
}

impl GovernanceController {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            audit: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn audit(&self, action: AuditAction, plugin: &str, reason: Option<String>, actor: &str, success: bool) {
        info!(%action, plugin, actor, success, "governance action");
        self.audit.write().push(AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            plugin: plugin.to_string(),
            reason,
            actor: actor.to_string(),
            success,
        });
    }

    /// Freeze immediately, whether or not the plugin is loaded.
    pub async fn freeze(&self, name: &str, reason: &str) -> bool {
        let ok = self.registry.freeze_plugin(name, reason).await;
        self.audit(AuditAction::Freeze, name, Some(reason.to_string()), "policy", ok);
        ok
    }

    /// The explicit, attributed un-freeze. False if the plugin was not frozen.
    pub async fn unfreeze(&self, name: &str, actor: &str) -> bool {
        let ok = self.registry.unfreeze_plugin(name, actor).await;
        self.audit(AuditAction::Unfreeze, name, None, actor, ok);
        ok
    }

    /// Reload a previously loaded version: `target`, or the newest history
    /// entry that differs from the current version. Nothing changes when
    /// there is no such entry.
    pub async fn rollback(&self, name: &str, target: Option<&str>) -> bool {
        let ok = self.try_rollback(name, target).await;
        self.audit(
            AuditAction::Rollback,
            name,
            target.map(|t| format!("target {t}")),
            "policy",
            ok,
        );
        ok
    }

    async fn try_rollback(&self, name: &str, target: Option<&str>) -> bool {
        if self.registry.is_frozen(name) {
            warn!(plugin = %name, "rollback refused: plugin is frozen");
            return false;
        }
        let history = self.registry.history(name);
        let current = self.registry.instance(name).map(|i| i.manifest().version.clone());

        let index = match target {
            Some(raw) => match crate::version::parse_version(raw) {
                Ok(wanted) => history.iter().rposition(|m| m.version == wanted),
                Err(e) => {
                    warn!(plugin = %name, target = raw, error = %e, "invalid rollback target");
                    return false;
                }
            },
            None => history
                .iter()
                .rposition(|m| current.as_ref() != Some(&m.version)),
        };
        let Some(index) = index else {
            warn!(plugin = %name, ?target, "no version in history to roll back to");
            return false;
        };

        let manifest = history[index].clone();
        if current.as_ref() == Some(&manifest.version) {
            return true;
        }

        match self.registry.replace_plugin(name, manifest.clone()).await {
            Ok(_) => {
                // Later entries are discarded so the restored version becomes newest.
                self.registry.set_history(name, history[..=index].to_vec());
                let from = current.map(|v| v.to_string()).unwrap_or_default();
                info!(plugin = %name, from = %from, to = %manifest.version, "plugin rolled back");
                self.registry.events().publish(Event::PluginRolledBack {
                    plugin: name.to_string(),
                    from_version: from,
                    to_version: manifest.version.to_string(),
                });
                true
            }
            Err(e) => {
                self.registry.set_history(name, history);
                warn!(plugin = %name, error = %e, "rollback failed");
                false
            }
        }
    }

    /// Re-read the descriptor and swap in a fresh instance. A plugin whose
    /// descriptor has disappeared is left as it is.
    pub async fn reload(&self, name: &str) -> bool {
        let ok = self.try_reload(name).await;
        self.audit(AuditAction::Reload, name, None, "policy", ok);
        ok
    }

    async fn try_reload(&self, name: &str) -> bool {
        if self.registry.is_frozen(name) {
            warn!(plugin = %name, "reload refused: plugin is frozen");
            return false;
        }
        let Some(manifest) = self.registry.rediscover(name) else {
            warn!(plugin = %name, "reload failed: descriptor not found");
            return false;
        };
        match self.registry.replace_plugin(name, manifest).await {
            Ok(instance) => {
                info!(plugin = %name, version = %instance.manifest().version, "plugin reloaded");
                true
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "reload failed");
                false
            }
        }
    }

    pub fn grant_permission(&self, name: &str, capability: &str, actor: &str) -> Result<()> {
        let result = self.registry.permissions().grant(name, capability);
        self.audit(
            AuditAction::Grant,
            name,
            Some(capability.to_string()),
            actor,
            result.is_ok(),
        );
        result
    }

    pub fn revoke_permission(&self, name: &str, capability: &str, actor: &str) -> bool {
        let ok = self.registry.permissions().revoke(name, capability);
        self.audit(AuditAction::Revoke, name, Some(capability.to_string()), actor, ok);
        ok
    }

    pub fn get_plugin_status(&self, name: &str) -> Option<PluginStatus> {
        self.registry.get_plugin_status(name)
    }

    pub fn get_registry_status(&self) -> RegistryStatus {
        self.registry.get_registry_status()
    }

    /// Violations recorded by the plugin's current sandbox.
    pub fn violations(&self, name: &str) -> Vec<Violation> {
        self.registry
            .instance(name)
            .map(|i| i.sandbox().violations())
            .unwrap_or_default()
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.audit.read().clone()
    }
}
