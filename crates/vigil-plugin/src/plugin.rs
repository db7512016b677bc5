use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use vigil_core::capability::tokens;
use vigil_core::{Result, VigilError, Violation, ViolationKind};

use crate::permissions::PermissionManager;
use crate::sandbox::Sandbox;

/// Contract every plugin implements.
///
/// Hooks run inside the plugin's sandbox, so a slow hook is cut off by the
/// wall-clock limit and recorded as a violation.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Receive the plugin's settings and a handle to the host.
    async fn initialize(&mut self, config: &Value, ctx: &PluginContext) -> Result<()>;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    async fn health_check(&self) -> bool;

    /// Capability tokens the plugin intends to use. Checked against the
    /// grant when the plugin is loaded.
    fn get_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Reject settings before `initialize` runs.
    fn validate_config(&self, _config: &Value) -> bool {
        true
    }

    /// Invoke a named method on a running plugin.
    async fn call(&self, method: &str, _args: Value) -> Result<Value> {
        Err(VigilError::UnsupportedMethod(method.to_string()))
    }
}

/// The host as seen from inside a plugin: permission checks and the
/// operations that need them.
///
/// Checks query the permission manager live, so grants and revocations made
/// after initialization take effect immediately.
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    permissions: Arc<PermissionManager>,
    sandbox: Arc<Sandbox>,
}

impl PluginContext {
    pub fn new(
        plugin: impl Into<String>,
        permissions: Arc<PermissionManager>,
        sandbox: Arc<Sandbox>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            permissions,
            sandbox,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn has_permission(&self, capability: &str) -> bool {
        self.permissions.check_permission(&self.plugin, capability)
    }

    pub fn require(&self, capability: &str) -> Result<()> {
        self.permissions.require(&self.plugin, capability)
    }

    /// Outbound network needs both the sandbox switch and the capability.
    pub fn check_network(&self) -> Result<()> {
        if !self.sandbox.limits().allow_network {
            return Err(self.denied(tokens::NETWORK_OUTBOUND));
        }
        self.require(tokens::NETWORK_OUTBOUND)
    }

    /// File writes need both the sandbox switch and the capability.
    pub fn check_file_write(&self, path: &Path) -> Result<()> {
        if !self.sandbox.limits().allow_file_write {
            tracing::debug!(plugin = %self.plugin, path = ?path, "file write disabled by sandbox");
            return Err(self.denied(tokens::FS_WRITE));
        }
        self.require(tokens::FS_WRITE)
    }

    /// Spawn a subprocess under the sandbox's budget and child limits.
    /// Attempting it without the capability is itself a violation.
    pub fn spawn(&self, command: &mut tokio::process::Command) -> Result<tokio::process::Child> {
        if !self.has_permission(tokens::SUBPROCESS_SPAWN) {
            self.sandbox.record(Violation::new(
                ViolationKind::IllegalSubprocess,
                format!("{} lacks {}", self.plugin, tokens::SUBPROCESS_SPAWN),
            ));
            return Err(self.denied(tokens::SUBPROCESS_SPAWN));
        }
        self.sandbox.spawn(command)
    }

    fn denied(&self, capability: &str) -> VigilError {
        VigilError::PermissionDenied {
            plugin: self.plugin.clone(),
            capability: capability.to_string(),
        }
    }
}
