use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use vigil_core::{CapabilitySet, PluginState, PluginType, Result, VigilError};

use crate::manifest::PluginManifest;
use crate::plugin::{Plugin, PluginContext};
use crate::sandbox::Sandbox;

/// Last health probe of one plugin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthRecord {
    pub last_checked: Option<DateTime<Utc>>,
    pub healthy: Option<bool>,
    pub consecutive_failures: u32,
}

/// A loaded plugin: its manifest, the live object and the runtime record.
pub struct PluginInstance {
    manifest: Arc<PluginManifest>,
    pub(crate) plugin: tokio::sync::RwLock<Box<dyn Plugin>>,
    state: RwLock<PluginState>,
    sandbox: Arc<Sandbox>,
    context: PluginContext,
    calls: AtomicU64,
    errors: AtomicU64,
    last_error: RwLock<Option<String>>,
    frozen_reason: RwLock<Option<String>>,
    health: RwLock<HealthRecord>,
    history: Vec<String>,
    loaded_at: DateTime<Utc>,
}

impl PluginInstance {
    pub(crate) fn new(
        manifest: Arc<PluginManifest>,
        plugin: Box<dyn Plugin>,
        sandbox: Arc<Sandbox>,
        context: PluginContext,
        history: Vec<String>,
    ) -> Self {
        Self {
            manifest,
            plugin: tokio::sync::RwLock::new(plugin),
            state: RwLock::new(PluginState::Loaded),
            sandbox,
            context,
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_error: RwLock::new(None),
            frozen_reason: RwLock::new(None),
            health: RwLock::new(HealthRecord::default()),
            history,
            loaded_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &Arc<PluginManifest> {
        &self.manifest
    }

    pub fn state(&self) -> PluginState {
        *self.state.read()
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// Move along one edge of the lifecycle graph. Check and set happen
    /// under one lock so concurrent transitions cannot interleave.
    pub(crate) fn transition(&self, to: PluginState) -> Result<PluginState> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(VigilError::InvalidTransition {
                plugin: self.manifest.name.clone(),
                from,
                to,
            });
        }
        *state = to;
        tracing::debug!(plugin = %self.manifest.name, %from, %to, "state transition");
        Ok(from)
    }

    /// Freeze from any state. Returns the previous state.
    pub(crate) fn freeze(&self, reason: &str) -> PluginState {
        let mut state = self.state.write();
        let from = *state;
        *state = PluginState::Frozen;
        *self.frozen_reason.write() = Some(reason.to_string());
        from
    }

    pub(crate) fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, error: &VigilError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(error.to_string());
    }

    pub(crate) fn record_health(&self, healthy: bool) {
        let mut health = self.health.write();
        health.last_checked = Some(Utc::now());
        health.healthy = Some(healthy);
        if healthy {
            health.consecutive_failures = 0;
        } else {
            health.consecutive_failures += 1;
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn health(&self) -> HealthRecord {
        self.health.read().clone()
    }

    pub fn status(&self, granted: Option<CapabilitySet>) -> PluginStatus {
        PluginStatus {
            name: self.manifest.name.clone(),
            version: Some(self.manifest.version.to_string()),
            plugin_type: Some(self.manifest.plugin_type),
            state: self.state(),
            loaded: true,
            granted_permissions: granted.map(|g| g.to_vec()).unwrap_or_default(),
            call_count: self.call_count(),
            error_count: self.error_count(),
            violation_count: self.sandbox.violation_count(),
            last_error: self.last_error(),
            frozen_reason: self.frozen_reason.read().clone(),
            version_history: self.history.clone(),
            health: self.health(),
            loaded_at: Some(self.loaded_at),
        }
    }
}

/// Snapshot of one plugin for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub name: String,
    /// `None` for a name frozen before any descriptor was seen.
    pub version: Option<String>,
    pub plugin_type: Option<PluginType>,
    pub state: PluginState,
    pub loaded: bool,
    pub granted_permissions: Vec<String>,
    pub call_count: u64,
    pub error_count: u64,
    pub violation_count: usize,
    pub last_error: Option<String>,
    pub frozen_reason: Option<String>,
    /// Versions this plugin has been loaded at, oldest first.
    pub version_history: Vec<String>,
    pub health: HealthRecord,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl PluginStatus {
    /// Status of a plugin that is known (discovered or frozen) but has no instance.
    pub fn unloaded(manifest: &PluginManifest, frozen_reason: Option<String>, history: Vec<String>) -> Self {
        Self {
            name: manifest.name.clone(),
            version: Some(manifest.version.to_string()),
            plugin_type: Some(manifest.plugin_type),
            state: if frozen_reason.is_some() {
                PluginState::Frozen
            } else {
                PluginState::Unloaded
            },
            loaded: false,
            granted_permissions: Vec::new(),
            call_count: 0,
            error_count: 0,
            violation_count: 0,
            last_error: None,
            frozen_reason,
            version_history: history,
            health: HealthRecord::default(),
            loaded_at: None,
        }
    }

    /// Status of a name frozen with no descriptor on record.
    pub fn frozen(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            plugin_type: None,
            state: PluginState::Frozen,
            loaded: false,
            granted_permissions: Vec::new(),
            call_count: 0,
            error_count: 0,
            violation_count: 0,
            last_error: None,
            frozen_reason: Some(reason),
            version_history: Vec::new(),
            health: HealthRecord::default(),
            loaded_at: None,
        }
    }
}

/// Aggregate view over every known plugin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStatus {
    pub total: usize,
    pub loaded: usize,
    pub by_state: BTreeMap<PluginState, usize>,
    pub by_type: BTreeMap<PluginType, usize>,
    pub frozen: Vec<String>,
}
