use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vigil_config::VigilConfig;
use vigil_core::{Event, EventBus, PluginState, Result, VigilError};

use crate::discovery::{Discovery, DiscoveryReport};
use crate::instance::{PluginInstance, PluginStatus, RegistryStatus};
use crate::loader::{Loader, PluginFactory};
use crate::manifest::PluginManifest;
use crate::permissions::PermissionManager;
use crate::plugin::PluginContext;
use crate::resolver::DependencyResolver;
use crate::sandbox::{CeilingGate, Sandbox};

/// Result of `load_plugin`: a new instance, or the one already loaded.
pub enum LoadOutcome {
    Loaded(Arc<PluginInstance>),
    AlreadyLoaded(Arc<PluginInstance>),
}

impl LoadOutcome {
    pub fn instance(&self) -> &Arc<PluginInstance> {
        match self {
            Self::Loaded(i) | Self::AlreadyLoaded(i) => i,
        }
    }

    pub fn into_instance(self) -> Arc<PluginInstance> {
        match self {
            Self::Loaded(i) | Self::AlreadyLoaded(i) => i,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

#[derive(Debug, Clone)]
struct FreezeRecord {
    reason: String,
    frozen_at: DateTime<Utc>,
}

/// Owns every plugin instance and drives the lifecycle state machine.
///
/// Load, unload and replace are serialized per plugin name; operations on
/// different names run concurrently. Calls do not take the name lock.
pub struct Registry {
    config: VigilConfig,
    discovery: Discovery,
    resolver: DependencyResolver,
    permissions: Arc<PermissionManager>,
    loader: Loader,
    gate: CeilingGate,
    events: EventBus,
    instances: RwLock<HashMap<String, Arc<PluginInstance>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    frozen: RwLock<HashMap<String, FreezeRecord>>,
    history: RwLock<HashMap<String, Vec<Arc<PluginManifest>>>>,
    known: RwLock<BTreeMap<String, Arc<PluginManifest>>>,
}

impl Registry {
    pub fn new(config: VigilConfig, factory: PluginFactory) -> Result<Self> {
        let resolver = DependencyResolver::from_config(&config)?;
        Ok(Self::with_resolver(config, factory, resolver))
    }

    pub fn with_resolver(
        config: VigilConfig,
        factory: PluginFactory,
        resolver: DependencyResolver,
    ) -> Self {
        Self {
            discovery: Discovery::new(&config.discovery),
            permissions: Arc::new(PermissionManager::new(&config.permissions)),
            loader: Loader::new(factory),
            gate: CeilingGate::new(),
            events: EventBus::default(),
            instances: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            frozen: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            known: RwLock::new(BTreeMap::new()),
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn instance(&self, name: &str) -> Option<Arc<PluginInstance>> {
        self.instances.read().get(name).cloned()
    }

    /// Names of loaded plugins, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_frozen(&self, name: &str) -> bool {
        self.frozen.read().contains_key(name)
    }

    pub fn frozen_reason(&self, name: &str) -> Option<String> {
        self.frozen.read().get(name).map(|r| r.reason.clone())
    }

    pub fn frozen_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.frozen.read().get(name).map(|r| r.frozen_at)
    }

    /// Manifests this plugin has been loaded at, oldest first.
    pub fn history(&self, name: &str) -> Vec<Arc<PluginManifest>> {
        self.history.read().get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn set_history(&self, name: &str, entries: Vec<Arc<PluginManifest>>) {
        self.history.write().insert(name.to_string(), entries);
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(name.to_string()).or_default().clone()
    }

    fn frozen_error(&self, name: &str) -> Option<VigilError> {
        self.frozen_reason(name).map(|reason| VigilError::SecurityViolation {
            plugin: name.to_string(),
            reason: format!("plugin is frozen: {reason}"),
        })
    }

    fn emit_transition(&self, plugin: &str, from: PluginState, to: PluginState) {
        self.events.publish(Event::StateChanged {
            plugin: plugin.to_string(),
            from,
            to,
        });
    }

    fn advance(&self, instance: &PluginInstance, to: PluginState) -> Result<()> {
        let from = instance.transition(to)?;
        self.emit_transition(instance.name(), from, to);
        Ok(())
    }

    /// Apply the outcome of a lifecycle hook: the target state on success,
    /// ERROR (with the cause recorded) on failure.
    fn settle(&self, instance: &PluginInstance, to: PluginState, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                if let Some(e) = self.frozen_error(instance.name()) {
                    return Err(e);
                }
                self.advance(instance, to)?;
                info!(plugin = %instance.name(), state = %to, "plugin state changed");
                Ok(())
            }
            Err(e) => {
                self.fail(instance, &e);
                Err(e)
            }
        }
    }

    fn fail(&self, instance: &PluginInstance, e: &VigilError) {
        instance.record_error(e);
        error!(plugin = %instance.name(), state = %instance.state(), error = %e, "plugin hook failed");
        self.events.publish(Event::PluginError {
            plugin: instance.name().to_string(),
            error: e.to_string(),
        });
        if let Err(te) = self.advance(instance, PluginState::Error) {
            debug!(plugin = %instance.name(), error = %te, "not moved to error state");
        }
    }

    fn check_transition(&self, instance: &PluginInstance, to: PluginState) -> Result<()> {
        if let Some(e) = self.frozen_error(instance.name()) {
            return Err(e);
        }
        let from = instance.state();
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(VigilError::InvalidTransition {
                plugin: instance.name().to_string(),
                from,
                to,
            })
        }
    }

    fn loaded(&self, name: &str) -> Result<Arc<PluginInstance>> {
        self.instance(name)
            .ok_or_else(|| VigilError::NotLoaded(name.to_string()))
    }

    // ── Discovery ──────────────────────────────────────────────

    /// Scan the search paths and remember every valid manifest.
    pub fn discover(&self) -> DiscoveryReport {
        let report = self.discovery.scan();
        self.known.write().extend(
            report
                .manifests
                .iter()
                .map(|(name, m)| (name.clone(), m.clone())),
        );
        info!(
            discovered = report.manifests.len(),
            rejected = report.rejected.len(),
            duplicates = report.duplicates.len(),
            "plugin discovery complete"
        );
        report
    }

    /// Re-read one plugin's descriptor from disk.
    pub fn rediscover(&self, name: &str) -> Option<Arc<PluginManifest>> {
        let manifest = self.discovery.find(name)?;
        self.known.write().insert(name.to_string(), manifest.clone());
        Some(manifest)
    }

    pub fn known_manifest(&self, name: &str) -> Option<Arc<PluginManifest>> {
        self.known.read().get(name).cloned()
    }

    /// Discover, report conflicts, then load every plugin (and initialize
    /// and start them when `auto_start` is on). Returns success per name.
    pub async fn discover_and_load_all(&self) -> BTreeMap<String, bool> {
        let report = self.discover();
        for conflict in DependencyResolver::detect_conflicts(report.manifests.values().map(|m| m.as_ref())) {
            warn!(%conflict, "dependency conflict between plugins");
        }

        let target = if self.config.registry.auto_start {
            PluginState::Running
        } else {
            PluginState::Loaded
        };
        let tasks = report.manifests.values().cloned().map(|manifest| async move {
            let name = manifest.name.clone();
            let ok = match self.activate(manifest, target).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(plugin = %name, error = %e, "plugin not activated");
                    false
                }
            };
            (name, ok)
        });
        join_all(tasks).await.into_iter().collect()
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Load a plugin by name, discovering its descriptor if needed.
    pub async fn load_plugin(&self, name: &str) -> Result<LoadOutcome> {
        let manifest = match self.known_manifest(name) {
            Some(m) => m,
            None => self.rediscover(name).ok_or_else(|| VigilError::Load {
                plugin: name.to_string(),
                reason: "no descriptor found in search paths".into(),
            })?,
        };
        self.load_manifest(manifest).await
    }

    /// Load a specific manifest. Idempotent per name: if an instance is
    /// already loaded it is returned unchanged.
    pub async fn load_manifest(&self, manifest: Arc<PluginManifest>) -> Result<LoadOutcome> {
        let lock = self.name_lock(&manifest.name);
        let _guard = lock.lock().await;
        self.load_locked(manifest).await
    }

    async fn load_locked(&self, manifest: Arc<PluginManifest>) -> Result<LoadOutcome> {
        let name = manifest.name.clone();
        if let Some(e) = self.frozen_error(&name) {
            return Err(e);
        }
        if let Some(existing) = self.instance(&name) {
            debug!(plugin = %name, "plugin already loaded");
            return Ok(LoadOutcome::AlreadyLoaded(existing));
        }

        self.emit_transition(&name, PluginState::Unloaded, PluginState::Loading);
        match self.build_instance(&manifest).await {
            Ok(instance) => {
                {
                    let mut instances = self.instances.write();
                    // Freeze does not take the name lock; checking under the
                    // instances lock means a concurrent freeze sees this insert.
                    if let Some(e) = self.frozen_error(&name) {
                        drop(instances);
                        self.permissions.forget(&name);
                        self.emit_transition(&name, PluginState::Loading, PluginState::Frozen);
                        return Err(e);
                    }
                    instances.insert(name.clone(), instance.clone());
                }
                self.emit_transition(&name, PluginState::Loading, PluginState::Loaded);
                self.events.publish(Event::PluginLoaded {
                    plugin: name.clone(),
                    version: manifest.version.to_string(),
                });
                info!(plugin = %name, version = %manifest.version, "plugin loaded");
                Ok(LoadOutcome::Loaded(instance))
            }
            Err(e) => {
                self.permissions.forget(&name);
                self.emit_transition(&name, PluginState::Loading, PluginState::Error);
                self.events.publish(Event::PluginError {
                    plugin: name.clone(),
                    error: e.to_string(),
                });
                warn!(plugin = %name, error = %e, "plugin load failed");
                Err(e)
            }
        }
    }

    async fn build_instance(&self, manifest: &Arc<PluginManifest>) -> Result<Arc<PluginInstance>> {
        self.resolver.resolve(manifest).await?;
        let grant = self.permissions.grant_for_manifest(manifest);
        let plugin = self.loader.load(manifest, &grant.granted)?;

        let sandbox = Arc::new(
            Sandbox::new(&manifest.name, self.config.sandbox.limits_for(&manifest.name))
                .with_gate(self.gate.clone())
                .with_events(self.events.clone()),
        );
        let context = PluginContext::new(&manifest.name, self.permissions.clone(), sandbox.clone());
        let history = self.record_history(manifest);
        Ok(Arc::new(PluginInstance::new(
            manifest.clone(),
            plugin,
            sandbox,
            context,
            history,
        )))
    }

    /// Append a version to the plugin's history unless it is already the
    /// newest entry. Returns the resulting version list.
    fn record_history(&self, manifest: &Arc<PluginManifest>) -> Vec<String> {
        let cap = self.config.registry.max_history.max(1);
        let mut history = self.history.write();
        let entries = history.entry(manifest.name.clone()).or_default();
        if entries.last().is_none_or(|last| last.version != manifest.version) {
            entries.push(manifest.clone());
        }
        if entries.len() > cap {
            let excess = entries.len() - cap;
            entries.drain(..excess);
        }
        entries.iter().map(|m| m.version.to_string()).collect()
    }

    /// Run `initialize` with `config`, or the plugin's configured settings.
    pub async fn initialize_plugin(&self, name: &str, config: Option<Value>) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        let instance = self.loaded(name)?;
        self.initialize_locked(&instance, config).await
    }

    async fn initialize_locked(&self, instance: &PluginInstance, config: Option<Value>) -> Result<()> {
        self.check_transition(instance, PluginState::Initialized)?;
        let settings = config.unwrap_or_else(|| self.config.plugin_settings(instance.name()));

        let outcome = {
            let mut plugin = instance.plugin.write().await;
            if plugin.validate_config(&settings) {
                let ctx = instance.context().clone();
                instance
                    .sandbox()
                    .execute("initialize", plugin.initialize(&settings, &ctx))
                    .await
            } else {
                Err(VigilError::Config(format!(
                    "{}: configuration rejected by plugin",
                    instance.name()
                )))
            }
        };
        self.settle(instance, PluginState::Initialized, outcome)
    }

    pub async fn start_plugin(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        let instance = self.loaded(name)?;
        self.start_locked(&instance).await
    }

    async fn start_locked(&self, instance: &PluginInstance) -> Result<()> {
        self.check_transition(instance, PluginState::Running)?;
        let outcome = {
            let mut plugin = instance.plugin.write().await;
            instance.sandbox().execute("start", plugin.start()).await
        };
        self.settle(instance, PluginState::Running, outcome)
    }

    pub async fn stop_plugin(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        let instance = self.loaded(name)?;
        self.stop_locked(&instance).await
    }

    async fn stop_locked(&self, instance: &PluginInstance) -> Result<()> {
        self.check_transition(instance, PluginState::Stopped)?;
        let outcome = {
            let mut plugin = instance.plugin.write().await;
            instance.sandbox().execute("stop", plugin.stop()).await
        };
        self.settle(instance, PluginState::Stopped, outcome)
    }

    /// Stop (if running), re-initialize and start again.
    pub async fn restart_plugin(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        let instance = self.loaded(name)?;
        if instance.state() == PluginState::Running {
            self.stop_locked(&instance).await?;
        }
        self.initialize_locked(&instance, None).await?;
        self.start_locked(&instance).await
    }

    pub async fn unload_plugin(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> Result<()> {
        if let Some(e) = self.frozen_error(name) {
            return Err(e);
        }
        let instance = self.loaded(name)?;

        if instance.state() == PluginState::Running {
            self.stop_locked(&instance).await?;
        }
        match instance.state() {
            PluginState::Stopped | PluginState::Error => {
                self.advance(&instance, PluginState::Unloaded)?;
            }
            // Never started: the instance is discarded as is.
            PluginState::Loaded | PluginState::Initialized => {}
            state => {
                return Err(VigilError::InvalidTransition {
                    plugin: name.to_string(),
                    from: state,
                    to: PluginState::Unloaded,
                });
            }
        }

        self.instances.write().remove(name);
        self.permissions.forget(name);
        self.events.publish(Event::PluginUnloaded {
            plugin: name.to_string(),
        });
        info!(plugin = %name, "plugin unloaded");
        Ok(())
    }

    /// Load and bring a plugin up to `target` (LOADED, INITIALIZED or RUNNING).
    pub async fn activate(&self, manifest: Arc<PluginManifest>, target: PluginState) -> Result<Arc<PluginInstance>> {
        let lock = self.name_lock(&manifest.name);
        let _guard = lock.lock().await;
        self.activate_locked(manifest, target).await
    }

    async fn activate_locked(&self, manifest: Arc<PluginManifest>, target: PluginState) -> Result<Arc<PluginInstance>> {
        let instance = self.load_locked(manifest).await?.into_instance();
        if target >= PluginState::Initialized && instance.state() == PluginState::Loaded {
            self.initialize_locked(&instance, None).await?;
        }
        if target >= PluginState::Running && instance.state() == PluginState::Initialized {
            self.start_locked(&instance).await?;
        }
        Ok(instance)
    }

    /// Swap the loaded instance for one built from `manifest`, restoring
    /// the previous state. If the new manifest fails, the previous one is
    /// brought back.
    pub async fn replace_plugin(&self, name: &str, manifest: Arc<PluginManifest>) -> Result<Arc<PluginInstance>> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        if let Some(e) = self.frozen_error(name) {
            return Err(e);
        }

        let previous = self.instance(name);
        let target = match previous.as_ref().map(|i| i.state()) {
            Some(PluginState::Running) => PluginState::Running,
            Some(PluginState::Initialized) => PluginState::Initialized,
            _ if self.config.registry.auto_start => PluginState::Running,
            _ => PluginState::Loaded,
        };
        let previous_manifest = previous.map(|i| i.manifest().clone());
        if previous_manifest.is_some() {
            self.unload_locked(name).await?;
        }

        match self.activate_locked(manifest.clone(), target).await {
            Ok(instance) => {
                info!(plugin = %name, version = %manifest.version, "plugin replaced");
                Ok(instance)
            }
            Err(e) => {
                self.discard_failed(name).await;
                if let Some(previous) = previous_manifest {
                    warn!(plugin = %name, error = %e, restoring = %previous.version, "replacement failed");
                    if let Err(restore) = self.activate_locked(previous, target).await {
                        error!(plugin = %name, error = %restore, "could not restore previous version");
                        self.discard_failed(name).await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn discard_failed(&self, name: &str) {
        if self.instance(name).is_some() {
            if let Err(e) = self.unload_locked(name).await {
                warn!(plugin = %name, error = %e, "failed to discard instance");
            }
        }
    }

    /// Invoke a method on a running plugin inside its sandbox. Failures
    /// are counted on the instance but never change its state.
    pub async fn call_plugin(&self, name: &str, method: &str, args: Value) -> Result<Value> {
        if let Some(e) = self.frozen_error(name) {
            return Err(e);
        }
        let instance = self.loaded(name)?;
        let state = instance.state();
        if !state.is_callable() {
            return Err(VigilError::NotRunning {
                plugin: name.to_string(),
                state,
            });
        }

        instance.count_call();
        let outcome = {
            let plugin = instance.plugin.read().await;
            instance
                .sandbox()
                .execute(&format!("call:{method}"), plugin.call(method, args))
                .await
        };
        if let Err(e) = &outcome {
            instance.record_error(e);
            debug!(plugin = %name, method, error = %e, "plugin call failed");
        }
        outcome
    }

    /// Probe every running plugin. Results are recorded on the instances;
    /// states are left alone.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let running: Vec<_> = self
            .instances
            .read()
            .values()
            .filter(|i| i.state() == PluginState::Running)
            .cloned()
            .collect();

        let probes = running.into_iter().map(|instance| async move {
            let healthy = {
                let plugin = instance.plugin.read().await;
                instance
                    .sandbox()
                    .execute("health_check", async { Ok(plugin.health_check().await) })
                    .await
                    .unwrap_or(false)
            };
            instance.record_health(healthy);
            if !healthy {
                warn!(plugin = %instance.name(), "health check failed");
            }
            (instance.name().to_string(), healthy)
        });
        let results: BTreeMap<String, bool> = join_all(probes).await.into_iter().collect();

        let healthy = results.values().filter(|h| **h).count();
        self.events.publish(Event::HealthChecked {
            timestamp: Utc::now(),
            healthy,
            unhealthy: results.len() - healthy,
        });
        results
    }

    /// Run `health_check_all` periodically until the registry is dropped.
    /// Returns `None` when the interval is 0.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let seconds = self.config.registry.health_check_interval_seconds;
        if seconds == 0 {
            return None;
        }
        let registry = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(seconds));
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.health_check_all().await;
            }
        }))
    }

    /// Stop and unload every plugin that is not frozen.
    pub async fn shutdown_all(&self) {
        for name in self.names() {
            if self.is_frozen(&name) {
                continue;
            }
            if let Err(e) = self.unload_plugin(&name).await {
                warn!(plugin = %name, error = %e, "error during shutdown");
            }
        }
        self.events.publish(Event::Shutdown);
        info!("plugin registry shut down");
    }

    // ── Governance primitives ──────────────────────────────────

    /// Mark a plugin FROZEN, loaded or not. Takes effect immediately: a
    /// running plugin gets a best-effort stop and every later call fails.
    pub async fn freeze_plugin(&self, name: &str, reason: &str) -> bool {
        {
            let mut frozen = self.frozen.write();
            if frozen.contains_key(name) {
                debug!(plugin = %name, "plugin already frozen");
                return true;
            }
            frozen.insert(
                name.to_string(),
                FreezeRecord {
                    reason: reason.to_string(),
                    frozen_at: Utc::now(),
                },
            );
        }
        warn!(plugin = %name, reason, "plugin frozen");
        self.events.publish(Event::PluginFrozen {
            plugin: name.to_string(),
            reason: reason.to_string(),
        });

        if let Some(instance) = self.instance(name) {
            let from = instance.freeze(reason);
            self.emit_transition(name, from, PluginState::Frozen);
            if from == PluginState::Running {
                let mut plugin = instance.plugin.write().await;
                match instance.sandbox().execute("stop", plugin.stop()).await {
                    Ok(()) => info!(plugin = %name, "frozen plugin stopped"),
                    Err(e) => {
                        instance.record_error(&e);
                        warn!(plugin = %name, error = %e, "frozen plugin did not stop cleanly");
                    }
                }
            }
        }
        true
    }

    /// Lift a freeze. The frozen instance is destroyed, so the next load
    /// goes through the full pipeline. Returns false if it was not frozen.
    pub(crate) async fn unfreeze_plugin(&self, name: &str, actor: &str) -> bool {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        if self.frozen.write().remove(name).is_none() {
            return false;
        }
        if self.instances.write().remove(name).is_some() {
            self.permissions.forget(name);
            self.emit_transition(name, PluginState::Frozen, PluginState::Unloaded);
            self.events.publish(Event::PluginUnloaded {
                plugin: name.to_string(),
            });
        }
        info!(plugin = %name, actor, "plugin unfrozen");
        self.events.publish(Event::PluginUnfrozen {
            plugin: name.to_string(),
            actor: actor.to_string(),
        });
        true
    }

    // ── Status ─────────────────────────────────────────────────

    pub fn get_plugin_status(&self, name: &str) -> Option<PluginStatus> {
        if let Some(instance) = self.instance(name) {
            return Some(instance.status(self.permissions.granted(name)));
        }
        let Some(manifest) = self.known_manifest(name) else {
            return self
                .frozen_reason(name)
                .map(|reason| PluginStatus::frozen(name, reason));
        };
        let history = self
            .history(name)
            .iter()
            .map(|m| m.version.to_string())
            .collect();
        Some(PluginStatus::unloaded(&manifest, self.frozen_reason(name), history))
    }

    pub fn get_registry_status(&self) -> RegistryStatus {
        let instances = self.instances.read().clone();
        let known = self.known.read().clone();
        let frozen = self.frozen.read().clone();

        let mut names: Vec<&String> = known.keys().chain(instances.keys()).chain(frozen.keys()).collect();
        names.sort();
        names.dedup();

        let mut status = RegistryStatus {
            total: names.len(),
            loaded: instances.len(),
            ..RegistryStatus::default()
        };
        for name in names {
            let (state, plugin_type) = match instances.get(name) {
                Some(i) => (i.state(), Some(i.manifest().plugin_type)),
                None => (
                    if frozen.contains_key(name) {
                        PluginState::Frozen
                    } else {
                        PluginState::Unloaded
                    },
                    known.get(name).map(|m| m.plugin_type),
                ),
            };
            *status.by_state.entry(state).or_default() += 1;
            if let Some(t) = plugin_type {
                *status.by_type.entry(t).or_default() += 1;
            }
        }
        status.frozen = frozen.into_keys().collect();
        status.frozen.sort();
        status
    }
}
