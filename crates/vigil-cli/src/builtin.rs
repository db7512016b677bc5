//! Plugins compiled into the `vigil` binary.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_core::capability::tokens;
use vigil_core::{Result, VigilError};
use vigil_plugin::{Plugin, PluginContext, PluginFactory, PluginManifest};

pub const HEARTBEAT_ENTRY_POINT: &str = "vigil.builtin.heartbeat:Heartbeat";

/// Register every built-in constructor with `factory`.
pub fn register_builtins(factory: &PluginFactory) -> Result<()> {
    factory.register(HEARTBEAT_ENTRY_POINT, || Box::new(Heartbeat::default()))
}

/// Manifests for the built-in plugins, as if read from descriptors.
pub fn builtin_manifests() -> Result<Vec<PluginManifest>> {
    let heartbeat = json!({
        "name": "heartbeat",
        "version": env!("CARGO_PKG_VERSION"),
        "plugin_type": "utility",
        "author": "Vigil Contributors",
        "description": "Emits a periodic liveness beat",
        "entry_point": HEARTBEAT_ENTRY_POINT,
        "permissions": [tokens::LOG_WRITE, tokens::METRICS_WRITE],
        "license": "MIT",
    });
    Ok(vec![PluginManifest::from_json(
        &heartbeat.to_string(),
        Path::new("<builtin>/heartbeat.json"),
    )?])
}

/// Logs a beat every `interval_seconds` while running.
pub struct Heartbeat {
    interval: Duration,
    beats: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
    plugin: String,
    log: bool,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            beats: Arc::new(AtomicU64::new(0)),
            task: None,
            plugin: "heartbeat".into(),
            log: false,
        }
    }
}

/// A positive interval that fits in a `Duration` and is not zero once
/// converted.
fn interval_from(value: &Value) -> Option<Duration> {
    let seconds = value.as_f64()?;
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
}

#[async_trait]
impl Plugin for Heartbeat {
    async fn initialize(&mut self, config: &Value, ctx: &PluginContext) -> Result<()> {
        if let Some(raw) = config.get("interval_seconds") {
            self.interval = interval_from(raw).ok_or_else(|| {
                VigilError::Config(format!("heartbeat: invalid interval_seconds {raw}"))
            })?;
        }
        self.plugin = ctx.plugin().to_string();
        self.log = ctx.has_permission(tokens::LOG_WRITE);
        if !self.log {
            warn!(plugin = %self.plugin, "log:write not granted, beats will not be logged");
        }
        debug!(plugin = %self.plugin, interval = ?self.interval, "heartbeat initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let beats = self.beats.clone();
        let interval = self.interval;
        let plugin = self.plugin.clone();
        let log = self.log;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let n = beats.fetch_add(1, Ordering::Relaxed) + 1;
                if log {
                    info!(plugin = %plugin, beat = n, "heartbeat");
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn get_capabilities(&self) -> Vec<String> {
        vec![tokens::LOG_WRITE.into()]
    }

    fn validate_config(&self, config: &Value) -> bool {
        config.get("interval_seconds").is_none_or(|v| interval_from(v).is_some())
    }

    async fn call(&self, method: &str, _args: Value) -> Result<Value> {
        match method {
            "ping" => Ok(json!("pong")),
            "beats" => Ok(json!(self.beats.load(Ordering::Relaxed))),
            other => Err(VigilError::UnsupportedMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_config::VigilConfig;
    use vigil_core::PluginState;
    use vigil_plugin::Registry;

    #[test]
    fn builtin_manifest_is_valid() {
        let manifests = builtin_manifests().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "heartbeat");
        assert_eq!(manifests[0].entry_point.to_string(), HEARTBEAT_ENTRY_POINT);
    }

    #[test]
    fn rejects_non_positive_interval() {
        let hb = Heartbeat::default();
        assert!(hb.validate_config(&json!({})));
        assert!(hb.validate_config(&json!({"interval_seconds": 0.5})));
        assert!(!hb.validate_config(&json!({"interval_seconds": 0})));
        assert!(!hb.validate_config(&json!({"interval_seconds": "soon"})));
        assert!(!hb.validate_config(&json!({"interval_seconds": -1.0})));
        assert!(!hb.validate_config(&json!({"interval_seconds": 1e300})));
        assert!(!hb.validate_config(&json!({"interval_seconds": 1e-12})));
    }

    #[tokio::test]
    async fn out_of_range_interval_fails_activation() {
        let mut config = VigilConfig::default();
        config.discovery.search_paths.clear();
        config
            .plugins
            .insert("heartbeat".into(), json!({"interval_seconds": 1e300}));
        let factory = PluginFactory::new();
        register_builtins(&factory).unwrap();
        let registry = Registry::new(config, factory).unwrap();

        let manifest = builtin_manifests().unwrap().remove(0);
        let err = registry
            .activate(Arc::new(manifest), PluginState::Running)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VigilError::Config(_)));
        assert_eq!(
            registry.instance("heartbeat").unwrap().state(),
            PluginState::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_beats_while_running() {
        let mut config = VigilConfig::default();
        config.discovery.search_paths.clear();
        config
            .plugins
            .insert("heartbeat".into(), json!({"interval_seconds": 1}));
        let factory = PluginFactory::new();
        register_builtins(&factory).unwrap();
        let registry = Registry::new(config, factory).unwrap();

        let manifest = builtin_manifests().unwrap().remove(0);
        let instance = registry
            .activate(Arc::new(manifest), PluginState::Running)
            .await
            .unwrap();
        assert_eq!(instance.state(), PluginState::Running);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let beats = registry
            .call_plugin("heartbeat", "beats", Value::Null)
            .await
            .unwrap();
        let beats = beats.as_u64().unwrap();
        assert!((2..=3).contains(&beats), "beats = {beats}");
        assert_eq!(
            registry.health_check_all().await.get("heartbeat"),
            Some(&true)
        );

        registry.shutdown_all().await;
        assert!(registry.instance("heartbeat").is_none());
    }
}
