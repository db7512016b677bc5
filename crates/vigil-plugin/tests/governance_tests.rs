#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use vigil_config::VigilConfig;
    use vigil_core::capability::tokens;
    use vigil_core::{Event, PluginState, Result, VigilError};
    use vigil_plugin::{
        AuditAction, GovernanceController, Plugin, PluginContext, PluginFactory, Registry,
    };

    // ── Test plugin ────────────────────────────────────────────

    struct Versioned {
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for Versioned {
        async fn initialize(&mut self, _config: &Value, _ctx: &PluginContext) -> Result<()> {
            Ok(())
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn call(&self, _method: &str, args: Value) -> Result<Value> {
            Ok(args)
        }
    }

    struct Harness {
        dir: TempDir,
        packages: TempDir,
        gov: GovernanceController,
        stops: Arc<AtomicUsize>,
    }

    impl Harness {
        fn registry(&self) -> &Arc<Registry> {
            self.gov.registry()
        }

        fn version(&self, name: &str) -> String {
            self.registry()
                .instance(name)
                .unwrap()
                .manifest()
                .version
                .to_string()
        }

        fn state(&self, name: &str) -> PluginState {
            self.registry()
                .get_plugin_status(name)
                .map(|s| s.state)
                .unwrap_or(PluginState::Unloaded)
        }

        fn history(&self, name: &str) -> Vec<String> {
            self.registry()
                .history(name)
                .iter()
                .map(|m| m.version.to_string())
                .collect()
        }

        fn set_packages(&self, packages: Value) {
            std::fs::write(self.packages.path().join("packages.json"), packages.to_string()).unwrap();
        }

        async fn run(&self, name: &str) {
            let registry = self.registry();
            registry.load_plugin(name).await.unwrap();
            registry.initialize_plugin(name, None).await.unwrap();
            registry.start_plugin(name).await.unwrap();
        }
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let packages = tempfile::tempdir().unwrap();
        let mut config = VigilConfig::default();
        config.discovery.search_paths = vec![dir.path().to_path_buf()];
        config.dependencies.packages_file = Some(packages.path().join("packages.json"));
        config.registry.health_check_interval_seconds = 0;

        let stops = Arc::new(AtomicUsize::new(0));
        let factory = PluginFactory::new();
        let counter = stops.clone();
        factory
            .register("tests.gov:Versioned", move || {
                Box::new(Versioned {
                    stops: counter.clone(),
                })
            })
            .unwrap();

        let registry = Arc::new(Registry::new(config, factory).unwrap());
        Harness {
            dir,
            packages,
            gov: GovernanceController::new(registry),
            stops,
        }
    }

    fn write_descriptor(root: &Path, name: &str, version: &str, extra: Value) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let mut descriptor = json!({
            "name": name,
            "version": version,
            "plugin_type": "utility",
            "author": "tests",
            "description": "governance test plugin",
            "entry_point": "tests.gov:Versioned",
        });
        if let (Some(obj), Some(extra)) = (descriptor.as_object_mut(), extra.as_object()) {
            obj.extend(extra.clone());
        }
        std::fs::write(dir.join("plugin.json"), descriptor.to_string()).unwrap();
    }

    // ── Freeze ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_freeze_blocks_calls_in_every_state() {
        let h = harness();
        write_descriptor(h.dir.path(), "running", "1.0.0", json!({}));
        write_descriptor(h.dir.path(), "loaded", "1.0.0", json!({}));
        h.run("running").await;
        h.registry().load_plugin("loaded").await.unwrap();

        for name in ["running", "loaded", "never-loaded"] {
            assert!(h.gov.freeze(name, "policy violation").await);
            let err = h
                .registry()
                .call_plugin(name, "anything", Value::Null)
                .await
                .unwrap_err();
            match err {
                VigilError::SecurityViolation { plugin, reason } => {
                    assert_eq!(plugin, name);
                    assert!(reason.contains("policy violation"));
                }
                other => panic!("{name}: unexpected error {other}"),
            }
        }

        assert_eq!(h.state("running"), PluginState::Frozen);
        assert_eq!(h.state("loaded"), PluginState::Frozen);
        // The running plugin got a best-effort stop; its instance stays frozen.
        assert_eq!(h.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.registry().get_plugin_status("running").unwrap().frozen_reason.as_deref(),
            Some("policy violation")
        );
    }

    #[tokio::test]
    async fn test_frozen_name_cannot_be_loaded() {
        let h = harness();
        write_descriptor(h.dir.path(), "banned", "1.0.0", json!({}));
        h.gov.freeze("banned", "supply chain alert").await;

        let err = h.registry().load_plugin("banned").await.err().unwrap();
        assert!(matches!(err, VigilError::SecurityViolation { .. }));
        assert!(h.registry().instance("banned").is_none());

        let status = h.gov.get_registry_status();
        assert_eq!(status.frozen, vec!["banned".to_string()]);
        assert_eq!(status.by_state[&PluginState::Frozen], 1);
    }

    #[tokio::test]
    async fn test_frozen_plugin_cannot_be_unloaded_or_restarted() {
        let h = harness();
        write_descriptor(h.dir.path(), "held", "1.0.0", json!({}));
        h.run("held").await;
        h.gov.freeze("held", "under review").await;

        assert!(matches!(
            h.registry().unload_plugin("held").await,
            Err(VigilError::SecurityViolation { .. })
        ));
        assert!(h.registry().restart_plugin("held").await.is_err());
        assert!(!h.gov.reload("held").await);
        assert!(!h.gov.rollback("held", None).await);
        assert_eq!(h.state("held"), PluginState::Frozen);
    }

    #[tokio::test]
    async fn test_status_of_name_frozen_before_discovery() {
        let h = harness();
        assert!(h.gov.get_plugin_status("ghost").is_none());
        h.gov.freeze("ghost", "blocklisted").await;

        let status = h.gov.get_plugin_status("ghost").unwrap();
        assert_eq!(status.state, PluginState::Frozen);
        assert_eq!(status.frozen_reason.as_deref(), Some("blocklisted"));
        assert!(!status.loaded);
        assert!(status.version.is_none());
        assert!(status.plugin_type.is_none());
    }

    #[tokio::test]
    async fn test_freeze_is_idempotent() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;

        let mut rx = h.registry().events().subscribe();
        assert!(h.gov.freeze("x", "first").await);
        assert!(h.gov.freeze("x", "second").await);

        assert_eq!(h.registry().frozen_reason("x").as_deref(), Some("first"));
        assert_eq!(h.stops.load(Ordering::SeqCst), 1);
        let mut frozen_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::PluginFrozen { .. }) {
                frozen_events += 1;
            }
        }
        assert_eq!(frozen_events, 1);
    }

    #[tokio::test]
    async fn test_unfreeze_allows_fresh_load() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;
        h.gov.freeze("x", "incident").await;

        assert!(!h.gov.unfreeze("other", "ops").await);
        assert!(h.gov.unfreeze("x", "ops@example.com").await);
        assert!(!h.registry().is_frozen("x"));
        assert!(h.registry().instance("x").is_none());

        h.run("x").await;
        assert_eq!(h.state("x"), PluginState::Running);

        let log = h.gov.audit_log();
        let unfreeze = log
            .iter()
            .find(|r| r.action == AuditAction::Unfreeze && r.success)
            .unwrap();
        assert_eq!(unfreeze.actor, "ops@example.com");
        assert_eq!(unfreeze.plugin, "x");
    }

    // ── Rollback ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_rollback_without_history_changes_nothing() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;
        let before = h.registry().instance("x").unwrap();

        assert!(!h.gov.rollback("x", None).await);
        assert!(!h.gov.rollback("never-loaded", None).await);

        let after = h.registry().instance("x").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.state(), PluginState::Running);
        let record = h.gov.audit_log().pop().unwrap();
        assert_eq!(record.action, AuditAction::Rollback);
        assert!(!record.success);
    }

    #[tokio::test]
    async fn test_reload_then_rollback_restores_previous_version() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;

        write_descriptor(h.dir.path(), "x", "2.0.0", json!({}));
        assert!(h.gov.reload("x").await);
        assert_eq!(h.version("x"), "2.0.0");
        assert_eq!(h.state("x"), PluginState::Running);

        let mut rx = h.registry().events().subscribe();
        assert!(h.gov.rollback("x", None).await);
        assert_eq!(h.version("x"), "1.0.0");
        assert_eq!(h.state("x"), PluginState::Running);

        let history: Vec<String> = h
            .registry()
            .history("x")
            .iter()
            .map(|m| m.version.to_string())
            .collect();
        assert_eq!(history, vec!["1.0.0"]);

        let mut rolled_back = false;
        while let Ok(event) = rx.try_recv() {
            if let Event::PluginRolledBack {
                from_version,
                to_version,
                ..
            } = event
            {
                assert_eq!(from_version, "2.0.0");
                assert_eq!(to_version, "1.0.0");
                rolled_back = true;
            }
        }
        assert!(rolled_back);
    }

    #[tokio::test]
    async fn test_rollback_to_explicit_target() {
        let h = harness();
        for version in ["1.0.0", "1.1.0", "1.2.0"] {
            write_descriptor(h.dir.path(), "x", version, json!({}));
            if version == "1.0.0" {
                h.run("x").await;
            } else {
                assert!(h.gov.reload("x").await);
            }
        }
        assert_eq!(h.version("x"), "1.2.0");

        assert!(!h.gov.rollback("x", Some("0.9.0")).await);
        assert_eq!(h.version("x"), "1.2.0");

        assert!(h.gov.rollback("x", Some("1.0")).await);
        assert_eq!(h.version("x"), "1.0.0");
        assert_eq!(h.registry().history("x").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_history() {
        let h = harness();
        h.set_packages(json!({"lib": "1.4.0"}));
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({"dependencies": ["lib>=1"]}));
        h.run("x").await;
        for version in ["2.0.0", "3.0.0"] {
            write_descriptor(h.dir.path(), "x", version, json!({}));
            assert!(h.gov.reload("x").await);
        }
        assert_eq!(h.history("x"), vec!["1.0.0", "2.0.0", "3.0.0"]);

        h.set_packages(json!({}));
        assert!(!h.gov.rollback("x", Some("1.0.0")).await);

        assert_eq!(h.history("x"), vec!["1.0.0", "2.0.0", "3.0.0"]);
        assert_eq!(h.version("x"), "3.0.0");
        assert_eq!(h.state("x"), PluginState::Running);

        // The untouched history still allows rolling back to 2.0.0.
        assert!(h.gov.rollback("x", None).await);
        assert_eq!(h.version("x"), "2.0.0");
        assert_eq!(h.history("x"), vec!["1.0.0", "2.0.0"]);
    }

    // ── Reload ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_reload_with_missing_descriptor_keeps_instance() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;
        let before = h.registry().instance("x").unwrap();

        std::fs::remove_dir_all(h.dir.path().join("x")).unwrap();
        assert!(!h.gov.reload("x").await);
        assert!(Arc::ptr_eq(&before, &h.registry().instance("x").unwrap()));
        assert_eq!(before.state(), PluginState::Running);
    }

    #[tokio::test]
    async fn test_failed_reload_restores_previous_version() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;

        write_descriptor(
            h.dir.path(),
            "x",
            "2.0.0",
            json!({"dependencies": ["not-installed>=1"]}),
        );
        assert!(!h.gov.reload("x").await);
        assert_eq!(h.version("x"), "1.0.0");
        assert_eq!(h.state("x"), PluginState::Running);
    }

    // ── Permissions ────────────────────────────────────────────

    #[tokio::test]
    async fn test_grant_and_revoke_are_audited() {
        let h = harness();
        write_descriptor(
            h.dir.path(),
            "x",
            "1.0.0",
            json!({"permissions": [tokens::CONFIG_READ, tokens::NETWORK_OUTBOUND]}),
        );
        h.run("x").await;

        let status = h.gov.get_plugin_status("x").unwrap();
        assert_eq!(status.granted_permissions, vec![tokens::CONFIG_READ.to_string()]);

        assert!(h.gov.grant_permission("x", tokens::LOG_WRITE, "ops").is_ok());
        assert!(matches!(
            h.gov.grant_permission("x", tokens::NETWORK_OUTBOUND, "ops"),
            Err(VigilError::PermissionDenied { .. })
        ));
        assert!(h.gov.revoke_permission("x", tokens::CONFIG_READ, "ops"));
        assert!(!h.registry().permissions().check_permission("x", tokens::CONFIG_READ));
        assert!(h.registry().permissions().check_permission("x", tokens::LOG_WRITE));

        let actions: Vec<(AuditAction, bool)> = h
            .gov
            .audit_log()
            .iter()
            .map(|r| (r.action, r.success))
            .collect();
        assert_eq!(
            actions,
            vec![
                (AuditAction::Grant, true),
                (AuditAction::Grant, false),
                (AuditAction::Revoke, true),
            ]
        );
    }

    #[tokio::test]
    async fn test_violations_are_readable() {
        let h = harness();
        write_descriptor(h.dir.path(), "x", "1.0.0", json!({}));
        h.run("x").await;
        assert!(h.gov.violations("x").is_empty());
        assert!(h.gov.violations("missing").is_empty());
    }
}
