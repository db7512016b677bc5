#[cfg(test)]
mod tests {
    use std::io::Write;
    use vigil_config::ConfigLoader;
    use vigil_config::schema::*;
    use vigil_core::PluginType;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_vigil_config_defaults() {
        let config = VigilConfig::default();
        assert_eq!(config.discovery.descriptor_name, "plugin.json");
        assert_eq!(config.discovery.max_descriptor_bytes, 64 * 1024);
        assert!(config.registry.auto_start);
        assert_eq!(config.registry.max_history, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sandbox_limit_defaults() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.max_memory_mb, 512);
        assert_eq!(limits.max_subprocesses, 0);
        assert!(!limits.allow_network);
        assert!(!limits.enforce_os_limits);
        assert_eq!(limits.execution_timeout().as_secs(), 30);
        assert_eq!(limits.max_memory_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_permission_defaults_trust_governance_types() {
        let perms = PermissionsConfig::default();
        assert!(perms.trusted_types.contains(&PluginType::Gate));
        assert!(perms.trusted_types.contains(&PluginType::FfeComponent));
        assert!(perms.safe_capabilities.contains(&"config:read".to_string()));
        assert!(perms.type_defaults.contains_key("model-provider"));
    }

    #[test]
    fn test_default_config_validates() {
        let warnings = VigilConfig::default().validate().unwrap();
        assert!(warnings
            .iter()
            .all(|w| w.severity != WarningSeverity::Error));
    }

    // ── Parsing tests ──────────────────────────────────────────

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[host]
version = "2.3.0"

[discovery]
search_paths = ["/opt/plugins", "./plugins"]

[sandbox.defaults]
max_execution_time_seconds = 5.0
"#;
        let config = ConfigLoader::parse(toml_str).unwrap();
        assert_eq!(config.host.version, "2.3.0");
        assert_eq!(config.discovery.search_paths.len(), 2);
        assert_eq!(config.sandbox.defaults.max_execution_time_seconds, 5.0);
        // Defaults should fill in
        assert_eq!(config.sandbox.defaults.max_memory_mb, 512);
        assert_eq!(config.discovery.descriptor_name, "plugin.json");
    }

    #[test]
    fn test_per_plugin_sandbox_override() {
        let toml_str = r#"
[sandbox.defaults]
max_open_files = 128

[sandbox.overrides.renderer]
max_open_files = 16
allow_network = true
"#;
        let config = ConfigLoader::parse(toml_str).unwrap();
        let renderer = config.sandbox.limits_for("renderer");
        assert_eq!(renderer.max_open_files, 16);
        assert!(renderer.allow_network);
        assert_eq!(renderer.max_memory_mb, 512);

        let other = config.sandbox.limits_for("other");
        assert_eq!(other.max_open_files, 128);
        assert!(!other.allow_network);
    }

    #[test]
    fn test_permissions_section_parses_types() {
        let toml_str = r#"
[permissions]
safe_capabilities = ["config:read"]
trusted_types = ["monitoring"]

[permissions.type_defaults]
utility = ["fs:write"]
"#;
        let config = ConfigLoader::parse(toml_str).unwrap();
        assert_eq!(config.permissions.trusted_types, vec![PluginType::Monitoring]);
        assert_eq!(
            config.permissions.type_defaults.get("utility").unwrap(),
            &vec!["fs:write".to_string()]
        );
    }

    #[test]
    fn test_plugin_settings_table() {
        let toml_str = r#"
[plugins.heartbeat]
interval_ms = 250
label = "primary"
"#;
        let config = ConfigLoader::parse(toml_str).unwrap();
        let settings = config.plugin_settings("heartbeat");
        assert_eq!(settings["interval_ms"], 250);
        assert_eq!(settings["label"], "primary");
        assert!(config.plugin_settings("missing").as_object().unwrap().is_empty());
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_validate_rejects_non_numeric_host_version() {
        let mut config = VigilConfig::default();
        config.host.version = "one.two".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = VigilConfig::default();
        config.sandbox.defaults.max_execution_time_seconds = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("max_execution_time_seconds"));
    }

    #[test]
    fn test_validate_rejects_auto_install_without_command() {
        let mut config = VigilConfig::default();
        config.dependencies.auto_install = true;
        assert!(config.validate().is_err());
        config.dependencies.install_command = vec!["true".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_warns_on_unknown_type_key() {
        let mut config = VigilConfig::default();
        config
            .permissions
            .type_defaults
            .insert("widget".into(), vec!["x".into()]);
        let warnings = config.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.field == "permissions.type_defaults.widget"));
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_loader_reads_file_and_reloads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nmax_history = 3").unwrap();

        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(loader.get().registry.max_history, 3);

        std::fs::write(file.path(), "[registry]\nmax_history = 7\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().registry.max_history, 7);
    }

    #[test]
    fn test_loader_keeps_config_when_reload_is_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nmax_history = 4").unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();

        std::fs::write(file.path(), "[sandbox.defaults]\nmax_memory_mb = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().registry.max_history, 4);
    }

    #[test]
    fn test_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get().discovery.descriptor_name, "plugin.json");
    }

    #[test]
    fn test_loader_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry\nmax_history = ").unwrap();
        assert!(ConfigLoader::load(Some(file.path())).is_err());
    }
}
