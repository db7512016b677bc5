use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use vigil_core::PluginType;
use vigil_core::capability::tokens;

/// Root configuration, maps to `vigil.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub host: HostConfig,
    pub discovery: DiscoveryConfig,
    pub sandbox: SandboxConfig,
    pub permissions: PermissionsConfig,
    pub dependencies: DependenciesConfig,
    pub registry: RegistryConfig,
    /// Per-plugin settings handed to `initialize`, keyed by plugin name.
    pub plugins: HashMap<String, serde_json::Value>,
    pub logging: LoggingConfig,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            discovery: DiscoveryConfig::default(),
            sandbox: SandboxConfig::default(),
            permissions: PermissionsConfig::default(),
            dependencies: DependenciesConfig::default(),
            registry: RegistryConfig::default(),
            plugins: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl VigilConfig {
    /// Settings for one plugin, or an empty object.
    pub fn plugin_settings(&self, name: &str) -> serde_json::Value {
        self.plugins
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }
}

// ── Host ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Version of the running host, compared against each manifest's
    /// `min_system_version` / `max_system_version`.
    pub version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

// ── Discovery ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Directories scanned for descriptors, in precedence order
    /// (first match wins on name collision).
    pub search_paths: Vec<PathBuf>,
    /// Descriptor file name looked up inside each plugin directory.
    pub descriptor_name: String,
    /// Descriptors larger than this are rejected unread.
    pub max_descriptor_bytes: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from("plugins")],
            descriptor_name: "plugin.json".into(),
            max_descriptor_bytes: 64 * 1024,
        }
    }
}

// ── Sandbox ────────────────────────────────────────────────────

/// Resource ceilings applied around every plugin call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    /// Address-space ceiling in MiB.
    pub max_memory_mb: u64,
    /// CPU-time ceiling in seconds.
    pub max_cpu_time_seconds: u64,
    /// Wall-clock timeout per call.
    pub max_execution_time_seconds: f64,
    pub max_open_files: u64,
    /// 0 disables subprocess spawning entirely.
    pub max_subprocesses: u32,
    pub allow_network: bool,
    pub allow_file_write: bool,
    /// Lower the host's own soft rlimits for the duration of each call.
    /// These are process-wide, so enforced calls run one at a time.
    pub enforce_os_limits: bool,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_cpu_time_seconds: 30,
            max_execution_time_seconds: 30.0,
            max_open_files: 256,
            max_subprocesses: 0,
            allow_network: false,
            allow_file_write: false,
            enforce_os_limits: false,
        }
    }
}

impl SandboxLimits {
    pub fn execution_timeout(&self) -> Duration {
        if self.max_execution_time_seconds.is_finite() && self.max_execution_time_seconds > 0.0 {
            Duration::from_secs_f64(self.max_execution_time_seconds)
        } else {
            Duration::from_secs(30)
        }
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Apply a per-plugin override on top of these limits.
    pub fn with_overrides(&self, o: &SandboxOverrides) -> Self {
        Self {
            max_memory_mb: o.max_memory_mb.unwrap_or(self.max_memory_mb),
            max_cpu_time_seconds: o.max_cpu_time_seconds.unwrap_or(self.max_cpu_time_seconds),
            max_execution_time_seconds: o
                .max_execution_time_seconds
                .unwrap_or(self.max_execution_time_seconds),
            max_open_files: o.max_open_files.unwrap_or(self.max_open_files),
            max_subprocesses: o.max_subprocesses.unwrap_or(self.max_subprocesses),
            allow_network: o.allow_network.unwrap_or(self.allow_network),
            allow_file_write: o.allow_file_write.unwrap_or(self.allow_file_write),
            enforce_os_limits: o.enforce_os_limits.unwrap_or(self.enforce_os_limits),
        }
    }
}

/// Partial `SandboxLimits`; unset fields fall back to the system defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxOverrides {
    pub max_memory_mb: Option<u64>,
    pub max_cpu_time_seconds: Option<u64>,
    pub max_execution_time_seconds: Option<f64>,
    pub max_open_files: Option<u64>,
    pub max_subprocesses: Option<u32>,
    pub allow_network: Option<bool>,
    pub allow_file_write: Option<bool>,
    pub enforce_os_limits: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// System-wide defaults.
    pub defaults: SandboxLimits,
    /// Per-plugin overrides keyed by plugin name.
    pub overrides: HashMap<String, SandboxOverrides>,
}

impl SandboxConfig {
    /// Effective limits for one plugin.
    pub fn limits_for(&self, plugin: &str) -> SandboxLimits {
        match self.overrides.get(plugin) {
            Some(o) => self.defaults.with_overrides(o),
            None => self.defaults.clone(),
        }
    }
}

// ── Permissions ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Capabilities any plugin may be granted.
    pub safe_capabilities: Vec<String>,
    /// Categories that receive a wildcard grant.
    pub trusted_types: Vec<PluginType>,
    /// Extra capabilities allowed per category (keyed by type string, e.g.
    /// `model-provider`), on top of the safe set.
    pub type_defaults: BTreeMap<String, Vec<String>>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        let mut type_defaults = BTreeMap::new();
        type_defaults.insert(
            PluginType::ModelProvider.to_string(),
            vec![tokens::NETWORK_OUTBOUND.into(), tokens::MODEL_INVOKE.into()],
        );
        type_defaults.insert(
            PluginType::Integration.to_string(),
            vec![tokens::NETWORK_OUTBOUND.into()],
        );
        type_defaults.insert(
            PluginType::Monitoring.to_string(),
            vec![tokens::NETWORK_OUTBOUND.into()],
        );
        Self {
            safe_capabilities: vec![
                tokens::CONFIG_READ.into(),
                tokens::LOG_WRITE.into(),
                tokens::METRICS_WRITE.into(),
                tokens::DATA_READ.into(),
                tokens::TELEMETRY_EMIT.into(),
            ],
            trusted_types: vec![PluginType::Gate, PluginType::FfeComponent],
            type_defaults,
        }
    }
}

// ── Dependencies ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependenciesConfig {
    /// Try to install missing or mismatched packages, then re-check.
    pub auto_install: bool,
    /// Install command argv; `{package}` and `{requirement}` are substituted.
    pub install_command: Vec<String>,
    /// JSON file mapping package name to installed version, re-read on every pass.
    pub packages_file: Option<PathBuf>,
    /// Packages known to be installed in the host.
    pub installed: BTreeMap<String, String>,
}

// ── Registry ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Initialize and start plugins as part of `discover_and_load_all`.
    pub auto_start: bool,
    /// Period of the background health monitor. 0 disables it.
    pub health_check_interval_seconds: u64,
    /// Number of prior versions remembered per plugin for rollback.
    pub max_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            health_check_interval_seconds: 60,
            max_history: 10,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl VigilConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Host version ───
        let version = self.host.version.trim();
        if version.is_empty() {
            warnings.push(ConfigWarning {
                field: "host.version".into(),
                message: "host version is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to the running host's semantic version, e.g. '1.4.0'".into()),
            });
        } else if !version
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        {
            warnings.push(ConfigWarning {
                field: "host.version".into(),
                message: format!("'{}' is not a numeric dotted version", version),
                severity: WarningSeverity::Error,
                hint: Some("Use MAJOR[.MINOR[.PATCH]]".into()),
            });
        }

        // ── Discovery ───
        if self.discovery.search_paths.is_empty() {
            warnings.push(ConfigWarning {
                field: "discovery.search_paths".into(),
                message: "no search paths — discovery will find nothing".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Add e.g. 'plugins'".into()),
            });
        }
        if self.discovery.descriptor_name.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "discovery.descriptor_name".into(),
                message: "descriptor name is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Default is 'plugin.json'".into()),
            });
        }

        // ── Sandbox ───
        let mut sandboxes = vec![("sandbox.defaults".to_string(), self.sandbox.defaults.clone())];
        for name in self.sandbox.overrides.keys() {
            sandboxes.push((
                format!("sandbox.overrides.{name}"),
                self.sandbox.limits_for(name),
            ));
        }
        for (field, limits) in &sandboxes {
            let t = limits.max_execution_time_seconds;
            if !t.is_finite() || t <= 0.0 {
                warnings.push(ConfigWarning {
                    field: format!("{field}.max_execution_time_seconds"),
                    message: format!("timeout {} must be a positive number", t),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if limits.max_memory_mb == 0 {
                warnings.push(ConfigWarning {
                    field: format!("{field}.max_memory_mb"),
                    message: "memory ceiling is 0".into(),
                    severity: WarningSeverity::Error,
                    hint: Some("Set to e.g. 512".into()),
                });
            }
            if limits.enforce_os_limits {
                warnings.push(ConfigWarning {
                    field: format!("{field}.enforce_os_limits"),
                    message: "OS ceilings are process-wide; enforced calls are serialized".into(),
                    severity: WarningSeverity::Info,
                    hint: None,
                });
            }
        }

        // ── Permissions ───
        if self
            .permissions
            .safe_capabilities
            .iter()
            .any(|c| c.trim() == tokens::WILDCARD)
        {
            warnings.push(ConfigWarning {
                field: "permissions.safe_capabilities".into(),
                message: "wildcard in the safe set grants everything to every plugin".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Use permissions.trusted_types for wildcard grants".into()),
            });
        }

        for key in self.permissions.type_defaults.keys() {
            if let Err(e) = key.parse::<PluginType>() {
                warnings.push(ConfigWarning {
                    field: format!("permissions.type_defaults.{key}"),
                    message: e,
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
        }

        // ── Dependencies ───
        if self.dependencies.auto_install && self.dependencies.install_command.is_empty() {
            warnings.push(ConfigWarning {
                field: "dependencies.install_command".into(),
                message: "auto_install is on but no install command is set".into(),
                severity: WarningSeverity::Error,
                hint: Some("e.g. [\"pip\", \"install\", \"{requirement}\"]".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors.join("\n"))
        }
    }
}
