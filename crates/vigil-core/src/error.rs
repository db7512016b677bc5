use std::path::PathBuf;

use thiserror::Error;

use crate::state::PluginState;

/// Unified error type for the Vigil plugin host.
#[derive(Error, Debug)]
pub enum VigilError {
    // ── Discovery errors ───────────────────────────────────────
    #[error("manifest validation failed: {}: {}", .path.display(), .errors.join("; "))]
    ManifestValidation { path: PathBuf, errors: Vec<String> },

    // ── Resolution errors ──────────────────────────────────────
    #[error(
        "plugin {plugin} is incompatible with host {host} (supported: {min}..{})",
        .max.as_deref().unwrap_or("")
    )]
    VersionIncompatible {
        plugin: String,
        host: String,
        min: String,
        max: Option<String>,
    },

    #[error("unsatisfied dependencies for {plugin}: {}", .details.join("; "))]
    DependencyUnsatisfied { plugin: String, details: Vec<String> },

    #[error("dependency conflict: {0}")]
    DependencyConflict(String),

    // ── Loader errors ──────────────────────────────────────────
    #[error("failed to load plugin {plugin}: {reason}")]
    Load { plugin: String, reason: String },

    // ── Sandbox errors ─────────────────────────────────────────
    #[error("plugin {plugin} exceeded its {seconds}s execution limit")]
    SandboxTimeout { plugin: String, seconds: f64 },

    #[error("plugin {plugin} resource limit: {reason}")]
    SandboxResource { plugin: String, reason: String },

    // ── Permission / governance errors ─────────────────────────
    #[error("permission denied for {plugin}: {capability}")]
    PermissionDenied { plugin: String, capability: String },

    #[error("security violation: {plugin}: {reason}")]
    SecurityViolation { plugin: String, reason: String },

    // ── Lifecycle errors ───────────────────────────────────────
    #[error("plugin not loaded: {0}")]
    NotLoaded(String),

    #[error("invalid state transition for {plugin}: {from} -> {to}")]
    InvalidTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },

    #[error("plugin {plugin} is not running (state: {state})")]
    NotRunning { plugin: String, state: PluginState },

    #[error("plugin error: {plugin}: {reason}")]
    Plugin { plugin: String, reason: String },

    #[error("unsupported plugin method: {0}")]
    UnsupportedMethod(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl VigilError {
    /// Shorthand for an error raised by a plugin's own hook.
    pub fn plugin(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the sandbox rather than the plugin itself.
    pub fn is_sandbox(&self) -> bool {
        matches!(
            self,
            Self::SandboxTimeout { .. } | Self::SandboxResource { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
