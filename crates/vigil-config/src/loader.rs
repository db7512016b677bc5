use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::VigilConfig;

/// Loads and reloads the Vigil configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<VigilConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > VIGIL_CONFIG env > ~/.vigil/vigil.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("VIGIL_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vigil")
            .join("vigil.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> vigil_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            VigilConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config (no file backing).
    pub fn from_config(config: VigilConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> VigilConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<VigilConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn read(path: &Path) -> vigil_core::Result<VigilConfig> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|e| {
            vigil_core::VigilError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Parse a TOML document into a config.
    pub fn parse(raw: &str) -> Result<VigilConfig, toml::de::Error> {
        toml::from_str::<VigilConfig>(raw)
    }

    /// Validate config: log warnings, fail on errors.
    fn check(config: &VigilConfig) -> vigil_core::Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(vigil_core::VigilError::Config(e)),
        }
    }

    /// Apply env var overrides (VIGIL_HOST_VERSION, VIGIL_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: VigilConfig) -> VigilConfig {
        if let Ok(v) = std::env::var("VIGIL_HOST_VERSION") {
            config.host.version = v;
        }
        if let Ok(v) = std::env::var("VIGIL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("VIGIL_PLUGIN_PATH") {
            let paths: Vec<PathBuf> = std::env::split_paths(&v).collect();
            if !paths.is_empty() {
                config.discovery.search_paths = paths;
            }
        }
        if let Ok(v) = std::env::var("VIGIL_AUTO_INSTALL") {
            config.dependencies.auto_install = v == "1" || v.eq_ignore_ascii_case("true");
        }
        config
    }

    /// Reload the config from disk. The current config is kept if the new
    /// one fails to parse or validate.
    pub fn reload(&self) -> vigil_core::Result<()> {
        if !self.config_path.exists() {
            return Err(vigil_core::VigilError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
