//! # vigil-config
//!
//! Configuration system for the Vigil plugin host. Reads from `vigil.toml`
//! and environment variables, in that precedence order (env wins).

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::VigilConfig;
pub use schema::{
    ConfigWarning, DependenciesConfig, DiscoveryConfig, PermissionsConfig, RegistryConfig,
    SandboxConfig, SandboxLimits, SandboxOverrides, WarningSeverity,
};
