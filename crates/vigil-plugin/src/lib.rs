//! # vigil-plugin
//!
//! Plugin governance for the Vigil host. Plugins are compiled into the host
//! and registered with a [`PluginFactory`] under an entry point; descriptors
//! on disk decide which of them are loaded, at which version, with which
//! capabilities and under which resource limits.
//!
//! ## Plugin Descriptor
//!
//! Each plugin ships with a `plugin.json` descriptor:
//!
//! ```json
//! {
//!   "name": "heartbeat",
//!   "version": "1.2.0",
//!   "plugin_type": "utility",
//!   "author": "Vigil Maintainers",
//!   "description": "Emits a periodic liveness beat",
//!   "entry_point": "vigil.builtin.heartbeat:Heartbeat",
//!   "dependencies": ["serde >=1.0, <2.0"],
//!   "min_system_version": "0.1.0",
//!   "permissions": ["log:write", "metrics:write"]
//! }
//! ```
//!
//! ## Pipeline
//!
//! [`Discovery`] → [`DependencyResolver`] → [`PermissionManager`] →
//! [`Loader`] → [`Registry`], with every hook and call run inside a
//! [`Sandbox`] and the [`GovernanceController`] able to freeze, roll back or
//! reload any plugin at run time.

pub mod discovery;
pub mod governance;
pub mod instance;
pub mod loader;
pub mod manifest;
pub mod os_limits;
pub mod permissions;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod sandbox;
pub mod version;

pub use discovery::{Discovery, DiscoveryReport};
pub use governance::{AuditAction, AuditRecord, GovernanceController};
pub use instance::{HealthRecord, PluginInstance, PluginStatus, RegistryStatus};
pub use loader::{Loader, PluginConstructor, PluginFactory};
pub use manifest::{DependencySpec, EntryPoint, PluginManifest};
pub use permissions::{PermissionGrant, PermissionManager};
pub use plugin::{Plugin, PluginContext};
pub use registry::{LoadOutcome, Registry};
pub use resolver::{
    CommandInstaller, DependencyConflict, DependencyInfo, DependencyResolver, PackageInstaller,
    PackageSource, ResolutionReport, StaticPackages,
};
pub use sandbox::{CeilingGate, ComplianceReport, Sandbox};
pub use version::Requirement;
