//! # vigil-core
//!
//! Core types and primitives for the Vigil plugin governance host.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! the error taxonomy, the lifecycle state graph, plugin categories, capability
//! tokens, sandbox violations and lifecycle events.

pub mod capability;
pub mod error;
pub mod event;
pub mod state;
pub mod types;
pub mod violation;

pub use capability::{Capability, CapabilitySet};
pub use error::{Result, VigilError};
pub use event::{Event, EventBus};
pub use state::PluginState;
pub use types::PluginType;
pub use violation::{Violation, ViolationKind};
