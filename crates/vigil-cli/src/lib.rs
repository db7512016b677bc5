//! # vigil-cli
//!
//! Command-line interface for the Vigil plugin host.
//!
//! ## Commands
//!
//! - `vigil discover`: List plugin descriptors found on the search paths
//! - `vigil check`: Report host compatibility, dependencies and conflicts
//! - `vigil run`: Load, start and supervise every plugin
//! - `vigil config`: Show the effective configuration

pub mod builtin;
pub mod commands;

pub use commands::Cli;
