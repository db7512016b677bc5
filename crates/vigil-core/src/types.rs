use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a plugin (its manifest name).
pub type PluginId = String;

/// Closed set of plugin categories a descriptor may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginType {
    ModelProvider,
    Monitoring,
    Gate,
    FfeComponent,
    Interface,
    Integration,
    Utility,
}

impl PluginType {
    pub const ALL: [PluginType; 7] = [
        Self::ModelProvider,
        Self::Monitoring,
        Self::Gate,
        Self::FfeComponent,
        Self::Interface,
        Self::Integration,
        Self::Utility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelProvider => "model-provider",
            Self::Monitoring => "monitoring",
            Self::Gate => "gate",
            Self::FfeComponent => "ffe-component",
            Self::Interface => "interface",
            Self::Integration => "integration",
            Self::Utility => "utility",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown plugin type '{s}' (expected one of: {})", valid.join(", "))
            })
    }
}
