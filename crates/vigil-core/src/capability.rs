use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Well-known capability tokens. Tokens are free-form strings; these are the
/// ones the host itself checks.
pub mod tokens {
    pub const CONFIG_READ: &str = "config:read";
    pub const LOG_WRITE: &str = "log:write";
    pub const METRICS_WRITE: &str = "metrics:write";
    pub const DATA_READ: &str = "data:read";
    pub const TELEMETRY_EMIT: &str = "telemetry:emit";
    pub const NETWORK_OUTBOUND: &str = "network:outbound";
    pub const FS_WRITE: &str = "fs:write";
    pub const SUBPROCESS_SPAWN: &str = "subprocess:spawn";
    pub const MODEL_INVOKE: &str = "model:invoke";
    /// Grants every capability.
    pub const WILDCARD: &str = "*";
}

/// A single capability token such as `network:outbound`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == tokens::WILDCARD
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An ordered set of capability tokens. A set containing `*` matches any token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wildcard() -> Self {
        Self::from_tokens([tokens::WILDCARD])
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tokens
                .into_iter()
                .map(|t| Capability::new(t.as_ref()))
                .filter(|c| !c.as_str().is_empty())
                .collect(),
        )
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.iter().any(Capability::is_wildcard)
    }

    /// Whether `token` is covered by this set (directly or via wildcard).
    pub fn allows(&self, token: &str) -> bool {
        self.is_wildcard() || self.0.iter().any(|c| c.as_str() == token)
    }

    pub fn insert(&mut self, cap: Capability) -> bool {
        self.0.insert(cap)
    }

    pub fn remove(&mut self, token: &str) -> bool {
        self.0.remove(&Capability::new(token))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    /// Split `requested` into the part this set allows and the part it does not.
    pub fn partition(&self, requested: &CapabilitySet) -> (CapabilitySet, CapabilitySet) {
        let (granted, denied): (BTreeSet<_>, BTreeSet<_>) = requested
            .0
            .iter()
            .cloned()
            .partition(|c| self.allows(c.as_str()));
        (Self(granted), Self(denied))
    }

    /// Whether every token of `self` is allowed by `other`.
    pub fn is_subset_of(&self, other: &CapabilitySet) -> bool {
        self.0.iter().all(|c| other.allows(c.as_str()))
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().map(|c| c.0.clone()).collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::from_tokens(iter)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_vec().join(", "))
    }
}
