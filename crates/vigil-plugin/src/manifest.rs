use semver::Version;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use vigil_core::{CapabilitySet, PluginType, VigilError};

use crate::version::{Requirement, parse_requirement, parse_version};

/// Plugin manifest, parsed from a JSON descriptor (`plugin.json`).
///
/// Immutable once discovered: a changed descriptor yields a new manifest.
#[derive(Debug, Clone, Serialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: Version,
    pub plugin_type: PluginType,
    pub author: String,
    pub description: String,
    pub entry_point: EntryPoint,
    pub dependencies: Vec<DependencySpec>,
    pub min_system_version: Option<Version>,
    pub max_system_version: Option<Version>,
    /// Capabilities the plugin asks for. The grant may be smaller.
    pub required_permissions: CapabilitySet,
    pub homepage: Option<String>,
    pub license: Option<String>,
    /// BLAKE3 hex digest of `artifact`.
    pub checksum: Option<String>,
    /// Artifact path, resolved against the descriptor's directory.
    pub artifact: Option<PathBuf>,
    /// Descriptor the manifest was read from.
    pub source: Option<PathBuf>,
}

const REQUIRED_KEYS: [&str; 6] = [
    "name",
    "version",
    "plugin_type",
    "author",
    "description",
    "entry_point",
];

impl PluginManifest {
    /// Parse and validate a descriptor. Every problem is collected so a
    /// rejected file reports all of them at once.
    pub fn from_json(raw: &str, source: &Path) -> vigil_core::Result<Self> {
        let fail = |errors: Vec<String>| VigilError::ManifestValidation {
            path: source.to_path_buf(),
            errors,
        };

        let value: Value =
            serde_json::from_str(raw).map_err(|e| fail(vec![format!("invalid JSON: {e}")]))?;
        let obj = value
            .as_object()
            .ok_or_else(|| fail(vec!["descriptor must be a JSON object".into()]))?;

        let mut errors = Vec::new();
        for key in REQUIRED_KEYS {
            match obj.get(key) {
                None => errors.push(format!("missing required key '{key}'")),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    errors.push(format!("'{key}' must not be empty"))
                }
                Some(Value::String(_)) => {}
                Some(_) => errors.push(format!("'{key}' must be a string")),
            }
        }
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let name = text("name");
        if !name.is_empty() && !valid_name(&name) {
            errors.push(format!(
                "name '{name}' may only contain letters, digits, '-', '_' and '.'"
            ));
        }

        let version = required(&mut errors, "version", &text("version"), parse_version);
        let plugin_type = required(
            &mut errors,
            "plugin_type",
            &text("plugin_type"),
            str::parse::<PluginType>,
        );
        let entry_point = required(
            &mut errors,
            "entry_point",
            &text("entry_point"),
            str::parse::<EntryPoint>,
        );

        let min_system_version = optional_version(obj, "min_system_version", &mut errors);
        let max_system_version = optional_version(obj, "max_system_version", &mut errors);
        if let (Some(min), Some(max)) = (&min_system_version, &max_system_version) {
            if min > max {
                errors.push(format!(
                    "min_system_version {min} is greater than max_system_version {max}"
                ));
            }
        }

        let dependencies = string_list(obj, "dependencies", &mut errors)
            .into_iter()
            .filter_map(|d| check(&mut errors, "dependencies", d.parse::<DependencySpec>()))
            .collect();
        let required_permissions =
            CapabilitySet::from_tokens(string_list(obj, "permissions", &mut errors));

        let checksum = optional_string(obj, "checksum", &mut errors);
        if let Some(sum) = &checksum {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                errors.push("checksum must be a 64-character BLAKE3 hex digest".into());
            }
        }
        let base = source.parent().unwrap_or(Path::new("."));
        let artifact = optional_string(obj, "artifact", &mut errors).map(|a| base.join(a));
        let homepage = optional_string(obj, "homepage", &mut errors);
        let license = optional_string(obj, "license", &mut errors);

        match (version, plugin_type, entry_point) {
            (Some(version), Some(plugin_type), Some(entry_point)) if errors.is_empty() => {
                Ok(Self {
                    name,
                    version,
                    plugin_type,
                    author: text("author"),
                    description: text("description"),
                    entry_point,
                    dependencies,
                    min_system_version,
                    max_system_version,
                    required_permissions,
                    homepage,
                    license,
                    checksum: checksum.map(|c| c.to_ascii_lowercase()),
                    artifact,
                    source: Some(source.to_path_buf()),
                })
            }
            _ => Err(fail(errors)),
        }
    }

    /// Verify artifact bytes against the declared checksum.
    pub fn verify_checksum(&self, bytes: &[u8]) -> bool {
        match &self.checksum {
            Some(expected) => blake3::hash(bytes).to_hex().as_str() == expected.as_str(),
            None => true,
        }
    }

    /// `name@version`, used in log lines and conflict reports.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

fn valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn check<T>(errors: &mut Vec<String>, key: &str, r: Result<T, String>) -> Option<T> {
    r.map_err(|e| errors.push(format!("{key}: {e}"))).ok()
}

/// Parse a required key; an absent or empty value was already reported.
fn required<T>(
    errors: &mut Vec<String>,
    key: &str,
    raw: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Option<T> {
    if raw.is_empty() {
        return None;
    }
    check(errors, key, parse(raw))
}

fn optional_string(obj: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => {
            errors.push(format!("'{key}' must be a string"));
            None
        }
    }
}

fn optional_version(obj: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Option<Version> {
    let raw = optional_string(obj, key, errors)?;
    check(errors, key, parse_version(&raw))
}

fn string_list(obj: &Map<String, Value>, key: &str, errors: &mut Vec<String>) -> Vec<String> {
    match obj.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    errors.push(format!("'{key}' entries must be strings"));
                    None
                }
            })
            .collect(),
        Some(_) => {
            errors.push(format!("'{key}' must be a list of strings"));
            Vec::new()
        }
    }
}

// ── Entry point ────────────────────────────────────────────────

/// `module.path:Symbol`, the key a plugin constructor is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    pub module: String,
    pub symbol: String,
}

impl FromStr for EntryPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (module, symbol) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("'{s}' must have the form module.path:Symbol"))?;
        let ident = |part: &str| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        };
        if !module.split('.').all(ident) {
            return Err(format!("invalid module path '{module}'"));
        }
        if !ident(symbol) {
            return Err(format!("invalid symbol '{symbol}'"));
        }
        Ok(Self {
            module: module.to_string(),
            symbol: symbol.to_string(),
        })
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.symbol)
    }
}

impl Serialize for EntryPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Dependency specifier ───────────────────────────────────────

/// A third-party package requirement, e.g. `numpy>=1.24,<2`.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub name: String,
    pub requirement: Requirement,
    /// The requirement as written, for reports.
    pub raw: String,
}

impl FromStr for DependencySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~' | '^' | '*' | ' '))
            .unwrap_or(s.len());
        let (name, range) = s.split_at(split);
        if name.is_empty() || !valid_name(name) {
            return Err(format!("invalid dependency name in '{s}'"));
        }
        let range = range.trim();
        let requirement = parse_requirement(range).map_err(|e| format!("{name}: {e}"))?;
        Ok(Self {
            name: name.to_string(),
            requirement,
            raw: range.to_string(),
        })
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.raw)
        }
    }
}

impl Serialize for DependencySpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
