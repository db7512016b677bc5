use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use vigil_config::DiscoveryConfig;
use vigil_core::VigilError;

use crate::manifest::PluginManifest;

/// A descriptor that failed to parse or validate.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedDescriptor {
    pub path: PathBuf,
    pub errors: Vec<String>,
}

/// A descriptor dropped because an earlier location already provided the name.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub kept: PathBuf,
}

/// Result of one scan over all search paths.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub manifests: BTreeMap<String, Arc<PluginManifest>>,
    pub rejected: Vec<RejectedDescriptor>,
    pub duplicates: Vec<DuplicateDescriptor>,
}

impl DiscoveryReport {
    pub fn get(&self, name: &str) -> Option<&Arc<PluginManifest>> {
        self.manifests.get(name)
    }
}

/// Scans plugin locations for JSON descriptors.
///
/// A plugin is either a directory holding `<descriptor_name>` or a loose
/// `*.json` file directly inside a search path. Locations are listed in
/// precedence order: the first descriptor for a name wins.
#[derive(Debug, Clone)]
pub struct Discovery {
    search_paths: Vec<PathBuf>,
    descriptor_name: String,
    max_descriptor_bytes: u64,
}

impl Discovery {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            search_paths: config.search_paths.clone(),
            descriptor_name: config.descriptor_name.clone(),
            max_descriptor_bytes: config.max_descriptor_bytes,
        }
    }

    /// Discovery over explicit paths with default descriptor settings.
    pub fn with_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self {
            search_paths: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            ..Self::new(&DiscoveryConfig::default())
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Scan every search path. Never fails as a whole: unreadable
    /// locations and bad descriptors end up in `rejected`.
    pub fn scan(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for dir in &self.search_paths {
            if !dir.exists() {
                debug!(?dir, "plugin search path does not exist, skipping");
                continue;
            }

            let candidates = match self.candidates(dir) {
                Ok(c) => c,
                Err(e) => {
                    warn!(?dir, error = %e, "failed to read plugin search path");
                    report.rejected.push(RejectedDescriptor {
                        path: dir.clone(),
                        errors: vec![format!("unreadable search path: {e}")],
                    });
                    continue;
                }
            };

            for path in candidates {
                match self.load_descriptor(&path) {
                    Ok(manifest) => {
                        if let Some(kept) = report.manifests.get(&manifest.name) {
                            let kept = kept.source.clone().unwrap_or_default();
                            warn!(
                                plugin = %manifest.name,
                                path = ?path,
                                kept = ?kept,
                                "duplicate plugin name, keeping first discovered"
                            );
                            report.duplicates.push(DuplicateDescriptor {
                                name: manifest.name,
                                path,
                                kept,
                            });
                        } else {
                            info!(
                                plugin = %manifest.name,
                                version = %manifest.version,
                                path = ?path,
                                "discovered plugin"
                            );
                            report
                                .manifests
                                .insert(manifest.name.clone(), Arc::new(manifest));
                        }
                    }
                    Err(VigilError::ManifestValidation { path, errors }) => {
                        warn!(path = ?path, errors = ?errors, "rejected plugin descriptor");
                        report.rejected.push(RejectedDescriptor { path, errors });
                    }
                    Err(e) => {
                        warn!(path = ?path, error = %e, "failed to read plugin descriptor");
                        report.rejected.push(RejectedDescriptor {
                            path,
                            errors: vec![e.to_string()],
                        });
                    }
                }
            }
        }

        report
    }

    /// Rescan and return the current manifest for one plugin.
    pub fn find(&self, name: &str) -> Option<Arc<PluginManifest>> {
        self.scan().manifests.remove(name)
    }

    /// Read, size-check and validate a single descriptor file.
    pub fn load_descriptor(&self, path: &Path) -> vigil_core::Result<PluginManifest> {
        let size = std::fs::metadata(path)?.len();
        if size > self.max_descriptor_bytes {
            return Err(VigilError::ManifestValidation {
                path: path.to_path_buf(),
                errors: vec![format!(
                    "descriptor is {size} bytes, limit is {}",
                    self.max_descriptor_bytes
                )],
            });
        }
        let raw = std::fs::read_to_string(path)?;
        PluginManifest::from_json(&raw, path)
    }

    /// Descriptor files under one search path, sorted for a stable scan order.
    fn candidates(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();

        Ok(entries
            .into_iter()
            .filter_map(|path| {
                if path.is_dir() {
                    let descriptor = path.join(&self.descriptor_name);
                    descriptor.is_file().then_some(descriptor)
                } else if path.extension().is_some_and(|e| e == "json") {
                    Some(path)
                } else {
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_plugin(root: &Path, dir: &str, name: &str, version: &str) {
        let plugin_dir = root.join(dir);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let descriptor = json!({
            "name": name,
            "version": version,
            "plugin_type": "utility",
            "author": "test",
            "description": "test plugin",
            "entry_point": format!("tests.{dir}:Plugin")
        });
        std::fs::write(plugin_dir.join("plugin.json"), descriptor.to_string()).unwrap();
    }

    #[test]
    fn nonexistent_dir_is_fine() {
        let report = Discovery::with_paths(&["/nonexistent/vigil/plugins"]).scan();
        assert!(report.manifests.is_empty());
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn discovers_directories_and_loose_files() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "alpha", "alpha", "1.0.0");
        std::fs::write(
            dir.path().join("beta.json"),
            json!({
                "name": "beta",
                "version": "0.3",
                "plugin_type": "gate",
                "author": "test",
                "description": "loose descriptor",
                "entry_point": "tests.beta:Gate"
            })
            .to_string(),
        )
        .unwrap();
        // Directories without a descriptor and non-JSON files are ignored
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("README.md"), "notes").unwrap();

        let report = Discovery::with_paths(&[dir.path()]).scan();
        assert_eq!(report.manifests.len(), 2);
        assert!(report.get("alpha").is_some());
        assert_eq!(report.get("beta").unwrap().version.to_string(), "0.3.0");
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn one_bad_descriptor_does_not_abort_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "good", "good", "1.0.0");
        let bad = dir.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("plugin.json"), "{ \"name\": \"bad\" ").unwrap();

        let report = Discovery::with_paths(&[dir.path()]).scan();
        assert_eq!(report.manifests.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].path, bad.join("plugin.json"));
    }

    #[test]
    fn first_location_wins_on_duplicate_name() {
        let high = tempfile::tempdir().unwrap();
        let low = tempfile::tempdir().unwrap();
        write_plugin(high.path(), "dup", "dup", "2.0.0");
        write_plugin(low.path(), "dup", "dup", "1.0.0");

        let report = Discovery::with_paths(&[high.path(), low.path()]).scan();
        assert_eq!(report.get("dup").unwrap().version.major, 2);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].path, low.path().join("dup/plugin.json"));
    }

    #[test]
    fn oversized_descriptor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "big", "big", "1.0.0");
        let discovery = Discovery {
            max_descriptor_bytes: 16,
            ..Discovery::with_paths(&[dir.path()])
        };
        let report = discovery.scan();
        assert!(report.manifests.is_empty());
        assert!(report.rejected[0].errors[0].contains("limit is 16"));
    }

    #[test]
    fn find_rereads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "live", "live", "1.0.0");
        let discovery = Discovery::with_paths(&[dir.path()]);
        assert_eq!(discovery.find("live").unwrap().version.major, 1);

        write_plugin(dir.path(), "live", "live", "1.1.0");
        assert_eq!(discovery.find("live").unwrap().version.minor, 1);
        assert!(discovery.find("absent").is_none());
    }
}
