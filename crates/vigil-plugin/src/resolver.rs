//! Host-version compatibility, package dependency checks and cross-plugin
//! conflict detection.

use async_trait::async_trait;
use semver::Version;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use vigil_config::VigilConfig;
use vigil_core::{Result, VigilError};

use crate::manifest::{DependencySpec, PluginManifest};
use crate::version::{may_overlap, parse_version};

// ── Installed package sources ──────────────────────────────────

/// Reports which version of a package the host currently has.
pub trait PackageSource: Send + Sync {
    fn installed_version(&self, package: &str) -> Option<Version>;
}

/// A fixed name → version table (from `[dependencies.installed]`).
#[derive(Debug, Clone, Default)]
pub struct StaticPackages(BTreeMap<String, Version>);

impl StaticPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw strings; unparsable versions are logged and skipped.
    pub fn from_table(table: &BTreeMap<String, String>) -> Self {
        let mut packages = Self::new();
        for (name, raw) in table {
            match parse_version(raw) {
                Ok(v) => {
                    packages.0.insert(name.clone(), v);
                }
                Err(e) => warn!(package = %name, error = %e, "ignoring installed package"),
            }
        }
        packages
    }

    pub fn with(mut self, name: &str, version: &str) -> Self {
        if let Ok(v) = parse_version(version) {
            self.0.insert(name.to_string(), v);
        }
        self
    }
}

impl PackageSource for StaticPackages {
    fn installed_version(&self, package: &str) -> Option<Version> {
        self.0.get(package).cloned()
    }
}

/// A JSON object `{ "package": "version" }` on disk, re-read on every
/// lookup so installs made since the last pass are seen.
#[derive(Debug, Clone)]
pub struct PackageFile {
    path: PathBuf,
}

impl PackageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PackageSource for PackageFile {
    fn installed_version(&self, package: &str) -> Option<Version> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = ?self.path, error = %e, "package file not readable");
                return None;
            }
        };
        let table: BTreeMap<String, String> = match serde_json::from_str(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "invalid package file");
                return None;
            }
        };
        table.get(package).and_then(|v| parse_version(v).ok())
    }
}

/// Sources consulted in order; the first one that knows the package wins.
#[derive(Default)]
pub struct LayeredPackages(Vec<Box<dyn PackageSource>>);

impl LayeredPackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, source: impl PackageSource + 'static) -> Self {
        self.0.push(Box::new(source));
        self
    }
}

impl PackageSource for LayeredPackages {
    fn installed_version(&self, package: &str) -> Option<Version> {
        self.0.iter().find_map(|s| s.installed_version(package))
    }
}

// ── Installers ─────────────────────────────────────────────────

/// Installs (or upgrades) a package so a later check can succeed.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Returns the failure text on error; it ends up in `DependencyInfo::error`.
    async fn install(&self, spec: &DependencySpec) -> std::result::Result<(), String>;
}

/// Runs an external command, substituting `{package}` and `{requirement}`
/// into each argument. The process runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    argv: Vec<String>,
}

impl CommandInstaller {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    fn render(&self, spec: &DependencySpec) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{package}", &spec.name)
                    .replace("{requirement}", &spec.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, spec: &DependencySpec) -> std::result::Result<(), String> {
        let argv = self.render(spec);
        let Some((program, args)) = argv.split_first() else {
            return Err("install command is empty".into());
        };
        let program = program.clone();
        let args = args.to_vec();
        info!(package = %spec.name, command = %argv.join(" "), "installing dependency");

        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new(&program).args(&args).output()
        })
        .await
        .map_err(|e| format!("install task failed: {e}"))?
        .map_err(|e| format!("failed to run installer: {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "installer exited with {}: {}",
                output.status,
                stderr.trim()
            ))
        }
    }
}

// ── Results ────────────────────────────────────────────────────

/// Outcome of checking one dependency specifier. Built fresh on every pass.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyInfo {
    pub name: String,
    pub required: String,
    pub installed: Option<String>,
    pub satisfied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostCompatibility {
    pub compatible: bool,
    pub host: String,
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub plugin: String,
    pub host: HostCompatibility,
    pub dependencies: Vec<DependencyInfo>,
}

impl ResolutionResult {
    pub fn is_satisfied(&self) -> bool {
        self.host.compatible && self.dependencies.iter().all(|d| d.satisfied)
    }
}

/// Two plugins whose requirements on one package cannot share a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyConflict {
    pub package: String,
    pub first: (String, String),
    pub second: (String, String),
}

impl std::fmt::Display for DependencyConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} requires '{}', {} requires '{}'",
            self.package, self.first.0, self.first.1, self.second.0, self.second.1
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    pub results: BTreeMap<String, ResolutionResult>,
    pub conflicts: Vec<DependencyConflict>,
}

// ── Resolver ───────────────────────────────────────────────────

/// Checks manifests against the running host and installed packages.
pub struct DependencyResolver {
    host_version: Version,
    packages: Arc<dyn PackageSource>,
    installer: Option<Arc<dyn PackageInstaller>>,
}

impl DependencyResolver {
    pub fn new(host_version: Version, packages: Arc<dyn PackageSource>) -> Self {
        Self {
            host_version,
            packages,
            installer: None,
        }
    }

    /// Build from config: the packages file (if any) is consulted before the
    /// static table, and an installer is attached when `auto_install` is on.
    pub fn from_config(config: &VigilConfig) -> Result<Self> {
        let host_version = parse_version(&config.host.version).map_err(VigilError::Config)?;

        let mut packages = LayeredPackages::new();
        if let Some(path) = &config.dependencies.packages_file {
            packages = packages.push(PackageFile::new(path));
        }
        packages = packages.push(StaticPackages::from_table(&config.dependencies.installed));

        let mut resolver = Self::new(host_version, Arc::new(packages));
        if config.dependencies.auto_install {
            resolver = resolver.with_installer(Arc::new(CommandInstaller::new(
                config.dependencies.install_command.clone(),
            )));
        }
        Ok(resolver)
    }

    pub fn with_installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// Compare the host version against the manifest's supported range.
    pub fn host_compatibility(&self, manifest: &PluginManifest) -> HostCompatibility {
        let too_old = manifest
            .min_system_version
            .as_ref()
            .is_some_and(|min| self.host_version < *min);
        let too_new = manifest
            .max_system_version
            .as_ref()
            .is_some_and(|max| self.host_version > *max);
        HostCompatibility {
            compatible: !too_old && !too_new,
            host: self.host_version.to_string(),
            min: manifest.min_system_version.as_ref().map(Version::to_string),
            max: manifest.max_system_version.as_ref().map(Version::to_string),
        }
    }

    pub fn check_host(&self, manifest: &PluginManifest) -> Result<()> {
        let compat = self.host_compatibility(manifest);
        if compat.compatible {
            return Ok(());
        }
        Err(VigilError::VersionIncompatible {
            plugin: manifest.name.clone(),
            host: compat.host,
            min: compat.min.unwrap_or_else(|| "0.0.0".into()),
            max: compat.max,
        })
    }

    fn check_one(&self, spec: &DependencySpec) -> DependencyInfo {
        let installed = self.packages.installed_version(&spec.name);
        let (satisfied, error) = match &installed {
            None => (false, Some("not installed".to_string())),
            Some(v) if spec.requirement.matches(v) => (true, None),
            Some(v) => (
                false,
                Some(format!("version mismatch: {v} does not satisfy '{}'", spec.raw)),
            ),
        };
        DependencyInfo {
            name: spec.name.clone(),
            required: spec.raw.clone(),
            installed: installed.map(|v| v.to_string()),
            satisfied,
            error,
        }
    }

    /// Check every dependency against what is installed right now.
    pub fn check_dependencies(&self, manifest: &PluginManifest) -> Vec<DependencyInfo> {
        manifest
            .dependencies
            .iter()
            .map(|d| self.check_one(d))
            .collect()
    }

    /// Check dependencies, installing unsatisfied ones when an installer is
    /// configured and checking those again afterwards.
    pub async fn ensure_dependencies(&self, manifest: &PluginManifest) -> Vec<DependencyInfo> {
        let mut infos = self.check_dependencies(manifest);
        let Some(installer) = &self.installer else {
            return infos;
        };

        for (spec, info) in manifest.dependencies.iter().zip(infos.iter_mut()) {
            if info.satisfied {
                continue;
            }
            match installer.install(spec).await {
                Ok(()) => {
                    let rechecked = self.check_one(spec);
                    if !rechecked.satisfied {
                        warn!(
                            plugin = %manifest.name,
                            package = %spec.name,
                            "dependency still unsatisfied after install"
                        );
                    }
                    *info = rechecked;
                }
                Err(e) => {
                    warn!(
                        plugin = %manifest.name,
                        package = %spec.name,
                        error = %e,
                        "dependency install failed"
                    );
                    let previous = info.error.take().unwrap_or_default();
                    info.error = Some(format!("{previous}; install failed: {e}"));
                }
            }
        }
        infos
    }

    /// Both checks that gate loading: host compatibility, then dependencies.
    pub async fn resolve(&self, manifest: &PluginManifest) -> Result<Vec<DependencyInfo>> {
        self.check_host(manifest)?;

        let infos = self.ensure_dependencies(manifest).await;
        let unsatisfied: Vec<String> = infos
            .iter()
            .filter(|d| !d.satisfied)
            .map(|d| {
                format!(
                    "{}{}: {}",
                    d.name,
                    d.required,
                    d.error.as_deref().unwrap_or("unsatisfied")
                )
            })
            .collect();
        if !unsatisfied.is_empty() {
            return Err(VigilError::DependencyUnsatisfied {
                plugin: manifest.name.clone(),
                details: unsatisfied,
            });
        }
        debug!(plugin = %manifest.name, count = infos.len(), "dependencies satisfied");
        Ok(infos)
    }

    /// Pairwise conflicts between plugins requiring the same package.
    pub fn detect_conflicts<'a, I>(manifests: I) -> Vec<DependencyConflict>
    where
        I: IntoIterator<Item = &'a PluginManifest>,
    {
        let mut by_package: BTreeMap<&str, Vec<(&str, &DependencySpec)>> = BTreeMap::new();
        for manifest in manifests {
            for dep in &manifest.dependencies {
                by_package
                    .entry(dep.name.as_str())
                    .or_default()
                    .push((manifest.name.as_str(), dep));
            }
        }

        let mut conflicts = Vec::new();
        for (package, specs) in by_package {
            for (i, (plugin_a, a)) in specs.iter().enumerate() {
                for (plugin_b, b) in &specs[i + 1..] {
                    if plugin_a == plugin_b || may_overlap(&a.requirement, &b.requirement) {
                        continue;
                    }
                    conflicts.push(DependencyConflict {
                        package: package.to_string(),
                        first: (plugin_a.to_string(), a.raw.clone()),
                        second: (plugin_b.to_string(), b.raw.clone()),
                    });
                }
            }
        }
        conflicts
    }

    /// Read-only resolution pass over a set of manifests (no installs).
    pub fn report<'a, I>(&self, manifests: I) -> ResolutionReport
    where
        I: IntoIterator<Item = &'a PluginManifest> + Clone,
    {
        let results = manifests
            .clone()
            .into_iter()
            .map(|m| {
                (
                    m.name.clone(),
                    ResolutionResult {
                        plugin: m.name.clone(),
                        host: self.host_compatibility(m),
                        dependencies: self.check_dependencies(m),
                    },
                )
            })
            .collect();
        ResolutionReport {
            results,
            conflicts: Self::detect_conflicts(manifests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn manifest(name: &str, deps: &[&str]) -> PluginManifest {
        PluginManifest::from_json(
            &json!({
                "name": name,
                "version": "1.0.0",
                "plugin_type": "integration",
                "author": "t",
                "description": "t",
                "entry_point": "t.m:P",
                "dependencies": deps,
                "min_system_version": "1.0",
                "max_system_version": "2.0"
            })
            .to_string(),
            Path::new("plugin.json"),
        )
        .unwrap()
    }

    fn resolver(host: &str, packages: StaticPackages) -> DependencyResolver {
        DependencyResolver::new(parse_version(host).unwrap(), Arc::new(packages))
    }

    #[test]
    fn host_range_is_inclusive() {
        let m = manifest("p", &[]);
        assert!(resolver("1.0.0", StaticPackages::new()).check_host(&m).is_ok());
        assert!(resolver("2.0.0", StaticPackages::new()).check_host(&m).is_ok());
        assert!(matches!(
            resolver("0.9.9", StaticPackages::new()).check_host(&m),
            Err(VigilError::VersionIncompatible { .. })
        ));
        assert!(resolver("2.0.1", StaticPackages::new()).check_host(&m).is_err());
    }

    #[test]
    fn missing_and_mismatched_packages() {
        let m = manifest("p", &["requests>=2.0", "numpy>=1.24"]);
        let r = resolver("1.5", StaticPackages::new().with("numpy", "1.19.5"));
        let infos = r.check_dependencies(&m);
        assert!(!infos[0].satisfied);
        assert_eq!(infos[0].error.as_deref(), Some("not installed"));
        assert!(infos[0].installed.is_none());
        assert!(!infos[1].satisfied);
        assert!(infos[1].error.as_deref().unwrap().starts_with("version mismatch"));
        assert_eq!(infos[1].installed.as_deref(), Some("1.19.5"));
    }

    #[test]
    fn tightening_a_range_never_satisfies_more() {
        let installed = StaticPackages::new().with("lib", "2.4.0");
        let r = resolver("1.5", installed);
        let ladder = ["lib", "lib>=2.0", "lib>=2.0,<3.0", "lib>=2.4,<2.5", "lib>=2.5,<2.6"];
        let satisfied: Vec<bool> = ladder
            .iter()
            .map(|spec| r.check_dependencies(&manifest("p", &[*spec]))[0].satisfied)
            .collect();
        assert_eq!(satisfied, vec![true, true, true, true, false]);
        assert!(satisfied.windows(2).all(|w| w[0] || !w[1]));
    }

    #[test]
    fn package_file_is_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        std::fs::write(&path, r#"{"lib": "1.0.0"}"#).unwrap();
        let source = PackageFile::new(&path);
        assert_eq!(source.installed_version("lib"), Some(Version::new(1, 0, 0)));

        std::fs::write(&path, r#"{"lib": "1.2"}"#).unwrap();
        assert_eq!(source.installed_version("lib"), Some(Version::new(1, 2, 0)));
        assert_eq!(source.installed_version("other"), None);
    }

    #[test]
    fn layered_sources_consult_in_order() {
        let layered = LayeredPackages::new()
            .push(StaticPackages::new().with("a", "2.0"))
            .push(StaticPackages::new().with("a", "1.0").with("b", "3.0"));
        assert_eq!(layered.installed_version("a"), Some(Version::new(2, 0, 0)));
        assert_eq!(layered.installed_version("b"), Some(Version::new(3, 0, 0)));
    }

    #[test]
    fn disjoint_ranges_yield_one_conflict() {
        let a = manifest("alpha", &["shared>=2.0,<3.0"]);
        let b = manifest("beta", &["shared>=3.0"]);
        let c = manifest("gamma", &["other>=1.0"]);
        let conflicts = DependencyResolver::detect_conflicts([&a, &b, &c]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].package, "shared");
        assert_eq!(conflicts[0].first, ("alpha".into(), ">=2.0,<3.0".into()));
        assert_eq!(conflicts[0].second, ("beta".into(), ">=3.0".into()));
    }

    #[test]
    fn overlapping_ranges_do_not_conflict() {
        let a = manifest("alpha", &["shared>=2.0"]);
        let b = manifest("beta", &["shared~=2.5"]);
        assert!(DependencyResolver::detect_conflicts([&a, &b]).is_empty());
    }

    struct RecordingInstaller {
        installs: parking_lot::Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl PackageInstaller for RecordingInstaller {
        async fn install(&self, spec: &DependencySpec) -> std::result::Result<(), String> {
            self.installs.lock().push(spec.name.clone());
            if self.fail {
                Err("index unreachable".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn install_failure_surfaces_error_text() {
        let installer = Arc::new(RecordingInstaller {
            installs: parking_lot::Mutex::new(Vec::new()),
            fail: true,
        });
        let r = resolver("1.5", StaticPackages::new()).with_installer(installer.clone());
        let m = manifest("p", &["missing>=1"]);
        let err = r.resolve(&m).await.unwrap_err();
        match err {
            VigilError::DependencyUnsatisfied { plugin, details } => {
                assert_eq!(plugin, "p");
                assert!(details[0].contains("install failed: index unreachable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(installer.installs.lock().as_slice(), ["missing"]);
    }

    #[tokio::test]
    async fn install_then_recheck_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        std::fs::write(&path, "{}").unwrap();

        // The "installer" writes the package into the file the resolver reads.
        struct FileInstaller(PathBuf);
        #[async_trait]
        impl PackageInstaller for FileInstaller {
            async fn install(&self, spec: &DependencySpec) -> std::result::Result<(), String> {
                let body = format!("{{\"{}\": \"1.5.0\"}}", spec.name);
                std::fs::write(&self.0, body).map_err(|e| e.to_string())
            }
        }

        let r = DependencyResolver::new(Version::new(1, 5, 0), Arc::new(PackageFile::new(&path)))
            .with_installer(Arc::new(FileInstaller(path.clone())));
        let infos = r.resolve(&manifest("p", &["fresh>=1.0"])).await.unwrap();
        assert!(infos[0].satisfied);
        assert_eq!(infos[0].installed.as_deref(), Some("1.5.0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_installer_reports_exit_status() {
        let failing = CommandInstaller::new(vec!["false".into(), "{requirement}".into()]);
        let spec: DependencySpec = "pkg>=1".parse().unwrap();
        assert!(failing.install(&spec).await.unwrap_err().contains("installer exited"));

        let ok = CommandInstaller::new(vec!["true".into(), "{package}".into()]);
        assert!(ok.install(&spec).await.is_ok());
    }

    #[test]
    fn report_covers_every_manifest() {
        let a = manifest("alpha", &["x>=1"]);
        let b = manifest("beta", &[]);
        let r = resolver("3.0", StaticPackages::new().with("x", "1.1"));
        let report = r.report([&a, &b]);
        assert_eq!(report.results.len(), 2);
        assert!(!report.results["alpha"].host.compatible);
        assert!(report.results["alpha"].dependencies[0].satisfied);
        assert!(!report.results["beta"].is_satisfied());
        assert!(report.conflicts.is_empty());
    }
}
