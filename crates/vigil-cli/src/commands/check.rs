use console::style;
use serde_json::json;

use vigil_config::{VigilConfig, WarningSeverity};
use vigil_core::VigilError;
use vigil_plugin::{DependencyResolver, Discovery, PermissionManager};

pub(super) fn cmd_check(config: VigilConfig, strict: bool, json: bool) -> vigil_core::Result<()> {
    let warnings = config.validate().map_err(VigilError::Config)?;
    let report = Discovery::new(&config.discovery).scan();
    let resolver = DependencyResolver::from_config(&config)?;
    let permissions = PermissionManager::new(&config.permissions);
    let resolution = resolver.report(report.manifests.values().map(|m| m.as_ref()));

    let unsatisfied: Vec<&str> = resolution
        .results
        .values()
        .filter(|r| !r.is_satisfied())
        .map(|r| r.plugin.as_str())
        .collect();

    if json {
        let grants: Vec<_> = report
            .manifests
            .values()
            .map(|m| permissions.compute_grant(m))
            .collect();
        let out = json!({
            "host_version": resolver.host_version().to_string(),
            "results": resolution.results,
            "conflicts": resolution.conflicts,
            "permissions": grants,
            "rejected": report.rejected,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for w in &warnings {
            if w.severity != WarningSeverity::Info {
                println!("  {w}");
            }
        }
        println!(
            "{} host version {}",
            style("Checking plugins against").bold(),
            resolver.host_version()
        );
        for (name, result) in &resolution.results {
            let mark = if result.is_satisfied() {
                style("✓").green()
            } else {
                style("✗").red()
            };
            println!("  {mark} {}", style(name).cyan());
            if !result.host.compatible {
                println!(
                    "      host {} outside supported range {}..{}",
                    result.host.host,
                    result.host.min.as_deref().unwrap_or(""),
                    result.host.max.as_deref().unwrap_or("")
                );
            }
            for dep in &result.dependencies {
                let installed = dep.installed.as_deref().unwrap_or("-");
                match &dep.error {
                    None => println!("      {}{} (installed {installed})", dep.name, dep.required),
                    Some(e) => println!(
                        "      {}{} (installed {installed}): {}",
                        dep.name,
                        dep.required,
                        style(e).red()
                    ),
                }
            }
            if let Some(manifest) = report.get(name) {
                let grant = permissions.compute_grant(manifest);
                if !grant.denied.is_empty() {
                    println!("      {} {}", style("denied:").yellow(), grant.denied);
                }
            }
        }

        if !report.rejected.is_empty() {
            println!(
                "  {} rejected descriptor(s); run `vigil discover` for details",
                report.rejected.len()
            );
        }

        if resolution.conflicts.is_empty() {
            println!("{}", style("No dependency conflicts.").green());
        } else {
            println!("{}", style("Dependency conflicts").red().bold());
            for c in &resolution.conflicts {
                println!("  {c}");
            }
        }
    }

    if strict && !resolution.conflicts.is_empty() {
        let first = &resolution.conflicts[0];
        return Err(VigilError::DependencyConflict(format!(
            "{} conflict(s), first: {first}",
            resolution.conflicts.len()
        )));
    }
    if strict && !unsatisfied.is_empty() {
        return Err(VigilError::DependencyUnsatisfied {
            plugin: unsatisfied.join(", "),
            details: vec!["run `vigil check` for details".into()],
        });
    }
    Ok(())
}
