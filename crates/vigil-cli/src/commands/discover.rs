use console::style;
use serde_json::json;

use vigil_config::VigilConfig;
use vigil_plugin::Discovery;

pub(super) fn cmd_discover(config: VigilConfig, json: bool) -> vigil_core::Result<()> {
    let discovery = Discovery::new(&config.discovery);
    let report = discovery.scan();

    if json {
        let manifests: Vec<_> = report.manifests.values().map(|m| m.as_ref()).collect();
        let out = json!({
            "search_paths": discovery.search_paths(),
            "manifests": manifests,
            "rejected": report.rejected,
            "duplicates": report.duplicates,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", style("Search paths").bold());
    for path in discovery.search_paths() {
        let marker = if path.is_dir() {
            style("✓").green()
        } else {
            style("✗").dim()
        };
        println!("  {marker} {}", path.display());
    }

    println!();
    if report.manifests.is_empty() {
        println!("No plugins discovered.");
    } else {
        println!("{} ({})", style("Plugins").bold(), report.manifests.len());
        for m in report.manifests.values() {
            println!(
                "  {} v{} [{}] - {}",
                style(&m.name).cyan(),
                m.version,
                m.plugin_type,
                m.description
            );
            println!("      entry point: {}", m.entry_point);
            if !m.dependencies.is_empty() {
                let deps: Vec<String> = m.dependencies.iter().map(ToString::to_string).collect();
                println!("      dependencies: {}", deps.join(", "));
            }
            if !m.required_permissions.is_empty() {
                println!("      permissions: {}", m.required_permissions);
            }
        }
    }

    if !report.duplicates.is_empty() {
        println!();
        println!("{}", style("Duplicates (ignored)").yellow().bold());
        for d in &report.duplicates {
            println!(
                "  {} at {} (kept {})",
                d.name,
                d.path.display(),
                d.kept.display()
            );
        }
    }

    if !report.rejected.is_empty() {
        println!();
        println!("{}", style("Rejected descriptors").red().bold());
        for r in &report.rejected {
            println!("  {}", r.path.display());
            for e in &r.errors {
                println!("      - {e}");
            }
        }
    }
    Ok(())
}
