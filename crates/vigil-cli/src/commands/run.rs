use console::style;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use vigil_config::VigilConfig;
use vigil_core::PluginState;
use vigil_plugin::{PluginFactory, Registry};

use crate::builtin::{builtin_manifests, register_builtins};

pub(super) async fn cmd_run(config: VigilConfig, duration: Option<u64>) -> vigil_core::Result<()> {
    let factory = PluginFactory::new();
    register_builtins(&factory)?;
    let registry = Arc::new(Registry::new(config, factory)?);
    let monitor = registry.spawn_health_monitor();

    let outcomes = registry.discover_and_load_all().await;
    for manifest in builtin_manifests()? {
        let name = manifest.name.clone();
        match registry.activate(Arc::new(manifest), PluginState::Running).await {
            Ok(_) => info!(plugin = %name, "built-in plugin running"),
            Err(e) => warn!(plugin = %name, error = %e, "built-in plugin not started"),
        }
    }

    let failed = outcomes.values().filter(|ok| !**ok).count();
    println!(
        "{} {} discovered, {} failed",
        style("vigil").bold().cyan(),
        outcomes.len(),
        failed
    );
    print_status(&registry);

    match duration {
        Some(seconds) => {
            println!("Running for {seconds}s (Ctrl-C to stop early)");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            println!("Running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
        }
    }

    let health = registry.health_check_all().await;
    let unhealthy: Vec<&str> = health
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(name, _)| name.as_str())
        .collect();
    if !unhealthy.is_empty() {
        println!("{} {}", style("unhealthy:").yellow(), unhealthy.join(", "));
    }
    print_status(&registry);

    if let Some(handle) = monitor {
        handle.abort();
    }
    registry.shutdown_all().await;
    println!("{}", style("Shut down.").green());
    Ok(())
}

fn print_status(registry: &Registry) {
    let status = registry.get_registry_status();
    println!(
        "  {} plugins, {} loaded, {} frozen",
        status.total,
        status.loaded,
        status.frozen.len()
    );
    for name in registry.names() {
        let Some(s) = registry.get_plugin_status(&name) else {
            continue;
        };
        let state = match s.state {
            PluginState::Running => style(s.state.as_str()).green(),
            PluginState::Error | PluginState::Frozen => style(s.state.as_str()).red(),
            _ => style(s.state.as_str()).yellow(),
        };
        println!(
            "  {:<20} v{:<10} {:<12} calls={} errors={} violations={}",
            s.name,
            s.version.as_deref().unwrap_or("?"),
            state,
            s.call_count,
            s.error_count,
            s.violation_count
        );
        if let Some(err) = &s.last_error {
            println!("      last error: {}", style(err).dim());
        }
    }
}
