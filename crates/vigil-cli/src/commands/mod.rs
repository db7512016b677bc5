use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vigil_config::{ConfigLoader, VigilConfig};
use vigil_core::VigilError;

mod check;
mod discover;
mod run;

/// Vigil: governed plugin host
#[derive(Parser)]
#[command(name = "vigil", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to vigil.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the search paths and list valid and rejected descriptors
    Discover {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check host compatibility, dependencies and cross-plugin conflicts
    Check {
        /// Exit non-zero when any conflict or unsatisfied plugin is found
        #[arg(long)]
        strict: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and start every discovered plugin plus the built-ins
    Run {
        /// Shut down after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> vigil_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        init_tracing(&config, self.verbose, self.quiet, self.log_level.as_deref());

        match self.command {
            Commands::Discover { json } => discover::cmd_discover(config, json),
            Commands::Check { strict, json } => check::cmd_check(config, strict, json),
            Commands::Run { duration } => run::cmd_run(config, duration).await,
            Commands::Config { json } => Self::cmd_config(config, json),
        }
    }

    fn cmd_config(config: VigilConfig, json: bool) -> vigil_core::Result<()> {
        let warnings = config.validate().map_err(VigilError::Config)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| VigilError::Config(e.to_string()))?
            );
        }
        for w in &warnings {
            eprintln!("{w}");
        }
        Ok(())
    }
}

/// Resolve the log level (`--verbose` > `--quiet` > `--log-level` > config)
/// and install the global subscriber.
fn init_tracing(config: &VigilConfig, verbose: bool, quiet: bool, log_level: Option<&str>) {
    let log_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        log_level.unwrap_or(&config.logging.level)
    };
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
    };

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
