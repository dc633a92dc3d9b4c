//! Command-line driver for the Tasker offline cache controller.
//!
//! Runs the controller's lifecycle against a real origin with the on-disk
//! cache store, so the offline shell can be installed and inspected outside
//! the browser.
//!
//! ## Usage
//!
//! ```bash
//! # Cache the shell of a local dev server and evict old generations
//! tasker-offline --origin http://localhost:5173/ install
//!
//! # Ask the controller for a resource
//! tasker-offline fetch /index.html
//!
//! # List cache generations and their entries
//! tasker-offline caches
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tasker_common::{init_logging, LogConfig, LogFormat};
use tasker_core::{DisplayMode, OfflineConfig};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "tasker-offline")]
#[command(about = "Install and inspect the Tasker offline shell cache")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the origin the shell assets are resolved against
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Override the cache store directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log filter directives, e.g. `tasker_sw=trace,reqwest=warn`
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and store the shell assets
    Install {
        /// Stop after install, leaving stale generations in place
        #[arg(long)]
        no_activate: bool,
    },

    /// Delete cache generations other than the current one
    Activate,

    /// Run a request through the fetch handler
    Fetch {
        /// Absolute URL, or a path resolved against the origin
        target: String,
        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Extra request header as `name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Write the response body to stdout
        #[arg(long)]
        body: bool,
    },

    /// List cache generations and their entries
    Caches,

    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        write: bool,
    },

    /// Report whether a host with the given flags counts as an installed PWA
    Platform {
        /// Display mode reported by the host
        #[arg(long, value_enum, default_value = "browser")]
        display_mode: DisplayModeArg,
        /// Vendor `navigator.standalone` flag
        #[arg(long)]
        navigator_standalone: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DisplayModeArg {
    Browser,
    MinimalUi,
    Standalone,
    Fullscreen,
}

impl From<DisplayModeArg> for DisplayMode {
    fn from(arg: DisplayModeArg) -> Self {
        match arg {
            DisplayModeArg::Browser => DisplayMode::Browser,
            DisplayModeArg::MinimalUi => DisplayMode::MinimalUi,
            DisplayModeArg::Standalone => DisplayMode::Standalone,
            DisplayModeArg::Fullscreen => DisplayMode::Fullscreen,
        }
    }
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(OfflineConfig::default_path)
    }

    /// Configuration file contents with command-line overrides applied.
    fn effective_config(&self) -> anyhow::Result<OfflineConfig> {
        let path = self.config_path();
        let mut config = OfflineConfig::load_or_default(&path)
            .with_context(|| format!("loading {}", path.display()))?;

        if let Some(ref origin) = self.origin {
            config.origin = origin.clone();
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir = dir.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn log_config(&self) -> LogConfig {
        let base = if self.verbose {
            LogConfig::debug()
        } else {
            LogConfig::quiet()
        };
        let config = base.with_format(self.log_format);
        match self.log_filter {
            Some(ref filter) => config.with_filter(filter.clone()),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_config()).context("initializing logging")?;

    let config = cli.effective_config()?;
    tracing::debug!(cache = %config.cache_name, origin = %config.origin, "Effective configuration");

    match cli.command {
        Commands::Install { no_activate } => commands::install(&config, !no_activate).await,
        Commands::Activate => commands::activate(&config).await,
        Commands::Fetch {
            ref target,
            ref method,
            ref headers,
            body,
        } => commands::fetch(&config, target, method, headers, body).await,
        Commands::Caches => commands::caches(&config).await,
        Commands::Config { write } => commands::show_config(&config, write.then(|| cli.config_path())),
        Commands::Platform {
            display_mode,
            navigator_standalone,
        } => {
            commands::platform(display_mode.into(), navigator_standalone);
            Ok(())
        }
    }
}
