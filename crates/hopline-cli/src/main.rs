//! Hopline CLI - proxy profile orchestrator
//!
//! Lists and resolves installed plugin packages, runs a chained proxy
//! instance from a build result, and shows the resolved configuration.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
pub mod config_bridge;

use commands::{config, plugins, run};

/// Hopline - proxy profile orchestrator
#[derive(Parser)]
#[command(name = "hopline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an explicit configuration file
    #[arg(short, long, global = true, env = "HOPLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect installed plugin packages
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// Build and launch an instance, closing it on ctrl-c
    Run {
        /// TOML build result: primary config, hops and bridges
        build: PathBuf,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List every known plugin
    List {
        /// Hide plugins shipped with hopline itself
        #[arg(long)]
        skip_internal: bool,
    },
    /// Resolve a plugin id to an executable
    Resolve {
        /// Logical plugin id, e.g. naive-plugin
        id: String,
        /// Encoded plugin options (`key=value;flag`)
        #[arg(short, long)]
        options: Option<String>,
        /// Print the descriptor as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve the plugin selected in a stored plugin configuration
    Selected {
        /// File with one encoded options string per plugin; the first names
        /// the selected plugin
        file: PathBuf,
        /// Print the descriptor as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Output format: toml or json
        #[arg(short, long, default_value = "toml")]
        format: String,
        /// Show which layer set each field instead
        #[arg(long)]
        sources: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = hopline_config::Config::load(cli.config.as_deref());

    // Set up logging from config, with --verbose override.
    let log_config = if let Ok(resolved) = &resolved {
        let mut lc = config_bridge::to_log_config(&resolved.config);
        if cli.verbose {
            "debug".clone_into(&mut lc.level);
        }
        lc
    } else {
        let level = if cli.verbose { "debug" } else { "info" };
        hopline_telemetry::LogConfig::new(level)
            .with_format(hopline_telemetry::LogFormat::Compact)
    };
    if let Err(e) = hopline_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let resolved = resolved?;
    let cfg = &resolved.config;

    match cli.command {
        Commands::Plugins { command } => match command {
            PluginCommands::List { skip_internal } => plugins::list_plugins(cfg, skip_internal)?,
            PluginCommands::Resolve { id, options, json } => {
                plugins::resolve_plugin(cfg, &id, options.as_deref(), json).await?;
            },
            PluginCommands::Selected { file, json } => {
                plugins::resolve_configured(cfg, &file, json).await?;
            },
        },
        Commands::Run { build } => run::run_instance(cfg, &build).await?,
        Commands::Config { command } => match command {
            ConfigCommands::Show { format, sources } => {
                config::show_config(&resolved, &format, sources)?;
            },
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resolve_accepts_encoded_options() {
        let cli = Cli::try_parse_from([
            "hopline",
            "plugins",
            "resolve",
            "naive-plugin",
            "--options",
            "id=naive-plugin;insecure",
        ])
        .unwrap();
        let Commands::Plugins {
            command: PluginCommands::Resolve { id, options, json },
        } = cli.command
        else {
            panic!("expected plugins resolve");
        };
        assert_eq!(id, "naive-plugin");
        assert_eq!(options.as_deref(), Some("id=naive-plugin;insecure"));
        assert!(!json);
    }

    #[test]
    fn selected_takes_a_configuration_file() {
        let cli =
            Cli::try_parse_from(["hopline", "plugins", "selected", "plugins.conf", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plugins {
                command: PluginCommands::Selected { ref file, json: true },
            } if file == &PathBuf::from("plugins.conf")
        ));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["hopline", "run", "profile.toml", "-c", "/etc/hopline.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/hopline.toml")));
        assert!(matches!(cli.command, Commands::Run { ref build } if build == &PathBuf::from("profile.toml")));
    }
}
