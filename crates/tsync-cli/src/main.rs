//! tsync CLI
//!
//! Command-line interface for tsync - keep a local tree in step with a
//! remote target.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tsync_core::{Config, Depth, TargetContext};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tsync")]
#[command(about = "tsync - synchronize a local tree with a remote target")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a local root to a remote site
    Bind {
        /// Site URL (e.g. file:///srv/www)
        url: String,
        /// Local root (defaults to the current directory)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Site type (defaults to the URL scheme)
        #[arg(long = "type", value_name = "TYPE")]
        kind: Option<String>,
        /// Extra site option
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
    /// Remove the binding of a local root
    Unbind {
        /// Local root (defaults to the current directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Make local resources match the target
    Get {
        /// Resources (defaults to the current directory)
        paths: Vec<PathBuf>,
        /// zero, one or infinite
        #[arg(short, long)]
        depth: Option<Depth>,
    },
    /// Upload local resources to the target
    Put {
        /// Resources (defaults to the current directory)
        paths: Vec<PathBuf>,
        /// zero, one or infinite
        #[arg(short, long)]
        depth: Option<Depth>,
    },
    /// Delete the target counterparts of local resources
    #[command(alias = "rm")]
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// zero, one or infinite
        #[arg(short, long)]
        depth: Option<Depth>,
    },
    /// Show incoming, outgoing and conflicting changes
    Status {
        /// Resources (defaults to the current directory)
        paths: Vec<PathBuf>,
        /// zero, one or infinite
        #[arg(short, long)]
        depth: Option<Depth>,
        /// Compare contents of conflicting files
        #[arg(long)]
        contents: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, log_file, default_depth, compare_contents)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work without opening the synchronizer
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let mut context = TargetContext::open(config).context("Failed to open synchronizer store")?;
    debug!(database = %context.config().database_path().display(), "context opened");

    match cli.command {
        Commands::Bind {
            url,
            root,
            kind,
            options,
        } => commands::bind::bind(&mut context, url, root, kind, options, &output),
        Commands::Unbind { root } => commands::bind::unbind(&mut context, root, &output),
        Commands::Get { paths, depth } => {
            commands::transfer::get(&mut context, paths, depth, &output).await
        }
        Commands::Put { paths, depth } => {
            commands::transfer::put(&mut context, paths, depth, &output).await
        }
        Commands::Delete { paths, depth } => {
            commands::transfer::delete(&mut context, paths, depth, &output).await
        }
        Commands::Status {
            paths,
            depth,
            contents,
        } => commands::status::show(&mut context, paths, depth, contents, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Default filter for a `-v` count; `RUST_LOG` wins when set
fn filter_for(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tsync_core={},tsync_cli={}", level, level)))
}

fn init_logging(config: &Config, verbose: u8) {
    let filter = filter_for(verbose);

    if let Some(log_path) = &config.log_file {
        match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(file)
                    .try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
