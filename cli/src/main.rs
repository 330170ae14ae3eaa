// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Flotilla CLI
//!
//! One binary, two roles:
//!
//! - **Agent mode**: `flotilla agent` serves the RPC endpoint in front of
//!   the local container engine.
//! - **Controller mode**: every other subcommand probes the configured
//!   agents and either places a manifest on the best one (`submit`) or
//!   fans the operation out to the whole fleet.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{
    ExecCommand, ImagesCommand, LoadCommand, LogsCommand, NameCommand, PsCommand, PullCommand,
    RmCommand, RmiCommand, StopCommand, SubmitCommand,
};

/// Flotilla - distributed container provisioning
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "FLOTILLA_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Comma-separated agent addresses (overrides the config file)
    #[arg(long, global = true, value_delimiter = ',', value_name = "ADDR")]
    agents: Vec<String>,

    /// Agent filter expression, e.g. 'A@^api- and L@env:prd'
    #[arg(short = 'F', long, global = true, value_name = "EXPR")]
    filter: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FLOTILLA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as agent mode
    Agent,
    /// Run a container by the manifest
    Submit(SubmitCommand),
    /// List containers
    Ps(PsCommand),
    /// Show logs of a container
    Logs(LogsCommand),
    /// Exec a command in a container
    Exec(ExecCommand),
    /// Pull a container image
    Pull(PullCommand),
    /// Remove a container
    Rm(RmCommand),
    /// Remove an image
    Rmi(RmiCommand),
    /// Start a container
    Start(NameCommand),
    /// Stop a container
    Stop(StopCommand),
    /// Restart a container
    Restart(StopCommand),
    /// List images
    Images(ImagesCommand),
    /// Load a container image from tarball
    Load(LoadCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = flotilla_core::domain::config::Config::load(cli.config.as_deref())
        .context("loading configuration")?;
    let ctx = commands::Context {
        config,
        agents_override: cli.agents,
        filter: cli.filter,
    };

    match cli.command {
        Commands::Agent => commands::agent::run(&ctx).await,
        Commands::Submit(cmd) => commands::submit::run(&ctx, cmd).await,
        Commands::Ps(cmd) => commands::ps::run(&ctx, cmd).await,
        Commands::Logs(cmd) => commands::logs::run(&ctx, cmd).await,
        Commands::Exec(cmd) => commands::exec::run(&ctx, cmd).await,
        Commands::Pull(cmd) => commands::images::pull(&ctx, cmd).await,
        Commands::Rm(cmd) => commands::containers::rm(&ctx, cmd).await,
        Commands::Rmi(cmd) => commands::images::rmi(&ctx, cmd).await,
        Commands::Start(cmd) => commands::containers::start(&ctx, cmd).await,
        Commands::Stop(cmd) => commands::containers::stop(&ctx, cmd).await,
        Commands::Restart(cmd) => commands::containers::restart(&ctx, cmd).await,
        Commands::Images(cmd) => commands::images::list(&ctx, cmd).await,
        Commands::Load(cmd) => commands::load::run(&ctx, cmd).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
