use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_domain::config::{load_agent_config, ConfigSeverity};
use tokio_util::sync::CancellationToken;

use fleet_agent::client;

#[derive(Parser)]
#[command(name = "fleet-agent", version)]
struct Cli {
    /// Path to the agent's TOML config file.
    #[arg(long, default_value = "/etc/fleet-agent/agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the controller and serve (default when no subcommand is given).
    Serve,
    /// Load and validate the config, reporting issues, without connecting.
    ConfigCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Restrictive default permissions before any file I/O.
    unsafe { libc::umask(0o027) };

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            fleet_domain::trace::init("info,fleet_agent=debug");
            let config = load_agent_config(&cli.config)
                .with_context(|| format!("loading config from {}", cli.config.display()))?;
            run_agent(config).await
        }
        Some(Command::ConfigCheck) => {
            let config = load_agent_config(&cli.config)
                .with_context(|| format!("loading config from {}", cli.config.display()))?;
            let issues = config.validate();
            for issue in &issues {
                println!("{:?}: {}", issue.severity, issue.message);
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run_agent(config: fleet_domain::config::AgentConfig) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {}", issue.message),
            ConfigSeverity::Error => tracing::error!("config: {}", issue.message),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    tracing::info!(server = %config.server, "fleet-agent starting");

    let shutdown = CancellationToken::new();
    let ctrlc_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
        ctrlc_shutdown.cancel();
    });

    client::run(Arc::new(config), shutdown).await;
    Ok(())
}
