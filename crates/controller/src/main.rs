use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleet_domain::config::{load_controller_config, ConfigSeverity};

use fleetd::{admin, agent, state::ControllerState, tls};

#[derive(Parser)]
#[command(name = "fleetd", version)]
struct Cli {
    /// Path to the controller's TOML config file.
    #[arg(long, default_value = "/etc/fleetd/fleetd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller (default when no subcommand is given).
    Serve,
    /// Load and validate the config, reporting issues, without serving.
    ConfigCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_controller_config(&cli.config)
                .with_context(|| format!("loading config from {}", cli.config.display()))?;
            run_server(config).await
        }
        Some(Command::ConfigCheck) => {
            let config = load_controller_config(&cli.config)
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

fn init_tracing() {
    fleet_domain::trace::init("info,fleetd=debug");
}

async fn run_server(config: fleet_domain::config::ControllerConfig) -> anyhow::Result<()> {
    tracing::info!("fleetd starting");

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

    let acceptor = tls::build_acceptor(&config.tls).context("building TLS acceptor")?;
    let tcp_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding agent listener on port {}", config.port))?;
    tracing::info!(port = config.port, "agent listener bound");

    let control_socket_path = config.control_socket_path();
    if control_socket_path.exists() {
        std::fs::remove_file(&control_socket_path)
            .with_context(|| format!("removing stale socket {}", control_socket_path.display()))?;
    }
    if let Some(parent) = control_socket_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let unix_listener = tokio::net::UnixListener::bind(&control_socket_path)
        .with_context(|| format!("binding admin socket {}", control_socket_path.display()))?;
    tracing::info!(path = %control_socket_path.display(), "admin listener bound");

    let admin_uids = Arc::new(admin::resolve_admin_uids(&config.admin_users));
    tracing::info!(admin_uids = admin_uids.len(), "admin uid allowlist ready");

    let state = ControllerState::new(config.repository_root());
    tracing::info!(path = %state.repository_root.display(), "repository root ready");

    let agent_task = tokio::spawn(agent::serve(state.clone(), tcp_listener, acceptor));
    let admin_task = tokio::spawn(admin::serve(state.clone(), unix_listener, admin_uids));

    tokio::select! {
        _ = state.shutdown.notified() => {
            tracing::info!("shutdown requested via admin quit");
        }
        result = agent_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "agent listener task exited");
            }
        }
        result = admin_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "admin listener task exited");
            }
        }
    }

    let _ = std::fs::remove_file(&control_socket_path);
    Ok(())
}
