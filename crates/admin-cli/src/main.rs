//! `fleetctl`: a thin admin client over the controller's Unix control
//! socket. No TLS here; the controller authorizes by peer uid, not by
//! certificate (see `fleetd::admin`).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_domain::config::load_controller_config;
use fleet_domain::Value;
use fleet_protocol::{ROUTE_APPLY, ROUTE_ONLINE, ROUTE_QUIT, ROUTE_REPORT};
use fleet_session::Routes;
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "fleetctl", version)]
struct Cli {
    /// Path to the controller's TOML config, used only to find the control socket.
    #[arg(long, default_value = "/etc/fleetd/fleetd.toml")]
    config: PathBuf,

    /// Override the control socket path instead of reading it from --config.
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the CNs of currently connected agents.
    Online,
    /// Print the most recently published facts for one agent.
    Report {
        cn: String,
    },
    /// Apply a policy to the given CNs or @tags (no targets means all connected agents).
    Apply {
        targets: Vec<String>,
    },
    /// Ask the controller to shut down.
    Quit,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(ok) => {
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("fleetctl: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool> {
    let cli = Cli::parse();

    let socket_path = match cli.socket {
        Some(p) => p,
        None => {
            let config = load_controller_config(&cli.config)
                .with_context(|| format!("loading config from {}", cli.config.display()))?;
            config.control_socket_path()
        }
    };

    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    let (ws, _response) = tokio_tungstenite::client_async("ws://localhost/admin", stream)
        .await
        .context("websocket handshake with controller")?;
    let (handle, mut binary_rx, _join) = fleet_session::spawn(ws, Routes::new());
    tokio::spawn(async move { while binary_rx.recv().await.is_some() {} });

    let (value, ok) = match cli.command {
        Command::Online => {
            let reply = handle
                .remote_command(ROUTE_ONLINE, Vec::new(), true, None)
                .await
                .context("online")?;
            (first(reply), true)
        }
        Command::Report { cn } => {
            let reply = handle
                .remote_command(ROUTE_REPORT, vec![Value::Str(cn)], true, None)
                .await
                .context("report")?;
            (first(reply), true)
        }
        Command::Apply { targets } => {
            let args = targets.into_iter().map(Value::Str).collect();
            let reply = handle
                .remote_command(ROUTE_APPLY, args, true, None)
                .await
                .context("apply")?;
            let value = first(reply);
            let ok = !any_error(&value);
            (value, ok)
        }
        Command::Quit => {
            handle
                .remote_command(ROUTE_QUIT, Vec::new(), true, None)
                .await
                .context("quit")?;
            (Value::Null, true)
        }
    };

    print_json(&value);
    Ok(ok)
}

fn first(mut reply: Vec<Value>) -> Value {
    if reply.is_empty() {
        Value::Null
    } else {
        reply.remove(0)
    }
}

/// True if `value`, or anything nested under it, is a map carrying an
/// `error` key. Used to decide `fleetctl apply`'s exit code across the
/// per-CN aggregate.
fn any_error(value: &Value) -> bool {
    match value {
        Value::Map(m) => m.contains_key("error") || m.values().any(any_error),
        Value::List(l) => l.iter().any(any_error),
        _ => false,
    }
}

fn print_json(value: &Value) {
    match serde_json::to_value(value) {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        },
        Err(_) => println!("{value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn any_error_finds_nested_error_key() {
        let mut inner = BTreeMap::new();
        inner.insert("error".to_string(), Value::Str("boom".into()));
        let mut outer = BTreeMap::new();
        outer.insert("host1".to_string(), Value::Map(inner));
        assert!(any_error(&Value::Map(outer)));
    }

    #[test]
    fn any_error_is_false_for_clean_results() {
        let mut inner = BTreeMap::new();
        inner.insert("changed".to_string(), Value::Bool(true));
        let mut outer = BTreeMap::new();
        outer.insert("host1".to_string(), Value::Map(inner));
        assert!(!any_error(&Value::Map(outer)));
    }

    #[test]
    fn first_returns_null_for_empty_reply() {
        assert_eq!(first(Vec::new()), Value::Null);
    }
}
