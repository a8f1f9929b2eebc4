//! Connection lifecycle: TLS WebSocket connect to the controller, the
//! inbound route table (`accept_files`/`discard_files`/`apply`/`dry_run`),
//! the facts collector, and reconnect with a linear back-off.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fleet_domain::config::AgentConfig;
use fleet_domain::{Error, Result, Value};
use fleet_protocol::{ROUTE_ACCEPT_FILES, ROUTE_APPLY, ROUTE_DISCARD_FILES, ROUTE_DRY_RUN, ROUTE_PRETENSES};
use fleet_repository::RepositoryView;
use fleet_session::{BackgroundHandler, ImmediateHandler, Routes, SessionHandle};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::cache::FileCache;
use crate::facts::collect_facts;
use crate::reconnect::ConnectBackoff;

/// Runs forever (until `shutdown` fires): connect, serve, reconnect.
pub async fn run(cfg: Arc<AgentConfig>, shutdown: CancellationToken) {
    let backoff = ConnectBackoff::new(cfg.max_connect_interval.max(1));
    let mut prev_delay = 0u64;
    let mut connect_errors: HashSet<String> = HashSet::new();

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let outcome = tokio::select! {
            r = connect_and_run(&cfg, &mut connect_errors, &shutdown) => r,
            _ = shutdown.cancelled() => return,
        };

        match outcome {
            Ok(()) => {
                tracing::info!("connection to controller closed");
                prev_delay = 0;
            }
            Err(e) => {
                tracing::debug!(error = %e, "session ended");
            }
        }

        let delay = backoff.next_delay(prev_delay);
        prev_delay = delay;
        tracing::info!(delay_secs = delay, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn connect_and_run(
    cfg: &AgentConfig,
    connect_errors: &mut HashSet<String>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let (host, port) = split_host_port(&cfg.server)?;

    let own_cn = crate::tls::own_cn(cfg)?;
    let connector = crate::tls::build_connector(cfg)?;
    let tcp = match tokio::net::TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(e) => return Err(note_connect_error(connect_errors, format!("tcp connect to {host}:{port}: {e}"))),
    };

    let server_name = rustls::pki_types::ServerName::try_from(host.clone())
        .map_err(|e| Error::Config(format!("invalid server name {host}: {e}")))?;
    let tls_stream = match connector.connect(server_name, tcp).await {
        Ok(s) => s,
        Err(e) => return Err(note_connect_error(connect_errors, format!("TLS handshake: {e}"))),
    };

    let url = format!("wss://{host}:{port}/");
    let (ws, _response) = match tokio_tungstenite::client_async_with_config(url, tls_stream, Some(WebSocketConfig::default())).await {
        Ok(pair) => pair,
        Err(e) => return Err(note_connect_error(connect_errors, format!("websocket handshake: {e}"))),
    };

    // A successful connection clears the de-dup set of recent connect
    // error strings.
    connect_errors.clear();
    tracing::info!(%host, port, "connected to controller");

    let cache = Arc::new(Mutex::new(FileCache::new()));
    let routes = build_routes(cache.clone(), cfg.dry_run, own_cn);
    let (handle, mut binary_rx, join) = fleet_session::spawn(ws, routes);

    let binary_cache = cache.clone();
    let binary_task = tokio::spawn(async move {
        while let Some(data) = binary_rx.recv().await {
            let mut cache = binary_cache.lock().await;
            if cache.bind_next(data).is_none() {
                tracing::warn!("received binary frame with no outstanding accept_files entry");
            }
        }
    });

    let facts_shutdown = shutdown.clone();
    let facts_handle = handle.clone();
    let facts_max = cfg.max_pretenses_interval.max(1);
    let facts_task = tokio::spawn(async move { facts_loop(facts_handle, facts_max, facts_shutdown).await });

    let result = tokio::select! {
        r = join => match r {
            Ok(inner) => inner.map_err(|e| Error::Transport(e.to_string())),
            Err(e) => Err(Error::Transport(e.to_string())),
        },
        _ = shutdown.cancelled() => Ok(()),
    };

    facts_task.abort();
    let _ = facts_task.await;
    binary_task.abort();
    let _ = binary_task.await;

    result
}

async fn facts_loop(handle: SessionHandle, max_interval: u64, shutdown: CancellationToken) {
    let mut last_sent: Option<Value> = None;
    let mut delay = 1u64;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let facts = collect_facts();
        if Some(&facts) != last_sent.as_ref() {
            tracing::debug!("facts changed, sending");
            if handle.remote_command(ROUTE_PRETENSES, vec![facts.clone()], false, None).await.is_err() {
                return;
            }
            last_sent = Some(facts);
            delay = 1;
        } else {
            delay = (delay + 1).min(max_interval);
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

fn build_routes(cache: Arc<Mutex<FileCache>>, config_dry_run: bool, own_cn: String) -> Routes {
    let accept_cache = cache.clone();
    let discard_cache = cache.clone();
    let apply_cache = cache.clone();
    let dry_run_cache = cache;
    let apply_cn = own_cn.clone();
    let dry_run_cn = own_cn;

    Routes::new()
        .on_immediate(
            ROUTE_ACCEPT_FILES,
            ImmediateHandler::new(move |args| {
                let cache = accept_cache.clone();
                async move {
                    let paths: Vec<String> = args.iter().map(|v| v.as_str().to_string()).collect();
                    cache.lock().await.accept(paths);
                    Ok(Vec::new())
                }
            }),
        )
        .on_immediate(
            ROUTE_DISCARD_FILES,
            ImmediateHandler::new(move |args| {
                let cache = discard_cache.clone();
                async move {
                    let paths: Vec<String> = args.iter().map(|v| v.as_str().to_string()).collect();
                    cache.lock().await.discard(&paths);
                    Ok(Vec::new())
                }
            }),
        )
        .on_background(
            ROUTE_APPLY,
            BackgroundHandler::new(move |args| {
                let cache = apply_cache.clone();
                let cn = apply_cn.clone();
                async move { run_policy(cache, args, config_dry_run, cn).await }
            }),
        )
        .on_background(
            ROUTE_DRY_RUN,
            BackgroundHandler::new(move |args| {
                let cache = dry_run_cache.clone();
                let cn = dry_run_cn.clone();
                async move { run_policy(cache, args, true, cn).await }
            }),
        )
}

async fn run_policy(
    cache: Arc<Mutex<FileCache>>,
    args: Vec<Value>,
    dry_run: bool,
    cn: String,
) -> std::result::Result<Vec<Value>, String> {
    let Some(Value::Str(_name)) = args.into_iter().next() else {
        return Err("apply(name) requires a policy name argument".to_string());
    };

    // Snapshot so the blocking apply doesn't hold the async mutex.
    let snapshot = cache.lock().await.clone();

    let result = tokio::task::spawn_blocking(move || {
        let facts = collect_facts();
        let mut view = RepositoryView::new(snapshot);
        let mut tree = fleet_apply::load_and_provision(&mut view, &cn, facts)?;
        Ok::<Value, fleet_domain::Error>(fleet_apply::apply(&mut tree, dry_run))
    })
    .await
    .map_err(|e| e.to_string())?;

    match result {
        Ok(summary) => Ok(vec![summary]),
        Err(e) => {
            let mut m = std::collections::BTreeMap::new();
            m.insert("error".to_string(), Value::Str(e.to_string()));
            Ok(vec![Value::Map(m)])
        }
    }
}

fn note_connect_error(seen: &mut HashSet<String>, message: String) -> Error {
    if seen.insert(message.clone()) {
        tracing::warn!("{message}");
    }
    Error::Transport(message)
}

fn split_host_port(server: &str) -> Result<(String, u16)> {
    let without_scheme = server
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(server);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in server URL {server:?}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((host_port.to_string(), 443)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_scheme_and_default_port() {
        assert_eq!(split_host_port("https://controller.example").unwrap(), ("controller.example".to_string(), 443));
    }

    #[test]
    fn splits_explicit_port() {
        assert_eq!(split_host_port("https://controller.example:8443").unwrap(), ("controller.example".to_string(), 8443));
    }

    #[test]
    fn note_connect_error_dedupes_identical_messages() {
        let mut seen = HashSet::new();
        note_connect_error(&mut seen, "boom".to_string());
        note_connect_error(&mut seen, "boom".to_string());
        assert_eq!(seen.len(), 1);
    }
}
