//! The admin-facing listener: a Unix domain socket carrying uncompressed,
//! unauthenticated-at-the-transport-layer WebSocket frames. Authorization
//! is by peer credentials (`SO_PEERCRED`) against the configured
//! `admin_users` list, not by TLS.

use std::collections::{BTreeMap, HashSet};
use std::mem::MaybeUninit;
use std::sync::Arc;

use fleet_domain::trace::TraceEvent;
use fleet_domain::Value;
use fleet_protocol::{ROUTE_APPLY, ROUTE_ONLINE, ROUTE_QUIT, ROUTE_REPORT};
use fleet_repository::{FsBackend, RepositoryView};
use fleet_session::{BackgroundHandler, ImmediateHandler, Routes};
use tokio::net::{UnixListener, UnixStream};

use crate::dispatch::apply_one;
use crate::state::ControllerState;

pub async fn serve(state: Arc<ControllerState>, listener: UnixListener, admin_uids: Arc<HashSet<u32>>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed on admin socket");
                continue;
            }
        };
        let state = state.clone();
        let admin_uids = admin_uids.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, stream, admin_uids).await {
                tracing::warn!(error = %e, "admin connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    state: Arc<ControllerState>,
    stream: UnixStream,
    admin_uids: Arc<HashSet<u32>>,
) -> fleet_domain::Result<()> {
    let cred = stream
        .peer_cred()
        .map_err(|e| fleet_domain::Error::Auth(format!("reading peer credentials: {e}")))?;
    let uid = cred.uid();
    if !admin_uids.contains(&uid) {
        TraceEvent::AdminRejected { uid }.emit();
        return Err(fleet_domain::Error::Auth(format!("uid {uid} is not an admin user")));
    }

    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| fleet_domain::Error::Transport(format!("websocket handshake failed: {e}")))?;

    let routes = build_routes(state.clone());
    let (_handle, mut binary_rx, join) = fleet_session::spawn(ws, routes);
    tokio::spawn(async move { while binary_rx.recv().await.is_some() {} });

    join.await
        .map_err(|e| fleet_domain::Error::Transport(e.to_string()))?
        .map_err(|e| fleet_domain::Error::Transport(e.to_string()))
}

fn build_routes(state: Arc<ControllerState>) -> Routes {
    let online_state = state.clone();
    let report_state = state.clone();
    let apply_state = state.clone();
    let quit_state = state.clone();

    Routes::new()
        .on_immediate(
            ROUTE_ONLINE,
            ImmediateHandler::new(move |_args| {
                let state = online_state.clone();
                async move {
                    let registry = state.registry.lock().await;
                    let mut cns = registry.cns();
                    cns.sort();
                    Ok(vec![Value::List(cns.into_iter().map(Value::Str).collect())])
                }
            }),
        )
        .on_immediate(
            ROUTE_REPORT,
            ImmediateHandler::new(move |args| {
                let state = report_state.clone();
                async move {
                    let Some(Value::Str(cn)) = args.first() else {
                        return Err("report(name) requires a CN argument".to_string());
                    };
                    let registry = state.registry.lock().await;
                    match registry.get(cn) {
                        Some(entry) => Ok(vec![entry.facts.clone()]),
                        None => Err(format!("{cn}: not connected")),
                    }
                }
            }),
        )
        .on_background(
            ROUTE_APPLY,
            BackgroundHandler::new(move |args| {
                let state = apply_state.clone();
                async move {
                    let dry_run = false;
                    let names = parse_apply_args(args);
                    let targets = match resolve_targets(&state, &names).await {
                        Ok(t) => t,
                        Err(e) => return Err(e),
                    };

                    let results = futures_util::future::join_all(
                        targets.into_iter().map(|cn| {
                            let state = state.clone();
                            async move {
                                let result = apply_one(&state, &cn, dry_run).await;
                                (cn, result)
                            }
                        }),
                    )
                    .await;

                    let mut aggregate = BTreeMap::new();
                    for (cn, result) in results {
                        aggregate.insert(cn, result);
                    }
                    Ok(vec![Value::Map(aggregate)])
                }
            }),
        )
        .on_immediate(
            ROUTE_QUIT,
            ImmediateHandler::new(move |_args| {
                let state = quit_state.clone();
                async move {
                    state.shutdown.notify_waiters();
                    Ok(Vec::new())
                }
            }),
        )
}

/// `apply(names...)`: each arg is a literal CN or `@tag`. An empty list
/// means "all currently connected agents".
fn parse_apply_args(args: Vec<Value>) -> Vec<String> {
    args.into_iter().map(|v| v.as_str().to_string()).filter(|s| !s.is_empty()).collect()
}

async fn resolve_targets(state: &Arc<ControllerState>, names: &[String]) -> Result<Vec<String>, String> {
    let connected: HashSet<String> = {
        let registry = state.registry.lock().await;
        registry.cns().into_iter().collect()
    };

    if names.is_empty() {
        let mut all: Vec<String> = connected.into_iter().collect();
        all.sort();
        return Ok(all);
    }

    let mut targets: HashSet<String> = HashSet::new();
    let mut tags_doc: Option<BTreeMap<String, Vec<String>>> = None;

    for name in names {
        if let Some(tag) = name.strip_prefix('@') {
            if tags_doc.is_none() {
                let root = state.repository_root.clone();
                let doc = tokio::task::spawn_blocking(move || {
                    let backend = FsBackend::new(&root);
                    let mut view = RepositoryView::new(backend);
                    fleet_apply::load_tags_document(&mut view, "tags")
                })
                .await
                .map_err(|e| format!("loading tags: {e}"))?
                .map_err(|e| e.to_string())?;
                tags_doc = Some(doc);
            }
            match tags_doc.as_ref().and_then(|d| d.get(tag)) {
                Some(members) => {
                    for cn in members {
                        if connected.contains(cn) {
                            targets.insert(cn.clone());
                        }
                    }
                }
                None => tracing::warn!(tag, "apply target references unknown tag"),
            }
        } else if connected.contains(name) {
            targets.insert(name.clone());
        }
    }

    let mut out: Vec<String> = targets.into_iter().collect();
    out.sort();
    Ok(out)
}

/// Resolves the configured `admin_users` list (uids or usernames) to a set
/// of uids. An empty list falls back to the controller process's own uid.
pub fn resolve_admin_uids(admin_users: &[String]) -> HashSet<u32> {
    if admin_users.is_empty() {
        let uid = unsafe { libc::getuid() };
        return HashSet::from([uid]);
    }
    admin_users
        .iter()
        .filter_map(|entry| {
            if let Ok(uid) = entry.parse::<u32>() {
                return Some(uid);
            }
            lookup_uid_by_name(entry)
        })
        .collect()
}

fn lookup_uid_by_name(name: &str) -> Option<u32> {
    let cname = std::ffi::CString::new(name).ok()?;
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0i8; 16384];
    let rc = unsafe {
        libc::getpwnam_r(cname.as_ptr(), pwd.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut result)
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    Some(unsafe { (*result).pw_uid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_admin_user_parses_directly() {
        let uids = resolve_admin_uids(&["1000".to_string()]);
        assert!(uids.contains(&1000));
    }

    #[test]
    fn empty_list_falls_back_to_own_uid() {
        let uids = resolve_admin_uids(&[]);
        assert_eq!(uids.len(), 1);
    }

    #[test]
    fn apply_args_collects_names_and_tags() {
        let names = parse_apply_args(vec![Value::Str("h1".into()), Value::Str("@role_web".into())]);
        assert_eq!(names, vec!["h1".to_string(), "@role_web".to_string()]);
    }

    #[test]
    fn empty_args_yield_empty_target_list() {
        assert!(parse_apply_args(vec![]).is_empty());
    }
}
