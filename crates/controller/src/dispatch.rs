//! Per-agent apply dispatch: provision a fresh repository view to compute
//! the file set a policy needs, diff it against what the agent is already
//! known to hold, push the delta, then hand off execution to the agent.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_domain::{trace::TraceEvent, Value};
use fleet_protocol::{ROUTE_ACCEPT_FILES, ROUTE_APPLY, ROUTE_DISCARD_FILES, ROUTE_DRY_RUN};
use fleet_repository::FsBackend;
use fleet_repository::RepositoryView;

use crate::state::ControllerState;

const POLICY_NAME: &str = "policy";

fn error_value(message: String) -> Value {
    let mut m = std::collections::BTreeMap::new();
    m.insert("error".to_string(), Value::Str(message));
    Value::Map(m)
}

/// Applies (or dry-runs) the policy on one connected agent. Returns the
/// agent's single-element result, or `{error: ...}` if anything along the
/// way — provisioning, file transfer, the remote call itself — failed.
/// Serialized per agent via that agent's apply lock, so a second apply
/// against the same CN queues behind the first.
pub async fn apply_one(state: &Arc<ControllerState>, cn: &str, dry_run: bool) -> Value {
    let (session, apply_lock, facts) = {
        let registry = state.registry.lock().await;
        match registry.get(cn) {
            Some(entry) => (entry.session.clone(), entry.apply_lock.clone(), entry.facts.clone()),
            None => return error_value(format!("{cn}: not connected")),
        }
    };

    let _guard = apply_lock.lock().await;

    let root = state.repository_root.clone();
    let cn_owned = cn.to_string();
    let provisioned = tokio::task::spawn_blocking(move || {
        let backend = FsBackend::new(&root);
        let mut view = RepositoryView::new(backend);
        let result = fleet_apply::load_and_provision(&mut view, &cn_owned, facts);
        let files: HashMap<String, String> = view.files().map(|(p, fp)| (p.to_string(), fp.to_string())).collect();
        (result.map(|_| ()), files)
    })
    .await;

    let (build_result, fresh) = match provisioned {
        Ok(pair) => pair,
        Err(e) => return error_value(format!("{cn}: provisioning task panicked: {e}")),
    };
    if let Err(e) = build_result {
        TraceEvent::ApplyFailed {
            cn: cn.to_string(),
            message: e.to_string(),
        }
        .emit();
        return error_value(e.to_string());
    }

    let (stale, pushed) = {
        let mut registry = state.registry.lock().await;
        let Some(entry) = registry.get_mut(cn) else {
            return error_value(format!("{cn}: disconnected during apply"));
        };

        let mut stale: Vec<String> = entry
            .known_files
            .keys()
            .filter(|p| !fresh.contains_key(p.as_str()))
            .cloned()
            .collect();
        stale.sort();

        let mut pushed: Vec<String> = fresh
            .iter()
            .filter(|(p, fp)| entry.known_files.get(p.as_str()) != Some(fp))
            .map(|(p, _)| p.clone())
            .collect();
        pushed.sort();

        entry.known_files = fresh.clone();
        (stale, pushed)
    };

    TraceEvent::FileCacheDelta {
        cn: cn.to_string(),
        stale: stale.len(),
        fresh: pushed.len(),
    }
    .emit();

    if !stale.is_empty() {
        let args = stale.iter().cloned().map(Value::Str).collect();
        if let Err(e) = session.remote_command(ROUTE_DISCARD_FILES, args, false, None).await {
            return error_value(format!("{cn}: sending discard_files: {e}"));
        }
    }

    if !pushed.is_empty() {
        let args = pushed.iter().cloned().map(Value::Str).collect();
        if let Err(e) = session.remote_command(ROUTE_ACCEPT_FILES, args, false, None).await {
            return error_value(format!("{cn}: sending accept_files: {e}"));
        }
        let root = state.repository_root.clone();
        let paths = pushed.clone();
        let blobs = tokio::task::spawn_blocking(move || {
            let backend = FsBackend::new(&root);
            let mut view = RepositoryView::new(backend);
            let mut out = Vec::with_capacity(paths.len());
            for p in &paths {
                out.push(view.get_file(p).map(|b| b.to_vec()));
            }
            out
        })
        .await;
        let blobs = match blobs {
            Ok(b) => b,
            Err(e) => return error_value(format!("{cn}: reading files for transfer: {e}")),
        };
        for (path, blob) in pushed.iter().zip(blobs) {
            let bytes = match blob {
                Ok(b) => b,
                Err(e) => return error_value(format!("{cn}: reading {path}: {e}")),
            };
            if let Err(e) = session.send_binary(bytes) {
                return error_value(format!("{cn}: sending file blob for {path}: {e}"));
            }
        }
    }

    let route = if dry_run { ROUTE_DRY_RUN } else { ROUTE_APPLY };
    TraceEvent::ApplyDispatched {
        cn: cn.to_string(),
        dry_run,
    }
    .emit();
    match session
        .remote_command(route, vec![Value::Str(POLICY_NAME.to_string())], true, None)
        .await
    {
        Ok(mut result) => result.pop().unwrap_or(Value::Null),
        Err(e) => {
            TraceEvent::ApplyFailed {
                cn: cn.to_string(),
                message: e.to_string(),
            }
            .emit();
            error_value(e.to_string())
        }
    }
}
