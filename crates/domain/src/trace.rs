use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Initialize the process-wide tracing subscriber. `default_directive` is
/// the fallback used when `RUST_LOG` is unset, e.g. `"info,fleetd=debug"`.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
}

/// Structured trace events emitted across the fleet crates, kept as a
/// closed enum (rather than ad-hoc `tracing::info!` calls everywhere) so
/// the event shapes stay greppable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AgentAdmitted {
        cn: String,
    },
    AgentTakeover {
        cn: String,
    },
    AgentDisconnected {
        cn: String,
    },
    AdminRejected {
        uid: u32,
    },
    ApplyDispatched {
        cn: String,
        dry_run: bool,
    },
    ApplyFailed {
        cn: String,
        message: String,
    },
    FileCacheDelta {
        cn: String,
        stale: usize,
        fresh: usize,
    },
    FactsUpdated {
        cn: String,
    },
    DecreeActivated {
        name: String,
        kind: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "fleet_event");
    }
}
