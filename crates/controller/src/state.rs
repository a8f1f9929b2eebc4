use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::registry::AgentRegistry;

/// Shared controller state. The spec's concurrency model describes a
/// single-threaded main loop owning the registry; here that loop is
/// replaced by concurrent tokio tasks serialized behind one async mutex —
/// the registry is small and held only for the duration of a lookup or
/// admit/remove, never across an await that waits on a remote peer.
pub struct ControllerState {
    pub registry: Mutex<AgentRegistry>,
    pub repository_root: PathBuf,
    pub shutdown: Notify,
}

impl ControllerState {
    pub fn new(repository_root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(AgentRegistry::new()),
            repository_root,
            shutdown: Notify::new(),
        })
    }
}
