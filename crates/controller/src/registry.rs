//! The agent registry: connected agents keyed by certificate CN, and the
//! per-agent state the controller alone owns (file cache, apply lock).
//!
//! Access is serialized behind one async mutex owned by `ControllerState`;
//! this module only holds the map itself. Each entry's apply lock
//! serializes a second apply against the same agent while a first is
//! still in flight.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_session::SessionHandle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::AbortHandle;

pub struct AgentEntry {
    pub session: SessionHandle,
    pub known_files: HashMap<String, String>,
    pub facts: fleet_domain::Value,
    pub apply_lock: Arc<AsyncMutex<()>>,
    abort: AbortHandle,
    /// Distinguishes this connection from whatever may later replace it
    /// under the same CN, so a stale teardown doesn't remove a newer entry.
    generation: u64,
}

impl AgentEntry {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentEntry>,
    next_generation: u64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a newly connected session for `cn`, aborting any prior
    /// session for the same CN first (graceful takeover). Returns
    /// `(took_over, generation)`; the caller owns the real `JoinHandle`
    /// and should await it directly, then call `remove_if_current` with
    /// this `generation`.
    pub fn admit(&mut self, cn: String, session: SessionHandle, abort: AbortHandle) -> (bool, u64) {
        let took_over = if let Some(old) = self.agents.remove(&cn) {
            old.abort.abort();
            true
        } else {
            false
        };
        let generation = self.next_generation;
        self.next_generation += 1;
        self.agents.insert(
            cn,
            AgentEntry {
                session,
                known_files: HashMap::new(),
                facts: fleet_domain::Value::Null,
                apply_lock: Arc::new(AsyncMutex::new(())),
                abort,
                generation,
            },
        );
        (took_over, generation)
    }

    /// Removes `cn`'s entry only if it is still the one with `generation`
    /// — a reconnect may have already replaced it by the time teardown runs.
    pub fn remove_if_current(&mut self, cn: &str, generation: u64) {
        if self.agents.get(cn).map(|e| e.generation) == Some(generation) {
            self.agents.remove(cn);
        }
    }

    pub fn get(&self, cn: &str) -> Option<&AgentEntry> {
        self.agents.get(cn)
    }

    pub fn get_mut(&mut self, cn: &str) -> Option<&mut AgentEntry> {
        self.agents.get_mut(cn)
    }

    pub fn cns(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn connected(&self, cn: &str) -> bool {
        self.agents.contains_key(cn)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_session::Routes;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    /// A transport that never yields anything; enough to construct a
    /// `SessionHandle` for registry bookkeeping tests, which never drive
    /// the connection itself.
    struct NullTransport {
        inbox: mpsc::UnboundedReceiver<Message>,
        _outbox: mpsc::UnboundedSender<Message>,
    }

    fn null_transport() -> NullTransport {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        NullTransport { inbox: rx, _outbox: tx2 }
    }

    impl futures_util::Stream for NullTransport {
        type Item = Result<Message, WsError>;
        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbox.poll_recv(cx).map(|opt| opt.map(Ok))
        }
    }

    impl futures_util::Sink<Message> for NullTransport {
        type Error = WsError;
        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn dummy_handle() -> (SessionHandle, AbortHandle) {
        let (handle, _binary, join) = fleet_session::spawn(null_transport(), Routes::new());
        (handle, join.abort_handle())
    }

    #[tokio::test]
    async fn reconnect_from_same_cn_reports_takeover() {
        let mut registry = AgentRegistry::new();
        let (h1, a1) = dummy_handle();
        assert!(!registry.admit("h1".to_string(), h1, a1).0);
        let (h2, a2) = dummy_handle();
        assert!(registry.admit("h1".to_string(), h2, a2).0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn distinct_cns_coexist() {
        let mut registry = AgentRegistry::new();
        let (h1, a1) = dummy_handle();
        let (h2, a2) = dummy_handle();
        registry.admit("h1".to_string(), h1, a1);
        registry.admit("h2".to_string(), h2, a2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn stale_teardown_does_not_evict_newer_connection() {
        let mut registry = AgentRegistry::new();
        let (h1, a1) = dummy_handle();
        let (_, gen1) = registry.admit("h1".to_string(), h1, a1);
        let (h2, a2) = dummy_handle();
        registry.admit("h1".to_string(), h2, a2);
        registry.remove_if_current("h1", gen1);
        assert_eq!(registry.len(), 1);
    }
}
