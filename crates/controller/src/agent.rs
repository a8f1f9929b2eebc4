//! Agent-facing listener: mTLS-terminated WebSocket connections, one CN
//! per live session, admitted with graceful takeover on reconnect.

use std::sync::Arc;

use fleet_domain::trace::TraceEvent;
use fleet_domain::Value;
use fleet_protocol::ROUTE_PRETENSES;
use fleet_session::{ImmediateHandler, Routes};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::state::ControllerState;
use crate::tls;

pub async fn serve(state: Arc<ControllerState>, listener: TcpListener, acceptor: TlsAcceptor) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed on agent listener");
                continue;
            }
        };
        let state = state.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, stream, acceptor).await {
                tracing::warn!(peer = %peer, error = %e, "agent connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    state: Arc<ControllerState>,
    stream: TcpStream,
    acceptor: TlsAcceptor,
) -> fleet_domain::Result<()> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| fleet_domain::Error::Transport(format!("TLS handshake failed: {e}")))?;

    let peer_certs = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|c| c.to_vec())
        .unwrap_or_default();
    let cn = tls::extract_cn(&peer_certs)?;

    let ws = tokio_tungstenite::accept_async_with_config(tls_stream, Some(WebSocketConfig::default()))
        .await
        .map_err(|e| fleet_domain::Error::Transport(format!("websocket handshake failed: {e}")))?;

    let cn_for_route = cn.clone();
    let state_for_route = state.clone();
    let routes = Routes::new().on_immediate(
        ROUTE_PRETENSES,
        ImmediateHandler::new(move |args| {
            let cn = cn_for_route.clone();
            let state = state_for_route.clone();
            async move {
                let facts = args.into_iter().next().unwrap_or(Value::Null);
                let mut registry = state.registry.lock().await;
                if let Some(entry) = registry.get_mut(&cn) {
                    entry.facts = facts;
                }
                drop(registry);
                TraceEvent::FactsUpdated { cn }.emit();
                Ok(Vec::new())
            }
        }),
    );

    let (handle, mut binary_rx, join) = fleet_session::spawn(ws, routes);
    // Agent sessions never push unsolicited binary frames to the controller;
    // drain and drop them defensively rather than let the channel back up.
    tokio::spawn(async move { while binary_rx.recv().await.is_some() {} });

    let (took_over, generation) = {
        let mut registry = state.registry.lock().await;
        registry.admit(cn.clone(), handle, join.abort_handle())
    };
    if took_over {
        TraceEvent::AgentTakeover { cn: cn.clone() }.emit();
    } else {
        TraceEvent::AgentAdmitted { cn: cn.clone() }.emit();
    }

    // Awaiting the real join handle (rather than anything stored in the
    // registry) means a takeover's `abort()` on the *old* connection's
    // handle unblocks that old task's own await here, while this one only
    // ever observes its own completion.
    let result = match join.await {
        Ok(r) => r,
        Err(e) if e.is_cancelled() => Ok(()), // superseded by a takeover
        Err(e) => Err(fleet_session::SessionError::Transport(e.to_string())),
    };

    {
        let mut registry = state.registry.lock().await;
        registry.remove_if_current(&cn, generation);
    }
    TraceEvent::AgentDisconnected { cn: cn.clone() }.emit();
    result.map_err(|e| fleet_domain::Error::Transport(e.to_string()))
}
