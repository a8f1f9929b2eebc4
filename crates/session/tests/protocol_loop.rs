//! Exercises `fleet_session::spawn` end-to-end over an in-process duplex
//! transport (two paired mpsc channels standing in for a socket), matching
//! the protocol's documented request/reply and fire-and-forget behavior.

use std::pin::Pin;
use std::task::{Context, Poll};

use fleet_domain::Value;
use fleet_session::{BackgroundHandler, ImmediateHandler, Routes};
use futures_util::{Sink, Stream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// A paired in-process "socket": reads one side's outbox, writes into the
/// other side's inbox.
struct DuplexHalf {
    inbox: mpsc::UnboundedReceiver<Message>,
    outbox: mpsc::UnboundedSender<Message>,
}

fn duplex_pair() -> (DuplexHalf, DuplexHalf) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        DuplexHalf { inbox: a_rx, outbox: b_tx },
        DuplexHalf { inbox: b_rx, outbox: a_tx },
    )
}

impl Stream for DuplexHalf {
    type Item = Result<Message, WsError>;
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbox.poll_recv(cx).map(|opt| opt.map(Ok))
    }
}

impl Sink<Message> for DuplexHalf {
    type Error = WsError;
    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        let _ = self.outbox.send(item);
        Ok(())
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn request_reply_round_trip() {
    let (side_a, side_b) = duplex_pair();

    // Side B answers "echo" requests with its single argument doubled back.
    let routes_b = Routes::new().on_immediate(
        "echo",
        ImmediateHandler::new(|args| async move { Ok(args) }),
    );
    let (handle_b, _bin_b, _join_b) = fleet_session::spawn(side_b, routes_b);
    drop(handle_b);

    let (handle_a, _bin_a, _join_a) = fleet_session::spawn(side_a, Routes::new());

    let result = handle_a
        .remote_command("echo", vec![Value::Str("ping".into())], true, None)
        .await
        .unwrap();
    assert_eq!(result, vec![Value::Str("ping".into())]);
}

#[tokio::test]
async fn unknown_command_replies_with_error() {
    let (side_a, side_b) = duplex_pair();
    let (_handle_b, _bin_b, _join_b) = fleet_session::spawn(side_b, Routes::new());
    let (handle_a, _bin_a, _join_a) = fleet_session::spawn(side_a, Routes::new());

    let err = handle_a
        .remote_command("nonexistent", vec![], true, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nonexistent"));
}

#[tokio::test]
async fn background_route_runs_without_blocking_reader() {
    let (side_a, side_b) = duplex_pair();
    let routes_b = Routes::new().on_background(
        "slow",
        BackgroundHandler::new(|_args| async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(vec![Value::Str("done".into())])
        }),
    );
    let (_handle_b, _bin_b, _join_b) = fleet_session::spawn(side_b, routes_b);
    let (handle_a, _bin_a, _join_a) = fleet_session::spawn(side_a, Routes::new());

    let result = handle_a
        .remote_command("slow", vec![], true, Some(std::time::Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(result, vec![Value::Str("done".into())]);
}

#[tokio::test]
async fn fire_and_forget_does_not_wait_for_reply() {
    let (side_a, side_b) = duplex_pair();
    let (_handle_b, _bin_b, _join_b) = fleet_session::spawn(side_b, Routes::new());
    let (handle_a, _bin_a, _join_a) = fleet_session::spawn(side_a, Routes::new());

    let result = handle_a
        .remote_command("pretenses", vec![Value::Str("facts".into())], false, None)
        .await
        .unwrap();
    assert!(result.is_empty());
}
