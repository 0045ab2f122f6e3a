//! In-memory WebSocket transport for exercising sessions without sockets.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub &'static str);

/// Knobs the peer side can flip to misbehave.
#[derive(Default)]
pub struct Controls {
    /// Every write fails with a transport error.
    pub fail_writes: AtomicBool,
    /// Writes never become ready, so they can only end by timing out.
    pub stall_writes: AtomicBool,
    /// Closing the write half fails with a transport error.
    pub fail_close: AtomicBool,
}

/// Server half, handed to `Connection::new`.
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<Message, MockError>>,
    outbound: mpsc::UnboundedSender<Message>,
    controls: Arc<Controls>,
}

/// Test-driven peer: feeds frames in and observes what the server wrote.
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Result<Message, MockError>>>,
    outbound: mpsc::UnboundedReceiver<Message>,
    pub controls: Arc<Controls>,
}

pub fn pair() -> (MockTransport, MockPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let controls = Arc::new(Controls::default());

    let transport = MockTransport {
        inbound: in_rx,
        outbound: out_tx,
        controls: Arc::clone(&controls),
    };
    let peer = MockPeer {
        inbound: Some(in_tx),
        outbound: out_rx,
        controls,
    };
    (transport, peer)
}

impl MockPeer {
    pub fn send(&self, message: Message) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(message));
        }
    }

    pub fn send_error(&self, error: &'static str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(MockError(error)));
        }
    }

    /// Drop the inbound side so the server's stream ends.
    pub fn sever(&mut self) {
        self.inbound = None;
    }

    /// Everything the server has written so far.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            out.push(message);
        }
        out
    }

    /// Next frame written by the server, `None` once the server released
    /// the transport.
    pub async fn recv(&mut self) -> Option<Message> {
        self.outbound.recv().await
    }

    /// Next non-ping frame written by the server.
    pub async fn recv_data(&mut self) -> Option<Message> {
        loop {
            match self.outbound.recv().await? {
                Message::Ping(_) => continue,
                other => return Some(other),
            }
        }
    }
}

pub fn count_pings(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, Message::Ping(_)))
        .count()
}

impl Stream for MockTransport {
    type Item = Result<Message, MockError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx)
    }
}

impl Sink<Message> for MockTransport {
    type Error = MockError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.controls.stall_writes.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        if self.controls.fail_writes.load(Ordering::SeqCst) {
            return Err(MockError("write refused"));
        }
        self.outbound
            .send(item)
            .map_err(|_| MockError("peer dropped"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.controls.fail_close.load(Ordering::SeqCst) {
            return Poll::Ready(Err(MockError("close refused")));
        }
        Poll::Ready(Ok(()))
    }
}
