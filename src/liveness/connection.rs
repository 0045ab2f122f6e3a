//! Connection handle wrapping one WebSocket.
//!
//! The transport is split into a read half, only ever driven by the echo
//! loop, and a write half guarded by a single async mutex that both the
//! echo loop and the heartbeat emitter go through. Frames therefore never
//! interleave on the wire.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{sink, Sink, SinkExt, Stream, StreamExt};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use super::fault::{Fault, ReadFault, WriteFault};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type FrameStream = BoxStream<'static, Result<Message, BoxError>>;
type FrameSink = Pin<Box<dyn Sink<Message, Error = BoxError> + Send>>;
type AckHandler = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Type tag of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// An application payload plus its type tag. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl DataFrame {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: Bytes::from(text.into()),
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Binary,
            payload: payload.into(),
        }
    }

    fn into_message(self) -> Result<Message, WriteFault> {
        match self.kind {
            MessageKind::Text => {
                let text = String::from_utf8(self.payload.to_vec())
                    .map_err(|_| WriteFault::InvalidText)?;
                Ok(Message::Text(text.into()))
            }
            MessageKind::Binary => Ok(Message::Binary(self.payload)),
        }
    }
}

/// One bidirectional message channel with a read deadline.
pub struct Connection {
    reader: tokio::sync::Mutex<FrameStream>,
    writer: tokio::sync::Mutex<FrameSink>,
    /// Absolute deadline for the next frame; `None` means reads never time out.
    deadline: Mutex<Option<Instant>>,
    ack_handler: Mutex<Option<AckHandler>>,
    closed: AtomicBool,
    /// Bound on data writes, including the wait for the write path.
    write_timeout: Duration,
}

impl Connection {
    /// Wrap a WebSocket-like transport.
    pub fn new<S, E>(transport: S, write_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let (sink, stream) = transport.split();
        let stream = stream
            .map(|item| item.map_err(|e| -> BoxError { e.into() }))
            .boxed();
        let sink: FrameSink = Box::pin(BoxedErrors(sink));

        Self {
            reader: tokio::sync::Mutex::new(stream),
            writer: tokio::sync::Mutex::new(sink),
            deadline: Mutex::new(None),
            ack_handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            write_timeout,
        }
    }

    /// Block until a data frame arrives.
    ///
    /// Pong frames run the registered acknowledgement handler and are not
    /// returned. The deadline is re-read before every wait, so a handler
    /// that extends it also extends the read in progress.
    pub async fn read_message(&self) -> Result<DataFrame, Fault> {
        self.ensure_open()?;
        let mut reader = self.reader.lock().await;

        loop {
            let next = match self.read_deadline() {
                Some(deadline) => time::timeout_at(deadline, reader.next())
                    .await
                    .map_err(|_| ReadFault::DeadlineElapsed)?,
                None => reader.next().await,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ReadFault::Transport(e.to_string()).into()),
                None => return Err(ReadFault::PeerClosed.into()),
            };

            match message {
                Message::Text(text) => return Ok(DataFrame::text(text.as_str())),
                Message::Binary(data) => return Ok(DataFrame::binary(data)),
                Message::Pong(_) => self.handle_ack(),
                // The transport queues the pong reply itself.
                Message::Ping(_) => trace!("Peer ping"),
                Message::Close(frame) => {
                    debug!(?frame, "Peer sent close frame");
                    return Err(ReadFault::PeerClosed.into());
                }
            }
        }
    }

    /// Send a data frame, bounded by the connection's write timeout.
    pub async fn write_message(&self, frame: DataFrame) -> Result<(), Fault> {
        self.ensure_open()?;
        let message = frame.into_message()?;
        self.write(message, self.write_timeout).await
    }

    /// Send an empty ping, completing or failing within `timeout`.
    pub async fn send_liveness_probe(&self, timeout: Duration) -> Result<(), Fault> {
        self.ensure_open()?;
        self.write(Message::Ping(Bytes::new()), timeout).await
    }

    /// Set the read deadline to now + `duration`. Last write wins.
    pub fn extend_read_deadline(&self, duration: Duration) {
        *lock(&self.deadline) = Some(Instant::now() + duration);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        *lock(&self.deadline)
    }

    /// Register the handler run on every inbound pong, replacing any
    /// previous one. It runs on the reading task.
    pub fn on_liveness_ack<F>(&self, handler: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        *lock(&self.ack_handler) = Some(Arc::new(handler));
    }

    /// Release the transport.
    ///
    /// Sends a close frame within the write timeout, then drops both halves.
    /// Only the first call succeeds; every later call, and every other
    /// operation afterwards, returns `Fault::Closed`.
    pub async fn close(&self) -> Result<(), Fault> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Fault::Closed);
        }

        let shutdown = async {
            let mut writer = self.writer.lock().await;
            let result = writer.close().await;
            *writer = Box::pin(BoxedErrors(sink::drain::<Message>()));
            result
        };
        match time::timeout(self.write_timeout, shutdown).await {
            Ok(Ok(())) => trace!("Close frame sent"),
            Ok(Err(e)) => debug!(error = %e, "Close frame not sent"),
            Err(_) => debug!("Close frame timed out"),
        }

        // A reader still parked here keeps its half until it returns.
        if let Ok(mut reader) = self.reader.try_lock() {
            *reader = stream::empty().boxed();
        }
        lock(&self.ack_handler).take();

        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Fault> {
        if self.is_closed() {
            Err(Fault::Closed)
        } else {
            Ok(())
        }
    }

    fn handle_ack(&self) {
        // Cloned out so the handler may touch the connection freely.
        let handler = lock(&self.ack_handler).clone();
        if let Some(handler) = handler {
            handler(self);
        }
    }

    async fn write(&self, message: Message, timeout: Duration) -> Result<(), Fault> {
        let send = async {
            let mut writer = self.writer.lock().await;
            writer.send(message).await
        };

        match time::timeout(timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteFault::Transport(e.to_string()).into()),
            Err(_) => Err(WriteFault::TimedOut.into()),
        }
    }
}

/// Write half with every error boxed. Stays usable after an error.
struct BoxedErrors<S>(S);

impl<S> Sink<Message> for BoxedErrors<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Into<BoxError>,
{
    type Error = BoxError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), BoxError>> {
        Pin::new(&mut self.get_mut().0).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), BoxError> {
        Pin::new(&mut self.get_mut().0).start_send(item).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), BoxError>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), BoxError>> {
        Pin::new(&mut self.get_mut().0).poll_close(cx).map_err(Into::into)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
