//! Liveness monitor: turns pongs into read deadline extensions.
//!
//! Not a task of its own. The handler runs inline on whichever task is
//! reading the connection, so the extension always lands before that task's
//! next wait on the stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::connection::Connection;

pub struct LivenessMonitor {
    ack_window: Duration,
    acks: AtomicU64,
}

impl LivenessMonitor {
    /// Register a monitor on `conn` as its acknowledgement handler.
    pub fn install(conn: &Connection, ack_window: Duration) -> Arc<Self> {
        let monitor = Arc::new(Self {
            ack_window,
            acks: AtomicU64::new(0),
        });

        let handler = Arc::clone(&monitor);
        conn.on_liveness_ack(move |conn| handler.on_ack(conn));
        monitor
    }

    fn on_ack(&self, conn: &Connection) {
        let count = self.acks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(count, "Received pong");
        conn.extend_read_deadline(self.ack_window);
    }

    pub fn acks_received(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::connection::DataFrame;
    use crate::liveness::testing::{pair, MockPeer};
    use axum::extract::ws::Message;
    use bytes::Bytes;
    use tokio::time::{self, Instant};

    const WINDOW: Duration = Duration::from_secs(3);

    fn monitored() -> (Arc<Connection>, Arc<LivenessMonitor>, MockPeer) {
        let (transport, peer) = pair();
        let conn = Arc::new(Connection::new(transport, Duration::from_secs(1)));
        conn.extend_read_deadline(WINDOW);
        let monitor = LivenessMonitor::install(&conn, WINDOW);
        (conn, monitor, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_sets_deadline_from_receipt_time() {
        let (conn, monitor, peer) = monitored();
        let initial = conn.read_deadline().unwrap();

        time::sleep(Duration::from_millis(1500)).await;
        let received_at = Instant::now();
        peer.send(Message::Pong(Bytes::new()));
        peer.send(Message::Text("marker".into()));

        let frame = conn.read_message().await.unwrap();
        assert_eq!(frame, DataFrame::text("marker"));
        assert_eq!(monitor.acks_received(), 1);

        let extended = conn.read_deadline().unwrap();
        assert_eq!(extended, received_at + WINDOW);
        assert!(extended > initial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_acks_beat_none() {
        let (conn, monitor, peer) = monitored();
        let without_acks = conn.read_deadline().unwrap();

        peer.send(Message::Pong(Bytes::new()));
        peer.send(Message::Text("first".into()));
        conn.read_message().await.unwrap();
        let after_first = conn.read_deadline().unwrap();

        time::sleep(WINDOW / 2).await;
        peer.send(Message::Pong(Bytes::new()));
        peer.send(Message::Text("second".into()));
        conn.read_message().await.unwrap();
        let after_second = conn.read_deadline().unwrap();

        assert_eq!(monitor.acks_received(), 2);
        assert!(after_first >= without_acks);
        assert!(after_second > after_first);
        assert!(after_second > without_acks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_acks_keep_session_readable() {
        let (conn, monitor, peer) = monitored();
        let start = Instant::now();

        let reader = Arc::clone(&conn);
        let read = tokio::spawn(async move { reader.read_message().await });

        // Acks every second hold a three second window open well past its
        // initial expiry.
        for _ in 0..6 {
            time::sleep(Duration::from_secs(1)).await;
            peer.send(Message::Pong(Bytes::new()));
        }
        time::sleep(Duration::from_secs(1)).await;
        peer.send(Message::Text("still here".into()));

        let frame = read.await.unwrap().unwrap();
        assert_eq!(frame, DataFrame::text("still here"));
        assert_eq!(monitor.acks_received(), 6);
        assert!(start.elapsed() >= Duration::from_secs(7));
    }
}
