//! Echo loop: the session's main task.

use tracing::{debug, trace, warn};

use super::connection::Connection;
use super::fault::Fault;

/// How the echo loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoOutcome {
    /// Frames read and written back before the fault.
    pub echoed: u64,
    /// The fault that ended the loop. There is no other way out.
    pub fault: Fault,
}

/// Read frames and write each one back unchanged until a read or write
/// fails. Nothing is retried.
pub async fn run_echo_loop(conn: &Connection) -> EchoOutcome {
    let mut echoed = 0;

    loop {
        let frame = match conn.read_message().await {
            Ok(frame) => frame,
            Err(fault) => {
                warn!(%fault, echoed, "Read error");
                return EchoOutcome { echoed, fault };
            }
        };

        debug!(kind = ?frame.kind, len = frame.payload.len(), "Received message");
        trace!(payload = %String::from_utf8_lossy(&frame.payload), "Message payload");

        if let Err(fault) = conn.write_message(frame).await {
            warn!(%fault, echoed, "Write error");
            return EchoOutcome { echoed, fault };
        }
        echoed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::fault::{ReadFault, WriteFault};
    use crate::liveness::testing::pair;
    use axum::extract::ws::Message;
    use bytes::Bytes;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_echoes_in_order_until_peer_leaves() {
        let (transport, mut peer) = pair();
        let conn = Connection::new(transport, Duration::from_secs(1));

        peer.send(Message::Text("ping".into()));
        peer.send(Message::Binary(Bytes::from_static(&[0xDE, 0xAD])));
        peer.send(Message::Text("".into()));
        peer.send(Message::Text("last".into()));
        peer.sever();

        let outcome = run_echo_loop(&conn).await;
        assert_eq!(outcome.echoed, 4);
        assert_eq!(outcome.fault, Fault::Read(ReadFault::PeerClosed));

        let written = peer.drain();
        assert_eq!(written.len(), 4);
        assert!(matches!(&written[0], Message::Text(t) if t.as_str() == "ping"));
        assert!(matches!(&written[1], Message::Binary(b) if b[..] == [0xDE, 0xAD]));
        assert!(matches!(&written[2], Message::Text(t) if t.as_str().is_empty()));
        assert!(matches!(&written[3], Message::Text(t) if t.as_str() == "last"));
    }

    #[tokio::test]
    async fn test_write_fault_ends_loop() {
        let (transport, mut peer) = pair();
        let conn = Connection::new(transport, Duration::from_secs(1));
        peer.controls.fail_writes.store(true, Ordering::SeqCst);

        peer.send(Message::Text("one".into()));
        peer.send(Message::Text("two".into()));

        let outcome = run_echo_loop(&conn).await;
        assert_eq!(outcome.echoed, 0);
        assert!(matches!(outcome.fault, Fault::Write(WriteFault::Transport(_))));
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_first_read_fault() {
        let (transport, peer) = pair();
        let conn = Connection::new(transport, Duration::from_secs(1));
        peer.send_error("reset by peer");

        let outcome = run_echo_loop(&conn).await;
        assert_eq!(outcome.echoed, 0);
        assert!(outcome.fault.is_disconnect());
    }
}
