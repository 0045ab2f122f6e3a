//! Session lifecycle for one upgraded connection.
//!
//! Setup arms the read deadline, installs the liveness monitor and starts
//! the heartbeat. The echo loop then runs for the session's lifetime.
//! Teardown stops the heartbeat, waits for it, and releases the connection,
//! in that order and exactly once.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::{BoxError, Connection};
use super::echo::run_echo_loop;
use super::fault::Fault;
use super::heartbeat::HeartbeatEmitter;
use super::monitor::LivenessMonitor;
use crate::config::HeartbeatConfig;

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub echoed: u64,
    pub probes_sent: u64,
    pub probe_failures: u64,
    pub acks_received: u64,
    /// The fault that ended the echo loop.
    pub fault: Fault,
    pub duration: Duration,
}

pub struct Session {
    conn: Arc<Connection>,
    config: HeartbeatConfig,
}

impl Session {
    pub fn new<S, E>(transport: S, config: HeartbeatConfig) -> Self
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            conn: Arc::new(Connection::new(transport, config.write_timeout)),
            config,
        }
    }

    /// Run the session to completion.
    pub async fn run(self) -> SessionReport {
        let Session { conn, config } = self;
        let started = Instant::now();

        conn.extend_read_deadline(config.ack_window);
        let monitor = LivenessMonitor::install(&conn, config.ack_window);
        let heartbeat = HeartbeatEmitter::new(config.interval, config.probe_timeout)
            .start(Arc::clone(&conn), CancellationToken::new());
        debug!(
            interval_ms = config.interval.as_millis() as u64,
            ack_window_ms = config.ack_window.as_millis() as u64,
            heartbeat = ?heartbeat.state(),
            "Session started"
        );

        let outcome = run_echo_loop(&conn).await;

        let heartbeat = heartbeat.stop().await;
        debug!(ticks = heartbeat.ticks, "Heartbeat stopped");
        if let Err(fault) = conn.close().await {
            debug!(%fault, "Connection already released");
        }

        let report = SessionReport {
            echoed: outcome.echoed,
            probes_sent: heartbeat.probes_sent,
            probe_failures: heartbeat.probe_failures,
            acks_received: monitor.acks_received(),
            fault: outcome.fault,
            duration: started.elapsed(),
        };
        info!(
            echoed = report.echoed,
            probes_sent = report.probes_sent,
            probe_failures = report.probe_failures,
            acks_received = report.acks_received,
            duration_ms = report.duration.as_millis() as u64,
            fault = %report.fault,
            disconnected = report.fault.is_disconnect(),
            "Session ended"
        );
        report
    }
}
