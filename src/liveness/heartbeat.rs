//! Heartbeat emitter: periodic ping frames on a shared connection.
//!
//! The emitter only probes. Deciding that the peer is gone is left to the
//! echo loop's read deadline, so a failed probe is logged and counted but
//! never ends the loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};

use super::connection::Connection;

/// Lifecycle of an emitter. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Running,
    Stopped,
}

impl HeartbeatState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HeartbeatState::Idle,
            1 => HeartbeatState::Running,
            _ => HeartbeatState::Stopped,
        }
    }
}

/// What the emitter did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub ticks: u64,
    pub probes_sent: u64,
    pub probe_failures: u64,
}

pub struct HeartbeatEmitter {
    interval: Duration,
    probe_timeout: Duration,
    state: Arc<AtomicU8>,
}

impl HeartbeatEmitter {
    pub fn new(interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            interval,
            probe_timeout,
            state: Arc::new(AtomicU8::new(HeartbeatState::Idle as u8)),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> HeartbeatState {
        HeartbeatState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spawn the probe loop. The first probe goes out one full interval
    /// after start; the loop ends once `cancel` fires.
    pub fn start(self, conn: Arc<Connection>, cancel: CancellationToken) -> HeartbeatHandle {
        self.state.store(HeartbeatState::Running as u8, Ordering::Release);

        let task = tokio::spawn(
            run_heartbeat(
                conn,
                self.interval,
                self.probe_timeout,
                cancel.clone(),
                Arc::clone(&self.state),
            )
            .instrument(Span::current()),
        );

        HeartbeatHandle {
            state: self.state,
            cancel,
            task,
        }
    }
}

/// Handle to a running emitter.
pub struct HeartbeatHandle {
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    task: JoinHandle<HeartbeatReport>,
}

impl HeartbeatHandle {
    pub fn state(&self) -> HeartbeatState {
        HeartbeatState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Fire the cancellation signal and wait for the loop to return.
    ///
    /// Waits at most for one in-flight probe, which is itself bounded by the
    /// probe timeout.
    pub async fn stop(self) -> HeartbeatReport {
        self.cancel.cancel();
        let report = match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Heartbeat task failed");
                HeartbeatReport::default()
            }
        };
        self.state.store(HeartbeatState::Stopped as u8, Ordering::Release);
        report
    }
}

async fn run_heartbeat(
    conn: Arc<Connection>,
    interval: Duration,
    probe_timeout: Duration,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
) -> HeartbeatReport {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = HeartbeatReport::default();

    loop {
        tokio::select! {
            // Cancellation wins over a tick that is ready at the same time.
            biased;

            () = cancel.cancelled() => {
                debug!("Stopping ping routine");
                break;
            }
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    debug!("Stopping ping routine");
                    break;
                }
                report.ticks += 1;
                debug!(tick = report.ticks, "Sending ping");
                match conn.send_liveness_probe(probe_timeout).await {
                    Ok(()) => report.probes_sent += 1,
                    Err(fault) => {
                        report.probe_failures += 1;
                        warn!(%fault, "Ping error");
                    }
                }
            }
        }
    }

    state.store(HeartbeatState::Stopped as u8, Ordering::Release);
    report
}
