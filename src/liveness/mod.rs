//! Per-connection liveness protocol.
//!
//! One session per upgraded WebSocket:
//! - `Connection`: read/write/ping over the socket, with a read deadline
//! - `HeartbeatEmitter`: pings the peer every interval on its own task
//! - `LivenessMonitor`: pushes the read deadline out whenever a pong arrives
//! - `run_echo_loop`: writes every data frame straight back
//! - `Session`: wires the above together and tears them down
//!
//! A peer that stops answering pings is detected by the echo loop's read
//! timing out, never by the heartbeat task.

mod connection;
mod echo;
mod fault;
mod heartbeat;
mod monitor;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use fault::Fault;
pub use session::Session;
