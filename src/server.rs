//! HTTP server for the echo service.
//!
//! Serves the landing page on every path and upgrades `/ws` to a WebSocket.
//! Each upgrade becomes one `Session`, tracked in the session registry for
//! as long as it runs.

use crate::config::{Config, HeartbeatConfig, UpgradeConfig};
use crate::liveness::{Fault, Session};
use crate::registry::SessionRegistry;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeFile;
use tracing::{info, info_span, warn, Instrument};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// State shared by the request handlers.
#[derive(Clone)]
struct AppState {
    heartbeat: HeartbeatConfig,
    upgrade: UpgradeConfig,
    registry: Arc<SessionRegistry>,
}

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<SessionRegistry>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        Server { config, registry }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            heartbeat: self.config.heartbeat,
            upgrade: self.config.upgrade,
            registry: Arc::clone(&self.registry),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .fallback_service(ServeFile::new(&self.config.landing_page))
            .with_state(state)
    }

    /// Bind the configured listen address.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        TcpListener::from_std(create_listener(addr)?)
    }

    /// Start the server and serve until Ctrl-C.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = self.bind()?;
        info!(address = %listener.local_addr()?, "Server listening");

        let registry = Arc::clone(&self.registry);
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await?;

        if !registry.is_empty() {
            info!(remaining = registry.len(), "Sessions still open at shutdown");
        }
        Ok(())
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    }

    /// Get a reference to the session registry for testing
    #[cfg(test)]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// GET /ws: upgrade and run one session.
///
/// A failed handshake is logged and answered with the rejection; no
/// session, heartbeat or echo loop is started for it.
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let fault = Fault::UpgradeFailed(rejection.body_text());
            warn!(%peer, %fault, "Upgrade error");
            return rejection.into_response();
        }
    };

    let Some(guard) = state.registry.register(peer) else {
        warn!(
            %peer,
            capacity = state.registry.capacity(),
            "Session limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
    };

    let heartbeat = state.heartbeat;
    let limits = state.upgrade;
    let registry = Arc::clone(&state.registry);
    upgrade
        .max_message_size(limits.max_message_size)
        .max_frame_size(limits.max_frame_size)
        .write_buffer_size(limits.write_buffer_size)
        .on_failed_upgrade(move |error: axum::Error| {
            let fault = Fault::UpgradeFailed(error.to_string());
            warn!(%peer, %fault, "Upgrade error");
        })
        .on_upgrade(move |socket| {
            let span = info_span!("session", session_id = guard.id(), %peer);
            async move {
                info!(active = registry.len(), "Client connected");
                Session::new(socket, heartbeat).run().await;
                if let Some(session) = registry.get(guard.id()) {
                    info!(
                        remote = %session.peer,
                        connected_at = %session.started_at.to_rfc3339(),
                        "Client disconnected"
                    );
                }
                drop(guard);
            }
            .instrument(span)
        })
}

/// Create a TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
