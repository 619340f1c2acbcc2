//! Signal server: one listener for the WebSocket hub and its HTTP endpoints

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use switchboard_core::{Config, ServerError};

use crate::connection::HeartbeatConfig;
use crate::credentials::CredentialStore;
use crate::http::{router, HubState};
use crate::relay_auth::CredentialAuthorizer;
use crate::signaler::Signaler;

/// Signal server state
#[derive(Clone)]
pub struct SignalServer {
    signaler: Arc<Signaler>,
    credentials: Arc<CredentialStore>,
    config: Config,
}

impl SignalServer {
    pub fn new(config: Config) -> Self {
        let credentials = Arc::new(CredentialStore::new(config.relay.clone()));
        Self {
            signaler: Arc::new(Signaler::new(credentials.clone())),
            credentials,
            config,
        }
    }

    pub fn signaler(&self) -> &Arc<Signaler> {
        &self.signaler
    }

    /// Auth callback to hand to the relay engine
    pub fn authorizer(&self) -> CredentialAuthorizer {
        CredentialAuthorizer::new(self.credentials.clone())
    }

    /// Address from the `[signal]` config section
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.signal.bind, self.config.signal.port)
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve on an already-bound listener
    ///
    /// The credential sweeper runs for exactly as long as this future.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Signal server listening on {}", listener.local_addr()?);

        let sweep = Duration::from_secs(self.config.relay.sweep_interval_secs.max(1));
        let _sweeper = self.credentials.spawn_sweeper(sweep);

        let app = router(HubState {
            signaler: self.signaler.clone(),
            heartbeat: HeartbeatConfig::from(&self.config.signal),
        });
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    /// Get peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.signaler.peer_count()
    }
}
