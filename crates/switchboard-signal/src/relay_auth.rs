//! Relay authorization bridge
//!
//! The relay engine (a TURN server) is external. It holds a
//! [`RelayAuthHandler`] and asks it for the secret behind a username during
//! its own handshake; allocation, permissions, and channel binding stay on the
//! relay side.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::credentials::CredentialStore;

/// Username → secret callback consumed by a relay engine
pub trait RelayAuthHandler: Send + Sync {
    /// Return the secret for `username`, or `None` to deny
    fn authenticate(&self, username: &str, realm: &str, src_addr: SocketAddr) -> Option<String>;
}

/// Authorizes relay users against credentials issued by this hub
#[derive(Clone)]
pub struct CredentialAuthorizer {
    store: Arc<CredentialStore>,
}

impl CredentialAuthorizer {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }

    /// Realm the relay engine should advertise in its challenges
    pub fn realm(&self) -> &str {
        &self.store.relay().realm
    }
}

impl RelayAuthHandler for CredentialAuthorizer {
    fn authenticate(&self, username: &str, realm: &str, src_addr: SocketAddr) -> Option<String> {
        match self.store.lookup(username) {
            Some(record) => {
                info!(
                    "Relay auth: success for username={} realm={} from={}",
                    username, realm, src_addr
                );
                Some(record.secret)
            }
            None => {
                warn!(
                    "Relay auth: failed - username={} not found (from={})",
                    username, src_addr
                );
                None
            }
        }
    }
}
