//! Ephemeral relay credential store
//!
//! Issued credentials live in memory only, keyed by token, each with an
//! absolute expiry. Expiry is enforced at lookup time; the periodic sweep
//! only bounds memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use switchboard_core::crypto::{credential_username, sign_credential};
use switchboard_core::{RelayConfig, MAX_CREDENTIAL_TTL_SECS};

/// A time-bound relay credential, serialized in the TURN REST response shape
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(rename = "username")]
    pub token: String,
    #[serde(rename = "password")]
    pub secret: String,
    #[serde(rename = "ttl")]
    pub ttl_secs: u64,
    #[serde(rename = "uris")]
    pub relay_uris: Vec<String>,
}

struct Entry {
    record: CredentialRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Periodic sweep task; aborted when dropped
pub struct SweeperHandle(JoinHandle<()>);

impl SweeperHandle {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Token → credential map with per-entry expiry
pub struct CredentialStore {
    entries: DashMap<String, Entry>,
    relay: RelayConfig,
}

impl CredentialStore {
    pub fn new(relay: RelayConfig) -> Self {
        Self {
            entries: DashMap::new(),
            relay,
        }
    }

    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    /// Issue a credential for `seed`, valid for `ttl_secs`
    pub fn issue(&self, seed: &str, ttl_secs: u64) -> CredentialRecord {
        self.issue_at(Utc::now().timestamp(), seed, ttl_secs)
    }

    /// Issue a credential stamped with an explicit unix timestamp
    ///
    /// `ttl_secs` is capped at [`MAX_CREDENTIAL_TTL_SECS`].
    pub fn issue_at(&self, timestamp: i64, seed: &str, ttl_secs: u64) -> CredentialRecord {
        let ttl_secs = ttl_secs.min(MAX_CREDENTIAL_TTL_SECS);
        let token = credential_username(timestamp, seed);
        let record = CredentialRecord {
            secret: sign_credential(self.relay.shared_key.as_bytes(), &token),
            token: token.clone(),
            ttl_secs,
            relay_uris: self.relay.uris(),
        };

        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries.insert(
            token.clone(),
            Entry {
                record: record.clone(),
                expires_at,
            },
        );

        debug!("Issued relay credential {} (ttl {}s)", token, ttl_secs);
        record
    }

    /// Find an unexpired credential
    ///
    /// Expired and unknown tokens look the same to the caller.
    pub fn lookup(&self, token: &str) -> Option<CredentialRecord> {
        let now = Instant::now();
        let entry = self.entries.get(token)?;
        if !entry.is_expired(now) {
            return Some(entry.record.clone());
        }

        drop(entry);
        self.entries.remove_if(token, |_, e| e.is_expired(now));
        None
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start the periodic sweep task; it stops when the handle is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let store = Arc::clone(self);
        SweeperHandle(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = store.purge_expired();
                if removed > 0 {
                    info!("Swept {} expired relay credentials", removed);
                }
            }
        }))
    }
}
