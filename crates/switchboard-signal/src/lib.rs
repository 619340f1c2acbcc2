//! Switchboard Signal Server
//!
//! WebRTC signaling hub: peers register over a WebSocket, discover each
//! other, and exchange session negotiation messages through the hub. The same
//! port also hands out short-lived relay (TURN) credentials over plain HTTP.
//!
//! # Protocol
//!
//! 1. Peer connects to `/ws` and sends `new` with its id
//! 2. Hub pushes the full peer list to every connected peer
//! 3. `offer` / `answer` / `candidate` are forwarded verbatim to `data.to`
//! 4. `bye` with session id `a~b` notifies both legs
//! 5. On disconnect the hub broadcasts `leave` and a fresh peer list
//!
//! Liveness is kept by a ping every 5 seconds plus a `keepalive` text frame;
//! a peer that fails to answer a ping within the pong wait is dropped.

pub mod connection;
pub mod credentials;
pub mod http;
pub mod messages;
pub mod registry;
pub mod relay_auth;
pub mod server;
pub mod session;
pub mod signaler;

pub use connection::{ConnectionEvent, EventReceiver, HeartbeatConfig, HeartbeatConnection};
pub use credentials::{CredentialRecord, CredentialStore, SweeperHandle};
pub use messages::{Method, PeerInfo, Push, Request};
pub use relay_auth::{CredentialAuthorizer, RelayAuthHandler};
pub use server::SignalServer;
pub use signaler::Signaler;

/// WebSocket upgrade path
pub const WS_PATH: &str = "/ws";

/// Relay credential endpoint
pub const CREDENTIALS_PATH: &str = "/api/turn";
