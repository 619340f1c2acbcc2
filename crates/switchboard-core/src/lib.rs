//! Switchboard Core - Shared configuration, error types, and credential crypto
//!
//! This crate contains the foundational pieces used by the signaling server.
//! It has no dependencies on networking code.

pub mod config;
pub mod crypto;
pub mod error;

pub use config::{Config, RelayConfig, SignalConfig};
pub use error::*;

/// Separator between the two peer ids of a session id (`alice~bob`)
pub const SESSION_SEPARATOR: char = '~';

/// Default lifetime of an issued relay credential (24 hours)
pub const DEFAULT_CREDENTIAL_TTL_SECS: u64 = 86_400;

/// Longest lifetime a credential can be issued with (30 days)
pub const MAX_CREDENTIAL_TTL_SECS: u64 = 30 * 86_400;

/// Ceiling for the ping period and write timeout (1 day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Ceiling for the pong wait multiplier
pub const MAX_PONG_WAIT_MULTIPLIER: u32 = 100;
