//! Signal protocol messages
//!
//! Every frame is a JSON envelope `{"type": ..., "data": ...}`. Inbound
//! frames are parsed in two steps: the envelope first, then `data` according
//! to the method. Negotiation frames are forwarded verbatim, so only the
//! routing fields are ever extracted from them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request methods a peer may send
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Register under a caller-chosen id
    New,
    /// Tear down a session
    Bye,
    Offer,
    Answer,
    Candidate,
    /// Reserved; peers leave by disconnecting
    Leave,
    Keepalive,
    #[serde(other)]
    Unknown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::New => "new",
            Method::Bye => "bye",
            Method::Offer => "offer",
            Method::Answer => "answer",
            Method::Candidate => "candidate",
            Method::Leave => "leave",
            Method::Keepalive => "keepalive",
            Method::Unknown => "unknown",
        }
    }
}

/// Inbound envelope
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub method: Method,
    #[serde(default)]
    pub data: Value,
}

impl Request {
    /// Parse an inbound frame
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Decode the payload into a method-specific shape
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Public identity of a registered peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
    pub user_agent: String,
}

/// Routing fields of an offer, answer, or candidate
#[derive(Clone, Debug, Deserialize)]
pub struct Negotiation {
    #[serde(default)]
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub session_id: String,
}

/// Session teardown request
#[derive(Clone, Debug, Deserialize)]
pub struct Bye {
    pub session_id: String,
    #[serde(default)]
    pub from: String,
}

/// Teardown notice delivered to each leg of a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByeNotice {
    pub to: String,
    pub session_id: String,
}

/// Failure report sent back to the requesting peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub request: String,
    pub reason: String,
}

/// Messages the hub pushes to peers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Push {
    /// Full list of registered peers
    Peers(Vec<PeerInfo>),
    /// A peer disconnected
    Leave(String),
    Bye(ByeNotice),
    Error(ErrorReport),
}

impl Push {
    /// Create an error report for a failed request
    pub fn error(method: Method, reason: impl Into<String>) -> Self {
        Push::Error(ErrorReport {
            request: method.as_str().into(),
            reason: reason.into(),
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
