//! Session ids
//!
//! A session is not tracked by the hub; its id is just the two participating
//! peer ids joined by `~`.

use switchboard_core::SESSION_SEPARATOR;

/// The two legs of a session id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLegs {
    pub a: String,
    pub b: String,
}

impl SessionLegs {
    /// Split `"A~B"`; anything without exactly one separator is rejected
    pub fn parse(session_id: &str) -> Option<Self> {
        let mut parts = session_id.split(SESSION_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) => Some(Self {
                a: a.to_string(),
                b: b.to_string(),
            }),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.a.as_str(), self.b.as_str()].into_iter()
    }
}
