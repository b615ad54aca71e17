//! Type-safe ID wrappers for protocol identifiers.
//!
//! These newtypes keep the relay's identifiers apart at compile time
//! (e.g., passing a ReceiveId where an EventId is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the relay assigns to one forwarded HTTP request.
///
/// Echoed back unchanged in the matching response so the relay can
/// correlate it; uniqueness is the relay's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        EventId(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        EventId(s.to_string())
    }
}

/// Public receive identifier issued by the relay during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiveId(pub String);

impl fmt::Display for ReceiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ReceiveId {
    fn from(s: String) -> Self {
        ReceiveId(s)
    }
}
