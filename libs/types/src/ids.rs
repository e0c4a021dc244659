//! Identifier types
//!
//! `UserId` is opaque and caller-supplied; it is only ever used as a
//! rate-limiting key. `ConnectionId` uses UUID v7 so connection logs sort
//! chronologically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller-supplied user identity
///
/// Never empty once it has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw identity. Emptiness is checked by pixel validation, not here.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for a downstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new ConnectionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_uniqueness() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_connection_id_time_sortable() {
        let first = ConnectionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ConnectionId::new();
        assert!(first < second);
    }

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let id = UserId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert!(!id.is_empty());
        assert!(UserId::new("").is_empty());
    }
}
