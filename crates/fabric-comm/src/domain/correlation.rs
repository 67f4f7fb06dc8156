//! Correlation ID linking a request to its eventual response.
//!
//! Uses random (v4) UUIDs: 122 bits of entropy, collisions are treated as
//! impossible for the lifetime of a tracker.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation identifier carried by a [`Request`](crate::Request) and
/// echoed back by its [`Response`](crate::Response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_ids_are_distinct() {
        let ids: HashSet<RequestId> = (0..1000).map(|_| RequestId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_decode_from_display_form() {
        let id = RequestId::new();
        let decoded: RequestId = serde_json::from_value(serde_json::json!(id.to_string())).unwrap();
        assert_eq!(id, decoded);
        assert!(serde_json::from_str::<RequestId>("\"not-a-uuid\"").is_err());
    }
}
