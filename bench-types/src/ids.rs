//! Identity types for netbench.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id attached to every test-case publication.
///
/// The orchestrator tags each handoff with a fresh id so that the relay's
/// completion reports can be matched to the publication they consumed.
/// UUID v4 format (16 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicationId(uuid::Uuid);

impl PublicationId {
    /// Create a new random PublicationId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for PublicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicationId({})", &self.0.as_simple().to_string()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publication_id_is_uuid_v4() {
        let id = PublicationId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn publication_ids_are_unique() {
        assert_ne!(PublicationId::new(), PublicationId::new());
    }

    #[test]
    fn debug_is_short() {
        let id = PublicationId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("PublicationId("));
        assert_eq!(debug.len(), "PublicationId()".len() + 8);
    }
}
