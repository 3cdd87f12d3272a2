//! Identifier newtypes shared across the workspace.

use serde::{Deserialize, Serialize};

/// Identifier of a party (an individual or a group) in the directory.
///
/// Parties are owned by the external directory; herald only ever passes
/// these around and uses them as queue keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyId(pub i64);

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a notification request.
///
/// Allocated by the store from a monotonic sequence starting at 1000, so
/// ids double as a creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
