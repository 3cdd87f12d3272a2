//! Party directory seam.
//!
//! The directory is an external collaborator: given a party id it yields a
//! display name, an optional email, and whether the party is a group. For
//! groups it can enumerate the approved members. The dispatcher consumes
//! this trait; the in-memory implementation serves tests and embedding.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod memory;

use async_trait::async_trait;
use herald_common::PartyId;
use thiserror::Error;

pub use memory::MemoryDirectory;

/// Whether a party is a deliverable individual or an expandable group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyKind {
    Individual,
    Group,
}

/// A resolved party.
///
/// `email` is `None` for parties with no mailbox; the dispatcher filters
/// such recipients out of the delivery scan rather than failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    pub email: Option<String>,
    pub kind: PartyKind,
}

impl Party {
    pub const fn is_group(&self) -> bool {
        matches!(self.kind, PartyKind::Group)
    }
}

/// Errors surfaced by a directory backend.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The party id is not known to the directory.
    #[error("unknown party: {0}")]
    UnknownParty(PartyId),

    /// The backend failed (lock poisoning, remote lookup, etc.).
    #[error("directory backend error: {0}")]
    Backend(String),
}

/// Specialized `Result` type for directory lookups.
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Read-only party lookup.
///
/// Implementations must be side-effect free: resolving a party or listing
/// a group's members never mutates directory state.
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Resolve a party id to its name, optional email and kind.
    async fn resolve(&self, id: PartyId) -> Result<Party>;

    /// Enumerate the approved members of a group, as individual party ids.
    ///
    /// Returns an empty list for a group with no approved members and for
    /// individuals; the expander's outer-join handling covers both.
    async fn members_of(&self, group: PartyId) -> Result<Vec<PartyId>>;
}
