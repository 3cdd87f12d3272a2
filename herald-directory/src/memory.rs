//! In-memory directory backend.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use herald_common::PartyId;

use crate::{DirectoryError, Party, PartyDirectory, PartyKind};

/// In-memory party directory.
///
/// Stores parties and group memberships in `HashMap`s behind an `RwLock`.
/// Primarily intended for testing; also usable by embedders that load a
/// fixed roster at startup.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    parties: HashMap<PartyId, Party>,
    members: HashMap<PartyId, Vec<PartyId>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an individual party.
    #[must_use]
    pub fn with_individual(
        self,
        id: PartyId,
        name: impl Into<String>,
        email: Option<&str>,
    ) -> Self {
        self.insert(Party {
            id,
            name: name.into(),
            email: email.map(str::to_string),
            kind: PartyKind::Individual,
        });
        self
    }

    /// Register a group and its approved members.
    #[must_use]
    pub fn with_group(
        self,
        id: PartyId,
        name: impl Into<String>,
        email: Option<&str>,
        members: &[PartyId],
    ) -> Self {
        self.insert(Party {
            id,
            name: name.into(),
            email: email.map(str::to_string),
            kind: PartyKind::Group,
        });
        if let Ok(mut inner) = self.inner.write() {
            inner.members.insert(id, members.to_vec());
        }
        self
    }

    fn insert(&self, party: Party) {
        if let Ok(mut inner) = self.inner.write() {
            inner.parties.insert(party.id, party);
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, DirectoryError> {
        self.inner
            .read()
            .map_err(|e| DirectoryError::Backend(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl PartyDirectory for MemoryDirectory {
    async fn resolve(&self, id: PartyId) -> crate::Result<Party> {
        self.read()?
            .parties
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::UnknownParty(id))
    }

    async fn members_of(&self, group: PartyId) -> crate::Result<Vec<PartyId>> {
        Ok(self.read()?.members.get(&group).cloned().unwrap_or_default())
    }
}
