//! Expansion of pending requests into per-recipient queue entries.

use herald_directory::PartyDirectory;
use herald_store::{QueueEntry, RequestStatus, RequestStore};
use tracing::debug;

use crate::error::Result;

/// Turn every `Pending` request into queue entries, then move the whole
/// batch to `Sending` in one set operation.
///
/// Group membership is snapshotted here: whoever is approved at expansion
/// time gets an entry. A group-targeted request whose member enumeration
/// comes back empty still yields one entry addressed to the group party
/// itself (outer-join semantics); the delivery scan filters it out later
/// if that party has no mailbox. Once a request leaves `Pending` it is
/// never expanded again.
pub(crate) async fn expand_pending(
    store: &dyn RequestStore,
    directory: &dyn PartyDirectory,
) -> Result<usize> {
    let pending = store.requests_with_status(RequestStatus::Pending).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut inserted = 0;
    for request in &pending {
        let recipients = if request.expand_group {
            let members = directory.members_of(request.party_to).await?;
            if members.is_empty() {
                vec![request.party_to]
            } else {
                members
            }
        } else {
            vec![request.party_to]
        };

        let entries: Vec<QueueEntry> = recipients
            .into_iter()
            .map(|party_to| QueueEntry::new(request.request_id, party_to))
            .collect();

        debug!(
            request_id = %request.request_id,
            recipients = entries.len(),
            "expanded request"
        );
        inserted += entries.len();
        store.insert_entries(entries).await?;
    }

    let moved = store.mark_pending_sending().await?;
    debug!(requests = moved, entries = inserted, "expansion complete");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use herald_common::PartyId;
    use herald_directory::MemoryDirectory;
    use herald_store::{MemoryStore, NewRequest};

    use super::*;

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_individual(PartyId(10), "bob", Some("bob@b"))
            .with_individual(PartyId(40), "carol", Some("carol@c"))
            .with_individual(PartyId(50), "dave", Some("dave@d"))
            .with_group(PartyId(30), "ops", None, &[PartyId(40), PartyId(50)])
            .with_group(PartyId(31), "empty", None, &[])
    }

    #[tokio::test]
    async fn individual_requests_expand_to_one_entry() {
        let store = MemoryStore::new();
        let directory = directory();
        let id = store
            .insert_request(NewRequest::new(PartyId(10), PartyId(40), false, "s", "m"))
            .await
            .unwrap();

        let inserted = expand_pending(&store, &directory).await.unwrap();
        assert_eq!(inserted, 1);

        let entries = store.entries_for(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].party_to, PartyId(40));
        assert_eq!(
            store.request(id).await.unwrap().status,
            RequestStatus::Sending
        );
    }

    #[tokio::test]
    async fn group_requests_expand_per_member() {
        let store = MemoryStore::new();
        let directory = directory();
        let id = store
            .insert_request(NewRequest::new(PartyId(10), PartyId(30), true, "s", "m"))
            .await
            .unwrap();

        let inserted = expand_pending(&store, &directory).await.unwrap();
        assert_eq!(inserted, 2);

        let recipients: Vec<PartyId> = store
            .entries_for(id)
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.party_to)
            .collect();
        assert_eq!(recipients, vec![PartyId(40), PartyId(50)]);
    }

    #[tokio::test]
    async fn memberless_group_falls_back_to_the_group_itself() {
        let store = MemoryStore::new();
        let directory = directory();
        let id = store
            .insert_request(NewRequest::new(PartyId(10), PartyId(31), true, "s", "m"))
            .await
            .unwrap();

        expand_pending(&store, &directory).await.unwrap();

        let entries = store.entries_for(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].party_to, PartyId(31));
    }

    #[tokio::test]
    async fn expansion_is_not_reentrant() {
        let store = MemoryStore::new();
        let directory = directory();
        let id = store
            .insert_request(NewRequest::new(PartyId(10), PartyId(30), true, "s", "m"))
            .await
            .unwrap();

        assert_eq!(expand_pending(&store, &directory).await.unwrap(), 2);
        // The request is Sending now; a second pass finds nothing pending.
        assert_eq!(expand_pending(&store, &directory).await.unwrap(), 0);
        assert_eq!(store.entries_for(id).await.unwrap().len(), 2);
    }
}
