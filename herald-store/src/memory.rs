//! In-memory store backend.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{PartyId, RequestId};

use crate::{
    RequestStore, StoreError,
    model::{DeliveryRow, JobRow, NewRequest, QueueEntry, ReconcileSummary, Request, RequestStatus},
};

/// First id handed out by the allocator.
const FIRST_REQUEST_ID: i64 = 1000;

/// In-memory request store.
///
/// Rows live in `BTreeMap`s behind an `RwLock`, so scans come back in key
/// order without extra bookkeeping and every mutating method is one
/// critical section (the trait's atomicity contract). Primarily intended
/// for testing and single-process embedding; production deployments
/// implement [`RequestStore`] over a real transactional row store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug)]
struct Inner {
    next_request_id: i64,
    requests: BTreeMap<RequestId, Request>,
    bodies: HashMap<RequestId, Arc<str>>,
    entries: BTreeMap<(RequestId, PartyId), QueueEntry>,
    job: JobRow,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            next_request_id: FIRST_REQUEST_ID,
            requests: BTreeMap::new(),
            bodies: HashMap::new(),
            entries: BTreeMap::new(),
            // The singleton exists from the first moment; it is never
            // inserted or deleted, only updated.
            job: JobRow::default(),
        }
    }
}

impl Inner {
    fn request(&self, id: RequestId) -> Result<&Request, StoreError> {
        self.requests.get(&id).ok_or(StoreError::RequestNotFound(id))
    }

    /// Eligibility guard shared by the row-scoped updates: the entry is
    /// undelivered, within budget, and its request is still `Sending`.
    fn entry_eligible(&self, request: RequestId, recipient: PartyId) -> bool {
        let Some(req) = self.requests.get(&request) else {
            return false;
        };
        let Some(entry) = self.entries.get(&(request, recipient)) else {
            return false;
        };
        req.status == RequestStatus::Sending && entry.is_retryable(req.max_retries)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert_request(&self, new: NewRequest) -> crate::Result<RequestId> {
        let mut inner = self.inner.write()?;

        let id = RequestId(inner.next_request_id);
        inner.next_request_id += 1;

        inner.bodies.insert(id, Arc::from(new.message.as_str()));
        inner.requests.insert(
            id,
            Request {
                request_id: id,
                party_from: new.party_from,
                party_to: new.party_to,
                expand_group: new.expand_group,
                subject: new.subject,
                request_date: Utc::now(),
                fulfill_date: None,
                status: RequestStatus::Pending,
                max_retries: new.max_retries,
            },
        );

        Ok(id)
    }

    async fn request(&self, id: RequestId) -> crate::Result<Request> {
        Ok(self.inner.read()?.request(id)?.clone())
    }

    async fn requests_with_status(&self, status: RequestStatus) -> crate::Result<Vec<Request>> {
        Ok(self
            .inner
            .read()?
            .requests
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn has_active_requests(&self) -> crate::Result<bool> {
        Ok(self.inner.read()?.requests.values().any(|r| {
            matches!(r.status, RequestStatus::Pending | RequestStatus::Sending)
        }))
    }

    async fn message_body(&self, id: RequestId) -> crate::Result<Arc<str>> {
        self.inner
            .read()?
            .bodies
            .get(&id)
            .cloned()
            .ok_or(StoreError::RequestNotFound(id))
    }

    async fn insert_entries(&self, entries: Vec<QueueEntry>) -> crate::Result<()> {
        let mut inner = self.inner.write()?;
        for entry in entries {
            inner
                .entries
                .insert((entry.request_id, entry.party_to), entry);
        }
        Ok(())
    }

    async fn entries_for(&self, id: RequestId) -> crate::Result<Vec<QueueEntry>> {
        Ok(self
            .inner
            .read()?
            .entries
            .range((id, PartyId(i64::MIN))..=(id, PartyId(i64::MAX)))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn mark_pending_sending(&self) -> crate::Result<usize> {
        let mut inner = self.inner.write()?;
        let mut moved = 0;
        for request in inner.requests.values_mut() {
            if request.status == RequestStatus::Pending {
                request.status = RequestStatus::Sending;
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn deliverable_rows(&self) -> crate::Result<Vec<DeliveryRow>> {
        let inner = self.inner.read()?;

        let mut rows: Vec<DeliveryRow> = inner
            .entries
            .values()
            .filter_map(|entry| {
                let request = inner.requests.get(&entry.request_id)?;
                (request.status == RequestStatus::Sending
                    && entry.is_retryable(request.max_retries))
                .then(|| DeliveryRow {
                    request_id: request.request_id,
                    party_from: request.party_from,
                    party_to: entry.party_to,
                    subject: request.subject.clone(),
                    request_date: request.request_date,
                })
            })
            .collect();

        // Contiguous (sender, recipient) runs are what make coalescing work.
        rows.sort_by_key(|row| (row.party_from, row.party_to, row.request_id));
        Ok(rows)
    }

    async fn complete_entry(&self, request: RequestId, recipient: PartyId) -> crate::Result<bool> {
        let mut inner = self.inner.write()?;
        if !inner.entry_eligible(request, recipient) {
            return Ok(false);
        }
        if let Some(entry) = inner.entries.get_mut(&(request, recipient)) {
            entry.is_successful = true;
        }
        Ok(true)
    }

    async fn fail_entry(
        &self,
        request: RequestId,
        recipient: PartyId,
        reply_code: Option<u16>,
        reply_message: &str,
    ) -> crate::Result<bool> {
        let mut inner = self.inner.write()?;
        if !inner.entry_eligible(request, recipient) {
            return Ok(false);
        }
        if let Some(entry) = inner.entries.get_mut(&(request, recipient)) {
            entry.retry_count += 1;
            entry.smtp_reply_code = reply_code;
            entry.smtp_reply_message = Some(reply_message.to_string());
        }
        Ok(true)
    }

    async fn fold_connection_failure(
        &self,
        reply_code: Option<u16>,
        reply_message: &str,
    ) -> crate::Result<usize> {
        let mut inner = self.inner.write()?;
        let Inner {
            requests, entries, ..
        } = &mut *inner;

        let mut folded = 0;
        for entry in entries.values_mut() {
            let Some(request) = requests.get(&entry.request_id) else {
                continue;
            };
            if request.status == RequestStatus::Sending && entry.is_retryable(request.max_retries) {
                entry.retry_count += 1;
                entry.smtp_reply_code = reply_code;
                entry.smtp_reply_message = Some(reply_message.to_string());
                folded += 1;
            }
        }
        Ok(folded)
    }

    async fn cancel_request(&self, id: RequestId) -> crate::Result<()> {
        let mut inner = self.inner.write()?;
        let request = inner.request(id)?;
        let max_retries = request.max_retries;
        let terminal = request.status.is_terminal();

        for entry in inner
            .entries
            .range_mut((id, PartyId(i64::MIN))..=(id, PartyId(i64::MAX)))
            .map(|(_, entry)| entry)
        {
            entry.is_successful = false;
            entry.retry_count = max_retries + 1;
        }

        if !terminal && let Some(request) = inner.requests.get_mut(&id) {
            request.status = RequestStatus::Cancelled;
        }
        Ok(())
    }

    async fn delete_request(&self, id: RequestId) -> crate::Result<()> {
        let mut inner = self.inner.write()?;
        inner
            .requests
            .remove(&id)
            .ok_or(StoreError::RequestNotFound(id))?;
        inner.bodies.remove(&id);
        inner.entries.retain(|(request_id, _), _| *request_id != id);
        Ok(())
    }

    async fn reconcile(&self, now: DateTime<Utc>) -> crate::Result<ReconcileSummary> {
        let mut inner = self.inner.write()?;
        let Inner {
            requests, entries, ..
        } = &mut *inner;

        let mut summary = ReconcileSummary::default();
        for request in requests.values_mut() {
            if request.status != RequestStatus::Sending {
                continue;
            }

            let id = request.request_id;
            let children = entries
                .range((id, PartyId(i64::MIN))..=(id, PartyId(i64::MAX)))
                .map(|(_, entry)| entry);

            let mut any_unsuccessful = false;
            let mut any_success = false;
            let mut any_retryable = false;
            let mut any_exhausted = false;
            for entry in children {
                any_unsuccessful |= !entry.is_successful;
                any_success |= entry.is_successful;
                any_retryable |= entry.is_retryable(request.max_retries);
                any_exhausted |= entry.is_exhausted(request.max_retries);
            }

            if !any_unsuccessful {
                request.status = RequestStatus::Sent;
                request.fulfill_date = Some(now);
                summary.sent += 1;
            } else if !any_success && !any_retryable {
                request.status = RequestStatus::Failed;
                summary.failed += 1;
            } else if any_success && any_exhausted && !any_retryable {
                request.status = RequestStatus::PartialFailure;
                request.fulfill_date = Some(now);
                summary.partial += 1;
            }
        }
        Ok(summary)
    }

    async fn job(&self) -> crate::Result<JobRow> {
        Ok(self.inner.read()?.job.clone())
    }

    async fn update_job_id(&self, job_id: Option<String>) -> crate::Result<()> {
        self.inner.write()?.job.job_id = job_id;
        Ok(())
    }

    async fn clear_last_run(&self) -> crate::Result<()> {
        self.inner.write()?.job.last_run_date = None;
        Ok(())
    }

    async fn touch_last_run(&self, at: DateTime<Utc>) -> crate::Result<()> {
        self.inner.write()?.job.last_run_date = Some(at);
        Ok(())
    }
}
