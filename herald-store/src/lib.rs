//! Durable persistence for requests, per-recipient queue entries, and the
//! job singleton.
//!
//! The [`RequestStore`] trait is the seam between the dispatch core and
//! whatever transactional row store backs it. Any backend with atomic
//! writes and ordered reads fits; the bundled [`MemoryStore`] serves tests
//! and embedding.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod memory;
pub mod model;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{PartyId, RequestId};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use model::{
    DEFAULT_MAX_RETRIES, DeliveryRow, JobRow, NewRequest, QueueEntry, ReconcileSummary, Request,
    RequestStatus,
};

/// Transactional persistence for the dispatch core.
///
/// Mutating operations that the dispatcher may race against a concurrent
/// run or a cancel (`complete_entry`, `fail_entry`) are guarded: they
/// re-check the row's eligibility under the lock and report whether they
/// applied. The set-based operations (`mark_pending_sending`,
/// `fold_connection_failure`, `reconcile`) are single atomic updates over
/// the matching rows.
///
/// The job singleton always exists and can only be updated; there are
/// deliberately no insert or delete operations for it.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new request with a fresh id from the monotonic allocator.
    /// Atomic: on failure nothing is persisted.
    async fn insert_request(&self, new: NewRequest) -> Result<RequestId>;

    /// Fetch one request.
    async fn request(&self, id: RequestId) -> Result<Request>;

    /// All requests currently in the given status, in id order.
    async fn requests_with_status(&self, status: RequestStatus) -> Result<Vec<Request>>;

    /// Whether any request is `Pending` or `Sending`.
    async fn has_active_requests(&self) -> Result<bool>;

    /// The message body of a request, as a shared handle. The dispatcher
    /// consumes it as a chunked write; the `Request` row never carries it.
    async fn message_body(&self, id: RequestId) -> Result<Arc<str>>;

    /// Insert freshly expanded queue entries.
    async fn insert_entries(&self, entries: Vec<QueueEntry>) -> Result<()>;

    /// All queue entries of a request, in recipient order.
    async fn entries_for(&self, id: RequestId) -> Result<Vec<QueueEntry>>;

    /// Move every `Pending` request to `Sending` in one set operation.
    /// Returns how many moved.
    async fn mark_pending_sending(&self) -> Result<usize>;

    /// The ordered delivery scan: entries that are unsuccessful, within
    /// their retry budget, and owned by a `Sending` request, joined with
    /// the request envelope and sorted by `(party_from, party_to)`.
    async fn deliverable_rows(&self) -> Result<Vec<DeliveryRow>>;

    /// Mark an entry delivered. Guarded; returns `false` when the entry
    /// was no longer eligible (already delivered, exhausted, or the
    /// request left `Sending`).
    async fn complete_entry(&self, request: RequestId, recipient: PartyId) -> Result<bool>;

    /// Record a failed attempt on an entry: increment `retry_count` and
    /// store the last reply. Guarded like [`Self::complete_entry`].
    async fn fail_entry(
        &self,
        request: RequestId,
        recipient: PartyId,
        reply_code: Option<u16>,
        reply_message: &str,
    ) -> Result<bool>;

    /// Connection-wide failure fold: every entry of a `Sending` request
    /// that is still within its retry budget takes one retry increment and
    /// records the failing reply. Returns how many entries were folded.
    async fn fold_connection_failure(
        &self,
        reply_code: Option<u16>,
        reply_message: &str,
    ) -> Result<usize>;

    /// Cancel a request: force every queue entry to the non-retryable
    /// shape (`is_successful = false`, `retry_count = max_retries + 1`),
    /// then set the request `Cancelled` unless it is already terminal.
    /// Idempotent.
    async fn cancel_request(&self, id: RequestId) -> Result<()>;

    /// Delete a request, its body, and (by cascade) its queue entries.
    async fn delete_request(&self, id: RequestId) -> Result<()>;

    /// Set-based status reconciliation over all `Sending` requests, as of
    /// `now`. Idempotent; the three target sets are disjoint.
    async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileSummary>;

    /// Read the job singleton.
    async fn job(&self) -> Result<JobRow>;

    /// Replace the scheduler handle stored in the job singleton.
    async fn update_job_id(&self, job_id: Option<String>) -> Result<()>;

    /// Clear the singleton's `last_run_date`.
    async fn clear_last_run(&self) -> Result<()>;

    /// Stamp the singleton's `last_run_date`.
    async fn touch_last_run(&self, at: DateTime<Utc>) -> Result<()>;
}
