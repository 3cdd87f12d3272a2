//! Persistent entities: requests, per-recipient queue entries, and the
//! job singleton.

use chrono::{DateTime, Utc};
use herald_common::{PartyId, RequestId};
use serde::{Deserialize, Serialize};

/// Default retry budget for a new request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Request-level status, rolled up from per-recipient outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Posted, not yet expanded into queue entries.
    Pending,
    /// Expanded; at least one recipient still retryable or untried.
    Sending,
    /// Every recipient delivered.
    Sent,
    /// Some recipients delivered, the rest exhausted their retries.
    PartialFailure,
    /// Every recipient exhausted its retries without a delivery.
    Failed,
    /// Explicitly cancelled by the caller.
    Cancelled,
}

impl RequestStatus {
    /// Terminal states are never left again (cancel included).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Sent | Self::PartialFailure | Self::Failed | Self::Cancelled
        )
    }
}

/// A caller-submitted notification order.
///
/// The message body is deliberately not a field here: it is large,
/// unbounded text held behind the store boundary and fetched by handle
/// when a delivery actually needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub party_from: PartyId,
    pub party_to: PartyId,
    pub expand_group: bool,
    pub subject: String,
    pub request_date: DateTime<Utc>,
    pub fulfill_date: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    pub max_retries: u32,
}

/// Input to [`crate::RequestStore::insert_request`].
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub party_from: PartyId,
    pub party_to: PartyId,
    pub expand_group: bool,
    pub subject: String,
    pub message: String,
    pub max_retries: u32,
}

impl NewRequest {
    /// A new request with the default retry budget.
    #[must_use]
    pub fn new(
        party_from: PartyId,
        party_to: PartyId,
        expand_group: bool,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            party_from,
            party_to,
            expand_group,
            subject: subject.into(),
            message: message.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// One recipient's delivery slot for a request; the unit of retry.
///
/// Keyed by `(request_id, party_to)` and cascade-deleted with the owning
/// request. `retry_count` only ever moves on a failed attempt; a
/// successful entry is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request_id: RequestId,
    pub party_to: PartyId,
    pub smtp_reply_code: Option<u16>,
    pub smtp_reply_message: Option<String>,
    pub retry_count: u32,
    pub is_successful: bool,
}

impl QueueEntry {
    /// A fresh, untried entry.
    #[must_use]
    pub const fn new(request_id: RequestId, party_to: PartyId) -> Self {
        Self {
            request_id,
            party_to,
            smtp_reply_code: None,
            smtp_reply_message: None,
            retry_count: 0,
            is_successful: false,
        }
    }

    /// Still eligible for a delivery attempt under the given budget.
    #[must_use]
    pub const fn is_retryable(&self, max_retries: u32) -> bool {
        !self.is_successful && self.retry_count < max_retries
    }

    /// Undelivered with the retry budget spent.
    #[must_use]
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        !self.is_successful && self.retry_count >= max_retries
    }
}

/// The process-wide scheduler handle. Exactly one row exists; the store
/// only ever updates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRow {
    pub job_id: Option<String>,
    pub last_run_date: Option<DateTime<Utc>>,
}

/// One row of the dispatcher's ordered delivery scan: a retryable queue
/// entry joined with its owning request's envelope fields.
///
/// Rows arrive sorted by `(party_from, party_to)` so entries sharing a
/// sender and recipient are contiguous, which is what makes DATA-section
/// coalescing a simple boundary check.
#[derive(Debug, Clone)]
pub struct DeliveryRow {
    pub request_id: RequestId,
    pub party_from: PartyId,
    pub party_to: PartyId,
    pub subject: String,
    pub request_date: DateTime<Utc>,
}

/// Counts of requests moved by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub sent: usize,
    pub failed: usize,
    pub partial: usize,
}

impl ReconcileSummary {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.sent + self.failed + self.partial
    }
}
