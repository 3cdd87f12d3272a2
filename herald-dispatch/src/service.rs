//! The dispatch service: request intake, the periodic queue run, and
//! scheduler bookkeeping.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use herald_common::{PartyId, RequestId, internal};
use herald_directory::PartyDirectory;
use herald_smtp::SmtpConnection;
use herald_store::{NewRequest, ReconcileSummary, RequestStore};
use tracing::{debug, error, info, warn};

use crate::{
    config::DispatchConfig,
    deliver,
    error::{DispatchError, Result},
    expand,
    scheduler::JobScheduler,
};

/// Longest accepted subject, in characters.
const MAX_SUBJECT_CHARS: usize = 1000;

/// What one `process_queue` run did.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Queue entries created by expansion.
    pub expanded: usize,
    /// Entries delivered this run.
    pub delivered: usize,
    /// Entries that took a per-row failure this run.
    pub failed: usize,
    /// Entries skipped because the recipient has no mailbox.
    pub skipped: usize,
    /// Entries folded forward by a connection-wide failure.
    pub folded: usize,
    /// Requests moved to a terminal status by reconciliation.
    pub reconciled: ReconcileSummary,
}

/// The notification dispatch service.
///
/// Producers call [`Self::post_request`] and [`Self::cancel_request`]
/// concurrently; the scheduler (or an embedder) drives
/// [`Self::process_queue`] periodically. Cloning is cheap and clones share
/// all state.
#[derive(Clone)]
pub struct DispatchService {
    store: Arc<dyn RequestStore>,
    directory: Arc<dyn PartyDirectory>,
    scheduler: JobScheduler,
    config: DispatchConfig,
    /// Serializes whole queue runs. Guarded row updates keep overlapping
    /// runs correct even without it; holding it just avoids the wasted
    /// work.
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl DispatchService {
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        directory: Arc<dyn PartyDirectory>,
        config: DispatchConfig,
    ) -> Self {
        internal!("Initialising dispatch service ...");
        Self {
            store,
            directory,
            scheduler: JobScheduler::new(),
            config,
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// A request template carrying the configured default retry budget.
    #[must_use]
    pub fn new_request(
        &self,
        party_from: PartyId,
        party_to: PartyId,
        expand_group: bool,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> NewRequest {
        NewRequest::new(party_from, party_to, expand_group, subject, message)
            .with_max_retries(self.config.default_max_retries)
    }

    /// Post a notification request. Validates, allocates an id, persists
    /// the row as `Pending` atomically, and returns the id.
    ///
    /// # Errors
    ///
    /// `Validation` when the subject exceeds 1000 characters (nothing is
    /// persisted), or a storage error.
    pub async fn post_request(&self, new: NewRequest) -> Result<RequestId> {
        if new.subject.chars().count() > MAX_SUBJECT_CHARS {
            return Err(DispatchError::Validation(format!(
                "subject exceeds {MAX_SUBJECT_CHARS} characters"
            )));
        }

        let id = self.store.insert_request(new).await?;
        debug!(request_id = %id, "request posted");
        Ok(id)
    }

    /// Cancel a request: its queue entries are forced non-retryable and
    /// the request becomes `Cancelled` unless already terminal.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a storage error, including when the request id is unknown.
    pub async fn cancel_request(&self, id: RequestId) -> Result<()> {
        self.store.cancel_request(id).await?;
        info!(request_id = %id, "request cancelled");
        Ok(())
    }

    /// Run the dispatcher once against the given SMTP relay.
    ///
    /// Touches the job singleton, bails out early when nothing is active,
    /// folds every candidate entry forward on a connection-wide failure,
    /// and otherwise expands, delivers, and reconciles. The SMTP session
    /// is released on every exit path.
    ///
    /// # Errors
    ///
    /// Storage, directory and protocol failures are fatal for the run and
    /// propagate; per-row delivery failures are not.
    pub async fn process_queue(&self, host: &str, port: u16) -> Result<RunSummary> {
        let _run = self.run_lock.lock().await;

        self.store.touch_last_run(Utc::now()).await?;
        if !self.store.has_active_requests().await? {
            debug!("no active requests, skipping run");
            return Ok(RunSummary::default());
        }

        let mut session = match SmtpConnection::open(host, port).await {
            Ok((session, reply)) if reply.code == 250 => session,
            Ok((session, reply)) => {
                warn!(host, port, reply = %reply, "SMTP relay refused the session");
                let summary = self
                    .connection_failure(Some(reply.code), &reply.text())
                    .await?;
                session.close().await;
                return Ok(summary);
            }
            Err(err) => {
                warn!(host, port, error = %err, "SMTP relay unreachable");
                return self.connection_failure(None, &err.to_string()).await;
            }
        };

        let expanded = match expand::expand_pending(self.store.as_ref(), self.directory.as_ref())
            .await
        {
            Ok(expanded) => expanded,
            Err(err) => {
                session.close().await;
                return Err(err);
            }
        };

        let scan =
            deliver::run_scan(&mut session, self.store.as_ref(), self.directory.as_ref()).await;

        let outcome = match scan {
            Ok(outcome) => outcome,
            Err(err) => {
                session.close().await;
                return Err(err);
            }
        };

        let reconciled = self.store.reconcile(Utc::now()).await;
        if outcome.data_open
            && let Err(err) = session.close_data().await
        {
            warn!(error = %err, "closing trailing DATA section");
        }
        session.close().await;
        let reconciled = reconciled?;

        let summary = RunSummary {
            expanded,
            delivered: outcome.delivered,
            failed: outcome.failed,
            skipped: outcome.skipped,
            folded: 0,
            reconciled,
        };
        info!(
            expanded = summary.expanded,
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            sent = reconciled.sent,
            partial = reconciled.partial,
            unfulfilled = reconciled.failed,
            "queue run complete"
        );
        Ok(summary)
    }

    /// Connection-wide failure shortcut: every candidate entry takes one
    /// retry increment with the failing reply recorded, then
    /// reconciliation runs. Expansion and delivery are skipped entirely.
    async fn connection_failure(
        &self,
        reply_code: Option<u16>,
        reply_message: &str,
    ) -> Result<RunSummary> {
        let folded = self
            .store
            .fold_connection_failure(reply_code, reply_message)
            .await?;
        let reconciled = self.store.reconcile(Utc::now()).await?;
        info!(folded, "connection failure folded into retries");
        Ok(RunSummary {
            folded,
            reconciled,
            ..RunSummary::default()
        })
    }

    /// Register, replace, or cancel the periodic queue run.
    ///
    /// Any previously registered job is de-registered first. With
    /// `interval_minutes = None` the job singleton's handle is cleared and
    /// nothing new is registered (cancel semantics). Otherwise a periodic
    /// task invoking [`Self::process_queue`] every `interval_minutes` is
    /// registered, its id stored in the singleton, and `last_run_date`
    /// cleared. Returns the new job id, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the singleton cannot be updated.
    pub async fn schedule_process(
        &self,
        interval_minutes: Option<u64>,
        host: &str,
        port: u16,
    ) -> Result<Option<String>> {
        let job = self.store.job().await?;
        if let Some(existing) = job.job_id
            && !self.scheduler.cancel(&existing)
        {
            warn!(job_id = %existing, "stored job handle was not registered here");
        }

        let Some(minutes) = interval_minutes else {
            self.store.update_job_id(None).await?;
            info!("periodic processing cancelled");
            return Ok(None);
        };

        let service = self.clone();
        let host = host.to_string();
        let id = self
            .scheduler
            .register(Duration::from_secs(minutes * 60), move || {
                let service = service.clone();
                let host = host.clone();
                async move {
                    match service.process_queue(&host, port).await {
                        Ok(summary) => debug!(
                            delivered = summary.delivered,
                            failed = summary.failed,
                            "scheduled queue run finished"
                        ),
                        Err(err) => error!(error = %err, "scheduled queue run failed"),
                    }
                }
            });

        self.store.update_job_id(Some(id.clone())).await?;
        self.store.clear_last_run().await?;
        info!(job_id = %id, interval_minutes = minutes, "periodic processing registered");
        Ok(Some(id))
    }

    /// [`Self::schedule_process`] driven by the service's own config.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the singleton cannot be updated.
    pub async fn schedule_from_config(&self) -> Result<Option<String>> {
        let host = self.config.smtp_host.clone();
        self.schedule_process(self.config.interval_minutes, &host, self.config.smtp_port)
            .await
    }
}

#[cfg(test)]
mod tests {
    use herald_directory::MemoryDirectory;
    use herald_store::{MemoryStore, RequestStatus};

    use super::*;

    fn service(store: MemoryStore) -> DispatchService {
        DispatchService::new(
            Arc::new(store),
            Arc::new(MemoryDirectory::new()),
            DispatchConfig::default(),
        )
    }

    #[tokio::test]
    async fn post_request_rejects_oversized_subjects() {
        let store = MemoryStore::new();
        let service = service(store.clone());

        let err = service
            .post_request(NewRequest::new(
                PartyId(1),
                PartyId(2),
                false,
                "s".repeat(1001),
                "m",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        // Nothing was persisted.
        assert!(!store.has_active_requests().await.unwrap());

        // Exactly 1000 characters is accepted.
        let id = service
            .post_request(NewRequest::new(
                PartyId(1),
                PartyId(2),
                false,
                "s".repeat(1000),
                "m",
            ))
            .await
            .unwrap();
        assert_eq!(store.request(id).await.unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn new_request_applies_the_configured_budget() {
        let store = MemoryStore::new();
        let config = DispatchConfig {
            default_max_retries: 7,
            ..DispatchConfig::default()
        };
        let service = DispatchService::new(
            Arc::new(store),
            Arc::new(MemoryDirectory::new()),
            config,
        );

        let new = service.new_request(PartyId(1), PartyId(2), false, "s", "m");
        assert_eq!(new.max_retries, 7);
    }
}
