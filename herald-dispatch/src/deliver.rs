//! The ordered delivery scan and its coalescing state machine.
//!
//! Rows arrive sorted by `(sender, recipient)`. The machine has two
//! states: `Idle` (no DATA section open) and `Open(from, to)`. Consecutive
//! rows sharing a sender and recipient append to the same DATA section,
//! amortizing envelope setup; a boundary change closes the section and
//! the next row opens a fresh envelope.

use herald_common::PartyId;
use herald_directory::PartyDirectory;
use herald_smtp::{SmtpConnection, format_timestamp};
use herald_store::{DeliveryRow, RequestStore};
use tracing::{debug, warn};

use crate::error::{DispatchError, FailedReply, Result};

/// Sender address used when the sending party has no mailbox of its own.
const UNKNOWN_SENDER: &str = "unknown@unknown.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataSection {
    Idle,
    Open { from: PartyId, to: PartyId },
}

/// What one delivery scan did, plus whether a DATA section is still open
/// (the postamble closes it after reconciliation).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanOutcome {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub data_open: bool,
}

/// Drive every deliverable row through the session.
///
/// Per-row failures are recorded against the row and never abort the
/// scan; storage, directory and protocol errors propagate (the caller
/// still releases the session).
pub(crate) async fn run_scan(
    session: &mut SmtpConnection,
    store: &dyn RequestStore,
    directory: &dyn PartyDirectory,
) -> Result<ScanOutcome> {
    let rows = store.deliverable_rows().await?;
    let mut section = DataSection::Idle;
    let mut outcome = ScanOutcome::default();

    for row in rows {
        let recipient = directory.resolve(row.party_to).await?;
        let Some(recipient_email) = recipient.email else {
            // No mailbox: the row is invisible to delivery and stays
            // untried.
            outcome.skipped += 1;
            continue;
        };

        let sender_email = directory
            .resolve(row.party_from)
            .await?
            .email
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

        match deliver_row(session, store, &row, &sender_email, &recipient_email, &mut section).await
        {
            Ok(()) => {
                if store.complete_entry(row.request_id, row.party_to).await? {
                    outcome.delivered += 1;
                }
            }
            Err(error) if error.is_row_failure() => {
                let FailedReply { code, message } = error
                    .failed_reply()
                    .cloned()
                    .unwrap_or_else(|| FailedReply {
                        code: None,
                        message: error.to_string(),
                    });
                warn!(
                    request_id = %row.request_id,
                    recipient = %row.party_to,
                    reply = %FailedReply { code, message: message.clone() },
                    "delivery failed for recipient"
                );
                store
                    .fail_entry(row.request_id, row.party_to, code, &message)
                    .await?;

                if section != DataSection::Idle {
                    if let Err(close_error) = session.close_data().await {
                        warn!(error = %close_error, "closing DATA after a failed row");
                    }
                    section = DataSection::Idle;
                }
                outcome.failed += 1;
            }
            Err(error) => return Err(error),
        }
    }

    debug!(
        delivered = outcome.delivered,
        failed = outcome.failed,
        skipped = outcome.skipped,
        "delivery scan complete"
    );
    outcome.data_open = section != DataSection::Idle;
    Ok(outcome)
}

/// Deliver one row: open an envelope if none is open for this
/// `(sender, recipient)` pair, then append the message.
async fn deliver_row(
    session: &mut SmtpConnection,
    store: &dyn RequestStore,
    row: &DeliveryRow,
    sender_email: &str,
    recipient_email: &str,
    section: &mut DataSection,
) -> Result<()> {
    // A sender or recipient change ends the current DATA section.
    if let DataSection::Open { from, to } = *section
        && (from != row.party_from || to != row.party_to)
    {
        session.close_data().await?;
        *section = DataSection::Idle;
    }

    if *section == DataSection::Idle {
        let reply = session.mail_from(sender_email).await?;
        if reply.code != 250 {
            return Err(DispatchError::from_reply(&reply));
        }

        let reply = session.rcpt_to(recipient_email).await?;
        if !matches!(reply.code, 250 | 251) {
            return Err(DispatchError::from_reply(&reply));
        }

        session.open_data().await?;
        session
            .write_headers(sender_email, recipient_email, &row.subject, &row.request_date)
            .await?;
        *section = DataSection::Open {
            from: row.party_from,
            to: row.party_to,
        };
    }

    let preface = format!(
        "\n\nMessage sent on {} regarding {}\n\n",
        format_timestamp(&row.request_date),
        row.subject
    );
    session.write_string(&preface).await?;

    let body = store.message_body(row.request_id).await?;
    session.write_chunks(body.as_bytes()).await?;

    Ok(())
}
