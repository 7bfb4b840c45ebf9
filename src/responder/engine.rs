//! Reply engine: one poll-and-reply pass.
//!
//! A pass opens both sessions, walks the unseen messages in listed order and
//! answers each sender at most once. The dedup ledger is checked strictly
//! before any send, and a sender is recorded only after its send succeeded.
//! Only session establishment (or losing the inbox listing) aborts a pass;
//! every per-message problem is logged and counted.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session_failure;
use crate::config::{Credentials, MessageTemplate};
use crate::error::{Result, TransportError};
use crate::ledger::{DedupLedger, normalize};
use crate::profiles::ServerProfile;
use crate::status::StatusReporter;
use crate::transport::{InboxMessage, InboxSession, MailTransport, OutboundSession, OutgoingMail};

/// Status reported when the inbox has nothing unseen.
pub const NO_NEW_MAIL: &str = "No new mail to answer.";

/// Counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Unseen messages listed at the start of the pass.
    pub unseen: usize,
    /// Replies sent and recorded.
    pub replied: usize,
    /// Messages from senders already in the ledger (marked seen, no send).
    pub already_answered: usize,
    /// Messages that could not be fetched or parsed, self-sent mail, and
    /// repeats of a sender whose send failed earlier in the pass.
    pub skipped: usize,
    /// Send attempts that failed (message left unseen).
    pub failed: usize,
}

impl ProcessingSummary {
    /// Nothing was unseen.
    pub fn is_idle(&self) -> bool {
        self.unseen == 0
    }
}

impl fmt::Display for ProcessingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Finished. Replied: {} | Already answered: {} | Skipped: {} | Failed: {}",
            self.replied, self.already_answered, self.skipped, self.failed
        )
    }
}

/// Everything one pass needs, bundled for background execution.
#[derive(Clone)]
pub struct ReplyJob {
    pub transport: Arc<dyn MailTransport>,
    pub profile: ServerProfile,
    pub credentials: Credentials,
    pub template: MessageTemplate,
    pub ledger: Arc<DedupLedger>,
    pub status: Arc<dyn StatusReporter>,
}

impl ReplyJob {
    /// Run one pass on the current thread (blocking).
    pub fn run_once(&self) -> Result<ProcessingSummary> {
        run_once(
            self.transport.as_ref(),
            &self.profile,
            &self.credentials,
            &self.template,
            &self.ledger,
            self.status.as_ref(),
        )
    }
}

/// Run one pass on a blocking worker thread.
pub fn spawn_reply_pass(job: ReplyJob) -> JoinHandle<Result<ProcessingSummary>> {
    tokio::task::spawn_blocking(move || job.run_once())
}

/// One poll-and-reply pass.
pub fn run_once(
    transport: &dyn MailTransport,
    profile: &ServerProfile,
    credentials: &Credentials,
    template: &MessageTemplate,
    ledger: &DedupLedger,
    status: &dyn StatusReporter,
) -> Result<ProcessingSummary> {
    info!(profile = profile.name, "Starting reply pass");

    // A stale or unreadable ledger could mean answering everyone again.
    if let Err(e) = ledger.reload() {
        let message = format!("Could not read the reply history: {e}");
        error!("{message}");
        status.report(&message);
        return Err(e.into());
    }

    status.report("Connecting to IMAP server...");
    let mut inbox = transport
        .open_inbox(profile, credentials)
        .map_err(|e| session_failure(status, e))?;

    status.report("Connecting to SMTP server...");
    let mut outbound = match transport.open_outbound(profile, credentials) {
        Ok(session) => session,
        Err(e) => {
            inbox.close();
            return Err(session_failure(status, e));
        }
    };

    let result = answer_unseen(
        inbox.as_mut(),
        outbound.as_mut(),
        credentials,
        template,
        ledger,
        status,
    );

    outbound.close();
    inbox.close();

    match result {
        Ok(summary) => {
            info!(
                unseen = summary.unseen,
                replied = summary.replied,
                already_answered = summary.already_answered,
                skipped = summary.skipped,
                failed = summary.failed,
                "Reply pass completed"
            );
            Ok(summary)
        }
        Err(e) => Err(session_failure(status, e)),
    }
}

fn answer_unseen(
    inbox: &mut dyn InboxSession,
    outbound: &mut dyn OutboundSession,
    credentials: &Credentials,
    template: &MessageTemplate,
    ledger: &DedupLedger,
    status: &dyn StatusReporter,
) -> std::result::Result<ProcessingSummary, TransportError> {
    let mut summary = ProcessingSummary::default();

    let ids = inbox.list_unseen()?;
    summary.unseen = ids.len();
    status.report(&format!("Unseen messages found: {}", ids.len()));

    if ids.is_empty() {
        status.report(NO_NEW_MAIL);
        return Ok(summary);
    }

    let own_address = normalize(&credentials.account);
    let total = ids.len();
    let mut failed_senders: HashSet<String> = HashSet::new();
    // Covers senders whose ledger append failed after a successful send.
    let mut answered: HashSet<String> = HashSet::new();

    for (index, id) in ids.into_iter().enumerate() {
        let raw = match inbox.fetch(id) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(uid = id, "Skipping message: {e}");
                summary.skipped += 1;
                continue;
            }
        };

        let sender = match InboxMessage::parse(id, raw) {
            Ok(message) => message.sender,
            Err(reason) => {
                warn!(uid = id, ?reason, "Skipping message without a usable sender");
                summary.skipped += 1;
                continue;
            }
        };

        if sender == own_address {
            debug!(uid = id, "Skipping self-sent email");
            mark_seen(inbox, id);
            summary.skipped += 1;
            continue;
        }

        if answered.contains(&sender) || ledger.contains(&sender) {
            status.report(&format!("Already replied to {sender}, skipping."));
            mark_seen(inbox, id);
            summary.already_answered += 1;
            continue;
        }

        if failed_senders.contains(&sender) {
            debug!(uid = id, sender = %sender, "Send already failed this pass, leaving unseen");
            summary.skipped += 1;
            continue;
        }

        status.report(&format!(
            "Sending reply to {sender} ({}/{total})",
            index + 1
        ));
        let mail = OutgoingMail {
            from: &credentials.account,
            to: &sender,
            subject: &template.subject,
            body: &template.body,
            is_html: template.is_html,
        };

        match outbound.send(&mail) {
            Ok(()) => {
                if let Err(e) = ledger.record(&sender) {
                    error!(sender = %sender, "Reply sent but not recorded: {e}");
                }
                answered.insert(sender.clone());
                mark_seen(inbox, id);
                summary.replied += 1;
                info!(uid = id, sender = %sender, "Reply sent");
                status.report(&format!("✓ Reply sent to {sender}"));
            }
            Err(e) => {
                error!(uid = id, sender = %sender, "Reply failed: {e}");
                failed_senders.insert(sender.clone());
                summary.failed += 1;
                status.report(&format!("✗ Failed sending to {sender}"));
            }
        }
    }

    status.report(&summary.to_string());
    Ok(summary)
}

/// Flag a message seen. Failure only means it shows up again next pass.
fn mark_seen(inbox: &mut dyn InboxSession, id: u32) {
    if let Err(e) = inbox.mark_seen(id) {
        warn!(uid = id, "Could not mark message as seen: {e}");
    }
}
