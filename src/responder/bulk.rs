//! Bulk dispatch: send one template to an explicit address list.
//!
//! Unlike the reply pass there is no dedup here. Every address in the list
//! gets one attempt, in order, over a single outbound session. Successful
//! sends are appended to the sent ledger for audit.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::session_failure;
use crate::config::{Credentials, MessageTemplate, validate_inputs};
use crate::error::{ConfigError, Result};
use crate::ledger::SentLedger;
use crate::profiles::ServerProfile;
use crate::status::StatusReporter;
use crate::transport::{MailTransport, OutgoingMail};

/// Counts for one dispatch. `successes + failures` equals the list length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub successes: usize,
    pub failures: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.successes + self.failures
    }
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dispatch finished. Successes: {} | Failures: {}",
            self.successes, self.failures
        )
    }
}

/// Everything one dispatch needs, bundled for background execution.
#[derive(Clone)]
pub struct BulkJob {
    pub transport: Arc<dyn MailTransport>,
    pub profile: ServerProfile,
    pub credentials: Credentials,
    pub template: MessageTemplate,
    pub recipients: Vec<String>,
    pub sent: Arc<SentLedger>,
    pub status: Arc<dyn StatusReporter>,
}

impl BulkJob {
    /// Run the dispatch on the current thread (blocking).
    pub fn run(&self) -> Result<DispatchSummary> {
        send_bulk(
            self.transport.as_ref(),
            &self.profile,
            &self.credentials,
            &self.template,
            &self.recipients,
            &self.sent,
            self.status.as_ref(),
        )
    }
}

/// Run a dispatch on a blocking worker thread.
pub fn spawn_bulk_dispatch(job: BulkJob) -> JoinHandle<Result<DispatchSummary>> {
    tokio::task::spawn_blocking(move || job.run())
}

/// Send the template to every address in `recipients`, in order.
///
/// An empty list is rejected before any connection is made. Only failing to
/// open the outbound session aborts the run; per-recipient failures are
/// counted and the run continues.
pub fn send_bulk(
    transport: &dyn MailTransport,
    profile: &ServerProfile,
    credentials: &Credentials,
    template: &MessageTemplate,
    recipients: &[String],
    sent: &SentLedger,
    status: &dyn StatusReporter,
) -> Result<DispatchSummary> {
    if recipients.is_empty() {
        let err = ConfigError::MissingRequired {
            key: "recipients".into(),
            hint: "Select at least one recipient.".into(),
        };
        status.report(&format!("Nothing to send: {err}"));
        return Err(err.into());
    }
    if let Err(e) = validate_inputs(credentials, template) {
        status.report(&format!("Cannot send: {e}"));
        return Err(e.into());
    }

    info!(
        profile = profile.name,
        recipients = recipients.len(),
        "Starting bulk dispatch"
    );

    status.report("Connecting to SMTP server...");
    let mut outbound = transport
        .open_outbound(profile, credentials)
        .map_err(|e| session_failure(status, e))?;

    let total = recipients.len();
    let mut summary = DispatchSummary::default();

    for (index, recipient) in recipients.iter().enumerate() {
        status.report(&format!("Sending to {recipient} ({}/{total})", index + 1));
        let mail = OutgoingMail {
            from: &credentials.account,
            to: recipient,
            subject: &template.subject,
            body: &template.body,
            is_html: template.is_html,
        };

        match outbound.send(&mail) {
            Ok(()) => {
                summary.successes += 1;
                if let Err(e) = sent.record(recipient) {
                    warn!(recipient = %recipient, "Sent but not recorded: {e}");
                }
                status.report(&format!("✓ Sent to {recipient}"));
            }
            Err(e) => {
                summary.failures += 1;
                error!(recipient = %recipient, "Send failed: {e}");
                status.report(&format!("✗ Failed sending to {recipient}"));
            }
        }
    }

    outbound.close();

    info!(
        successes = summary.successes,
        failures = summary.failures,
        "Bulk dispatch completed"
    );
    status.report(&summary.to_string());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_display_and_total() {
        let summary = DispatchSummary {
            successes: 2,
            failures: 1,
        };
        assert_eq!(summary.total(), 3);
        assert_eq!(
            summary.to_string(),
            "Dispatch finished. Successes: 2 | Failures: 1"
        );
    }
}
