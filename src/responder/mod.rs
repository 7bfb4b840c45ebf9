//! Reply and dispatch engine.
//!
//! - [`engine`]: one dedup-guarded poll-and-reply pass
//! - [`scheduler`]: continuous mode around the pass
//! - [`bulk`]: template dispatch to an explicit address list

pub mod bulk;
pub mod engine;
pub mod scheduler;

pub use bulk::{BulkJob, DispatchSummary, send_bulk, spawn_bulk_dispatch};
pub use engine::{ProcessingSummary, ReplyJob, run_once, spawn_reply_pass};
pub use scheduler::{ContinuousScheduler, SchedulerState};

use crate::error::{Error, TransportError};
use crate::status::StatusReporter;

/// Report a session-establishment failure once and turn it into an `Error`.
pub(crate) fn session_failure(status: &dyn StatusReporter, error: TransportError) -> Error {
    let message = match &error {
        TransportError::Auth { .. } => {
            format!("Authentication failed. Check the account and password. ({error})")
        }
        TransportError::Connect { .. } => format!("Connection error: {error}"),
        _ => format!("Mail server error: {error}"),
    };
    tracing::error!("{message}");
    status.report(&message);
    error.into()
}
