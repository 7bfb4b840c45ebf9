//! Status reporting: human-readable progress strings for the front end.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Receives progress strings from whichever task is running.
///
/// Called synchronously from blocking worker threads, so implementations
/// must be thread-safe.
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: &str);
}

impl<F> StatusReporter for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, status: &str) {
        self(status)
    }
}

/// Forwards statuses to an async consumer. A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end the front end drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, status: &str) {
        let _ = self.tx.send(status.to_string());
    }
}

/// Writes statuses to the tracing log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, status: &str) {
        tracing::info!(status, "Status");
    }
}

/// Keeps every status in memory. Handy for tests and for summaries.
#[derive(Debug, Default)]
pub struct StatusLog {
    entries: Mutex<Vec<String>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Most recent status, if any.
    pub fn last(&self) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.last().cloned())
    }
}

impl StatusReporter for StatusLog {
    fn report(&self, status: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(status.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_reporter() {
        let log = StatusLog::new();
        let reporter = |s: &str| log.report(&s.to_uppercase());
        reporter.report("hello");
        assert_eq!(log.entries(), vec!["HELLO"]);
    }

    #[tokio::test]
    async fn channel_reporter_forwards() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.report("connecting");
        assert_eq!(rx.recv().await.as_deref(), Some("connecting"));
    }

    #[test]
    fn channel_reporter_ignores_closed_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.report("nobody listening");
    }

    #[test]
    fn log_reporter_is_object_safe() {
        let reporter: std::sync::Arc<dyn StatusReporter> = std::sync::Arc::new(LogReporter);
        reporter.report("logged only");
    }

    #[test]
    fn status_log_last() {
        let log = StatusLog::new();
        assert_eq!(log.last(), None);
        log.report("a");
        log.report("b");
        assert_eq!(log.last().as_deref(), Some("b"));
    }
}
