//! Append-only address ledgers.
//!
//! Both ledgers are UTF-8 text files with one address per line. A missing
//! file is an empty ledger. Every append is a single `write_all` of a full
//! line on an append-mode handle followed by `sync_data`, so a crash right
//! after a reply never loses the "already answered" fact.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::LedgerError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read every non-empty trimmed line. A missing file yields no lines.
fn read_lines(path: &Path) -> Result<Vec<String>, LedgerError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(io_error(path)(e)),
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(path))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error(path))?;
    file.write_all(format!("{line}\n").as_bytes())
        .map_err(io_error(path))?;
    file.sync_data().map_err(io_error(path))
}

/// Normalize an address for ledger storage and lookup.
pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Senders already auto-replied to. Membership is the single source of
/// truth for "do not reply again".
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    answered: Mutex<HashSet<String>>,
}

impl DedupLedger {
    /// Open the ledger, reading any existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let answered = read_lines(&path)?.iter().map(|a| normalize(a)).collect();
        Ok(Self {
            path,
            answered: Mutex::new(answered),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> MutexGuard<'_, HashSet<String>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.answered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-read the file, picking up edits made outside this process.
    pub fn reload(&self) -> Result<usize, LedgerError> {
        let fresh: HashSet<String> = read_lines(&self.path)?.iter().map(|a| normalize(a)).collect();
        let count = fresh.len();
        *self.entries() = fresh;
        debug!(path = %self.path.display(), count, "Dedup ledger reloaded");
        Ok(count)
    }

    /// Whether `address` was already answered (case-insensitive).
    pub fn contains(&self, address: &str) -> bool {
        self.entries().contains(&normalize(address))
    }

    /// Record an answered sender. Returns `false` if it was already present.
    ///
    /// The line is on disk before the in-memory set is updated.
    pub fn record(&self, address: &str) -> Result<bool, LedgerError> {
        let address = normalize(address);
        let mut entries = self.entries();
        if entries.contains(&address) {
            return Ok(false);
        }
        append_line(&self.path, &address)?;
        entries.insert(address.clone());
        info!(sender = %address, "Sender added to dedup ledger");
        Ok(true)
    }

    /// Truncate the ledger to empty.
    pub fn clear(&self) -> Result<(), LedgerError> {
        let mut entries = self.entries();
        File::create(&self.path)
            .and_then(|f| f.sync_all())
            .map_err(io_error(&self.path))?;
        entries.clear();
        info!(path = %self.path.display(), "Dedup ledger cleared");
        Ok(())
    }

    /// Answered senders, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut all: Vec<String> = self.entries().iter().cloned().collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Audit trail of bulk-send recipients. Never consulted for dedup.
#[derive(Debug)]
pub struct SentLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SentLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a recipient.
    pub fn record(&self, address: &str) -> Result<(), LedgerError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        append_line(&self.path, address.trim())?;
        debug!(recipient = %address, "Recipient added to sent ledger");
        Ok(())
    }

    /// Every recorded recipient, in append order.
    pub fn entries(&self) -> Result<Vec<String>, LedgerError> {
        read_lines(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = DedupLedger::open(dir.path().join("answered.txt")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("a@test.com"));
        assert!(!ledger.path().exists());
    }

    #[test]
    fn record_is_case_insensitive_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answered.txt");
        let ledger = DedupLedger::open(&path).unwrap();

        assert!(ledger.record("Alice@Test.com").unwrap());
        assert!(!ledger.record("alice@test.com").unwrap());
        assert!(ledger.contains("ALICE@test.COM"));

        assert_eq!(fs::read_to_string(&path).unwrap(), "alice@test.com\n");
    }

    #[test]
    fn reopen_reads_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answered.txt");
        fs::write(&path, "bob@test.com\n\n  Carol@Test.com \n").unwrap();

        let ledger = DedupLedger::open(&path).unwrap();
        assert_eq!(ledger.addresses(), vec!["bob@test.com", "carol@test.com"]);
    }

    #[test]
    fn reload_sees_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answered.txt");
        let ledger = DedupLedger::open(&path).unwrap();
        ledger.record("a@test.com").unwrap();

        fs::write(&path, "b@test.com\n").unwrap();
        assert_eq!(ledger.reload().unwrap(), 1);
        assert!(!ledger.contains("a@test.com"));
        assert!(ledger.contains("b@test.com"));
    }

    #[test]
    fn clear_truncates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answered.txt");
        let ledger = DedupLedger::open(&path).unwrap();
        ledger.record("a@test.com").unwrap();

        ledger.clear().unwrap();
        assert!(ledger.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        ledger.record("a@test.com").unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn sent_ledger_keeps_order_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SentLedger::new(dir.path().join("logs").join("sent.txt"));
        assert!(ledger.entries().unwrap().is_empty());

        ledger.record("b@test.com").unwrap();
        ledger.record("a@test.com").unwrap();
        ledger.record("b@test.com").unwrap();
        assert_eq!(
            ledger.entries().unwrap(),
            vec!["b@test.com", "a@test.com", "b@test.com"]
        );
    }

    #[test]
    fn unreadable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let err = DedupLedger::open(dir.path()).unwrap_err();
        assert!(matches!(err, LedgerError::Io { .. }));
    }
}
