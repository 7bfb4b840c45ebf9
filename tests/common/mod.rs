//! In-memory mail server shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mail_responder::config::{Credentials, MessageTemplate};
use mail_responder::error::TransportError;
use mail_responder::ledger::DedupLedger;
use mail_responder::profiles::{self, ServerProfile};
use mail_responder::responder::ReplyJob;
use mail_responder::status::{StatusLog, StatusReporter};
use mail_responder::transport::{InboxSession, MailTransport, OutboundSession, OutgoingMail};

pub const ACCOUNT: &str = "hr@test.com";

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
    pub seen: bool,
}

/// A delivered message as the fake SMTP server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

#[derive(Default)]
struct Mailbox {
    messages: Vec<StoredMessage>,
    sent: Vec<SentMail>,
    failing_recipients: HashSet<String>,
    unfetchable: HashSet<u32>,
    reject_login: bool,
    refuse_connections: bool,
    refuse_smtp: bool,
    /// Turned into a directory right after the next successful send.
    block_after_send: Option<PathBuf>,
}

/// Holds `list_unseen` until released. Bounded so a broken test cannot hang.
#[derive(Default)]
struct ListingGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl ListingGate {
    fn pass(&self) {
        let held = self.held.lock().unwrap();
        let _unused = self
            .released
            .wait_timeout_while(held, Duration::from_secs(5), |held| *held)
            .unwrap();
    }
}

/// Fake IMAP + SMTP server. Clones share the same mailbox.
#[derive(Clone, Default)]
pub struct FakeServer {
    mailbox: Arc<Mutex<Mailbox>>,
    inbox_opens: Arc<AtomicUsize>,
    outbound_opens: Arc<AtomicUsize>,
    listings: Arc<AtomicUsize>,
    gate: Arc<ListingGate>,
}

pub fn raw_from(sender: &str) -> Vec<u8> {
    format!(
        "From: {sender}\r\nTo: {ACCOUNT}\r\nSubject: My CV\r\n\r\nPlease find my CV attached.\r\n"
    )
    .into_bytes()
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an unseen message from `sender`. Returns its UID.
    pub fn deliver(&self, sender: &str) -> u32 {
        self.deliver_raw(raw_from(sender))
    }

    pub fn deliver_raw(&self, raw: Vec<u8>) -> u32 {
        let mut mailbox = self.mailbox.lock().unwrap();
        let uid = mailbox.messages.len() as u32 + 1;
        mailbox.messages.push(StoredMessage {
            uid,
            raw,
            seen: false,
        });
        uid
    }

    pub fn fail_sends_to(&self, recipient: &str) {
        self.mailbox
            .lock()
            .unwrap()
            .failing_recipients
            .insert(recipient.to_string());
    }

    pub fn heal_sends_to(&self, recipient: &str) {
        self.mailbox
            .lock()
            .unwrap()
            .failing_recipients
            .remove(recipient);
    }

    /// Make `path` unwritable as a file once the next reply has gone out.
    pub fn block_path_after_send(&self, path: impl Into<PathBuf>) {
        self.mailbox.lock().unwrap().block_after_send = Some(path.into());
    }

    /// Park every inbox listing until [`FakeServer::release_listing`].
    pub fn hold_listing(&self) {
        *self.gate.held.lock().unwrap() = true;
    }

    pub fn release_listing(&self) {
        *self.gate.held.lock().unwrap() = false;
        self.gate.released.notify_all();
    }

    /// Listings started so far, including any parked one.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn fail_fetch_of(&self, uid: u32) {
        self.mailbox.lock().unwrap().unfetchable.insert(uid);
    }

    pub fn reject_login(&self, reject: bool) {
        self.mailbox.lock().unwrap().reject_login = reject;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.mailbox.lock().unwrap().refuse_connections = refuse;
    }

    pub fn refuse_smtp(&self, refuse: bool) {
        self.mailbox.lock().unwrap().refuse_smtp = refuse;
    }

    pub fn is_seen(&self, uid: u32) -> bool {
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .iter()
            .any(|m| m.uid == uid && m.seen)
    }

    pub fn unseen_count(&self) -> usize {
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| !m.seen)
            .count()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.mailbox.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.to).collect()
    }

    pub fn inbox_opens(&self) -> usize {
        self.inbox_opens.load(Ordering::SeqCst)
    }

    pub fn outbound_opens(&self) -> usize {
        self.outbound_opens.load(Ordering::SeqCst)
    }

    fn check_session(&self, profile: &ServerProfile, host: &str) -> Result<(), TransportError> {
        let mailbox = self.mailbox.lock().unwrap();
        if mailbox.refuse_connections {
            return Err(TransportError::Connect {
                server: format!("{host} ({})", profile.name),
                reason: "connection refused".into(),
            });
        }
        if mailbox.reject_login {
            return Err(TransportError::Auth {
                server: host.to_string(),
                reason: "invalid credentials".into(),
            });
        }
        Ok(())
    }
}

impl MailTransport for FakeServer {
    fn open_inbox(
        &self,
        profile: &ServerProfile,
        _credentials: &Credentials,
    ) -> Result<Box<dyn InboxSession>, TransportError> {
        self.inbox_opens.fetch_add(1, Ordering::SeqCst);
        self.check_session(profile, profile.imap_host)?;
        Ok(Box::new(FakeInbox {
            mailbox: Arc::clone(&self.mailbox),
            listings: Arc::clone(&self.listings),
            gate: Arc::clone(&self.gate),
        }))
    }

    fn open_outbound(
        &self,
        profile: &ServerProfile,
        _credentials: &Credentials,
    ) -> Result<Box<dyn OutboundSession>, TransportError> {
        self.outbound_opens.fetch_add(1, Ordering::SeqCst);
        self.check_session(profile, profile.smtp_host)?;
        if self.mailbox.lock().unwrap().refuse_smtp {
            return Err(TransportError::Connect {
                server: profile.smtp_host.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(FakeOutbound {
            mailbox: Arc::clone(&self.mailbox),
        }))
    }
}

struct FakeInbox {
    mailbox: Arc<Mutex<Mailbox>>,
    listings: Arc<AtomicUsize>,
    gate: Arc<ListingGate>,
}

impl InboxSession for FakeInbox {
    fn list_unseen(&mut self) -> Result<Vec<u32>, TransportError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.gate.pass();
        Ok(self
            .mailbox
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| !m.seen)
            .map(|m| m.uid)
            .collect())
    }

    fn fetch(&mut self, id: u32) -> Result<Vec<u8>, TransportError> {
        let mailbox = self.mailbox.lock().unwrap();
        if mailbox.unfetchable.contains(&id) {
            return Err(TransportError::Fetch {
                id,
                reason: "server said NO".into(),
            });
        }
        mailbox
            .messages
            .iter()
            .find(|m| m.uid == id)
            .map(|m| m.raw.clone())
            .ok_or_else(|| TransportError::Fetch {
                id,
                reason: "no such message".into(),
            })
    }

    fn mark_seen(&mut self, id: u32) -> Result<(), TransportError> {
        let mut mailbox = self.mailbox.lock().unwrap();
        if let Some(message) = mailbox.messages.iter_mut().find(|m| m.uid == id) {
            message.seen = true;
        }
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

struct FakeOutbound {
    mailbox: Arc<Mutex<Mailbox>>,
}

impl OutboundSession for FakeOutbound {
    fn send(&mut self, mail: &OutgoingMail<'_>) -> Result<(), TransportError> {
        let mut mailbox = self.mailbox.lock().unwrap();
        if mailbox.failing_recipients.contains(mail.to) {
            return Err(TransportError::Send {
                recipient: mail.to.to_string(),
                reason: "550 mailbox unavailable".into(),
            });
        }
        mailbox.sent.push(SentMail {
            to: mail.to.to_string(),
            subject: mail.subject.to_string(),
            body: mail.body.to_string(),
            is_html: mail.is_html,
        });
        if let Some(path) = mailbox.block_after_send.take() {
            std::fs::create_dir_all(path).unwrap();
        }
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn profile() -> ServerProfile {
    profiles::lookup("gmail").unwrap().clone()
}

pub fn credentials() -> Credentials {
    Credentials::new(ACCOUNT, "app-password")
}

pub fn template() -> MessageTemplate {
    MessageTemplate::plain("Thanks for your CV", "We received your application.")
}

/// A reply job wired to the fake server, a tempdir ledger and a status log.
pub struct Harness {
    pub server: FakeServer,
    pub ledger: Arc<DedupLedger>,
    pub status: Arc<StatusLog>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(DedupLedger::open(dir.path().join("answered.txt")).unwrap());
        Self {
            server: FakeServer::new(),
            ledger,
            status: Arc::new(StatusLog::new()),
            dir,
        }
    }

    pub fn job(&self) -> ReplyJob {
        self.job_with(credentials(), template())
    }

    pub fn job_with(&self, credentials: Credentials, template: MessageTemplate) -> ReplyJob {
        let status: Arc<dyn StatusReporter> = self.status.clone();
        ReplyJob {
            transport: Arc::new(self.server.clone()),
            profile: profile(),
            credentials,
            template,
            ledger: Arc::clone(&self.ledger),
            status,
        }
    }

    /// Ledger file contents, line by line.
    pub fn ledger_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.ledger.path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}
