//! Mail transport: inbox-read and outbound-send sessions.
//!
//! Every call here blocks on the network. Async callers run them inside
//! `tokio::task::spawn_blocking`.

pub mod imap;
pub mod smtp;
pub mod tls;

use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use mail_parser::MessageParser;

use crate::config::Credentials;
use crate::error::TransportError;
use crate::ledger::normalize;
use crate::profiles::ServerProfile;

pub use imap::ImapInbox;
pub use smtp::SmtpOutbound;

/// Read/write socket timeout for both protocols.
pub const IO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// An open inbox with `INBOX` selected.
pub trait InboxSession: Send {
    /// UIDs of unseen messages, ascending.
    fn list_unseen(&mut self) -> Result<Vec<u32>, TransportError>;

    /// Raw RFC 5322 bytes. Must not set `\Seen`.
    fn fetch(&mut self, id: u32) -> Result<Vec<u8>, TransportError>;

    /// Flag a message as seen. Idempotent.
    fn mark_seen(&mut self, id: u32) -> Result<(), TransportError>;

    /// Best-effort logout.
    fn close(self: Box<Self>);
}

/// An authenticated outbound session.
pub trait OutboundSession: Send {
    fn send(&mut self, mail: &OutgoingMail<'_>) -> Result<(), TransportError>;

    /// Best-effort quit.
    fn close(self: Box<Self>);
}

/// Opens sessions for a profile.
pub trait MailTransport: Send + Sync {
    fn open_inbox(
        &self,
        profile: &ServerProfile,
        credentials: &Credentials,
    ) -> Result<Box<dyn InboxSession>, TransportError>;

    fn open_outbound(
        &self,
        profile: &ServerProfile,
        credentials: &Credentials,
    ) -> Result<Box<dyn OutboundSession>, TransportError>;
}

/// Real network transport: IMAP over rustls, SMTP via lettre.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveTransport;

impl MailTransport for LiveTransport {
    fn open_inbox(
        &self,
        profile: &ServerProfile,
        credentials: &Credentials,
    ) -> Result<Box<dyn InboxSession>, TransportError> {
        Ok(Box::new(ImapInbox::connect(profile, credentials)?))
    }

    fn open_outbound(
        &self,
        profile: &ServerProfile,
        credentials: &Credentials,
    ) -> Result<Box<dyn OutboundSession>, TransportError> {
        Ok(Box::new(SmtpOutbound::connect(profile, credentials)?))
    }
}

/// One message to send.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingMail<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub is_html: bool,
}

/// Build the wire message: single part, UTF-8, with a `Date` header.
pub fn compose(mail: &OutgoingMail<'_>) -> Result<Message, TransportError> {
    let send_error = |reason: String| TransportError::Send {
        recipient: mail.to.to_string(),
        reason,
    };

    let from: Mailbox = mail
        .from
        .parse()
        .map_err(|e| send_error(format!("Invalid from address: {e}")))?;
    let to: Mailbox = mail
        .to
        .parse()
        .map_err(|e| send_error(format!("Invalid to address: {e}")))?;
    let content_type = if mail.is_html {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };

    Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject)
        .date_now()
        .header(content_type)
        .body(mail.body.to_string())
        .map_err(|e| send_error(format!("Failed to build email: {e}")))
}

/// A fetched unseen message with its sender resolved.
#[derive(Debug, Clone)]
pub struct InboxMessage {
    pub id: u32,
    /// Lower-cased `From` address.
    pub sender: String,
    pub raw: Vec<u8>,
}

/// Why a fetched message could not be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unanswerable {
    /// The bytes are not a parseable message.
    Undecodable,
    /// No usable `From` address.
    NoSender,
}

impl InboxMessage {
    /// Parse raw bytes and pull out the sender.
    pub fn parse(id: u32, raw: Vec<u8>) -> Result<Self, Unanswerable> {
        let sender = {
            let parsed = MessageParser::default()
                .parse(&raw[..])
                .ok_or(Unanswerable::Undecodable)?;
            parsed
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
                .map(normalize)
                .filter(|a| is_plausible_address(a))
                .ok_or(Unanswerable::NoSender)?
        };
        Ok(Self { id, sender, raw })
    }
}

/// Cheap shape check: something@something.
pub fn is_plausible_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !address.contains(char::is_whitespace)
        }
        None => false,
    }
}
