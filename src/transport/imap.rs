//! Minimal IMAP4rev1 client over rustls (blocking).
//!
//! Only what the responder needs: LOGIN, SELECT, UID SEARCH UNSEEN,
//! UID FETCH BODY.PEEK[], UID STORE +FLAGS and LOGOUT. Responses are read
//! line by line; `{n}` literals are read as exact byte counts so message
//! bodies containing CRLF never confuse the tag matching.

use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;

use rustls::{ClientConnection, StreamOwned};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use super::{IO_TIMEOUT, InboxSession, tls};
use crate::config::Credentials;
use crate::error::TransportError;
use crate::profiles::ServerProfile;

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Completion status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response line plus any literals embedded in it.
#[derive(Debug, Default)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Completion {
    status: Status,
    text: String,
    untagged: Vec<Untagged>,
}

/// An authenticated IMAP session with `INBOX` selected.
pub struct ImapInbox {
    server: String,
    stream: BufReader<TlsStream>,
    tag_counter: u32,
}

impl ImapInbox {
    /// Connect over implicit TLS, log in and select `INBOX`.
    pub fn connect(
        profile: &ServerProfile,
        credentials: &Credentials,
    ) -> Result<Self, TransportError> {
        let server = format!("{}:{}", profile.imap_host, profile.imap_port);
        let connect_error = |reason: String| TransportError::Connect {
            server: server.clone(),
            reason,
        };

        let tcp = TcpStream::connect((profile.imap_host, profile.imap_port))
            .map_err(|e| connect_error(e.to_string()))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))
            .and_then(|()| tcp.set_write_timeout(Some(IO_TIMEOUT)))
            .map_err(|e| connect_error(e.to_string()))?;

        let config = tls::client_config(profile.tls_policy.accept_invalid_certs)?;
        let server_name = ServerName::try_from(profile.imap_host.to_string())
            .map_err(|e| connect_error(format!("Invalid host name: {e}")))?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| connect_error(e.to_string()))?;

        let mut inbox = Self {
            server: server.clone(),
            stream: BufReader::new(StreamOwned::new(conn, tcp)),
            tag_counter: 0,
        };

        // The TLS handshake happens on this first read.
        let greeting = inbox
            .read_response()
            .map_err(|e| connect_error(e.to_string()))?;
        let upper = greeting.text.to_ascii_uppercase();
        if !upper.starts_with("* OK") && !upper.starts_with("* PREAUTH") {
            return Err(connect_error(format!(
                "Unexpected greeting: {}",
                greeting.text
            )));
        }

        inbox.login(credentials)?;
        inbox.select_inbox()?;
        info!(server = %inbox.server, "IMAP session established");
        Ok(inbox)
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        let auth_error = |server: &str, reason: String| TransportError::Auth {
            server: server.to_string(),
            reason,
        };
        let (Some(user), Some(pass)) = (
            quote(&credentials.account),
            quote(credentials.secret.expose_secret()),
        ) else {
            return Err(auth_error(
                &self.server,
                "credentials contain line breaks".into(),
            ));
        };

        let done = self.command(&format!("LOGIN {user} {pass}"))?;
        if done.status != Status::Ok {
            return Err(auth_error(&self.server, done.text));
        }
        debug!(server = %self.server, "IMAP login accepted");
        Ok(())
    }

    fn select_inbox(&mut self) -> Result<(), TransportError> {
        let done = self.command("SELECT INBOX")?;
        if done.status != Status::Ok {
            return Err(TransportError::Protocol(format!(
                "SELECT INBOX failed: {}",
                done.text
            )));
        }
        Ok(())
    }

    /// Send a tagged command and collect everything up to its completion.
    /// The command text is never logged (LOGIN carries the password).
    fn command(&mut self, command: &str) -> Result<Completion, TransportError> {
        self.tag_counter += 1;
        let tag = format!("A{:04}", self.tag_counter);
        self.exchange(&tag, command)
            .map_err(|e| TransportError::Connect {
                server: self.server.clone(),
                reason: e.to_string(),
            })
    }

    fn exchange(&mut self, tag: &str, command: &str) -> io::Result<Completion> {
        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let response = self.read_response()?;
            if let Some((status, text)) = parse_tagged(tag, &response.text) {
                return Ok(Completion {
                    status,
                    text,
                    untagged,
                });
            }
            untagged.push(response);
        }
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "IMAP connection closed",
            ));
        }
        Ok(buf)
    }

    /// Read one response, following any `{n}` literals it announces.
    fn read_response(&mut self) -> io::Result<Untagged> {
        let mut response = Untagged::default();
        loop {
            let line = self.read_line()?;
            let text = String::from_utf8_lossy(&line).into_owned();
            response.text.push_str(text.trim_end_matches(['\r', '\n']));
            match literal_len(&text) {
                Some(len) => {
                    let mut literal = vec![0u8; len];
                    self.stream.read_exact(&mut literal)?;
                    response.literals.push(literal);
                }
                None => return Ok(response),
            }
        }
    }
}

impl InboxSession for ImapInbox {
    fn list_unseen(&mut self) -> Result<Vec<u32>, TransportError> {
        let done = self.command("UID SEARCH UNSEEN")?;
        if done.status != Status::Ok {
            return Err(TransportError::Protocol(format!(
                "SEARCH UNSEEN failed: {}",
                done.text
            )));
        }
        Ok(parse_search(done.untagged.iter().map(|r| r.text.as_str())))
    }

    fn fetch(&mut self, id: u32) -> Result<Vec<u8>, TransportError> {
        let done = self.command(&format!("UID FETCH {id} BODY.PEEK[]"))?;
        if done.status != Status::Ok {
            return Err(TransportError::Fetch {
                id,
                reason: done.text,
            });
        }
        done.untagged
            .into_iter()
            .filter(|r| r.text.to_ascii_uppercase().contains(" FETCH ("))
            .find_map(|r| r.literals.into_iter().next())
            .ok_or_else(|| TransportError::Fetch {
                id,
                reason: "message no longer exists".into(),
            })
    }

    fn mark_seen(&mut self, id: u32) -> Result<(), TransportError> {
        let done = self.command(&format!("UID STORE {id} +FLAGS.SILENT (\\Seen)"))?;
        if done.status != Status::Ok {
            return Err(TransportError::Protocol(format!(
                "STORE \\Seen on {id} failed: {}",
                done.text
            )));
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(server = %self.server, "IMAP logout failed: {e}");
        } else {
            debug!(server = %self.server, "IMAP session closed");
        }
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Size of a `{n}` (or `{n+}`) literal announced at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end_matches(['\r', '\n']);
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

/// Match `<tag> OK|NO|BAD text`.
fn parse_tagged(tag: &str, line: &str) -> Option<(Status, String)> {
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return None,
    };
    Some((status, text.to_string()))
}

/// Collect ids from `* SEARCH` responses, ascending and unique.
fn parse_search<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<u32> {
    let mut ids: Vec<u32> = lines
        .into_iter()
        .filter(|l| l.to_ascii_uppercase().starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2))
        .filter_map(|n| n.parse().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// IMAP quoted string. `None` if the value cannot be quoted.
fn quote(value: &str) -> Option<String> {
    if value.contains(['\r', '\n']) {
        return None;
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Some(format!("\"{escaped}\""))
}
