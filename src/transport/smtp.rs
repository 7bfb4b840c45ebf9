//! Outbound session via lettre's blocking `SmtpTransport`.

use lettre::transport::smtp::Error as SmtpError;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use super::{IO_TIMEOUT, OutboundSession, OutgoingMail, compose};
use crate::config::Credentials;
use crate::error::TransportError;
use crate::profiles::{ServerProfile, TlsMode};

/// SMTP reply codes that mean the credentials were refused.
const AUTH_FAILURE_CODES: &[&str] = &["530", "534", "535"];

/// An authenticated SMTP session.
pub struct SmtpOutbound {
    server: String,
    transport: SmtpTransport,
}

impl SmtpOutbound {
    /// Build the transport for `profile` and verify that the server accepts
    /// the credentials, so a bad password fails here and not on every send.
    pub fn connect(
        profile: &ServerProfile,
        credentials: &Credentials,
    ) -> Result<Self, TransportError> {
        let server = format!("{}:{}", profile.smtp_host, profile.smtp_port);

        let mut tls = TlsParameters::builder(profile.smtp_host.to_string());
        if profile.tls_policy.accept_invalid_certs {
            tls = tls.dangerous_accept_invalid_certs(true);
        }
        let tls = tls.build().map_err(|e| TransportError::Connect {
            server: server.clone(),
            reason: format!("TLS setup failed: {e}"),
        })?;
        let tls = match profile.tls_policy.mode {
            TlsMode::Implicit => Tls::Wrapper(tls),
            TlsMode::StartTls => Tls::Required(tls),
        };

        let transport = SmtpTransport::builder_dangerous(profile.smtp_host)
            .port(profile.smtp_port)
            .tls(tls)
            .timeout(Some(IO_TIMEOUT))
            .credentials(SmtpCredentials::new(
                credentials.account.clone(),
                credentials.secret.expose_secret().to_string(),
            ))
            .build();

        match transport.test_connection() {
            Ok(true) => {
                info!(server = %server, mode = ?profile.tls_policy.mode, "SMTP session established");
                Ok(Self { server, transport })
            }
            Ok(false) => Err(TransportError::Connect {
                server,
                reason: "server did not answer NOOP".into(),
            }),
            Err(e) => Err(classify(server, &e)),
        }
    }
}

/// Split lettre errors into credential failures and everything else.
fn classify(server: String, error: &SmtpError) -> TransportError {
    let code = error.status().map(|c| c.to_string());
    let refused = code
        .as_deref()
        .is_some_and(|c| AUTH_FAILURE_CODES.contains(&c))
        || error.to_string().to_lowercase().contains("authentication");
    if refused {
        TransportError::Auth {
            server,
            reason: error.to_string(),
        }
    } else {
        TransportError::Connect {
            server,
            reason: error.to_string(),
        }
    }
}

impl OutboundSession for SmtpOutbound {
    fn send(&mut self, mail: &OutgoingMail<'_>) -> Result<(), TransportError> {
        let message = compose(mail)?;
        self.transport
            .send(&message)
            .map_err(|e| TransportError::Send {
                recipient: mail.to.to_string(),
                reason: format!("SMTP send failed: {e}"),
            })?;
        debug!(to = %mail.to, "Email sent");
        Ok(())
    }

    fn close(self: Box<Self>) {
        debug!(server = %self.server, "SMTP session closed");
    }
}
