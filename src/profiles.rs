//! Server profile registry.
//!
//! A profile bundles the inbox (IMAP) and outbound (SMTP) endpoints of one
//! provider. Profiles are fixed at compile time and selected by name; an
//! unknown name is a configuration error.

use crate::error::ConfigError;

/// Port that implies TLS from the first byte (SMTPS).
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// IMAP over TLS.
pub const IMAPS_PORT: u16 = 993;

/// How the outbound connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS handshake immediately after TCP connect.
    Implicit,
    /// Plaintext connect, then STARTTLS before authenticating.
    StartTls,
}

impl TlsMode {
    /// Pick the mode implied by an outbound port.
    pub const fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }
}

/// TLS settings of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsPolicy {
    pub mode: TlsMode,
    /// Skip certificate validation for this profile's connections only.
    pub accept_invalid_certs: bool,
}

/// Connection parameters for one mail provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProfile {
    pub name: &'static str,
    pub imap_host: &'static str,
    pub imap_port: u16,
    pub smtp_host: &'static str,
    pub smtp_port: u16,
    pub tls_policy: TlsPolicy,
}

impl ServerProfile {
    const fn new(
        name: &'static str,
        imap_host: &'static str,
        smtp_host: &'static str,
        smtp_port: u16,
        accept_invalid_certs: bool,
    ) -> Self {
        Self {
            name,
            imap_host,
            imap_port: IMAPS_PORT,
            smtp_host,
            smtp_port,
            tls_policy: TlsPolicy {
                mode: TlsMode::for_port(smtp_port),
                accept_invalid_certs,
            },
        }
    }
}

/// Name of the profile used when none is configured.
pub const DEFAULT_PROFILE: &str = "migusto";

/// The fixed registry.
///
/// `migusto` runs a self-signed certificate, hence the validation bypass.
static PROFILES: &[ServerProfile] = &[
    ServerProfile::new(
        "migusto",
        "mail.migusto.com.ar",
        "mail.migusto.com.ar",
        465,
        true,
    ),
    ServerProfile::new("gmail", "imap.gmail.com", "smtp.gmail.com", 587, false),
    ServerProfile::new(
        "outlook",
        "outlook.office365.com",
        "smtp-mail.outlook.com",
        587,
        false,
    ),
];

/// Look up a profile by name (case-insensitive).
pub fn lookup(name: &str) -> Result<&'static ServerProfile, ConfigError> {
    let wanted = name.trim();
    PROFILES
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ConfigError::UnknownProfile(wanted.to_string()))
}

/// All registered profiles.
pub fn all() -> &'static [ServerProfile] {
    PROFILES
}
