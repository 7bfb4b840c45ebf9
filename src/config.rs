//! Configuration types.
//!
//! `ResponderConfig` is read from a JSON file and then overridden from the
//! environment. The engine itself never touches this module's loading code;
//! it only receives the resolved `Credentials`, `MessageTemplate` and
//! `ServerProfile`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::profiles::{self, ServerProfile};

/// Default dedup ledger file.
pub const DEFAULT_DEDUP_LEDGER: &str = "answered.txt";
/// Default sent ledger file.
pub const DEFAULT_SENT_LEDGER: &str = "sent.txt";
/// Default recipient book.
pub const DEFAULT_RECIPIENTS: &str = "recipients.json";

/// Account credentials. The secret is redacted from `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub account: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

/// The message sent as a reply or in a bulk dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

impl MessageTemplate {
    pub fn plain(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            is_html: false,
        }
    }

    pub fn html(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            is_html: true,
        }
    }

    /// Append a signature block unless the body already carries it.
    ///
    /// The HTML flavour is used for HTML templates, the plain one otherwise.
    pub fn with_signature(mut self, plain: Option<&str>, html: Option<&str>) -> Self {
        let signature = if self.is_html { html } else { plain };
        let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return self;
        };
        if self.body.contains(signature) {
            return self;
        }
        let separator = if self.is_html { "<br/><br/>" } else { "\n\n" };
        self.body = format!("{}{}{}", self.body.trim_end(), separator, signature);
        self
    }
}

/// Check the inputs every run needs before touching the network.
pub fn validate_inputs(
    credentials: &Credentials,
    template: &MessageTemplate,
) -> Result<(), ConfigError> {
    if credentials.account.trim().is_empty() {
        return Err(missing("account", "Set it in the config file or RESPONDER_ACCOUNT."));
    }
    if credentials.secret.expose_secret().is_empty() {
        return Err(missing("password", "Set it in the config file or RESPONDER_PASSWORD."));
    }
    if template.subject.trim().is_empty() {
        return Err(missing("subject", "The reply needs a subject."));
    }
    if template.body.trim().is_empty() {
        return Err(missing("body", "The reply needs a message body."));
    }
    Ok(())
}

fn missing(key: &str, hint: &str) -> ConfigError {
    ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    }
}

/// On-disk shape of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    account: String,
    password: String,
    subject: String,
    body: String,
    profile: Option<String>,
    is_html: bool,
    signature: Option<String>,
    html_signature: Option<String>,
    dedup_ledger: Option<PathBuf>,
    sent_ledger: Option<PathBuf>,
    recipients: Option<PathBuf>,
    interval_secs: Option<u64>,
}

/// Resolved responder configuration.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub account: String,
    pub password: SecretString,
    pub subject: String,
    pub body: String,
    pub profile: String,
    pub is_html: bool,
    pub signature: Option<String>,
    pub html_signature: Option<String>,
    pub dedup_ledger: PathBuf,
    pub sent_ledger: PathBuf,
    pub recipients: PathBuf,
    pub interval: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl ResponderConfig {
    fn from_file(file: ConfigFile) -> Self {
        Self {
            account: file.account.trim().to_string(),
            password: SecretString::from(file.password),
            subject: file.subject,
            body: file.body,
            profile: file
                .profile
                .unwrap_or_else(|| profiles::DEFAULT_PROFILE.to_string()),
            is_html: file.is_html,
            signature: file.signature,
            html_signature: file.html_signature,
            dedup_ledger: file
                .dedup_ledger
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEDUP_LEDGER)),
            sent_ledger: file
                .sent_ledger
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SENT_LEDGER)),
            recipients: file
                .recipients
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECIPIENTS)),
            interval: Duration::from_secs(
                file.interval_secs
                    .unwrap_or(SchedulerConfig::default().interval.as_secs()),
            ),
        }
    }

    /// Parse a config from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if file.interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "interval_secs".into(),
                message: "must be at least one second".into(),
            });
        }
        Ok(Self::from_file(file))
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Override account, password and profile from the environment.
    pub fn apply_env(mut self) -> Self {
        if let Ok(account) = std::env::var("RESPONDER_ACCOUNT") {
            self.account = account.trim().to_string();
        }
        if let Ok(password) = std::env::var("RESPONDER_PASSWORD") {
            self.password = SecretString::from(password);
        }
        if let Ok(profile) = std::env::var("RESPONDER_PROFILE") {
            self.profile = profile;
        }
        self
    }

    /// Resolve the configured server profile.
    pub fn profile(&self) -> Result<&'static ServerProfile, ConfigError> {
        profiles::lookup(&self.profile)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            account: self.account.clone(),
            secret: self.password.clone(),
        }
    }

    /// The message template with the configured signature appended.
    pub fn template(&self) -> MessageTemplate {
        MessageTemplate {
            subject: self.subject.trim().to_string(),
            body: self.body.clone(),
            is_html: self.is_html,
        }
        .with_signature(self.signature.as_deref(), self.html_signature.as_deref())
    }

    /// Full pre-flight check: profile exists and required fields are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile()?;
        validate_inputs(&self.credentials(), &self.template())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.interval,
            ..SchedulerConfig::default()
        }
    }
}

/// Continuous-mode timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wait between two passes.
    pub interval: Duration,
    /// Slice of the wait after which a stop request is noticed.
    pub increment: Duration,
    /// Cooldown after a failed pass, in increments.
    pub error_cooldown_factor: u32,
}

impl SchedulerConfig {
    /// Wait applied after a pass that failed to reach the servers.
    pub fn error_cooldown(&self) -> Duration {
        self.increment * self.error_cooldown_factor
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            increment: Duration::from_secs(1),
            error_cooldown_factor: 10,
        }
    }
}
