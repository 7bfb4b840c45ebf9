//! Recipient book for bulk dispatch.
//!
//! Persisted as a pretty-printed JSON array. The dispatcher only ever sees
//! the selected addresses; everything else here is bookkeeping for the
//! front end.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

fn default_selected() -> bool {
    true
}

/// One entry of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

impl Recipient {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            display_name: display_name.into().trim().to_string(),
            selected: true,
        }
    }

    /// Display name, falling back to the local part of the address.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.email.split('@').next().unwrap_or(&self.email)
        } else {
            &self.display_name
        }
    }
}

/// Addresses of the selected entries, in book order.
pub fn selected_addresses(recipients: &[Recipient]) -> Vec<String> {
    recipients
        .iter()
        .filter(|r| r.selected)
        .map(|r| r.email.clone())
        .collect()
}

/// Loose acceptance check used on entry: must contain `@` and `.`.
pub fn looks_like_email(email: &str) -> bool {
    email.contains('@') && email.contains('.')
}

/// Ordered, case-insensitively unique list of recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientBook {
    entries: Vec<Recipient>,
}

impl RecipientBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the book. A missing file is an empty book.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No recipient book yet");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<Recipient> = serde_json::from_str(&text)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        let mut book = Self::default();
        for entry in entries {
            book.insert(entry);
        }
        Ok(book)
    }

    /// Write the book back as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn entries(&self) -> &[Recipient] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, email: &str) -> bool {
        let email = email.trim();
        self.entries
            .iter()
            .any(|r| r.email.eq_ignore_ascii_case(email))
    }

    fn insert(&mut self, recipient: Recipient) -> bool {
        if recipient.email.is_empty() || self.contains(&recipient.email) {
            return false;
        }
        self.entries.push(recipient);
        true
    }

    /// Add one recipient. Returns `Ok(false)` if the address is already in
    /// the book.
    pub fn add(&mut self, email: &str, display_name: &str) -> Result<bool, ConfigError> {
        let email = email.trim();
        if !looks_like_email(email) {
            return Err(ConfigError::InvalidValue {
                key: "email".into(),
                message: format!("'{email}' is not a valid address"),
            });
        }
        Ok(self.insert(Recipient::new(email, display_name)))
    }

    /// Remove the entry with this address. Returns whether one was removed.
    pub fn remove(&mut self, email: &str) -> bool {
        let email = email.trim();
        let before = self.entries.len();
        self.entries.retain(|r| !r.email.eq_ignore_ascii_case(email));
        before != self.entries.len()
    }

    /// Select or deselect an entry. Returns whether it exists.
    pub fn set_selected(&mut self, email: &str, selected: bool) -> bool {
        let email = email.trim();
        match self
            .entries
            .iter_mut()
            .find(|r| r.email.eq_ignore_ascii_case(email))
        {
            Some(entry) => {
                entry.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Merge `email[,display name]` lines. Blank lines, malformed addresses
    /// and duplicates are skipped. Returns how many entries were added.
    pub fn import_text(&mut self, text: &str) -> usize {
        let mut added = 0;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut parts = line.split(',').map(str::trim);
            let email = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or_default();
            if !looks_like_email(email) {
                debug!(line, "Skipping malformed recipient line");
                continue;
            }
            if self.insert(Recipient::new(email, name)) {
                added += 1;
            }
        }
        info!(added, total = self.entries.len(), "Recipients imported");
        added
    }

    /// Import a text file; see [`RecipientBook::import_text`].
    pub fn import_file(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(self.import_text(&text))
    }

    pub fn selected_addresses(&self) -> Vec<String> {
        selected_addresses(&self.entries)
    }
}
