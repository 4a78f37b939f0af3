//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Call identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a dialog owned by the dialog layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(String);

impl DialogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to the transport flow a contact was learned on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRef(String);

impl FlowRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address-of-record value object
///
/// Accepts `sip:user@host`, `sips:user@host` and bare `user@host`.
/// Comparison and hashing are case-insensitive; the original spelling is
/// kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aor {
    raw: String,
    user: String,
    host: String,
}

impl Aor {
    pub fn parse(uri: &str) -> Result<Self, String> {
        let raw = uri.trim();
        let without_scheme = raw
            .strip_prefix("sips:")
            .or_else(|| raw.strip_prefix("sip:"))
            .unwrap_or(raw);

        let (user, host_port) = without_scheme
            .split_once('@')
            .ok_or_else(|| format!("Invalid address-of-record: {}", raw))?;

        // Strip URI parameters and port, only user@host identifies the AOR
        let host_port = host_port.split(';').next().unwrap_or_default();
        let host = if host_port.starts_with('[') {
            // IPv6 reference keeps its brackets
            host_port
                .find(']')
                .map(|end| &host_port[..=end])
                .unwrap_or_default()
        } else {
            host_port.split(':').next().unwrap_or_default()
        };

        if user.is_empty() || host.is_empty() {
            return Err(format!("Invalid address-of-record: {}", raw));
        }

        Ok(Self {
            raw: raw.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Lower-cased `user@host`, the store key
    pub fn key(&self) -> String {
        format!("{}@{}", self.user, self.host).to_ascii_lowercase()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Aor {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Aor {}

impl Hash for Aor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Aor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
