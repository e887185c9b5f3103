//! Shared types for Towline
//!
//! This crate contains the plain data structures exchanged between the
//! transfer engine and its callers: responses, transfer states, credentials,
//! host-key material, and debug info categories.

use std::collections::BTreeMap;
use std::fmt;
use url::Url;

// ============================================================================
// Transfer State
// ============================================================================

/// Lifecycle state of a transfer.
///
/// A transfer starts `Running`, may move to `Canceling` after an explicit
/// cancel request, and always ends `Completed`. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    /// The transfer is actively being serviced.
    Running = 0,
    /// Cancel was requested; the engine is unwinding in-flight I/O.
    Canceling = 1,
    /// The transfer reached its terminal state (success, failure, or cancel).
    Completed = 2,
}

impl TransferState {
    /// Decode a state from its stored byte representation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TransferState::Running),
            1 => Some(TransferState::Canceling),
            2 => Some(TransferState::Completed),
            _ => None,
        }
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Case-insensitive header map.
///
/// Names are stored lowercased. Inserting a name that is already present
/// folds the values into one entry joined with `", "` rather than silently
/// overwriting the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, folding duplicates with `", "`.
    pub fn insert(&mut self, name: &str, value: &str) {
        let key = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.entries.insert(key, value.to_string());
            }
        }
    }

    /// Append text to the most recently inserted value for `name`.
    ///
    /// Used for folded continuation lines; a single space joins the parts.
    pub fn append_to(&mut self, name: &str, continuation: &str) {
        let key = name.trim().to_ascii_lowercase();
        if let Some(existing) = self.entries.get_mut(&key) {
            existing.push(' ');
            existing.push_str(continuation.trim());
        }
    }

    /// Look up a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether a header with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// Response
// ============================================================================

/// Parsed response metadata for one header section of a transfer.
///
/// Built once per header section at the header/body boundary and immutable
/// afterwards. Interim sections (1xx-style) each produce their own value.
#[derive(Debug, Clone)]
pub struct Response {
    url: Url,
    status_code: u16,
    headers: Headers,
}

impl Response {
    /// Assemble a response from its parts.
    pub fn new(url: Url, status_code: u16, headers: Headers) -> Self {
        Self {
            url,
            status_code,
            headers,
        }
    }

    /// The URL this response belongs to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Numeric status code (HTTP or FTP style). 0 when none could be parsed.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// The response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether this is an informational (1xx) section.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status_code)
    }
}

// ============================================================================
// Credential
// ============================================================================

/// A username/password pair used for request authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the password itself
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Host Keys & Fingerprints
// ============================================================================

/// Algorithm family of a host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyKind {
    Rsa,
    Dss,
    Ecdsa,
    Ed25519,
    Unknown,
}

impl HostKeyKind {
    /// Short lowercase name, used in the known-hosts line format.
    pub fn name(&self) -> &'static str {
        match self {
            HostKeyKind::Rsa => "rsa",
            HostKeyKind::Dss => "dss",
            HostKeyKind::Ecdsa => "ecdsa",
            HostKeyKind::Ed25519 => "ed25519",
            HostKeyKind::Unknown => "unknown",
        }
    }

    /// Parse a name produced by [`HostKeyKind::name`].
    pub fn parse(name: &str) -> Self {
        match name {
            "rsa" => HostKeyKind::Rsa,
            "dss" => HostKeyKind::Dss,
            "ecdsa" => HostKeyKind::Ecdsa,
            "ed25519" => HostKeyKind::Ed25519,
            _ => HostKeyKind::Unknown,
        }
    }
}

/// Raw host key material presented by a remote host or recalled from a
/// known-hosts store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    kind: HostKeyKind,
    data: Vec<u8>,
}

impl HostKey {
    pub fn new(kind: HostKeyKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> HostKeyKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Outcome of comparing a presented host key against the known-hosts store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintMatch {
    /// The presented key equals the stored key for this host.
    Match,
    /// The host is known but presented a different key.
    Mismatch,
    /// The host has no entry in the store.
    Missing,
    /// No known-hosts store is configured for this transfer.
    NoKnownHosts,
}

/// Caller decision for a host-fingerprint check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintDisposition {
    /// Continue the transfer.
    Accept,
    /// Continue and record the presented key in the known-hosts store.
    AcceptAndPersist,
    /// Abort the transfer with a peer-verification failure.
    Reject,
}

// ============================================================================
// Debug Info
// ============================================================================

/// Category of a debug information callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    /// Free-form status text from the engine.
    Text,
    /// A raw header line received from the remote host.
    HeaderIn,
    /// Header data sent to the remote host.
    HeaderOut,
    /// Body data received.
    DataIn,
    /// Body data sent.
    DataOut,
}

impl InfoKind {
    /// Human-readable name for the category.
    pub fn name(&self) -> &'static str {
        match self {
            InfoKind::Text => "text",
            InfoKind::HeaderIn => "header-in",
            InfoKind::HeaderOut => "header-out",
            InfoKind::DataIn => "data-in",
            InfoKind::DataOut => "data-out",
        }
    }
}
