//! Known-hosts store for host-fingerprint checks
//!
//! Supports a simple line format, one entry per line:
//! `hostname keykind base64(keydata)`. Lookups classify a presented key
//! against the stored entry for the host; persisting appends only if the
//! exact key is not already present.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::prelude::*;
use parking_lot::Mutex;
use towline_types::{FingerprintMatch, HostKey, HostKeyKind};
use tracing::{debug, warn};

use crate::error::{SharedStateCode, TransferError};

struct KnownHostEntry {
    host: String,
    key: HostKey,
}

/// Shared store of trusted host keys.
///
/// Shared across transfers (wrap in `Arc`); lookups and persists are
/// internally locked. Failures reading or writing the backing file surface
/// as shared-state-domain errors.
#[derive(Default)]
pub struct KnownHosts {
    entries: Mutex<Vec<KnownHostEntry>>,
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// Create an empty in-memory store with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from `path`, creating an empty store if the file does
    /// not exist. The path is remembered so persisted keys are appended.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let mut entries = Vec::new();

        if path.exists() {
            let file = fs::File::open(path).map_err(|e| {
                TransferError::shared_state(
                    SharedStateCode::StoreRead,
                    format!("{}: {}", path.display(), e),
                )
            })?;
            let reader = BufReader::new(file);

            for (line_num, line) in reader.lines().enumerate() {
                let line = line.map_err(|e| {
                    TransferError::shared_state(
                        SharedStateCode::StoreRead,
                        format!("{}: {}", path.display(), e),
                    )
                })?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match parse_entry(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        // Bad entries are skipped, not fatal
                        debug!(
                            "skipping known-hosts entry at {}:{}: {}",
                            path.display(),
                            line_num + 1,
                            e
                        );
                    }
                }
            }
            debug!(
                "loaded {} known-hosts entries from {}",
                entries.len(),
                path.display()
            );
        }

        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path.to_path_buf()),
        })
    }

    /// Record a trusted key for `host` in memory only.
    pub fn add(&self, host: &str, key: HostKey) {
        self.entries.lock().push(KnownHostEntry {
            host: host.to_string(),
            key,
        });
    }

    /// Classify a presented key against the stored entries for `host`.
    ///
    /// Returns the match kind together with the stored key, when one exists.
    pub fn classify(&self, host: &str, found: &HostKey) -> (FingerprintMatch, Option<HostKey>) {
        let entries = self.entries.lock();
        let mut known = None;

        for entry in entries.iter().filter(|e| e.host == host) {
            if entry.key == *found {
                return (FingerprintMatch::Match, Some(entry.key.clone()));
            }
            known = Some(entry.key.clone());
        }

        match known {
            Some(key) => (FingerprintMatch::Mismatch, Some(key)),
            None => (FingerprintMatch::Missing, None),
        }
    }

    /// Persist a key for `host`, appending to the backing file when one is
    /// configured. Appends only if the exact key is not already present.
    pub fn persist(&self, host: &str, key: &HostKey) -> Result<(), TransferError> {
        {
            let mut entries = self.entries.lock();
            let already_present = entries
                .iter()
                .any(|e| e.host == host && e.key == *key);
            if already_present {
                return Ok(());
            }
            entries.push(KnownHostEntry {
                host: host.to_string(),
                key: key.clone(),
            });
        }

        if let Some(path) = &self.path {
            let line = format_entry(host, key);
            append_line(path, &line).map_err(|e| {
                warn!("failed persisting host key for {}: {}", host, e);
                TransferError::shared_state(
                    SharedStateCode::StoreWrite,
                    format!("{}: {}", path.display(), e),
                )
            })?;
            debug!("persisted host key for {} to {}", host, path.display());
        }

        Ok(())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

fn format_entry(host: &str, key: &HostKey) -> String {
    format!(
        "{} {} {}\n",
        host,
        key.kind().name(),
        BASE64_STANDARD.encode(key.data())
    )
}

fn parse_entry(line: &str) -> Result<KnownHostEntry, String> {
    let mut parts = line.split_whitespace();
    let host = parts.next().ok_or("missing host")?;
    let kind = parts.next().ok_or("missing key kind")?;
    let data = parts.next().ok_or("missing key data")?;

    let data = BASE64_STANDARD
        .decode(data)
        .map_err(|e| format!("invalid key encoding: {}", e))?;

    Ok(KnownHostEntry {
        host: host.to_string(),
        key: HostKey::new(HostKeyKind::parse(kind), data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn key(data: &[u8]) -> HostKey {
        HostKey::new(HostKeyKind::Ed25519, data.to_vec())
    }

    #[test]
    fn classify_match_mismatch_missing() {
        let store = KnownHosts::new();
        store.add("example.com", key(b"abc"));

        let (matched, known) = store.classify("example.com", &key(b"abc"));
        assert_eq!(matched, FingerprintMatch::Match);
        assert_eq!(known, Some(key(b"abc")));

        let (matched, known) = store.classify("example.com", &key(b"def"));
        assert_eq!(matched, FingerprintMatch::Mismatch);
        assert_eq!(known, Some(key(b"abc")));

        let (matched, known) = store.classify("other.com", &key(b"abc"));
        assert_eq!(matched, FingerprintMatch::Missing);
        assert_eq!(known, None);
    }

    #[test]
    fn persist_skips_duplicates() {
        let store = KnownHosts::new();
        store.persist("example.com", &key(b"abc")).unwrap();
        store.persist("example.com", &key(b"abc")).unwrap();
        assert_eq!(store.len(), 1);

        store.persist("example.com", &key(b"def")).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn load_and_persist_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let store = KnownHosts::load(file.path()).unwrap();
        assert!(store.is_empty());

        store.persist("example.com", &key(b"abc")).unwrap();
        drop(store);

        let reloaded = KnownHosts::load(file.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        let (matched, _) = reloaded.classify("example.com", &key(b"abc"));
        assert_eq!(matched, FingerprintMatch::Match);
    }

    #[test]
    fn load_skips_comments_and_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# trusted hosts").unwrap();
        writeln!(file, "not-a-valid-entry").unwrap();
        writeln!(
            file,
            "example.com ed25519 {}",
            BASE64_STANDARD.encode(b"abc")
        )
        .unwrap();
        file.flush().unwrap();

        let store = KnownHosts::load(file.path()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnownHosts::load(dir.path().join("known_hosts")).unwrap();
        assert!(store.is_empty());
    }
}
