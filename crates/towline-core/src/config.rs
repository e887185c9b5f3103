//! Process-wide proxy configuration
//!
//! Consulted once, at transfer construction time: a builder without an
//! explicit proxy snapshots these settings, so later changes never affect
//! transfers already built.

use parking_lot::Mutex;
use towline_types::Credential;

/// An HTTP proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

struct GlobalConfig {
    proxy: Option<ProxyConfig>,
    proxy_credential: Option<Credential>,
    allows_proxy: bool,
}

static GLOBAL: Mutex<GlobalConfig> = Mutex::new(GlobalConfig {
    proxy: None,
    proxy_credential: None,
    allows_proxy: true,
});

/// Set or clear the process-wide proxy endpoint.
pub fn set_proxy(proxy: Option<ProxyConfig>) {
    GLOBAL.lock().proxy = proxy;
}

/// Set or clear the process-wide proxy credential.
pub fn set_proxy_credential(credential: Option<Credential>) {
    GLOBAL.lock().proxy_credential = credential;
}

/// Allow or forbid proxy use for transfers built after this call.
pub fn set_allows_proxy(allows: bool) {
    GLOBAL.lock().allows_proxy = allows;
}

/// Snapshot of the proxy settings as seen at construction time.
pub(crate) fn proxy_snapshot() -> Option<(ProxyConfig, Option<Credential>)> {
    let global = GLOBAL.lock();
    if !global.allows_proxy {
        return None;
    }
    global
        .proxy
        .clone()
        .map(|proxy| (proxy, global.proxy_credential.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests mutate process-global state; they restore defaults before
    // returning so other unit tests in this binary are unaffected.
    #[test]
    fn snapshot_respects_allows_proxy() {
        set_proxy(Some(ProxyConfig::new("proxy.local", 8080)));
        set_proxy_credential(Some(Credential::new("u", "p")));

        let snapshot = proxy_snapshot();
        assert!(snapshot.is_some());
        let (proxy, credential) = snapshot.unwrap();
        assert_eq!(proxy, ProxyConfig::new("proxy.local", 8080));
        assert_eq!(credential, Some(Credential::new("u", "p")));

        set_allows_proxy(false);
        assert!(proxy_snapshot().is_none());

        set_allows_proxy(true);
        set_proxy(None);
        set_proxy_credential(None);
        assert!(proxy_snapshot().is_none());
    }
}
