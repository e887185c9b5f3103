//! Delegate callback contract
//!
//! Callers receive transfer events through a [`TransferDelegate`]. Only the
//! data callback is required; every other hook has a default implementation.
//! Callbacks are invoked synchronously from the scheduler's execution
//! context, on an arbitrary thread; hand off to a specific thread yourself
//! if you need affinity, and return quickly: a slow callback stalls every
//! other transfer sharing the scheduler.

use towline_types::{FingerprintDisposition, FingerprintMatch, HostKey, InfoKind, Response};

use crate::error::TransferError;
use crate::handle::Transfer;

/// Callback target for transfer events.
///
/// The transfer retains its delegate for its whole active lifetime and
/// releases it when the terminal callback has been delivered.
pub trait TransferDelegate: Send + Sync {
    /// Required. A chunk of response body data arrived.
    fn on_data_received(&self, transfer: &Transfer, data: &[u8]);

    /// A header section completed and was parsed into a response.
    ///
    /// Delivered before any body data of that section; interim (1xx-style)
    /// sections each produce their own call.
    fn on_response_received(&self, _transfer: &Transfer, _response: &Response) {}

    /// The transfer completed successfully. Terminal; delivered exactly once.
    fn on_finished(&self, _transfer: &Transfer) {}

    /// The transfer failed (including cancellation). Terminal; delivered
    /// exactly once.
    fn on_failed(&self, _transfer: &Transfer, _error: &TransferError) {}

    /// Body data is about to be sent. `bytes_written` is 0 when the last
    /// chunk has been supplied, so upload completion can be anticipated.
    fn on_will_send_body(&self, _transfer: &Transfer, _bytes_written: u64) {}

    /// Debug/status information from the engine.
    fn on_debug_info(&self, _transfer: &Transfer, _text: &str, _kind: InfoKind) {}

    /// Decide how to treat a host key presented by the remote host.
    ///
    /// `known` is the stored key for this host, when one exists. The default
    /// accepts only an exact match and rejects everything else; do not weaken
    /// this without understanding the consequences.
    fn on_host_fingerprint(
        &self,
        _transfer: &Transfer,
        _found: &HostKey,
        _known: Option<&HostKey>,
        match_kind: FingerprintMatch,
    ) -> FingerprintDisposition {
        default_fingerprint_policy(match_kind)
    }
}

/// The default host-fingerprint policy: accept only an exact match.
pub fn default_fingerprint_policy(match_kind: FingerprintMatch) -> FingerprintDisposition {
    match match_kind {
        FingerprintMatch::Match => FingerprintDisposition::Accept,
        FingerprintMatch::Mismatch
        | FingerprintMatch::Missing
        | FingerprintMatch::NoKnownHosts => FingerprintDisposition::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_accepts_only_exact_match() {
        assert_eq!(
            default_fingerprint_policy(FingerprintMatch::Match),
            FingerprintDisposition::Accept
        );
        assert_eq!(
            default_fingerprint_policy(FingerprintMatch::Mismatch),
            FingerprintDisposition::Reject
        );
        assert_eq!(
            default_fingerprint_policy(FingerprintMatch::Missing),
            FingerprintDisposition::Reject
        );
        assert_eq!(
            default_fingerprint_policy(FingerprintMatch::NoKnownHosts),
            FingerprintDisposition::Reject
        );
    }
}
