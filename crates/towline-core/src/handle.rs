//! Transfer handle and builder
//!
//! A [`Transfer`] represents one logical request being driven by a
//! [`Scheduler`](crate::Scheduler). The handle is shared (`Arc`) between the
//! caller and the scheduler's poll loop; the caller side only observes state
//! and requests cancellation, so the handle needs no per-field locks beyond
//! the delegate slot.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use towline_types::{Credential, TransferState};
use tracing::{debug, info};
use url::Url;

use crate::config::{self, ProxyConfig};
use crate::delegate::TransferDelegate;
use crate::engine::driver::TransferDriver;
use crate::engine::scheduler::Scheduler;
use crate::engine::transport::{TcpTransport, Transport};
use crate::error::TransferError;
use crate::fingerprint::KnownHosts;
use crate::upload::UploadSource;

/// Request options resolved at construction time.
pub(crate) struct TransferOptions {
    pub(crate) method: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) proxy: Option<(ProxyConfig, Option<Credential>)>,
    pub(crate) known_hosts: Option<Arc<KnownHosts>>,
}

impl TransferOptions {
    /// Whether the caller supplied a header with this name.
    pub(crate) fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// One logical transfer.
///
/// Created through [`TransferBuilder`]; lives until it reaches
/// [`TransferState::Completed`]. The delegate is retained for the whole
/// active lifetime and released when the terminal callback has been
/// delivered.
pub struct Transfer {
    url: Url,
    credential: Option<Credential>,
    options: TransferOptions,
    state: AtomicU8,
    last_response_code: AtomicU16,
    error: OnceLock<TransferError>,
    delegate: Mutex<Option<Arc<dyn TransferDelegate>>>,
}

impl Transfer {
    /// The target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(TransferState::Completed)
    }

    /// The terminal error, if the transfer failed. `None` while running and
    /// after a successful completion.
    pub fn error(&self) -> Option<TransferError> {
        self.error.get().cloned()
    }

    /// Request cancellation.
    ///
    /// Safe from any thread, idempotent, and cooperative: this only flips the
    /// state; the poll loop observes it at its next iteration and unwinds the
    /// transfer, delivering a single failure callback with a cancellation
    /// error. Calling this on a transfer that is already canceling or
    /// completed is a no-op.
    pub fn cancel(&self) {
        match self.state.compare_exchange(
            TransferState::Running as u8,
            TransferState::Canceling as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => info!("cancel requested for {}", self.url),
            Err(_) => debug!("cancel ignored for {}: not running", self.url),
        }
    }

    pub(crate) fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub(crate) fn options(&self) -> &TransferOptions {
        &self.options
    }

    pub(crate) fn is_canceling(&self) -> bool {
        self.state() == TransferState::Canceling
    }

    pub(crate) fn delegate(&self) -> Option<Arc<dyn TransferDelegate>> {
        self.delegate.lock().clone()
    }

    pub(crate) fn release_delegate(&self) -> Option<Arc<dyn TransferDelegate>> {
        self.delegate.lock().take()
    }

    pub(crate) fn note_response_code(&self, code: u16) {
        self.last_response_code.store(code, Ordering::Release);
    }

    pub(crate) fn last_response_code(&self) -> u16 {
        self.last_response_code.load(Ordering::Acquire)
    }

    /// Move to `Completed`, returning the state the handle was in before.
    pub(crate) fn enter_completed(&self) -> TransferState {
        let prior = self
            .state
            .swap(TransferState::Completed as u8, Ordering::AcqRel);
        TransferState::from_u8(prior).unwrap_or(TransferState::Completed)
    }

    pub(crate) fn record_error(&self, error: TransferError) {
        // Set at most once; later attempts are ignored
        let _ = self.error.set(error);
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// Builder for a [`Transfer`].
///
/// A delegate is required; everything else is optional. `start` registers the
/// transfer with a scheduler and begins servicing it on the next poll pass.
pub struct TransferBuilder {
    url: Url,
    credential: Option<Credential>,
    delegate: Option<Arc<dyn TransferDelegate>>,
    upload: Option<Box<dyn UploadSource>>,
    method: Option<String>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    proxy: Option<(ProxyConfig, Option<Credential>)>,
    known_hosts: Option<Arc<KnownHosts>>,
    transport: Option<Arc<dyn Transport>>,
}

impl TransferBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            credential: None,
            delegate: None,
            upload: None,
            method: None,
            headers: Vec::new(),
            timeout: None,
            proxy: None,
            known_hosts: None,
            transport: None,
        }
    }

    /// Set the delegate that receives this transfer's events. Required.
    pub fn delegate(mut self, delegate: Arc<dyn TransferDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Authenticate the request with this credential.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Override the request method. Defaults to GET, or PUT when an upload
    /// source is attached.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into().to_ascii_uppercase());
        self
    }

    /// Add a request header line.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Fail the transfer with a timeout error if it runs longer than this.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Supply an outbound body from a pull-based source. Switches the
    /// transfer into upload mode.
    pub fn upload(mut self, source: impl UploadSource) -> Self {
        self.upload = Some(Box::new(source));
        self
    }

    /// Route the transfer through an explicit proxy, overriding the global
    /// proxy configuration.
    pub fn proxy(mut self, proxy: ProxyConfig, credential: Option<Credential>) -> Self {
        self.proxy = Some((proxy, credential));
        self
    }

    /// Verify presented host keys against this store.
    pub fn known_hosts(mut self, store: Arc<KnownHosts>) -> Self {
        self.known_hosts = Some(store);
        self
    }

    /// Replace the connection layer. Defaults to plain TCP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the handle and register it with `scheduler`.
    ///
    /// Fails fast with a usage error when the delegate is missing or the URL
    /// has no host; everything else (unsupported scheme, unreachable host)
    /// surfaces through the delegate's failure callback so that every
    /// registered transfer delivers exactly one terminal callback.
    pub fn start(self, scheduler: &Scheduler) -> Result<Arc<Transfer>, TransferError> {
        let (handle, driver) = self.into_parts()?;
        scheduler
            .register(driver)
            .map_err(|e| e.with_url(handle.url().clone()))?;
        Ok(handle)
    }

    /// Split into the shared handle and the scheduler-owned driver half.
    pub(crate) fn into_parts(self) -> Result<(Arc<Transfer>, TransferDriver), TransferError> {
        let delegate = self
            .delegate
            .ok_or_else(|| TransferError::usage("a delegate is required"))?;

        if self.url.host_str().is_none() {
            return Err(TransferError::usage(format!(
                "URL has no host: {}",
                self.url
            )));
        }

        let method = self.method.unwrap_or_else(|| {
            if self.upload.is_some() {
                "PUT".to_string()
            } else {
                "GET".to_string()
            }
        });

        // Global proxy settings apply only when no explicit proxy was given,
        // and are snapshotted here so later changes don't affect this handle.
        let proxy = self.proxy.or_else(config::proxy_snapshot);

        let handle = Arc::new(Transfer {
            url: self.url,
            credential: self.credential,
            options: TransferOptions {
                method,
                headers: self.headers,
                timeout: self.timeout,
                proxy,
                known_hosts: self.known_hosts,
            },
            state: AtomicU8::new(TransferState::Running as u8),
            last_response_code: AtomicU16::new(0),
            error: OnceLock::new(),
            delegate: Mutex::new(Some(delegate)),
        });

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport) as Arc<dyn Transport>);
        let driver = TransferDriver::new(handle.clone(), transport, self.upload);

        Ok((handle, driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferErrorKind;

    struct NoopDelegate;

    impl TransferDelegate for NoopDelegate {
        fn on_data_received(&self, _transfer: &Transfer, _data: &[u8]) {}
    }

    fn builder(url: &str) -> TransferBuilder {
        TransferBuilder::new(Url::parse(url).unwrap())
    }

    #[test]
    fn builder_requires_delegate() {
        let err = builder("http://example.com/").into_parts().unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::Usage);
    }

    #[test]
    fn builder_requires_host() {
        let err = builder("mailto:someone@example.com")
            .delegate(Arc::new(NoopDelegate))
            .into_parts()
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::Usage);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (handle, _driver) = builder("http://example.com/")
            .delegate(Arc::new(NoopDelegate))
            .into_parts()
            .unwrap();

        assert_eq!(handle.state(), TransferState::Running);
        handle.cancel();
        assert_eq!(handle.state(), TransferState::Canceling);
        handle.cancel();
        assert_eq!(handle.state(), TransferState::Canceling);

        assert_eq!(handle.enter_completed(), TransferState::Canceling);
        assert_eq!(handle.state(), TransferState::Completed);
        handle.cancel();
        assert_eq!(handle.state(), TransferState::Completed);
    }

    #[test]
    fn method_defaults_follow_upload_presence() {
        let (handle, _driver) = builder("http://example.com/")
            .delegate(Arc::new(NoopDelegate))
            .into_parts()
            .unwrap();
        assert_eq!(handle.options().method, "GET");

        let (handle, _driver) = builder("http://example.com/")
            .delegate(Arc::new(NoopDelegate))
            .upload(crate::upload::BytesUpload::new(b"body".to_vec()))
            .into_parts()
            .unwrap();
        assert_eq!(handle.options().method, "PUT");

        let (handle, _driver) = builder("http://example.com/")
            .delegate(Arc::new(NoopDelegate))
            .method("head")
            .into_parts()
            .unwrap();
        assert_eq!(handle.options().method, "HEAD");
    }

    #[test]
    fn error_is_recorded_once() {
        let (handle, _driver) = builder("http://example.com/")
            .delegate(Arc::new(NoopDelegate))
            .into_parts()
            .unwrap();

        assert!(handle.error().is_none());
        handle.record_error(TransferError::cancelled());
        handle.record_error(TransferError::usage("second"));
        assert!(handle.error().unwrap().is_cancellation());
    }
}
