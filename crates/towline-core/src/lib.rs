//! Towline - asynchronous client-side transfer engine
//!
//! Drives one or more concurrent network transfers to completion and reports
//! everything through a caller-supplied delegate: response metadata, body
//! data, upload progress, completion and failure.
//!
//! A [`Scheduler`] owns one shared poll loop; every transfer registered with
//! it is serviced there. Per transfer, the delegate sees each header
//! section's [`Response`](towline_types::Response) before that section's
//! body data, and exactly one terminal callback (`on_finished` or
//! `on_failed`) last. Callbacks arrive on an arbitrary thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use towline_core::{Scheduler, Transfer, TransferBuilder, TransferDelegate};
//!
//! struct Printer;
//!
//! impl TransferDelegate for Printer {
//!     fn on_data_received(&self, _transfer: &Transfer, data: &[u8]) {
//!         print!("{}", String::from_utf8_lossy(data));
//!     }
//! }
//!
//! # async fn demo() -> Result<(), towline_core::TransferError> {
//! let scheduler = Scheduler::new();
//! let url = url::Url::parse("http://example.com/").expect("static URL");
//! let transfer = TransferBuilder::new(url)
//!     .delegate(Arc::new(Printer))
//!     .start(&scheduler)?;
//! // ... the transfer is now being serviced; cancel with transfer.cancel()
//! # Ok(())
//! # }
//! ```

mod config;
mod delegate;
mod engine;
mod error;
mod fingerprint;
mod handle;
mod response;
mod sync;
mod upload;

pub use config::{set_allows_proxy, set_proxy, set_proxy_credential, ProxyConfig};
pub use delegate::{default_fingerprint_policy, TransferDelegate};
pub use engine::scheduler::Scheduler;
pub use engine::transport::{Connection, TcpTransport, TransferStream, Transport};
pub use error::{
    EngineCode, SchedulerCode, SharedStateCode, TransferError, TransferErrorKind,
};
pub use fingerprint::KnownHosts;
pub use handle::{Transfer, TransferBuilder};
pub use response::build_response;
pub use sync::{perform_blocking, BlockingTransfer};
pub use upload::{BytesUpload, ReaderUpload, UploadSource};

pub use towline_types::{
    Credential, FingerprintDisposition, FingerprintMatch, Headers, HostKey, HostKeyKind, InfoKind,
    Response, TransferState,
};

/// Library version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
