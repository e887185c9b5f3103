//! Error types for the transfer engine
//!
//! Three native status-code domains (engine, scheduler, shared state) plus
//! cancellation and usage errors are unified into one reportable
//! [`TransferError`]. The numeric code and native description of each domain
//! are preserved, and the last HTTP/FTP response code seen on the transfer is
//! attached as auxiliary context when available.

use thiserror::Error;
use url::Url;

/// Per-transfer engine status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EngineCode {
    /// The URL scheme is not handled by this engine.
    UnsupportedScheme = 1,
    /// The URL could not be interpreted.
    UrlMalformed = 3,
    /// Hostname resolution failed.
    CouldntResolveHost = 6,
    /// TCP connection could not be established.
    CouldntConnect = 7,
    /// The server reply could not be parsed.
    WeirdServerReply = 8,
    /// The body ended before the announced length was received.
    PartialFile = 18,
    /// The upload data source failed or ended early.
    UploadFailed = 25,
    /// Reading from the upload data source failed.
    ReadError = 26,
    /// The transfer exceeded its configured timeout.
    OperationTimedOut = 28,
    /// A callback asked the engine to abort the transfer.
    AbortedByCallback = 42,
    /// Sending request data failed.
    SendError = 55,
    /// Receiving response data failed.
    RecvError = 56,
    /// The remote host's key was rejected by the fingerprint check.
    PeerVerificationFailed = 60,
}

impl EngineCode {
    /// The numeric code within the engine domain.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Native description for the code.
    pub fn description(self) -> &'static str {
        match self {
            EngineCode::UnsupportedScheme => "unsupported URL scheme",
            EngineCode::UrlMalformed => "URL using bad or illegal format",
            EngineCode::CouldntResolveHost => "couldn't resolve host name",
            EngineCode::CouldntConnect => "couldn't connect to server",
            EngineCode::WeirdServerReply => "weird server reply",
            EngineCode::PartialFile => "transferred a partial file",
            EngineCode::UploadFailed => "upload failed",
            EngineCode::ReadError => "failed reading the upload data",
            EngineCode::OperationTimedOut => "operation timed out",
            EngineCode::AbortedByCallback => "aborted by callback",
            EngineCode::SendError => "failure sending network data",
            EngineCode::RecvError => "failure receiving network data",
            EngineCode::PeerVerificationFailed => "host key verification failed",
        }
    }
}

/// Multi-transfer coordination status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SchedulerCode {
    /// The scheduler was shut down before the handle could be serviced.
    ShutDown = 1,
    /// The scheduler hit an internal fault while servicing the handle.
    Internal = 2,
}

impl SchedulerCode {
    /// The numeric code within the scheduler domain.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Native description for the code.
    pub fn description(self) -> &'static str {
        match self {
            SchedulerCode::ShutDown => "scheduler is shut down",
            SchedulerCode::Internal => "internal scheduler error",
        }
    }
}

/// Shared session-state status codes (known-hosts store and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SharedStateCode {
    /// Reading the shared store failed.
    StoreRead = 1,
    /// Writing the shared store failed.
    StoreWrite = 2,
    /// A shared store entry could not be interpreted.
    InvalidEntry = 3,
}

impl SharedStateCode {
    /// The numeric code within the shared-state domain.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Native description for the code.
    pub fn description(self) -> &'static str {
        match self {
            SharedStateCode::StoreRead => "failed reading shared state",
            SharedStateCode::StoreWrite => "failed writing shared state",
            SharedStateCode::InvalidEntry => "invalid shared state entry",
        }
    }
}

/// Which domain produced a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// Per-transfer engine failure.
    Engine(EngineCode),
    /// Multi-transfer coordination failure.
    Scheduler(SchedulerCode),
    /// Shared session-state failure.
    SharedState(SharedStateCode),
    /// The transfer was cancelled cooperatively.
    Cancelled,
    /// Invalid library usage (bad construction arguments).
    Usage,
}

/// The unified, reportable transfer error.
///
/// Delivered to the delegate's failure callback exactly once per failed
/// transfer. Construction-time usage errors are returned directly instead.
#[derive(Debug, Clone, Error)]
#[error("{description}")]
pub struct TransferError {
    kind: TransferErrorKind,
    description: String,
    response_code: u16,
    failing_url: Option<Url>,
}

impl TransferError {
    /// An engine-domain error with an optional detail message.
    pub fn engine(code: EngineCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let description = if detail.is_empty() {
            format!("{} (engine error {})", code.description(), code.code())
        } else {
            format!(
                "{} (engine error {}): {}",
                code.description(),
                code.code(),
                detail
            )
        };
        Self {
            kind: TransferErrorKind::Engine(code),
            description,
            response_code: 0,
            failing_url: None,
        }
    }

    /// A scheduler-domain error.
    pub fn scheduler(code: SchedulerCode) -> Self {
        Self {
            kind: TransferErrorKind::Scheduler(code),
            description: format!("{} (scheduler error {})", code.description(), code.code()),
            response_code: 0,
            failing_url: None,
        }
    }

    /// A shared-state-domain error with an optional detail message.
    pub fn shared_state(code: SharedStateCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let description = if detail.is_empty() {
            format!("{} (shared state error {})", code.description(), code.code())
        } else {
            format!(
                "{} (shared state error {}): {}",
                code.description(),
                code.code(),
                detail
            )
        };
        Self {
            kind: TransferErrorKind::SharedState(code),
            description,
            response_code: 0,
            failing_url: None,
        }
    }

    /// The distinct cancellation error.
    pub fn cancelled() -> Self {
        Self {
            kind: TransferErrorKind::Cancelled,
            description: "transfer was cancelled".to_string(),
            response_code: 0,
            failing_url: None,
        }
    }

    /// An invalid-usage error (bad construction arguments).
    pub fn usage(detail: impl Into<String>) -> Self {
        Self {
            kind: TransferErrorKind::Usage,
            description: format!("invalid usage: {}", detail.into()),
            response_code: 0,
            failing_url: None,
        }
    }

    /// Attach the last seen HTTP/FTP response code, if not already set.
    pub fn with_response_code(mut self, code: u16) -> Self {
        if self.response_code == 0 {
            self.response_code = code;
        }
        self
    }

    /// Attach the failing URL, if not already set.
    pub fn with_url(mut self, url: Url) -> Self {
        if self.failing_url.is_none() {
            self.failing_url = Some(url);
        }
        self
    }

    /// The originating domain and code.
    pub fn kind(&self) -> TransferErrorKind {
        self.kind
    }

    /// The HTTP/FTP response code attached to this error, 0 if none.
    pub fn response_code(&self) -> u16 {
        self.response_code
    }

    /// The URL of the failing transfer, when known.
    pub fn failing_url(&self) -> Option<&Url> {
        self.failing_url.as_ref()
    }

    /// Whether this error reports a cooperative cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, TransferErrorKind::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_preserves_code_and_description() {
        let err = TransferError::engine(EngineCode::CouldntConnect, "connection refused");
        assert_eq!(
            err.kind(),
            TransferErrorKind::Engine(EngineCode::CouldntConnect)
        );
        assert!(err.to_string().contains("couldn't connect to server"));
        assert!(err.to_string().contains("engine error 7"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn response_code_defaults_to_zero() {
        let err = TransferError::engine(EngineCode::RecvError, "");
        assert_eq!(err.response_code(), 0);
        let err = err.with_response_code(404);
        assert_eq!(err.response_code(), 404);
        // First attachment wins
        let err = err.with_response_code(500);
        assert_eq!(err.response_code(), 404);
    }

    #[test]
    fn cancellation_is_its_own_kind() {
        let err = TransferError::cancelled();
        assert!(err.is_cancellation());
        assert_eq!(err.kind(), TransferErrorKind::Cancelled);
        assert!(!TransferError::usage("nope").is_cancellation());
    }

    #[test]
    fn failing_url_is_attached_once() {
        let first = Url::parse("http://one.example/").unwrap();
        let second = Url::parse("http://two.example/").unwrap();
        let err = TransferError::scheduler(SchedulerCode::ShutDown)
            .with_url(first.clone())
            .with_url(second);
        assert_eq!(err.failing_url(), Some(&first));
    }

    #[test]
    fn scheduler_and_shared_state_codes() {
        assert_eq!(SchedulerCode::ShutDown.code(), 1);
        assert_eq!(SharedStateCode::StoreWrite.code(), 2);
        let err = TransferError::shared_state(SharedStateCode::StoreWrite, "disk full");
        assert!(err.to_string().contains("shared state error 2"));
    }
}
