//! Per-transfer protocol driver
//!
//! Owns the transfer-local buffers and walks one transfer through its
//! protocol exchange: connect, host-key check, request head, pull-based
//! upload, raw header-line accumulation (one response per header section),
//! and body framing. All delegate callbacks happen synchronously from here,
//! inside the scheduler's poll pass.
//!
//! Cancellation is cooperative: the handle's state is re-checked at every
//! await point; an idle wait re-checks on a short tick so a cancel never
//! goes unobserved for long.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use towline_types::{Credential, FingerprintDisposition, FingerprintMatch, InfoKind, Response};
use tracing::{debug, trace};
use url::Url;

use crate::delegate::TransferDelegate;
use crate::engine::transport::{Connection, Transport};
use crate::error::{EngineCode, TransferError};
use crate::handle::Transfer;
use crate::response::build_response;
use crate::upload::UploadSource;

/// How often an idle I/O wait re-checks the cancel state.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Read/write granularity for body data.
const IO_CHUNK: usize = 16 * 1024;
/// Upper bound on one accumulated header section.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// The scheduler-owned half of a transfer.
///
/// Holds everything only the poll loop touches: the transport, the upload
/// source, and the header-section buffer. Single-writer by construction, so
/// none of it needs locking.
pub(crate) struct TransferDriver {
    handle: Arc<Transfer>,
    transport: Arc<dyn Transport>,
    upload: Option<Box<dyn UploadSource>>,
    header_lines: Vec<String>,
}

impl std::fmt::Debug for TransferDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferDriver")
            .field("handle", &self.handle)
            .field("header_lines", &self.header_lines)
            .finish_non_exhaustive()
    }
}

impl TransferDriver {
    pub(crate) fn new(
        handle: Arc<Transfer>,
        transport: Arc<dyn Transport>,
        upload: Option<Box<dyn UploadSource>>,
    ) -> Self {
        Self {
            handle,
            transport,
            upload,
            header_lines: Vec::new(),
        }
    }

    pub(crate) fn url(&self) -> &Url {
        self.handle.url()
    }

    pub(crate) fn handle_arc(&self) -> Arc<Transfer> {
        self.handle.clone()
    }

    /// Drive the transfer to its terminal outcome.
    pub(crate) async fn run(mut self) -> Result<(), TransferError> {
        let timeout = self.handle.options().timeout;
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.perform()).await {
                Ok(result) => result,
                Err(_) => Err(TransferError::engine(
                    EngineCode::OperationTimedOut,
                    format!("no completion within {:?}", limit),
                )),
            },
            None => self.perform().await,
        }
    }

    async fn perform(&mut self) -> Result<(), TransferError> {
        let handle = self.handle.clone();
        let delegate = handle
            .delegate()
            .ok_or_else(|| TransferError::engine(EngineCode::AbortedByCallback, "delegate gone"))?;
        let url = handle.url().clone();

        if url.scheme() != "http" {
            return Err(TransferError::engine(
                EngineCode::UnsupportedScheme,
                url.scheme(),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransferError::engine(EngineCode::UrlMalformed, "missing host"))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let proxy = handle.options().proxy.clone();
        let (connect_host, connect_port) = match &proxy {
            Some((p, _)) => (p.host.clone(), p.port),
            None => (host.clone(), port),
        };

        delegate.on_debug_info(
            &handle,
            &format!("connecting to {}:{}", connect_host, connect_port),
            InfoKind::Text,
        );
        let connection = checked(&handle, self.transport.connect(&connect_host, connect_port))
            .await??;

        let Connection { stream, peer_key } = connection;
        if let Some(found) = &peer_key {
            self.verify_host_key(&delegate, &host, found)?;
        }

        let mut stream = stream;

        // Request head
        let head = self.request_head(&url, &host, port, proxy.as_ref());
        checked(&handle, stream.write_all(head.as_bytes()))
            .await?
            .map_err(send_error)?;
        delegate.on_debug_info(&handle, &head, InfoKind::HeaderOut);

        // Upload body, pulled on demand
        if let Some(mut source) = self.upload.take() {
            let content_length = source.content_length();
            let chunked = content_length.is_none();
            let mut sent: u64 = 0;
            let mut buf = vec![0u8; IO_CHUNK];

            loop {
                if handle.is_canceling() {
                    // Stop supplying upload data immediately
                    return Err(TransferError::cancelled());
                }
                let n = source.pull(&mut buf).map_err(|e| {
                    TransferError::engine(EngineCode::ReadError, e.to_string())
                })?;
                delegate.on_will_send_body(&handle, n as u64);

                if n == 0 {
                    if chunked {
                        checked(&handle, stream.write_all(b"0\r\n\r\n"))
                            .await?
                            .map_err(send_error)?;
                    }
                    break;
                }

                if let Some(len) = content_length {
                    if sent + n as u64 > len {
                        return Err(TransferError::engine(
                            EngineCode::UploadFailed,
                            format!("source supplied more than the announced {} bytes", len),
                        ));
                    }
                }

                if chunked {
                    let frame = format!("{:x}\r\n", n);
                    checked(&handle, stream.write_all(frame.as_bytes()))
                        .await?
                        .map_err(send_error)?;
                    checked(&handle, stream.write_all(&buf[..n]))
                        .await?
                        .map_err(send_error)?;
                    checked(&handle, stream.write_all(b"\r\n"))
                        .await?
                        .map_err(send_error)?;
                } else {
                    checked(&handle, stream.write_all(&buf[..n]))
                        .await?
                        .map_err(send_error)?;
                }
                sent += n as u64;
                trace!("sent {} upload bytes for {}", sent, url);
            }

            if let Some(len) = content_length {
                if sent != len {
                    return Err(TransferError::engine(
                        EngineCode::UploadFailed,
                        format!("source supplied {} of {} announced bytes", sent, len),
                    ));
                }
            }
        }
        checked(&handle, stream.flush()).await?.map_err(send_error)?;

        // Response: header sections, then body
        let mut reader = BufReader::new(stream);
        let response = self
            .read_header_sections(&handle, &delegate, &url, &mut reader)
            .await?;

        let method = handle.options().method.clone();
        let has_body = !method.eq_ignore_ascii_case("HEAD")
            && response.status_code() != 204
            && response.status_code() != 304;
        if has_body {
            self.read_body(&handle, &delegate, &response, &mut reader)
                .await?;
        }

        Ok(())
    }

    /// Read raw header lines until a non-interim section completes.
    ///
    /// Every blank-line boundary produces its own response delivery; interim
    /// (1xx-style) sections reset the buffer and the accumulation repeats.
    async fn read_header_sections<R: AsyncBufRead + Unpin>(
        &mut self,
        handle: &Arc<Transfer>,
        delegate: &Arc<dyn TransferDelegate>,
        url: &Url,
        reader: &mut R,
    ) -> Result<Response, TransferError> {
        let mut section_bytes = 0usize;

        loop {
            let line = checked(handle, read_header_line(reader))
                .await?
                .map_err(recv_error)?;
            let Some(line) = line else {
                return Err(TransferError::engine(
                    EngineCode::WeirdServerReply,
                    "connection closed before headers completed",
                ));
            };

            if line.is_empty() {
                if self.header_lines.is_empty() {
                    // Tolerate stray blank lines before the status line
                    continue;
                }
                let response =
                    build_response(url, &self.header_lines, handle.last_response_code());
                handle.note_response_code(response.status_code());
                self.header_lines.clear();
                section_bytes = 0;

                delegate.on_response_received(handle, &response);

                if response.is_interim() && response.status_code() != 101 {
                    debug!("interim response {} for {}", response.status_code(), url);
                    continue;
                }
                return Ok(response);
            }

            section_bytes += line.len();
            if section_bytes > MAX_HEADER_BYTES {
                return Err(TransferError::engine(
                    EngineCode::WeirdServerReply,
                    "header section too large",
                ));
            }
            delegate.on_debug_info(handle, &line, InfoKind::HeaderIn);
            self.header_lines.push(line);
        }
    }

    /// Read the body with whatever framing the response announced.
    async fn read_body<R: AsyncBufRead + Unpin>(
        &mut self,
        handle: &Arc<Transfer>,
        delegate: &Arc<dyn TransferDelegate>,
        response: &Response,
        reader: &mut R,
    ) -> Result<(), TransferError> {
        let chunked = response
            .headers()
            .get("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);

        if chunked {
            return self.read_chunked_body(handle, delegate, reader).await;
        }

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        match content_length {
            Some(length) => self.read_sized_body(handle, delegate, reader, length).await,
            None => self.read_body_to_eof(handle, delegate, reader).await,
        }
    }

    async fn read_sized_body<R: AsyncBufRead + Unpin>(
        &mut self,
        handle: &Arc<Transfer>,
        delegate: &Arc<dyn TransferDelegate>,
        reader: &mut R,
        length: u64,
    ) -> Result<(), TransferError> {
        let mut remaining = length;
        let mut buf = vec![0u8; IO_CHUNK];
        while remaining > 0 {
            let want = remaining.min(IO_CHUNK as u64) as usize;
            let n = checked(handle, reader.read(&mut buf[..want]))
                .await?
                .map_err(recv_error)?;
            if n == 0 {
                return Err(TransferError::engine(
                    EngineCode::PartialFile,
                    format!("{} of {} body bytes missing", remaining, length),
                ));
            }
            forward_data(handle, delegate, &buf[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    async fn read_body_to_eof<R: AsyncBufRead + Unpin>(
        &mut self,
        handle: &Arc<Transfer>,
        delegate: &Arc<dyn TransferDelegate>,
        reader: &mut R,
    ) -> Result<(), TransferError> {
        let mut buf = vec![0u8; IO_CHUNK];
        loop {
            let n = checked(handle, reader.read(&mut buf))
                .await?
                .map_err(recv_error)?;
            if n == 0 {
                return Ok(());
            }
            forward_data(handle, delegate, &buf[..n])?;
        }
    }

    async fn read_chunked_body<R: AsyncBufRead + Unpin>(
        &mut self,
        handle: &Arc<Transfer>,
        delegate: &Arc<dyn TransferDelegate>,
        reader: &mut R,
    ) -> Result<(), TransferError> {
        let mut buf = vec![0u8; IO_CHUNK];
        loop {
            let line = checked(handle, read_header_line(reader))
                .await?
                .map_err(recv_error)?
                .ok_or_else(|| {
                    TransferError::engine(EngineCode::PartialFile, "missing chunk size")
                })?;
            let size_str = line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_str, 16).map_err(|_| {
                TransferError::engine(
                    EngineCode::WeirdServerReply,
                    format!("bad chunk size {:?}", size_str),
                )
            })?;

            if size == 0 {
                // Trailer section: consume until blank line or EOF
                loop {
                    match checked(handle, read_header_line(reader))
                        .await?
                        .map_err(recv_error)?
                    {
                        None => break,
                        Some(line) if line.is_empty() => break,
                        Some(_) => continue,
                    }
                }
                return Ok(());
            }

            let mut remaining = size;
            while remaining > 0 {
                let want = remaining.min(IO_CHUNK);
                let n = checked(handle, reader.read(&mut buf[..want]))
                    .await?
                    .map_err(recv_error)?;
                if n == 0 {
                    return Err(TransferError::engine(
                        EngineCode::PartialFile,
                        format!("chunk truncated, {} bytes missing", remaining),
                    ));
                }
                forward_data(handle, delegate, &buf[..n])?;
                remaining -= n;
            }

            // Chunk data is followed by its own CRLF
            let terminator = checked(handle, read_header_line(reader))
                .await?
                .map_err(recv_error)?;
            match terminator {
                Some(line) if line.is_empty() => {}
                _ => {
                    return Err(TransferError::engine(
                        EngineCode::WeirdServerReply,
                        "missing chunk terminator",
                    ));
                }
            }
        }
    }

    /// Run the delegate-mediated fingerprint decision for a presented key.
    fn verify_host_key(
        &self,
        delegate: &Arc<dyn TransferDelegate>,
        host: &str,
        found: &towline_types::HostKey,
    ) -> Result<(), TransferError> {
        let store = self.handle.options().known_hosts.clone();
        let (match_kind, known) = match &store {
            Some(store) => store.classify(host, found),
            None => (FingerprintMatch::NoKnownHosts, None),
        };

        let disposition =
            delegate.on_host_fingerprint(&self.handle, found, known.as_ref(), match_kind);
        debug!(
            "host fingerprint for {}: {:?} -> {:?}",
            host, match_kind, disposition
        );

        match disposition {
            FingerprintDisposition::Accept => Ok(()),
            FingerprintDisposition::AcceptAndPersist => {
                if let Some(store) = &store {
                    store.persist(host, found)?;
                }
                Ok(())
            }
            FingerprintDisposition::Reject => Err(TransferError::engine(
                EngineCode::PeerVerificationFailed,
                format!("key for {} rejected", host),
            )),
        }
    }

    /// Serialize the request head.
    fn request_head(
        &self,
        url: &Url,
        host: &str,
        port: u16,
        proxy: Option<&(crate::config::ProxyConfig, Option<Credential>)>,
    ) -> String {
        let options = self.handle.options();

        // Proxies get the absolute URL, origin servers the path
        let target = if proxy.is_some() {
            url.as_str().to_string()
        } else {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            if target.is_empty() {
                target.push('/');
            }
            target
        };

        let mut head = format!("{} {} HTTP/1.1\r\n", options.method, target);

        if !options.has_header("host") {
            if port == 80 {
                head.push_str(&format!("Host: {}\r\n", host));
            } else {
                head.push_str(&format!("Host: {}:{}\r\n", host, port));
            }
        }
        if !options.has_header("user-agent") {
            head.push_str(concat!(
                "User-Agent: towline/",
                env!("CARGO_PKG_VERSION"),
                "\r\n"
            ));
        }
        if !options.has_header("accept") {
            head.push_str("Accept: */*\r\n");
        }
        // No connection reuse; EOF framing stays valid for length-less bodies
        head.push_str("Connection: close\r\n");

        if let Some(credential) = self.handle.credential() {
            head.push_str(&format!(
                "Authorization: Basic {}\r\n",
                basic_token(credential)
            ));
        }
        if let Some((_, Some(credential))) = proxy {
            head.push_str(&format!(
                "Proxy-Authorization: Basic {}\r\n",
                basic_token(credential)
            ));
        }

        if let Some(source) = &self.upload {
            match source.content_length() {
                Some(length) => head.push_str(&format!("Content-Length: {}\r\n", length)),
                None => head.push_str("Transfer-Encoding: chunked\r\n"),
            }
        }

        for (name, value) in &options.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }

        head.push_str("\r\n");
        head
    }
}

/// Deliver a body chunk unless the transfer is canceling.
fn forward_data(
    handle: &Arc<Transfer>,
    delegate: &Arc<dyn TransferDelegate>,
    data: &[u8],
) -> Result<(), TransferError> {
    if handle.is_canceling() {
        return Err(TransferError::cancelled());
    }
    delegate.on_data_received(handle, data);
    Ok(())
}

/// Await `fut`, re-checking the cancel state on a short tick while idle.
///
/// The inner future is polled to completion across iterations (never
/// dropped mid-I/O); only a cancel abandons it.
async fn checked<F, T>(handle: &Transfer, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        if handle.is_canceling() {
            return Err(TransferError::cancelled());
        }
        tokio::select! {
            out = &mut fut => return Ok(out),
            _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {}
        }
    }
}

/// Read one CRLF-terminated line, without the terminator. `None` on EOF.
async fn read_header_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    while matches!(raw.last(), Some(&b'\n') | Some(&b'\r')) {
        raw.pop();
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

fn basic_token(credential: &Credential) -> String {
    BASE64_STANDARD.encode(format!(
        "{}:{}",
        credential.username(),
        credential.password()
    ))
}

fn send_error(e: io::Error) -> TransferError {
    TransferError::engine(EngineCode::SendError, e.to_string())
}

fn recv_error(e: io::Error) -> TransferError {
    TransferError::engine(EngineCode::RecvError, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_token_encodes_user_and_password() {
        let token = basic_token(&Credential::new("user", "pass"));
        assert_eq!(token, BASE64_STANDARD.encode("user:pass"));
    }

    #[tokio::test]
    async fn read_header_line_strips_crlf() {
        let data: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(data);
        assert_eq!(
            read_header_line(&mut reader).await.unwrap().as_deref(),
            Some("HTTP/1.1 200 OK")
        );
        assert_eq!(
            read_header_line(&mut reader).await.unwrap().as_deref(),
            Some("Content-Length: 0")
        );
        assert_eq!(
            read_header_line(&mut reader).await.unwrap().as_deref(),
            Some("")
        );
        assert_eq!(read_header_line(&mut reader).await.unwrap(), None);
    }
}
