//! Pull-based upload data supply
//!
//! The engine pulls outbound body bytes on demand rather than having the
//! caller push them. Every pull is reported to the delegate before the bytes
//! hit the wire; a pull returning 0 is the terminal no-more-data signal and
//! announces the last chunk.

use std::io::{self, Read};

/// A pull-based source of outbound body bytes.
///
/// Implementations are consumed incrementally from the scheduler's execution
/// context; `pull` must not block indefinitely, since it stalls every other
/// transfer sharing the scheduler.
pub trait UploadSource: Send + 'static {
    /// Fill `buf` with up to `buf.len()` bytes of body data.
    ///
    /// Returns the number of bytes supplied; `Ok(0)` signals that the source
    /// has no more data.
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Total body length, when known in advance.
    ///
    /// Sources with a known length are sent with a `Content-Length` header;
    /// unknown-length sources use chunked transfer encoding.
    fn content_length(&self) -> Option<u64> {
        None
    }

    /// Reset the source to its beginning so the body can be supplied again.
    ///
    /// Returns `Ok(true)` on success. Sources that cannot restart return
    /// `Ok(false)`; a transfer that would need to re-send such a body is a
    /// fatal usage error, never silently corrected.
    fn rewind(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

/// An in-memory, rewindable upload source with a known length.
pub struct BytesUpload {
    data: Vec<u8>,
    pos: usize,
}

impl BytesUpload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl UploadSource for BytesUpload {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn rewind(&mut self) -> io::Result<bool> {
        self.pos = 0;
        Ok(true)
    }
}

/// An upload source wrapping any [`Read`] stream.
///
/// The length is unknown up front, so the body is sent with chunked transfer
/// encoding, and the source cannot be rewound.
pub struct ReaderUpload<R> {
    inner: R,
}

impl<R: Read + Send + 'static> ReaderUpload<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send + 'static> UploadSource for ReaderUpload<R> {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
