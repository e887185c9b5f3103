//! Shared helpers for the integration tests: a recording delegate and small
//! in-process TCP servers with canned behavior.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use towline_core::{Transfer, TransferDelegate, TransferError, TransferErrorKind};
use towline_core::{InfoKind, Response};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Response(u16),
    Data(Vec<u8>),
    WillSend(u64),
    Finished,
    Failed(TransferErrorKind),
}

/// Delegate that records every callback and signals the terminal one.
pub struct RecordingDelegate {
    events: Mutex<Vec<Event>>,
    done_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl RecordingDelegate {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let delegate = std::sync::Arc::new(Self {
            events: Mutex::new(Vec::new()),
            done_tx: Mutex::new(Some(done_tx)),
        });
        (delegate, done_rx)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Concatenation of all data chunks received.
    pub fn body(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Data(d) => Some(d),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Finished | Event::Failed(_)))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn signal_terminal(&self) {
        if let Some(tx) = self.done_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl TransferDelegate for RecordingDelegate {
    fn on_data_received(&self, _transfer: &Transfer, data: &[u8]) {
        self.push(Event::Data(data.to_vec()));
    }

    fn on_response_received(&self, _transfer: &Transfer, response: &Response) {
        self.push(Event::Response(response.status_code()));
    }

    fn on_finished(&self, _transfer: &Transfer) {
        self.push(Event::Finished);
        self.signal_terminal();
    }

    fn on_failed(&self, _transfer: &Transfer, error: &TransferError) {
        self.push(Event::Failed(error.kind()));
        self.signal_terminal();
    }

    fn on_will_send_body(&self, _transfer: &Transfer, bytes_written: u64) {
        self.push(Event::WillSend(bytes_written));
    }

    fn on_debug_info(&self, _transfer: &Transfer, _text: &str, _kind: InfoKind) {}
}

/// Wait for the delegate's terminal callback.
pub async fn wait_terminal(done_rx: &mut mpsc::UnboundedReceiver<()>) {
    tokio::time::timeout(Duration::from_secs(10), done_rx.recv())
        .await
        .expect("timed out waiting for terminal callback");
}

pub fn url_for(addr: SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{}{}", addr, path)).unwrap()
}

/// Read a request head (through the blank line) from a socket.
pub async fn read_request_head(socket: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    head
}

/// Serve one connection: read the request head, write `response`, close.
pub async fn serve_once(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            read_request_head(&mut socket).await;
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        }
    });
    addr
}

/// Serve one connection and hand back the captured request head.
pub async fn serve_capture(
    response: &'static [u8],
) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let head = read_request_head(&mut socket).await;
            let _ = head_tx.send(head);
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        }
    });
    (addr, head_rx)
}

/// Serve one upload: read head plus `body_len` body bytes, return the body,
/// then respond.
pub async fn serve_upload(
    body_len: usize,
    response: &'static [u8],
) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (body_tx, body_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut received = read_request_head(&mut socket).await;
            let head_end = received
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .map(|p| p + 4)
                .unwrap_or(received.len());

            let mut buf = [0u8; 1024];
            while received.len() - head_end < body_len {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            let _ = body_tx.send(received[head_end..].to_vec());
            let _ = socket.write_all(response).await;
            let _ = socket.shutdown().await;
        }
    });
    (addr, body_rx)
}

/// Accept one connection and hold it open without ever responding.
pub async fn serve_stall() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            read_request_head(&mut socket).await;
            // Keep the connection open long past any test timeout
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = socket.shutdown().await;
        }
    });
    addr
}
