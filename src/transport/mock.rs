//! In-memory connector for tests and the simulator.
//!
//! Each `connect()` creates a `tokio::io::duplex` pipe and spawns a small task that
//! plays the device side: it reads one `*...\r` request, waits for the configured
//! delay, answers with whatever the responder returns (plus the terminator), and
//! then waits for the client to hang up.
//!
//! Every exchange is recorded with the instant the connection was opened and the
//! instant the client dropped it, which is what the serialization tests assert on.

use super::Connector;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use crate::codec::{START_OF_FRAME, TERMINATOR};

type Responder = dyn Fn(&str) -> Option<String> + Send + Sync;

/// One exchange as seen by the mock device.
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    /// Request line without start-of-frame marker and terminator, e.g. `R600 3`.
    pub request: String,
    /// When the connection was opened.
    pub started: Instant,
    /// When the client released the connection.
    pub finished: Option<Instant>,
}

#[derive(Default)]
struct Shared {
    records: Mutex<Vec<ExchangeRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    refusing: AtomicBool,
}

impl Shared {
    fn records(&self) -> MutexGuard<'_, Vec<ExchangeRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Connector whose device side is a closure.
#[derive(Clone)]
pub struct MockConnector {
    responder: Arc<Responder>,
    delay: Duration,
    shared: Arc<Shared>,
}

impl MockConnector {
    /// Create a connector answering each request line with `responder`.
    ///
    /// Returning `None` makes the device hang up without answering.
    pub fn new(responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            delay: Duration::ZERO,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Delay every answer, to make exchanges overlap if nothing serializes them.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Refuse (or accept again) new connections.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Snapshot of all recorded exchanges, in connection order.
    pub fn records(&self) -> Vec<ExchangeRecord> {
        self.shared.records().clone()
    }

    /// Request lines received so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.shared
            .records()
            .iter()
            .map(|r| r.request.clone())
            .collect()
    }

    /// Forget recorded exchanges.
    pub fn clear(&self) {
        self.shared.records().clear();
    }

    /// Connections currently open.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Stream = MockStream;

    async fn connect(&self) -> std::io::Result<MockStream> {
        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock device refusing connections",
            ));
        }

        let now_open = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(now_open, Ordering::SeqCst);

        let index = {
            let mut records = self.shared.records();
            records.push(ExchangeRecord {
                request: String::new(),
                started: Instant::now(),
                finished: None,
            });
            records.len() - 1
        };

        let (client, server) = tokio::io::duplex(256);
        tokio::spawn(serve_one(
            server,
            self.responder.clone(),
            self.delay,
            self.shared.clone(),
            index,
        ));

        Ok(MockStream {
            inner: client,
            shared: self.shared.clone(),
            index,
        })
    }

    fn endpoint(&self) -> String {
        "mock".to_string()
    }
}

async fn serve_one(
    mut server: DuplexStream,
    responder: Arc<Responder>,
    delay: Duration,
    shared: Arc<Shared>,
    index: usize,
) {
    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match server.read(&mut byte).await {
            Ok(1) if byte[0] == TERMINATOR as u8 => break,
            Ok(1) => request.push(byte[0]),
            _ => return,
        }
    }
    let text = String::from_utf8_lossy(&request).into_owned();
    let line = text
        .strip_prefix(START_OF_FRAME)
        .unwrap_or(text.as_str())
        .to_string();
    if let Some(record) = shared.records().get_mut(index) {
        record.request = line.clone();
    }

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if let Some(response) = responder(&line) {
        let framed = format!("{}{}", response, TERMINATOR);
        if server.write_all(framed.as_bytes()).await.is_err() {
            return;
        }
        let _ = server.flush().await;
    } else {
        return;
    }

    // Hold the pipe open until the client hangs up.
    let mut sink = [0u8; 64];
    while let Ok(n) = server.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

/// Client half of a mock connection; records its end time when dropped.
pub struct MockStream {
    inner: DuplexStream,
    shared: Arc<Shared>,
    index: usize,
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        if let Some(record) = self.shared.records().get_mut(self.index) {
            record.finished = Some(Instant::now());
        }
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
