//! Transport session for the CN8PT line protocol.
//!
//! The device speaks one request/response at a time over TCP and the bridge opens
//! a fresh connection per exchange. [`Session`] owns the single exclusivity lock:
//! it is held for the whole open → write → read → close cycle so no two commands
//! are ever in flight together. `tokio::sync::Mutex` queues waiters in FIFO order,
//! so exchanges run in the order they were requested.
//!
//! # Architecture
//!
//! ```text
//! Cn8ptBridge ──► dyn Transport ──► Session<C: Connector>
//!                                      ├─ lock: Mutex<()>      (one exchange at a time)
//!                                      ├─ connector: C         (TcpConnector / MockConnector)
//!                                      └─ config: SessionConfig (timeouts, read bound)
//! ```
//!
//! There is no retry here; failures go straight back to the caller.

pub mod mock;
pub mod tcp;

pub use mock::{ExchangeRecord, MockConnector};
pub use tcp::TcpConnector;

use crate::codec::{self, Command, TERMINATOR};
use crate::config::DeviceSettings;
use crate::error::{BridgeError, BridgeResult, ExchangeStage};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Executes one command against the device and returns the response payload.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a full exchange and return the payload with the echoed mnemonic removed.
    async fn execute(&self, command: &Command) -> BridgeResult<String>;
}

/// Opens a fresh byte stream to the device for each exchange.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by the connector.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> std::io::Result<Self::Stream>;

    /// Human readable endpoint for log messages.
    fn endpoint(&self) -> String;
}

/// Timeouts and read bound applied to every exchange.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Maximum time to open the connection.
    pub connect_timeout: Duration,
    /// Maximum time for the write and, separately, for the read.
    pub io_timeout: Duration,
    /// Upper bound on response bytes read per exchange.
    pub max_response_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(2),
            max_response_bytes: 100,
        }
    }
}

impl From<&DeviceSettings> for SessionConfig {
    fn from(device: &DeviceSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(device.connect_timeout_ms),
            io_timeout: Duration::from_millis(device.io_timeout_ms),
            max_response_bytes: device.max_response_bytes,
        }
    }
}

/// Serialized command/response session over a [`Connector`].
pub struct Session<C: Connector> {
    connector: C,
    /// Held for the full lifetime of one exchange
    lock: Mutex<()>,
    config: SessionConfig,
}

impl<C: Connector> Session<C> {
    /// Create a session with default timeouts.
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, SessionConfig::default())
    }

    /// Create a session with explicit timeouts.
    pub fn with_config(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            lock: Mutex::new(()),
            config,
        }
    }

    /// Access the underlying connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Write the frame and read until the terminator, the read bound, or EOF.
    async fn exchange(
        &self,
        stream: &mut C::Stream,
        mnemonic: &str,
        frame: &str,
    ) -> BridgeResult<String> {
        let io_timeout = self.config.io_timeout;

        let write = async {
            stream.write_all(frame.as_bytes()).await?;
            stream.flush().await
        };
        match timeout(io_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::transport(mnemonic, e)),
            Err(_) => return Err(timed_out(mnemonic, ExchangeStage::Write, io_timeout)),
        }
        debug!(frame = %frame.trim_end(), "sent");

        let mut buf = vec![0u8; self.config.max_response_bytes];
        let mut filled = 0usize;
        let read = async {
            while filled < buf.len() {
                let n = stream.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
                if buf[..filled].contains(&(TERMINATOR as u8)) {
                    break;
                }
            }
            Ok::<_, std::io::Error>(())
        };
        match timeout(io_timeout, read).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::transport(mnemonic, e)),
            Err(_) => return Err(timed_out(mnemonic, ExchangeStage::Read, io_timeout)),
        }

        buf.truncate(filled);
        String::from_utf8(buf)
            .map_err(|_| BridgeError::transport(mnemonic, "response is not valid ASCII"))
    }
}

fn timed_out(mnemonic: &str, stage: ExchangeStage, after: Duration) -> BridgeError {
    BridgeError::Timeout {
        mnemonic: mnemonic.to_string(),
        stage,
        after,
    }
}

#[async_trait]
impl<C: Connector> Transport for Session<C> {
    async fn execute(&self, command: &Command) -> BridgeResult<String> {
        let mnemonic = command.mnemonic.as_str();
        let frame = codec::encode_frame(command);

        trace!(mnemonic, "waiting for exchange lock");
        let guard = self.lock.lock().await;

        let mut stream = match timeout(self.config.connect_timeout, self.connector.connect()).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(BridgeError::transport(
                    mnemonic,
                    format!("cannot connect to {}: {}", self.connector.endpoint(), e),
                ))
            }
            Err(_) => {
                return Err(timed_out(
                    mnemonic,
                    ExchangeStage::Connect,
                    self.config.connect_timeout,
                ))
            }
        };

        let result = self.exchange(&mut stream, mnemonic, &frame).await;

        // Close before releasing the lock, on every path.
        if let Err(e) = stream.shutdown().await {
            trace!(mnemonic, error = %e, "shutdown after exchange failed");
        }
        drop(stream);
        drop(guard);

        let raw = result?;
        debug!(response = %raw.trim_end(), "received");
        if raw.len() >= mnemonic.len() && !codec::echo_matches(mnemonic, &raw) {
            warn!(mnemonic, response = %raw.trim_end(), "response does not echo the command");
        }
        codec::decode_response(mnemonic, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Mnemonic, Payload};
    use std::sync::Arc;

    fn echo_session() -> Session<MockConnector> {
        Session::new(MockConnector::new(|request: &str| {
            let mnemonic = &request[..4];
            match mnemonic {
                "G110" => Some("G110+073.50".to_string()),
                "R400" => Some("R400-005.0".to_string()),
                _ => Some(mnemonic.to_string()),
            }
        }))
    }

    #[tokio::test]
    async fn test_execute_strips_echo() {
        let session = echo_session();
        let payload = session
            .execute(&Command::bare(Mnemonic::ReadTemperature))
            .await
            .unwrap();
        assert_eq!(payload, "+073.50");
    }

    #[tokio::test]
    async fn test_request_frame_reaches_device() {
        let session = echo_session();
        session
            .execute(&Command::with_payload(
                Mnemonic::WriteSetpoint,
                Payload::Decimal(25.0),
            ))
            .await
            .unwrap();
        let log = session.connector().requests();
        assert_eq!(log, vec!["W400 25.0".to_string()]);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let connector = MockConnector::new(|_: &str| None);
        connector.set_refusing(true);
        let session = Session::new(connector);
        let err = session
            .execute(&Command::bare(Mnemonic::ReadSetpoint))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_silent_device_is_short_response() {
        let session = Session::new(MockConnector::new(|_: &str| None));
        let err = session
            .execute(&Command::bare(Mnemonic::ReadSetpoint))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ShortResponse { .. }));
    }

    #[tokio::test]
    async fn test_slow_device_times_out() {
        let connector = MockConnector::new(|_: &str| Some("R400+1.0".into()))
            .with_delay(Duration::from_millis(200));
        let session = Session::with_config(
            connector,
            SessionConfig {
                io_timeout: Duration::from_millis(20),
                ..SessionConfig::default()
            },
        );
        let err = session
            .execute(&Command::bare(Mnemonic::ReadSetpoint))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Timeout {
                stage: ExchangeStage::Read,
                ..
            }
        ));
        // connection was still torn down
        assert_eq!(session.connector().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_read_is_bounded() {
        let connector = MockConnector::new(|_: &str| Some(format!("G110{}", "9".repeat(500))));
        let session = Session::with_config(
            connector,
            SessionConfig {
                max_response_bytes: 16,
                ..SessionConfig::default()
            },
        );
        let payload = session
            .execute(&Command::bare(Mnemonic::ReadTemperature))
            .await
            .unwrap();
        assert_eq!(payload.len(), 12);
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_are_serialized() {
        let connector = MockConnector::new(|request: &str| Some(request[..4].to_string()))
            .with_delay(Duration::from_millis(5));
        let session = Arc::new(Session::new(connector));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move {
                    session
                        .execute(&Command::bare(Mnemonic::ReadTemperature))
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let records = session.connector().records();
        assert_eq!(records.len(), 8);
        assert_eq!(session.connector().max_in_flight(), 1);
        for pair in records.windows(2) {
            let finished = pair[0].finished.unwrap();
            assert!(finished <= pair[1].started);
        }
    }
}
