//! TCP connector for the device's serial-to-Ethernet port.

use super::Connector;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

/// Opens a new TCP connection to the controller for every exchange.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    port: u16,
}

impl TcpConnector {
    /// Create a connector for `address:port`.
    ///
    /// # Arguments
    /// * `address` - Host name or IP of the controller (e.g. "10.66.50.95")
    /// * `port` - TCP port of the controller's command socket (usually 2000)
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((self.address.as_str(), self.port)).await?;
        // Frames are tiny; do not let Nagle hold them back.
        stream.set_nodelay(true)?;
        trace!(endpoint = %self.endpoint(), "connected");
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
