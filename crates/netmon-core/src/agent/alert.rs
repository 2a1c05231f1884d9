//! One-shot alert delivery over the stream channel

use crate::error::SessionError;
use crate::protocol::AlertMessage;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Debug, Clone)]
pub struct AlertSender {
    endpoint: SocketAddr,
    timeout: Duration,
}

impl AlertSender {
    pub fn new(endpoint: SocketAddr, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    /// Open a fresh connection, write the 20-byte alert and close it.
    ///
    /// A completed write is the only delivery signal; the collector never
    /// answers.
    pub async fn send(&self, alert: &AlertMessage) -> Result<(), SessionError> {
        let bytes = alert.encode()?;

        let delivery = async {
            let mut stream = TcpStream::connect(self.endpoint).await?;
            stream.write_all(&bytes).await?;
            stream.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };

        match tokio::time::timeout(self.timeout, delivery).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::AlertTimeout),
        }
    }
}
