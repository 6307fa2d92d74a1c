use crate::error::{MqttError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Broker address
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// OS-level TCP keepalive, independent of the MQTT keep-alive
    pub keepalive: Option<Duration>,
}

impl TcpConfig {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(30),
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }
}

/// Opens configured TCP connections to a broker
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self::new(TcpConfig::new(addr))
    }

    #[must_use]
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Connects and applies the socket options
    ///
    /// # Errors
    ///
    /// Returns `Io` if the connection fails, times out, or a socket option
    /// cannot be set
    pub async fn connect(&self) -> Result<TcpStream> {
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            MqttError::Io(format!(
                "connect to {} timed out after {:?}",
                self.config.addr, self.config.connect_timeout
            ))
        })??;

        stream.set_nodelay(self.config.nodelay)?;

        if let Some(keepalive_duration) = self.config.keepalive {
            let sock_ref = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive_duration);
            sock_ref.set_tcp_keepalive(&keepalive)?;
        }

        debug!(addr = %self.config.addr, "TCP connection established");
        Ok(stream)
    }
}
