pub mod tcp;

pub use tcp::{TcpConfig, TcpTransport};

use tokio::io::{AsyncRead, AsyncWrite};

/// Ordered, reliable byte stream the client runs MQTT over
///
/// Anything tokio can read and write qualifies: a `TcpStream`, a TLS stream
/// layered on top of one, or an in-memory `tokio::io::duplex` pipe in tests.
/// The client splits the stream so the reader task and writers never contend.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
