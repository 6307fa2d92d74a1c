//! Shared helpers: a scripted broker speaking the crate's own codec over an
//! in-memory pipe

#![allow(dead_code)]

use bytes::BytesMut;
use mqtt_engine::packet::connect::ConnectPacket;
use mqtt_engine::{Packet, PacketCodec, ProtocolVersion};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client side and broker side of a fresh in-memory connection
pub fn pipe() -> (DuplexStream, ScriptedBroker) {
    let (client, broker) = tokio::io::duplex(64 * 1024);
    (client, ScriptedBroker::new(broker, ProtocolVersion::V5))
}

pub struct ScriptedBroker {
    stream: DuplexStream,
    codec: PacketCodec,
    buf: BytesMut,
}

impl ScriptedBroker {
    pub fn new(stream: DuplexStream, version: ProtocolVersion) -> Self {
        Self {
            stream,
            codec: PacketCodec::new(version),
            buf: BytesMut::new(),
        }
    }

    /// Next packet from the client; panics on timeout or a closed pipe
    pub async fn recv(&mut self) -> Packet {
        timeout(DEFAULT_TIMEOUT, async {
            loop {
                if let Some(packet) = self.codec.decode(&mut self.buf).unwrap() {
                    return packet;
                }
                let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                assert!(n > 0, "client closed the connection");
            }
        })
        .await
        .expect("timed out waiting for a packet")
    }

    /// Waits for the client to close its side
    pub async fn expect_closed(&mut self) {
        timeout(DEFAULT_TIMEOUT, async {
            loop {
                let n = self.stream.read_buf(&mut self.buf).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
            }
        })
        .await
        .expect("client kept the connection open");
    }

    pub async fn send(&mut self, packet: Packet) {
        let mut out = BytesMut::new();
        self.codec.encode(&packet, &mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    pub async fn expect_connect(&mut self) -> ConnectPacket {
        match self.recv().await {
            Packet::Connect(connect) => *connect,
            other => panic!("expected CONNECT, got {other:?}"),
        }
    }
}
