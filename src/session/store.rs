//! Persistence of session state between network connections
//!
//! A [`SessionStore`] is only consulted for sessions the broker keeps after
//! the connection closes. The engine itself never blocks on storage; the
//! async client loads a snapshot before connecting and saves one when the
//! connection ends.

use crate::error::{MqttError, Result};
use crate::protocol::ProtocolVersion;
use crate::session::qos::OutboundState;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Outgoing flow as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFlow {
    pub packet_id: u16,
    pub state: OutboundState,
    /// Encoded PUBLISH for flows that still need it, in the session's
    /// protocol version
    pub publish: Option<Bytes>,
}

/// Everything needed to resume a session on a new connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    pub session_expiry_interval: u32,
    /// Outgoing flows in the order their PUBLISH was first sent
    pub outbound: Vec<PersistedFlow>,
    /// Incoming `QoS` 2 identifiers awaiting PUBREL
    pub inbound_awaiting_release: Vec<u16>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, client_id: &str) -> Result<Option<SessionSnapshot>>;

    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<()>;

    async fn remove_session(&self, client_id: &str) -> Result<()>;
}

/// Session store kept in process memory
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, client_id: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self.sessions.read().await.get(client_id).cloned())
    }

    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(snapshot.client_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn remove_session(&self, client_id: &str) -> Result<()> {
        self.sessions.write().await.remove(client_id);
        Ok(())
    }
}

/// Session store writing one JSON file per client identifier
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Opens a store rooted at `dir`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns `MqttError::Storage` if the directory cannot be created
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            MqttError::Storage(format!("failed to create {}: {e}", dir.display()))
        })?;
        info!(dir = %dir.display(), "opened file session store");
        Ok(Self { dir })
    }

    /// Client identifiers may hold any character, so file names are the
    /// hex encoding of the identifier bytes. Identifiers too long for a file
    /// name are stored under the SHA-256 of the identifier instead.
    fn path_for(&self, client_id: &str) -> PathBuf {
        let mut name = String::with_capacity(MAX_HEX_NAME_BYTES * 2 + 12);
        if client_id.len() <= MAX_HEX_NAME_BYTES {
            push_hex(&mut name, client_id.as_bytes());
        } else {
            name.push_str("sha256-");
            push_hex(&mut name, &Sha256::digest(client_id.as_bytes()));
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

/// Longest identifier kept readable; its hex name stays under 255 bytes
const MAX_HEX_NAME_BYTES: usize = 120;

fn push_hex(name: &mut String, bytes: &[u8]) {
    for byte in bytes {
        let _ = write!(name, "{byte:02x}");
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load_session(&self, client_id: &str) -> Result<Option<SessionSnapshot>> {
        let path = self.path_for(client_id);
        match fs::read(&path).await {
            Ok(data) => {
                let snapshot = serde_json::from_slice(&data)?;
                debug!(client_id, "loaded persisted session");
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MqttError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.client_id);
        let temp_path = path.with_extension("tmp");
        let serialized = serde_json::to_vec_pretty(snapshot)?;

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            MqttError::Storage(format!("failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(&serialized).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;
        debug!(client_id = %snapshot.client_id, flows = snapshot.outbound.len(), "saved session");
        Ok(())
    }

    async fn remove_session(&self, client_id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(client_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
