//! Async MQTT client
//!
//! [`MqttClient`] drives a [`Connection`] over any [`Transport`]. A reader task
//! feeds received bytes to the connection and a keep-alive task drives its
//! timer; application calls may come from any task. Connection state and the
//! pending completions live behind one mutex, and outgoing bytes are handed to
//! the writer before that mutex is released, so the wire order is the order
//! in which packets were encoded.

use crate::connection::{Connection, ConnectionState, Event};
use crate::constants::defaults;
use crate::error::{MqttError, Result};
use crate::packet::auth::AuthPacket;
use crate::packet::subscribe::TopicFilter;
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::session::store::{SessionSnapshot, SessionStore};
use crate::transport::Transport;
use crate::types::{ConnectOptions, ConnectResult, Message, PublishOptions, PublishResult};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Completion<T> = oneshot::Sender<Result<T>>;

/// Async client tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Capacity of the event channel returned by [`MqttClient::take_events`]
    pub event_channel_capacity: usize,
    /// Size of each transport read
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            read_buffer_size: defaults::READ_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

/// Events delivered through [`MqttClient::take_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected(ConnectResult),
    Message(Message),
    /// Completion of a `QoS` 1/2 publish nobody is awaiting, such as a flow
    /// restored from a persisted session
    PublishCompleted {
        packet_id: u16,
        result: Result<PublishResult>,
    },
    Auth(AuthPacket),
    Disconnected { error: Option<MqttError> },
}

/// Completion of one publish
///
/// `QoS` 0 publishes complete as soon as they are written. Dropping the handle
/// does not cancel the flow; the broker still receives and acknowledges it.
#[derive(Debug)]
pub struct PublishHandle {
    packet_id: Option<u16>,
    completion: Option<oneshot::Receiver<Result<PublishResult>>>,
}

impl PublishHandle {
    #[must_use]
    pub fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    /// Waits for PUBACK or PUBCOMP
    ///
    /// # Errors
    ///
    /// - `PublishFailed` if the broker answered with an error reason code
    /// - `SessionDiscarded` if the flow was dropped together with its session
    /// - `NotConnected` if the client went away
    pub async fn wait(self) -> Result<PublishResult> {
        match self.completion {
            None => Ok(PublishResult::Sent),
            Some(rx) => rx.await.map_err(|_| MqttError::NotConnected)?,
        }
    }
}

struct Shared {
    connection: Connection,
    connect_waiter: Option<Completion<ConnectResult>>,
    publishes: HashMap<u16, Completion<PublishResult>>,
    subscribes: HashMap<u16, Completion<Vec<ReasonCode>>>,
    unsubscribes: HashMap<u16, Completion<Vec<ReasonCode>>>,
    /// Store key of the last session saved or loaded
    stored_client_id: Option<String>,
}

impl Shared {
    /// Routes connection events to their waiters; returns what the
    /// application should see and whether the connection ended
    fn dispatch(&mut self) -> (Vec<ClientEvent>, bool) {
        let mut events = Vec::new();
        let mut disconnected = false;

        while let Some(event) = self.connection.poll_event() {
            match event {
                Event::Connected(result) => {
                    if let Some(tx) = self.connect_waiter.take() {
                        let _ = tx.send(Ok(result.clone()));
                    }
                    events.push(ClientEvent::Connected(result));
                }
                Event::Message(message) => events.push(ClientEvent::Message(message)),
                Event::PublishCompleted { packet_id, result } => {
                    match self.publishes.remove(&packet_id) {
                        Some(tx) => {
                            let _ = tx.send(result);
                        }
                        None => events.push(ClientEvent::PublishCompleted { packet_id, result }),
                    }
                }
                Event::SubscribeCompleted { packet_id, result } => {
                    if let Some(tx) = self.subscribes.remove(&packet_id) {
                        let _ = tx.send(result);
                    }
                }
                Event::UnsubscribeCompleted { packet_id, result } => {
                    if let Some(tx) = self.unsubscribes.remove(&packet_id) {
                        let _ = tx.send(result);
                    }
                }
                Event::Auth(auth) => events.push(ClientEvent::Auth(auth)),
                Event::Disconnected { error } => {
                    if let Some(tx) = self.connect_waiter.take() {
                        let _ = tx.send(Err(error.clone().unwrap_or(MqttError::NotConnected)));
                    }
                    disconnected = true;
                    events.push(ClientEvent::Disconnected { error });
                }
            }
        }
        (events, disconnected)
    }
}

struct Inner {
    shared: Mutex<Shared>,
    writer: Mutex<Option<Writer>>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    timer: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: ClientConfig,
}

/// MQTT client over a tokio byte stream
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct MqttClient {
    inner: Arc<Inner>,
    store: Option<Arc<dyn SessionStore>>,
}

impl MqttClient {
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_config(options, ClientConfig::default())
    }

    #[must_use]
    pub fn with_config(options: ConnectOptions, config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let shared = Shared {
            connection: Connection::new(options),
            connect_waiter: None,
            publishes: HashMap::new(),
            subscribes: HashMap::new(),
            unsubscribes: HashMap::new(),
            stored_client_id: None,
        };
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(shared),
                writer: Mutex::new(None),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                timer: Notify::new(),
                tasks: Mutex::new(Vec::new()),
                config,
            }),
            store: None,
        }
    }

    /// Persists the session across client restarts
    ///
    /// The store is only used when clean start is off and the session
    /// outlives the network connection.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Takes the event stream; `None` after the first call
    ///
    /// The channel is bounded. Events that arrive while it is full, including
    /// before this is called, are dropped with a warning; publish, subscribe
    /// and unsubscribe completions with a waiter never go through it.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.inner.events_rx.lock().await.take()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.shared.lock().await.connection.state()
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Snapshot of the session if it outlives the current connection
    ///
    /// # Errors
    ///
    /// Returns an encoding error if a stored PUBLISH cannot be encoded
    pub async fn session_snapshot(&self) -> Result<Option<SessionSnapshot>> {
        self.inner.shared.lock().await.connection.session_snapshot()
    }

    /// Runs the MQTT handshake over `transport` and waits for CONNACK
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a connection is active
    /// - `ConnectionRefused` if the broker rejected the connection
    /// - `Io` if the transport failed before CONNACK
    /// - validation errors for the connect options
    pub async fn connect<T: Transport>(&self, transport: T) -> Result<ConnectResult> {
        let mut shared = self.inner.shared.lock().await;
        if shared.connection.state() != ConnectionState::Disconnected {
            return Err(MqttError::AlreadyConnected);
        }
        self.stop_tasks().await;
        let (reader, writer) = tokio::io::split(transport);
        self.load_session(&mut shared).await?;
        shared.connection.connect(Instant::now())?;

        let (tx, rx) = oneshot::channel();
        shared.connect_waiter = Some(tx);
        *self.inner.writer.lock().await = Some(Box::new(writer));
        if let Err(e) = self.flush(shared).await {
            let mut shared = self.inner.shared.lock().await;
            shared.connection.handle_transport_closed()?;
            if let Err(flush_err) = self.flush(shared).await {
                debug!(error = %flush_err, "flush after failed CONNECT");
            }
            return Err(e);
        }

        let reader_task = tokio::spawn(self.clone().read_loop(reader));
        let keep_alive_task = tokio::spawn(self.clone().keep_alive_loop());
        self.inner
            .tasks
            .lock()
            .await
            .extend([reader_task, keep_alive_task]);

        rx.await.map_err(|_| MqttError::NotConnected)?
    }

    /// Publishes a message
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless connected
    /// - `QuotaExceeded` or `PacketIdExhausted` when too many publishes are
    ///   in flight; retry after some complete
    /// - `InvalidTopicName`, `ProtocolError` or `PacketTooLarge` for a
    ///   publish the broker would not accept
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<PublishHandle> {
        let mut shared = self.inner.shared.lock().await;
        let packet_id = shared
            .connection
            .publish(topic, payload, &options, Instant::now())?;

        let completion = packet_id.map(|id| {
            let (tx, rx) = oneshot::channel();
            shared.publishes.insert(id, tx);
            rx
        });
        self.flush(shared).await?;

        Ok(PublishHandle {
            packet_id,
            completion,
        })
    }

    /// Subscribes and waits for SUBACK; one reason code per filter
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless connected, or if the connection is lost
    ///   before SUBACK
    /// - `ProtocolError` or `InvalidTopicFilter` for a bad request
    pub async fn subscribe(&self, filters: Vec<TopicFilter>) -> Result<Vec<ReasonCode>> {
        self.subscribe_with_properties(filters, Properties::default())
            .await
    }

    /// Like [`MqttClient::subscribe`] with SUBSCRIBE properties such as a
    /// subscription identifier
    ///
    /// # Errors
    ///
    /// See [`MqttClient::subscribe`]
    pub async fn subscribe_with_properties(
        &self,
        filters: Vec<TopicFilter>,
        properties: Properties,
    ) -> Result<Vec<ReasonCode>> {
        let mut shared = self.inner.shared.lock().await;
        let packet_id = shared
            .connection
            .subscribe(filters, properties, Instant::now())?;
        let (tx, rx) = oneshot::channel();
        shared.subscribes.insert(packet_id, tx);
        self.flush(shared).await?;

        rx.await.map_err(|_| MqttError::NotConnected)?
    }

    /// Unsubscribes and waits for UNSUBACK
    ///
    /// MQTT 3.1.1 UNSUBACK carries no reason codes, so the result is empty
    /// under that version.
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless connected, or if the connection is lost
    ///   before UNSUBACK
    /// - `ProtocolError` or `InvalidTopicFilter` for a bad request
    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<Vec<ReasonCode>> {
        let mut shared = self.inner.shared.lock().await;
        let packet_id = shared.connection.unsubscribe(filters, Instant::now())?;
        let (tx, rx) = oneshot::channel();
        shared.unsubscribes.insert(packet_id, tx);
        self.flush(shared).await?;

        rx.await.map_err(|_| MqttError::NotConnected)?
    }

    /// Answers an authentication challenge received as [`ClientEvent::Auth`]
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless connecting or connected
    pub async fn send_auth(&self, auth: AuthPacket) -> Result<()> {
        let mut shared = self.inner.shared.lock().await;
        shared.connection.send_auth(auth, Instant::now())?;
        self.flush(shared).await
    }

    /// Sends DISCONNECT and closes the transport
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless connecting or connected
    pub async fn disconnect(&self) -> Result<()> {
        let mut shared = self.inner.shared.lock().await;
        shared.connection.disconnect(Instant::now())?;
        let written = self.flush(shared).await;

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "transport shutdown failed");
            }
        }
        self.stop_tasks().await;

        let mut shared = self.inner.shared.lock().await;
        shared.connection.handle_transport_closed()?;
        self.flush(shared).await?;
        written
    }

    async fn stop_tasks(&self) {
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    fn uses_store(&self, options: &ConnectOptions) -> bool {
        self.store.is_some() && !options.clean_start && options.session_persists()
    }

    async fn load_session(&self, shared: &mut Shared) -> Result<()> {
        let options = shared.connection.options();
        if !self.uses_store(options) || shared.connection.session().is_some() {
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };
        let client_id = shared
            .stored_client_id
            .clone()
            .unwrap_or_else(|| options.client_id.clone());
        if let Some(snapshot) = store.load_session(&client_id).await? {
            shared.connection.restore_session(&snapshot)?;
            shared.stored_client_id = Some(snapshot.client_id);
        }
        Ok(())
    }

    /// Writes pending bytes and delivers pending events
    ///
    /// The writer lock is taken before `shared` is released.
    async fn flush(&self, mut shared: MutexGuard<'_, Shared>) -> Result<()> {
        let outgoing = shared.connection.take_outgoing();
        let (events, disconnected) = shared.dispatch();
        let persist = if disconnected && self.uses_store(shared.connection.options()) {
            let snapshot = shared.connection.session_snapshot();
            let client_id = match &snapshot {
                Ok(Some(snapshot)) => {
                    shared.stored_client_id = Some(snapshot.client_id.clone());
                    snapshot.client_id.clone()
                }
                _ => shared
                    .stored_client_id
                    .take()
                    .unwrap_or_else(|| shared.connection.client_id().to_string()),
            };
            Some((client_id, snapshot))
        } else {
            None
        };

        let mut writer = self.inner.writer.lock().await;
        drop(shared);

        let written = match (outgoing, writer.as_mut()) {
            (None, _) => Ok(()),
            (Some(bytes), Some(w)) => write_all(w, &bytes).await,
            (Some(bytes), None) => {
                warn!(len = bytes.len(), "no transport for outgoing bytes");
                Err(MqttError::NotConnected)
            }
        };
        if disconnected {
            if let Some(mut w) = writer.take() {
                if let Err(e) = w.shutdown().await {
                    debug!(error = %e, "transport shutdown failed");
                }
            }
        }
        drop(writer);
        self.inner.timer.notify_one();

        if let Some((client_id, snapshot)) = persist {
            self.persist(&client_id, snapshot).await;
        }
        for event in events {
            self.deliver(event);
        }
        written
    }

    /// Hands an event to the application without waiting; an event that
    /// does not fit the channel is dropped and logged
    fn deliver(&self, event: ClientEvent) {
        match self.inner.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    capacity = self.inner.config.event_channel_capacity,
                    "event channel full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event receiver dropped");
            }
        }
    }

    async fn persist(&self, client_id: &str, snapshot: Result<Option<SessionSnapshot>>) {
        let Some(store) = &self.store else {
            return;
        };
        let result = match snapshot {
            Ok(Some(snapshot)) => store.save_session(&snapshot).await,
            Ok(None) => store.remove_session(client_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(client_id, error = %e, "failed to persist session");
        }
    }

    async fn read_loop<R: AsyncRead + Send + Unpin + 'static>(self, mut reader: R) {
        let mut buf = vec![0u8; self.inner.config.read_buffer_size.max(1)];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("transport reached end of stream");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    break;
                }
            };

            let mut shared = self.inner.shared.lock().await;
            let handled = shared.connection.handle_bytes(&buf[..n], Instant::now());
            let done = shared.connection.state() == ConnectionState::Disconnected;
            if let Err(e) = self.flush(shared).await {
                debug!(error = %e, "write after read failed");
            }
            if handled.is_err() || done {
                return;
            }
        }

        let mut shared = self.inner.shared.lock().await;
        if let Err(e) = shared.connection.handle_transport_closed() {
            error!(error = %e, "session bookkeeping failed on close");
        }
        if let Err(e) = self.flush(shared).await {
            debug!(error = %e, "final flush failed");
        }
    }

    async fn keep_alive_loop(self) {
        loop {
            let (deadline, state) = {
                let shared = self.inner.shared.lock().await;
                (shared.connection.next_timeout(), shared.connection.state())
            };
            if state == ConnectionState::Disconnected {
                return;
            }
            match deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                }
                None => {
                    self.inner.timer.notified().await;
                    continue;
                }
            }

            let mut shared = self.inner.shared.lock().await;
            let ticked = shared.connection.handle_tick(Instant::now());
            if let Err(e) = self.flush(shared).await {
                debug!(error = %e, "keep-alive write failed");
            }
            if let Err(e) = ticked {
                info!(error = %e, "keep-alive ended the connection");
                self.stop_tasks().await;
                return;
            }
        }
    }
}

async fn write_all(writer: &mut Writer, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QoS;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.event_channel_capacity, defaults::EVENT_CHANNEL_CAPACITY);
        assert_eq!(config.read_buffer_size, defaults::READ_BUFFER_SIZE);

        let config = config.with_event_channel_capacity(8).with_read_buffer_size(64);
        assert_eq!(config.event_channel_capacity, 8);
        assert_eq!(config.read_buffer_size, 64);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = MqttClient::new(ConnectOptions::new("idle"));
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        assert!(matches!(
            client
                .publish("a/b", b"x".to_vec(), PublishOptions::new(QoS::AtLeastOnce))
                .await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            client
                .subscribe(vec![TopicFilter::new("a/#", QoS::AtMostOnce)])
                .await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            client.disconnect().await,
            Err(MqttError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_take_events_once() {
        let client = MqttClient::new(ConnectOptions::new("events"));
        assert!(client.take_events().await.is_some());
        assert!(client.take_events().await.is_none());
    }

    #[tokio::test]
    async fn test_qos0_handle_completes_immediately() {
        let handle = PublishHandle {
            packet_id: None,
            completion: None,
        };
        assert_eq!(handle.packet_id(), None);
        assert_eq!(handle.wait().await.unwrap(), PublishResult::Sent);
    }
}
