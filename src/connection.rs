//! Connection state machine
//!
//! [`Connection`] performs no I/O. The owner feeds it received bytes, clock
//! ticks and application requests; it answers with bytes to write
//! ([`Connection::take_outgoing`]) and [`Event`]s ([`Connection::poll_event`]).
//!
//! ```text
//! Disconnected --connect--> Connecting --CONNACK ok--> Connected
//!      ^                        |                          |
//!      +------ refused / lost --+       disconnect -> Disconnecting
//!      +----------------- lost / DISCONNECT / fatal -------+---+
//! ```

use crate::codec::PacketCodec;
use crate::error::{MqttError, Result};
use crate::keepalive::{KeepAlive, KeepAliveAction};
use crate::packet::auth::AuthPacket;
use crate::packet::connack::ConnAckPacket;
use crate::packet::connect::ConnectPacket;
use crate::packet::disconnect::DisconnectPacket;
use crate::packet::puback::PubAckPacket;
use crate::packet::pubcomp::PubCompPacket;
use crate::packet::publish::PublishPacket;
use crate::packet::pubrec::PubRecPacket;
use crate::packet::pubrel::PubRelPacket;
use crate::packet::subscribe::{SubscribePacket, TopicFilter};
use crate::packet::unsubscribe::UnsubscribePacket;
use crate::packet::Packet;
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::session::qos::FlowTransition;
use crate::session::state::{PendingRequest, ServerLimits, SessionState};
use crate::session::store::SessionSnapshot;
use crate::types::{ConnectOptions, ConnectResult, Message, PublishOptions, PublishResult};
use crate::validation::{validate_client_id, validate_topic_filter, validate_topic_name};
use crate::QoS;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Something the application must learn about
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected(ConnectResult),
    /// Inbound application message, topic alias already resolved
    Message(Message),
    /// A `QoS` 1/2 publish finished, was rejected, or was discarded with
    /// its session
    PublishCompleted {
        packet_id: u16,
        result: Result<PublishResult>,
    },
    SubscribeCompleted {
        packet_id: u16,
        result: Result<Vec<ReasonCode>>,
    },
    UnsubscribeCompleted {
        packet_id: u16,
        result: Result<Vec<ReasonCode>>,
    },
    /// Enhanced authentication step from the broker
    Auth(AuthPacket),
    /// The connection ended; `None` after a clean local disconnect
    Disconnected { error: Option<MqttError> },
}

#[derive(Debug)]
pub struct Connection {
    options: ConnectOptions,
    state: ConnectionState,
    codec: PacketCodec,
    session: Option<SessionState>,
    keep_alive: Option<KeepAlive>,
    read_buf: BytesMut,
    outgoing: BytesMut,
    events: VecDeque<Event>,
}

impl Connection {
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        let codec = PacketCodec::new(options.protocol_version)
            .with_max_incoming_size(options.properties.maximum_packet_size);
        Self {
            options,
            state: ConnectionState::Disconnected,
            codec,
            session: None,
            keep_alive: None,
            read_buf: BytesMut::new(),
            outgoing: BytesMut::new(),
            events: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// Identifier of the current session, which is the broker-assigned one
    /// once CONNACK carried it; the configured identifier otherwise
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.session
            .as_ref()
            .map_or(self.options.client_id.as_str(), SessionState::client_id)
    }

    /// Adopts a persisted session before connecting
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` unless disconnected
    /// - `Storage` if the snapshot belongs to another protocol version or
    ///   does not decode
    pub fn restore_session(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(MqttError::AlreadyConnected);
        }
        if snapshot.protocol_version != self.options.protocol_version {
            return Err(MqttError::Storage(format!(
                "persisted session uses {:?}",
                snapshot.protocol_version
            )));
        }
        let session = SessionState::restore(snapshot, self.options.receive_maximum())?;
        debug!(
            client_id = %snapshot.client_id,
            flows = snapshot.outbound.len(),
            "restored persisted session"
        );
        self.session = Some(session);
        Ok(())
    }

    /// Snapshot of the session if the broker keeps it after this connection
    ///
    /// # Errors
    ///
    /// Returns an encoding error if a stored PUBLISH cannot be encoded
    pub fn session_snapshot(&self) -> Result<Option<SessionSnapshot>> {
        match &self.session {
            Some(session) if self.session_persists() => session.snapshot().map(Some),
            _ => Ok(None),
        }
    }

    fn session_persists(&self) -> bool {
        if self.options.protocol_version.is_v5() {
            self.session
                .as_ref()
                .map_or(0, SessionState::session_expiry_interval)
                > 0
        } else {
            !self.options.clean_start
        }
    }

    /// Bytes waiting to be written to the transport
    pub fn take_outgoing(&mut self) -> Option<Bytes> {
        if self.outgoing.is_empty() {
            None
        } else {
            Some(self.outgoing.split().freeze())
        }
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// When [`Connection::handle_tick`] next needs to run
    #[must_use]
    pub fn next_timeout(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Connected => self.keep_alive.as_ref().and_then(KeepAlive::next_deadline),
            _ => None,
        }
    }

    /// Starts a connection by queueing CONNECT
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` unless disconnected
    /// - `InvalidState` for a keep-alive above 65535 seconds
    /// - `InvalidClientId` or `InvalidTopicName` for a bad client id or will
    pub fn connect(&mut self, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(MqttError::AlreadyConnected);
        }

        validate_client_id(&self.options.client_id)?;
        if let Some(will) = &self.options.will {
            validate_topic_name(&will.topic)?;
        }
        let mut connect = ConnectPacket::new(&self.options)?;

        let version = self.options.protocol_version;
        let reuse = !self.options.clean_start
            && self
                .session
                .as_ref()
                .is_some_and(|session| session.protocol_version() == version);
        if reuse {
            // A broker-assigned identifier names the session being resumed
            connect.client_id = self.client_id().to_string();
        } else {
            self.discard_session(MqttError::SessionDiscarded)?;
            self.session = Some(SessionState::new(
                self.options.client_id.clone(),
                version,
                self.options.receive_maximum(),
            ));
        }
        if let Some(session) = self.session.as_mut() {
            session.set_session_expiry_interval(
                self.options.properties.session_expiry_interval.unwrap_or(0),
            );
        }

        self.codec = PacketCodec::new(version)
            .with_max_incoming_size(self.options.properties.maximum_packet_size);
        self.read_buf.clear();
        self.outgoing.clear();

        self.write_packet(&Packet::Connect(Box::new(connect)), now)?;
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Queues a PUBLISH
    ///
    /// Returns the packet identifier for `QoS` 1/2; completion is reported as
    /// [`Event::PublishCompleted`].
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless connected
    /// - `InvalidTopicName` for a bad topic
    /// - `ProtocolError` for a `QoS` or retain flag the broker does not allow
    /// - `QuotaExceeded` or `PacketIdExhausted` as backpressure
    /// - `PacketTooLarge` if the broker's maximum packet size is exceeded
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        options: &PublishOptions,
        now: Instant,
    ) -> Result<Option<u16>> {
        if self.state != ConnectionState::Connected {
            return Err(MqttError::NotConnected);
        }
        validate_topic_name(topic)?;

        let version = self.options.protocol_version;
        let properties = Properties::from(options.properties.clone());
        if !version.is_v5() && !properties.is_empty() {
            return Err(MqttError::UnsupportedImplementation(
                "PUBLISH properties require MQTT 5".to_string(),
            ));
        }

        let session = self.session.as_mut().ok_or(MqttError::NotConnected)?;
        let limits = session.limits();
        if options.qos > limits.maximum_qos {
            return Err(MqttError::ProtocolError(format!(
                "broker allows at most {:?}",
                limits.maximum_qos
            )));
        }
        if options.retain && !limits.retain_available {
            return Err(MqttError::ProtocolError(
                "broker does not support retained messages".to_string(),
            ));
        }

        let mut publish = PublishPacket::new(topic, payload, options.qos).with_retain(options.retain);
        publish.properties = properties;

        let publish = session.begin_publish(publish)?;
        let packet_id = publish.packet_id;
        let wire = if options.use_topic_alias && version.is_v5() {
            session.apply_topic_alias(publish)
        } else {
            publish
        };

        if let Err(e) = self.codec.encode(&Packet::Publish(wire.clone()), &mut self.outgoing) {
            if let Some(session) = self.session.as_mut() {
                session.abort_topic_alias(&wire);
                if let Some(id) = packet_id {
                    session.abort_publish(id)?;
                }
            }
            return Err(e);
        }
        self.packet_sent(now);
        Ok(packet_id)
    }

    /// Queues a SUBSCRIBE; completion is reported as
    /// [`Event::SubscribeCompleted`]
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless connected
    /// - `ProtocolError` for an empty filter list
    /// - `InvalidTopicFilter` for a bad filter
    /// - `PacketIdExhausted` as backpressure
    pub fn subscribe(
        &mut self,
        filters: Vec<TopicFilter>,
        properties: Properties,
        now: Instant,
    ) -> Result<u16> {
        if self.state != ConnectionState::Connected {
            return Err(MqttError::NotConnected);
        }
        if filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBSCRIBE needs at least one topic filter".to_string(),
            ));
        }
        for filter in &filters {
            validate_topic_filter(&filter.filter)?;
        }

        let session = self.session.as_mut().ok_or(MqttError::NotConnected)?;
        let packet_id = session.begin_request(PendingRequest::Subscribe {
            filters: filters.len(),
        })?;

        let packet = Packet::Subscribe(SubscribePacket {
            packet_id,
            filters,
            properties,
        });
        self.send_request(&packet, packet_id, now)?;
        Ok(packet_id)
    }

    /// Queues an UNSUBSCRIBE; completion is reported as
    /// [`Event::UnsubscribeCompleted`]
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless connected
    /// - `ProtocolError` for an empty filter list
    /// - `InvalidTopicFilter` for a bad filter
    /// - `PacketIdExhausted` as backpressure
    pub fn unsubscribe(&mut self, filters: Vec<String>, now: Instant) -> Result<u16> {
        if self.state != ConnectionState::Connected {
            return Err(MqttError::NotConnected);
        }
        if filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBSCRIBE needs at least one topic filter".to_string(),
            ));
        }
        for filter in &filters {
            validate_topic_filter(filter)?;
        }

        let session = self.session.as_mut().ok_or(MqttError::NotConnected)?;
        let packet_id = session.begin_request(PendingRequest::Unsubscribe {
            filters: filters.len(),
        })?;

        let packet = Packet::Unsubscribe(UnsubscribePacket {
            packet_id,
            filters,
            properties: Properties::default(),
        });
        self.send_request(&packet, packet_id, now)?;
        Ok(packet_id)
    }

    fn send_request(&mut self, packet: &Packet, packet_id: u16, now: Instant) -> Result<()> {
        if let Err(e) = self.codec.encode(packet, &mut self.outgoing) {
            if let Some(session) = self.session.as_mut() {
                session.abort_request(packet_id)?;
            }
            return Err(e);
        }
        self.packet_sent(now);
        Ok(())
    }

    /// Queues an AUTH packet answering the broker's authentication challenge
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless connecting or connected
    /// - `UnsupportedImplementation` under MQTT 3.1.1
    pub fn send_auth(&mut self, auth: AuthPacket, now: Instant) -> Result<()> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(MqttError::InvalidState(format!(
                "cannot authenticate while {:?}",
                self.state
            )));
        }
        self.write_packet(&Packet::Auth(auth), now)
    }

    /// Queues DISCONNECT; the owner flushes it and then reports
    /// [`Connection::handle_transport_closed`]
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless connecting or connected
    pub fn disconnect(&mut self, now: Instant) -> Result<()> {
        match self.state {
            ConnectionState::Connected => {
                self.write_packet(&Packet::Disconnect(DisconnectPacket::default()), now)?;
                self.set_state(ConnectionState::Disconnecting);
                Ok(())
            }
            ConnectionState::Connecting => {
                self.finish(None)?;
                Ok(())
            }
            _ => Err(MqttError::NotConnected),
        }
    }

    /// Reports that the transport closed or failed
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if session bookkeeping is inconsistent
    pub fn handle_transport_closed(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Disconnecting => self.finish(None),
            _ => {
                warn!(state = ?self.state, "transport closed");
                self.finish(Some(MqttError::Io("connection closed".to_string())))
            }
        }
    }

    /// Feeds bytes read from the transport
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the connection. A DISCONNECT with
    /// the matching reason code is queued first under MQTT 5.
    pub fn handle_bytes(&mut self, data: &[u8], now: Instant) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.read_buf.extend_from_slice(data);

        while self.state != ConnectionState::Disconnected {
            let packet = match self.codec.decode(&mut self.read_buf) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(e) => return self.fail(e),
            };
            if let Err(e) = self.handle_packet(packet, now) {
                return self.fail(e);
            }
        }
        Ok(())
    }

    /// Drives the keep-alive timer
    ///
    /// # Errors
    ///
    /// Returns `KeepAliveTimeout` when PINGRESP did not arrive in time
    pub fn handle_tick(&mut self, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Ok(());
        }
        let action = self
            .keep_alive
            .as_ref()
            .map_or(KeepAliveAction::Idle, |ka| ka.poll(now));

        match action {
            KeepAliveAction::Idle => Ok(()),
            KeepAliveAction::SendPing => {
                trace!("sending PINGREQ");
                self.codec.encode(&Packet::PingReq, &mut self.outgoing)?;
                if let Some(ka) = self.keep_alive.as_mut() {
                    ka.on_ping_sent(now);
                }
                Ok(())
            }
            KeepAliveAction::TimedOut => self.fail(MqttError::KeepAliveTimeout),
        }
    }

    fn handle_packet(&mut self, packet: Packet, now: Instant) -> Result<()> {
        trace!(packet_type = ?packet.packet_type(), state = ?self.state, "received packet");

        if self.state == ConnectionState::Connecting {
            return match packet {
                Packet::ConnAck(connack) => self.handle_connack(connack, now),
                Packet::Auth(auth) => {
                    self.events.push_back(Event::Auth(auth));
                    Ok(())
                }
                other => Err(MqttError::ProtocolError(format!(
                    "{:?} before CONNACK",
                    other.packet_type()
                ))),
            };
        }

        match packet {
            Packet::Publish(publish) => self.handle_publish(publish, now),
            Packet::PubAck(ack) => {
                let transition = self.session_mut()?.on_puback(ack.packet_id, ack.reason_code)?;
                self.complete_publish(ack.packet_id, transition);
                Ok(())
            }
            Packet::PubRec(rec) => self.handle_pubrec(&rec, now),
            Packet::PubComp(comp) => {
                let transition = self
                    .session_mut()?
                    .on_pubcomp(comp.packet_id, comp.reason_code)?;
                self.complete_publish(comp.packet_id, transition);
                Ok(())
            }
            Packet::PubRel(rel) => self.handle_pubrel(&rel, now),
            Packet::SubAck(ack) => {
                let count = ack.reason_codes.len();
                if self
                    .session_mut()?
                    .complete_request(ack.packet_id, true, Some(count))?
                    .is_some()
                {
                    self.events.push_back(Event::SubscribeCompleted {
                        packet_id: ack.packet_id,
                        result: Ok(ack.reason_codes),
                    });
                }
                Ok(())
            }
            Packet::UnsubAck(ack) => {
                let count = self
                    .options
                    .protocol_version
                    .is_v5()
                    .then_some(ack.reason_codes.len());
                if self
                    .session_mut()?
                    .complete_request(ack.packet_id, false, count)?
                    .is_some()
                {
                    self.events.push_back(Event::UnsubscribeCompleted {
                        packet_id: ack.packet_id,
                        result: Ok(ack.reason_codes),
                    });
                }
                Ok(())
            }
            Packet::PingResp => {
                if let Some(ka) = self.keep_alive.as_mut() {
                    ka.on_pingresp();
                }
                Ok(())
            }
            Packet::Disconnect(disconnect) => {
                info!(reason = ?disconnect.reason_code, "broker closed the connection");
                if let Some(interval) = disconnect.properties.session_expiry_interval() {
                    if let Some(session) = self.session.as_mut() {
                        session.set_session_expiry_interval(interval);
                    }
                }
                self.finish(Some(MqttError::ServerDisconnected(disconnect.reason_code)))
            }
            Packet::Auth(auth) if self.state == ConnectionState::Connected => {
                self.events.push_back(Event::Auth(auth));
                Ok(())
            }
            Packet::Auth(_) => Err(MqttError::ProtocolError(
                "AUTH while disconnecting".to_string(),
            )),
            Packet::ConnAck(_) => Err(MqttError::ProtocolError(
                "CONNACK on an established connection".to_string(),
            )),
            Packet::Connect(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) | Packet::PingReq => {
                Err(MqttError::ProtocolError(format!(
                    "{:?} is only sent to brokers",
                    packet.packet_type()
                )))
            }
        }
    }

    fn handle_connack(&mut self, connack: ConnAckPacket, now: Instant) -> Result<()> {
        if connack.reason_code.is_error() {
            warn!(reason = ?connack.reason_code, "connection refused");
            return self.finish(Some(MqttError::ConnectionRefused(connack.reason_code)));
        }

        if connack.session_present && self.options.clean_start {
            return Err(MqttError::ProtocolError(
                "session present after a clean start".to_string(),
            ));
        }

        let props = &connack.properties;
        let version = self.options.protocol_version;
        let maximum_qos = match props.maximum_qos() {
            Some(level) => QoS::from_u8(level).ok_or_else(|| {
                MqttError::ProtocolError(format!("invalid Maximum QoS {level}"))
            })?,
            None => QoS::ExactlyOnce,
        };
        let limits = ServerLimits {
            maximum_qos,
            retain_available: props.retain_available().unwrap_or(true),
        };
        let send_maximum = props
            .receive_maximum()
            .unwrap_or(crate::constants::defaults::RECEIVE_MAXIMUM);
        let send_alias_maximum = if version.is_v5() {
            props.topic_alias_maximum().unwrap_or(0)
        } else {
            0
        };
        let keep_alive = props.server_keep_alive().map_or(self.options.keep_alive, |secs| {
            Duration::from_secs(u64::from(secs))
        });
        let assigned_client_id = props.assigned_client_identifier().map(str::to_string);

        self.codec.set_max_outgoing_size(props.maximum_packet_size());

        let receive_alias_maximum = self.options.topic_alias_maximum();
        let session = self.session_mut()?;
        session.begin_connection(send_maximum, send_alias_maximum, receive_alias_maximum, limits);
        if let Some(interval) = props.session_expiry_interval() {
            session.set_session_expiry_interval(interval);
        }
        if let Some(id) = &assigned_client_id {
            session.set_client_id(id.clone());
        }

        if !connack.session_present {
            self.discard_flows(MqttError::SessionDiscarded)?;
        }

        self.keep_alive = Some(KeepAlive::new(
            keep_alive,
            self.options.keep_alive_config,
            now,
        ));
        self.set_state(ConnectionState::Connected);
        info!(
            session_present = connack.session_present,
            keep_alive_secs = keep_alive.as_secs(),
            "connected"
        );
        self.events.push_back(Event::Connected(ConnectResult {
            session_present: connack.session_present,
            assigned_client_id,
        }));

        if connack.session_present {
            let replay = self.session_mut()?.replay_packets();
            if !replay.is_empty() {
                debug!(flows = replay.len(), "resuming in-flight flows");
            }
            for packet in &replay {
                self.write_packet(packet, now)?;
            }
        }
        Ok(())
    }

    fn handle_publish(&mut self, mut publish: PublishPacket, now: Instant) -> Result<()> {
        let session = self.session_mut()?;
        session.resolve_topic(&mut publish)?;

        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => {
                self.events.push_back(Event::Message(Message::from(publish)));
                Ok(())
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.events.push_back(Event::Message(Message::from(publish)));
                self.write_packet(&Packet::PubAck(PubAckPacket::new(packet_id)), now)
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                if session.on_inbound_qos2(packet_id)? {
                    self.events.push_back(Event::Message(Message::from(publish)));
                }
                self.write_packet(&Packet::PubRec(PubRecPacket::new(packet_id)), now)
            }
            (_, None) => Err(MqttError::MalformedPacket(
                "QoS 1/2 PUBLISH without packet identifier".to_string(),
            )),
        }
    }

    fn handle_pubrec(&mut self, rec: &PubRecPacket, now: Instant) -> Result<()> {
        let transition = self.session_mut()?.on_pubrec(rec.packet_id, rec.reason_code)?;
        match transition {
            FlowTransition::SendPubRel => {
                self.write_packet(&Packet::PubRel(PubRelPacket::new(rec.packet_id)), now)
            }
            FlowTransition::Completed { .. } => {
                self.complete_publish(rec.packet_id, transition);
                Ok(())
            }
            FlowTransition::Unknown => {
                let pubrel =
                    self.not_found(rec.packet_id, PubRelPacket::new, PubRelPacket::new_with_reason);
                self.write_packet(&Packet::PubRel(pubrel), now)
            }
        }
    }

    fn handle_pubrel(&mut self, rel: &PubRelPacket, now: Instant) -> Result<()> {
        let pubcomp = if self.session_mut()?.on_pubrel(rel.packet_id)? {
            PubCompPacket::new(rel.packet_id)
        } else {
            warn!(packet_id = rel.packet_id, "PUBREL for unknown packet identifier");
            self.not_found(rel.packet_id, PubCompPacket::new, PubCompPacket::new_with_reason)
        };
        self.write_packet(&Packet::PubComp(pubcomp), now)
    }

    fn not_found<P>(
        &self,
        packet_id: u16,
        plain: fn(u16) -> P,
        with_reason: fn(u16, ReasonCode) -> P,
    ) -> P {
        if self.options.protocol_version.is_v5() {
            with_reason(packet_id, ReasonCode::PacketIdentifierNotFound)
        } else {
            plain(packet_id)
        }
    }

    fn complete_publish(&mut self, packet_id: u16, transition: FlowTransition) {
        if let FlowTransition::Completed { reason_code } = transition {
            let result = if reason_code.is_error() {
                Err(MqttError::PublishFailed(reason_code))
            } else {
                Ok(PublishResult::Acknowledged {
                    packet_id,
                    reason_code,
                })
            };
            self.events
                .push_back(Event::PublishCompleted { packet_id, result });
        }
    }

    fn session_mut(&mut self) -> Result<&mut SessionState> {
        self.session.as_mut().ok_or_else(|| {
            MqttError::InvariantViolation("connection has no session state".to_string())
        })
    }

    fn write_packet(&mut self, packet: &Packet, now: Instant) -> Result<()> {
        self.codec.encode(packet, &mut self.outgoing)?;
        self.packet_sent(now);
        Ok(())
    }

    fn packet_sent(&mut self, now: Instant) {
        if let Some(ka) = self.keep_alive.as_mut() {
            ka.on_packet_sent(now);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "connection state");
            self.state = state;
        }
    }

    /// Ends the connection after a fatal error
    fn fail(&mut self, err: MqttError) -> Result<()> {
        error!(error = %err, "closing connection");
        if self.options.protocol_version.is_v5() {
            if let Some(reason) = err.disconnect_reason() {
                let disconnect = Packet::Disconnect(DisconnectPacket::new(reason));
                if let Err(e) = self.codec.encode(&disconnect, &mut self.outgoing) {
                    warn!(error = %e, "could not encode DISCONNECT");
                }
            }
        }
        self.finish(Some(err.clone()))?;
        Err(err)
    }

    fn finish(&mut self, error: Option<MqttError>) -> Result<()> {
        self.set_state(ConnectionState::Disconnected);
        self.keep_alive = None;
        self.read_buf.clear();

        if let Some(session) = self.session.as_mut() {
            for (packet_id, request) in session.take_pending_requests()? {
                let result = Err(MqttError::NotConnected);
                self.events.push_back(match request {
                    PendingRequest::Subscribe { .. } => {
                        Event::SubscribeCompleted { packet_id, result }
                    }
                    PendingRequest::Unsubscribe { .. } => {
                        Event::UnsubscribeCompleted { packet_id, result }
                    }
                });
            }
        }

        if !self.session_persists() {
            self.discard_session(MqttError::SessionDiscarded)?;
        }

        self.events.push_back(Event::Disconnected { error });
        Ok(())
    }

    fn discard_flows(&mut self, reason: MqttError) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        for packet_id in session.discard_flows()? {
            self.events.push_back(Event::PublishCompleted {
                packet_id,
                result: Err(reason.clone()),
            });
        }
        Ok(())
    }

    fn discard_session(&mut self, reason: MqttError) -> Result<()> {
        self.discard_flows(reason)?;
        self.session = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_packet;
    use crate::packet::suback::SubAckPacket;
    use crate::protocol::ProtocolVersion;
    use crate::types::KeepAliveConfig;

    fn options(version: ProtocolVersion) -> ConnectOptions {
        ConnectOptions::new("test-client")
            .with_protocol_version(version)
            .with_keep_alive(Duration::from_secs(10))
    }

    fn sent(conn: &mut Connection, version: ProtocolVersion) -> Vec<Packet> {
        let mut bytes = BytesMut::from(&conn.take_outgoing().unwrap_or_default()[..]);
        let codec = PacketCodec::new(version);
        let mut packets = Vec::new();
        while let Some(packet) = codec.decode(&mut bytes).unwrap() {
            packets.push(packet);
        }
        packets
    }

    fn feed(conn: &mut Connection, packet: Packet, now: Instant) -> Result<()> {
        let bytes = packet.to_bytes(conn.options().protocol_version).unwrap();
        conn.handle_bytes(&bytes, now)
    }

    fn events(conn: &mut Connection) -> Vec<Event> {
        std::iter::from_fn(|| conn.poll_event()).collect()
    }

    fn connected(version: ProtocolVersion, connack: ConnAckPacket) -> (Connection, Instant) {
        let now = Instant::now();
        let mut conn = Connection::new(options(version));
        conn.connect(now).unwrap();
        conn.take_outgoing();
        feed(&mut conn, Packet::ConnAck(connack), now).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        events(&mut conn);
        (conn, now)
    }

    #[test]
    fn test_connect_sends_connect() {
        let mut conn = Connection::new(options(ProtocolVersion::V311));
        conn.connect(Instant::now()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let bytes = conn.take_outgoing().unwrap();
        match decode_packet(&bytes, ProtocolVersion::V311).unwrap() {
            Packet::Connect(connect) => {
                assert_eq!(connect.client_id, "test-client");
                assert_eq!(connect.keep_alive, 10);
            }
            other => panic!("expected CONNECT, got {other:?}"),
        }
        assert!(matches!(
            conn.connect(Instant::now()),
            Err(MqttError::AlreadyConnected)
        ));
    }

    #[test]
    fn test_connack_refused() {
        let now = Instant::now();
        let mut conn = Connection::new(options(ProtocolVersion::V5));
        conn.connect(now).unwrap();
        feed(
            &mut conn,
            Packet::ConnAck(ConnAckPacket::new(false, ReasonCode::NotAuthorized)),
            now,
        )
        .unwrap();

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            events(&mut conn),
            vec![Event::Disconnected {
                error: Some(MqttError::ConnectionRefused(ReasonCode::NotAuthorized))
            }]
        );
    }

    #[test]
    fn test_packet_before_connack_is_protocol_error() {
        let now = Instant::now();
        let mut conn = Connection::new(options(ProtocolVersion::V5));
        conn.connect(now).unwrap();
        conn.take_outgoing();

        assert!(matches!(
            feed(&mut conn, Packet::PingResp, now),
            Err(MqttError::ProtocolError(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V5),
            vec![Packet::Disconnect(DisconnectPacket::new(
                ReasonCode::ProtocolError
            ))]
        );
    }

    #[test]
    fn test_connack_negotiation() {
        let connack = ConnAckPacket::new(false, ReasonCode::Success)
            .with_receive_maximum(1)
            .with_maximum_qos(1)
            .with_retain_available(false)
            .with_server_keep_alive(30)
            .with_assigned_client_id("assigned-1".to_string());
        let now = Instant::now();
        let mut conn = Connection::new(options(ProtocolVersion::V5));
        conn.connect(now).unwrap();
        feed(&mut conn, Packet::ConnAck(connack), now).unwrap();

        assert_eq!(
            events(&mut conn),
            vec![Event::Connected(ConnectResult {
                session_present: false,
                assigned_client_id: Some("assigned-1".to_string()),
            })]
        );
        let session = conn.session().unwrap();
        assert_eq!(session.client_id(), "assigned-1");
        assert_eq!(session.flow_control().send_maximum(), 1);
        assert_eq!(
            conn.next_timeout(),
            Some(now + KeepAliveConfig::default().ping_interval(Duration::from_secs(30)))
        );

        let qos2 = PublishOptions::new(QoS::ExactlyOnce);
        assert!(matches!(
            conn.publish("t", b"x".to_vec(), &qos2, now),
            Err(MqttError::ProtocolError(_))
        ));
        let retained = PublishOptions::new(QoS::AtMostOnce).with_retain(true);
        assert!(matches!(
            conn.publish("t", b"x".to_vec(), &retained, now),
            Err(MqttError::ProtocolError(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Connected);

        let qos1 = PublishOptions::new(QoS::AtLeastOnce);
        conn.publish("t", b"x".to_vec(), &qos1, now).unwrap();
        assert!(matches!(
            conn.publish("t", b"x".to_vec(), &qos1, now),
            Err(MqttError::QuotaExceeded)
        ));
    }

    #[test]
    fn test_qos1_publish_completion() {
        let (mut conn, now) = connected(
            ProtocolVersion::V311,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        let id = conn
            .publish("a/b", b"hi".to_vec(), &PublishOptions::new(QoS::AtLeastOnce), now)
            .unwrap()
            .unwrap();
        assert_eq!(id, 1);

        feed(&mut conn, Packet::PubAck(PubAckPacket::new(id)), now).unwrap();
        assert_eq!(
            events(&mut conn),
            vec![Event::PublishCompleted {
                packet_id: id,
                result: Ok(PublishResult::Acknowledged {
                    packet_id: id,
                    reason_code: ReasonCode::Success
                })
            }]
        );
    }

    #[test]
    fn test_puback_error_reason_fails_publish() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        let id = conn
            .publish("a/b", b"hi".to_vec(), &PublishOptions::new(QoS::AtLeastOnce), now)
            .unwrap()
            .unwrap();

        feed(
            &mut conn,
            Packet::PubAck(PubAckPacket::new_with_reason(id, ReasonCode::NotAuthorized)),
            now,
        )
        .unwrap();
        assert_eq!(
            events(&mut conn),
            vec![Event::PublishCompleted {
                packet_id: id,
                result: Err(MqttError::PublishFailed(ReasonCode::NotAuthorized))
            }]
        );
        assert_eq!(conn.session().unwrap().packet_ids().in_flight(), 0);
    }

    #[test]
    fn test_unknown_pubrec_answered_with_not_found() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        feed(&mut conn, Packet::PubRec(PubRecPacket::new(77)), now).unwrap();
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V5),
            vec![Packet::PubRel(PubRelPacket::new_with_reason(
                77,
                ReasonCode::PacketIdentifierNotFound
            ))]
        );

        feed(&mut conn, Packet::PubRel(PubRelPacket::new(78)), now).unwrap();
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V5),
            vec![Packet::PubComp(PubCompPacket::new_with_reason(
                78,
                ReasonCode::PacketIdentifierNotFound
            ))]
        );
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_inbound_qos1_is_acknowledged() {
        let (mut conn, now) = connected(
            ProtocolVersion::V311,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        let publish = PublishPacket::new("in/topic", b"data".to_vec(), QoS::AtLeastOnce)
            .with_packet_id(9);
        feed(&mut conn, Packet::Publish(publish), now).unwrap();

        match events(&mut conn).as_slice() {
            [Event::Message(message)] => {
                assert_eq!(message.topic, "in/topic");
                assert_eq!(&message.payload[..], b"data");
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V311),
            vec![Packet::PubAck(PubAckPacket::new(9))]
        );
    }

    #[test]
    fn test_subscribe_roundtrip_and_count_mismatch() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        let id = conn
            .subscribe(
                vec![TopicFilter::new("a/+", QoS::AtLeastOnce)],
                Properties::default(),
                now,
            )
            .unwrap();
        feed(
            &mut conn,
            Packet::SubAck(SubAckPacket::new(id).add_reason_code(ReasonCode::GrantedQoS1)),
            now,
        )
        .unwrap();
        assert_eq!(
            events(&mut conn),
            vec![Event::SubscribeCompleted {
                packet_id: id,
                result: Ok(vec![ReasonCode::GrantedQoS1])
            }]
        );

        let id = conn
            .subscribe(
                vec![TopicFilter::new("b", QoS::AtMostOnce)],
                Properties::default(),
                now,
            )
            .unwrap();
        let suback = SubAckPacket::new(id)
            .add_reason_code(ReasonCode::Success)
            .add_reason_code(ReasonCode::Success);
        assert!(matches!(
            feed(&mut conn, Packet::SubAck(suback), now),
            Err(MqttError::ProtocolError(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_request_validation() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        assert!(matches!(
            conn.subscribe(Vec::new(), Properties::default(), now),
            Err(MqttError::ProtocolError(_))
        ));
        assert!(matches!(
            conn.subscribe(
                vec![TopicFilter::new("a/#/b", QoS::AtMostOnce)],
                Properties::default(),
                now
            ),
            Err(MqttError::InvalidTopicFilter(_))
        ));
        assert!(matches!(
            conn.publish("a/+", Bytes::new(), &PublishOptions::default(), now),
            Err(MqttError::InvalidTopicName(_))
        ));
        assert_eq!(conn.session().unwrap().packet_ids().in_flight(), 0);
    }

    #[test]
    fn test_broker_bound_packets_rejected() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        assert!(matches!(
            feed(&mut conn, Packet::PingReq, now),
            Err(MqttError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_keep_alive_ping_and_timeout() {
        let (mut conn, start) = connected(
            ProtocolVersion::V311,
            ConnAckPacket::new(false, ReasonCode::Success),
        );

        conn.handle_tick(start + Duration::from_millis(7499)).unwrap();
        assert!(conn.take_outgoing().is_none());

        let ping_at = start + Duration::from_millis(7500);
        conn.handle_tick(ping_at).unwrap();
        assert_eq!(sent(&mut conn, ProtocolVersion::V311), vec![Packet::PingReq]);

        feed(&mut conn, Packet::PingResp, ping_at).unwrap();
        conn.handle_tick(ping_at + Duration::from_secs(15)).unwrap();
        assert_eq!(sent(&mut conn, ProtocolVersion::V311), vec![Packet::PingReq]);

        let result = conn.handle_tick(ping_at + Duration::from_secs(30));
        assert!(matches!(result, Err(MqttError::KeepAliveTimeout)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_server_disconnect() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        feed(
            &mut conn,
            Packet::Disconnect(DisconnectPacket::new(ReasonCode::ServerShuttingDown)),
            now,
        )
        .unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            events(&mut conn),
            vec![Event::Disconnected {
                error: Some(MqttError::ServerDisconnected(
                    ReasonCode::ServerShuttingDown
                ))
            }]
        );
    }

    #[test]
    fn test_local_disconnect() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        conn.disconnect(now).unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnecting);
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V5),
            vec![Packet::Disconnect(DisconnectPacket::default())]
        );

        conn.handle_transport_closed().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(events(&mut conn), vec![Event::Disconnected { error: None }]);
        assert!(conn.session().is_none());
    }

    #[test]
    fn test_connection_loss_discards_clean_session() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success),
        );
        let id = conn
            .publish("a", b"1".to_vec(), &PublishOptions::new(QoS::ExactlyOnce), now)
            .unwrap()
            .unwrap();
        let sub = conn
            .subscribe(
                vec![TopicFilter::new("x", QoS::AtMostOnce)],
                Properties::default(),
                now,
            )
            .unwrap();

        conn.handle_transport_closed().unwrap();
        let events = events(&mut conn);
        assert_eq!(
            events,
            vec![
                Event::SubscribeCompleted {
                    packet_id: sub,
                    result: Err(MqttError::NotConnected)
                },
                Event::PublishCompleted {
                    packet_id: id,
                    result: Err(MqttError::SessionDiscarded)
                },
                Event::Disconnected {
                    error: Some(MqttError::Io("connection closed".to_string()))
                },
            ]
        );
    }

    fn alias_receiver(now: Instant) -> Connection {
        let mut conn = Connection::new(options(ProtocolVersion::V5).with_topic_alias_maximum(2));
        conn.connect(now).unwrap();
        conn.take_outgoing();
        feed(
            &mut conn,
            Packet::ConnAck(ConnAckPacket::new(false, ReasonCode::Success)),
            now,
        )
        .unwrap();
        events(&mut conn);
        conn
    }

    #[test]
    fn test_inbound_topic_alias_resolved() {
        let now = Instant::now();
        let mut conn = alias_receiver(now);

        let bind = PublishPacket::new("plant/boiler", b"1".to_vec(), QoS::AtMostOnce)
            .with_topic_alias(1);
        feed(&mut conn, Packet::Publish(bind), now).unwrap();
        let aliased = PublishPacket::new("", b"2".to_vec(), QoS::AtMostOnce).with_topic_alias(1);
        feed(&mut conn, Packet::Publish(aliased), now).unwrap();

        let topics: Vec<String> = events(&mut conn)
            .into_iter()
            .map(|event| match event {
                Event::Message(message) => message.topic,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(topics, vec!["plant/boiler", "plant/boiler"]);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_unbound_inbound_alias_closes_connection() {
        let now = Instant::now();
        let mut conn = alias_receiver(now);

        let unbound = PublishPacket::new("", b"x".to_vec(), QoS::AtMostOnce).with_topic_alias(2);
        assert!(matches!(
            feed(&mut conn, Packet::Publish(unbound), now),
            Err(MqttError::ProtocolError(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V5),
            vec![Packet::Disconnect(DisconnectPacket::new(
                ReasonCode::ProtocolError
            ))]
        );
    }

    #[test]
    fn test_inbound_alias_above_maximum_closes_connection() {
        let now = Instant::now();
        let mut conn = alias_receiver(now);

        let beyond = PublishPacket::new("a", b"x".to_vec(), QoS::AtMostOnce).with_topic_alias(3);
        assert!(matches!(
            feed(&mut conn, Packet::Publish(beyond), now),
            Err(MqttError::TopicAliasInvalid(3))
        ));
        assert_eq!(
            sent(&mut conn, ProtocolVersion::V5),
            vec![Packet::Disconnect(DisconnectPacket::new(
                ReasonCode::TopicAliasInvalid
            ))]
        );
    }

    #[test]
    fn test_topic_alias_reused_after_first_publish() {
        let (mut conn, now) = connected(
            ProtocolVersion::V5,
            ConnAckPacket::new(false, ReasonCode::Success).with_topic_alias_maximum(4),
        );
        let options = PublishOptions::new(QoS::AtMostOnce).with_topic_alias(true);
        conn.publish("sensors/temp", b"1".to_vec(), &options, now).unwrap();
        conn.publish("sensors/temp", b"2".to_vec(), &options, now).unwrap();

        let packets = sent(&mut conn, ProtocolVersion::V5);
        match packets.as_slice() {
            [Packet::Publish(first), Packet::Publish(second)] => {
                assert_eq!(first.topic_name, "sensors/temp");
                assert_eq!(first.topic_alias(), Some(1));
                assert_eq!(second.topic_name, "");
                assert_eq!(second.topic_alias(), Some(1));
            }
            other => panic!("unexpected packets {other:?}"),
        }
    }
}
