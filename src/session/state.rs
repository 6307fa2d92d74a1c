use crate::codec::{decode_packet, encode_packet};
use crate::error::{MqttError, Result};
use crate::packet::publish::PublishPacket;
use crate::packet::pubrel::PubRelPacket;
use crate::packet::Packet;
use crate::packet_id::PacketIdAllocator;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use crate::session::flow_control::FlowControl;
use crate::session::qos::{FlowTransition, OutboundState, QosFlows};
use crate::session::store::{PersistedFlow, SessionSnapshot};
use crate::session::topic_alias::{AliasAssignment, InboundAliases, OutboundAliases};
use crate::QoS;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A SUBSCRIBE or UNSUBSCRIBE waiting for its acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRequest {
    Subscribe { filters: usize },
    Unsubscribe { filters: usize },
}

/// Limits the broker announced in CONNACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    pub maximum_qos: QoS,
    pub retain_available: bool,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            maximum_qos: QoS::ExactlyOnce,
            retain_available: true,
        }
    }
}

/// Per-session protocol state
///
/// Identifier allocation, quota, in-flight `QoS` flows and pending
/// subscription requests survive reconnects while the session does. Topic
/// aliases and server limits belong to one network connection and are reset
/// by [`SessionState::begin_connection`].
#[derive(Debug, Clone)]
pub struct SessionState {
    client_id: String,
    protocol_version: ProtocolVersion,
    session_expiry_interval: u32,
    packet_ids: PacketIdAllocator,
    flow_control: FlowControl,
    flows: QosFlows,
    pending: HashMap<u16, PendingRequest>,
    send_aliases: OutboundAliases,
    receive_aliases: InboundAliases,
    limits: ServerLimits,
}

impl SessionState {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        protocol_version: ProtocolVersion,
        receive_maximum: u16,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            protocol_version,
            session_expiry_interval: 0,
            packet_ids: PacketIdAllocator::new(),
            flow_control: FlowControl::new(receive_maximum),
            flows: QosFlows::new(),
            pending: HashMap::new(),
            send_aliases: OutboundAliases::default(),
            receive_aliases: InboundAliases::default(),
            limits: ServerLimits::default(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
    }

    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> u32 {
        self.session_expiry_interval
    }

    pub fn set_session_expiry_interval(&mut self, interval: u32) {
        self.session_expiry_interval = interval;
    }

    #[must_use]
    pub fn flow_control(&self) -> &FlowControl {
        &self.flow_control
    }

    #[must_use]
    pub fn flows(&self) -> &QosFlows {
        &self.flows
    }

    #[must_use]
    pub fn packet_ids(&self) -> &PacketIdAllocator {
        &self.packet_ids
    }

    #[must_use]
    pub fn limits(&self) -> ServerLimits {
        self.limits
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Applies what a successful CONNACK negotiated for the new connection
    pub fn begin_connection(
        &mut self,
        send_maximum: u16,
        send_alias_maximum: u16,
        receive_alias_maximum: u16,
        limits: ServerLimits,
    ) {
        self.flow_control.set_send_maximum(send_maximum);
        self.send_aliases.reset(send_alias_maximum);
        self.receive_aliases.reset(receive_alias_maximum);
        self.limits = limits;
    }

    /// Starts an outgoing publish
    ///
    /// `QoS` 0 publishes pass through untouched. For `QoS` 1/2 the quota is
    /// checked before an identifier is drawn, so a refused publish leaves no
    /// trace in the session.
    ///
    /// # Errors
    ///
    /// - `QuotaExceeded` when the broker's Receive Maximum is reached
    /// - `PacketIdExhausted` when every identifier is in flight
    pub fn begin_publish(&mut self, mut publish: PublishPacket) -> Result<PublishPacket> {
        if publish.qos == QoS::AtMostOnce {
            publish.packet_id = None;
            return Ok(publish);
        }

        if self.flow_control.send_quota() == 0 {
            return Err(MqttError::QuotaExceeded);
        }
        let packet_id = self.packet_ids.allocate()?;
        self.flow_control.acquire_send()?;

        publish.packet_id = Some(packet_id);
        publish.dup = false;
        self.flows.start_outbound(&publish)?;
        debug!(packet_id, qos = ?publish.qos, topic = %publish.topic_name, "publish in flight");
        Ok(publish)
    }

    /// Undoes [`SessionState::begin_publish`] for a PUBLISH that could not be
    /// encoded
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if no such flow exists
    pub fn abort_publish(&mut self, packet_id: u16) -> Result<()> {
        if self.flows.remove_outbound(packet_id).is_none() {
            return Err(MqttError::InvariantViolation(format!(
                "aborted publish {packet_id} has no flow"
            )));
        }
        self.packet_ids.release(packet_id)?;
        self.flow_control.release_send()
    }

    /// Withdraws a topic alias bound for a PUBLISH that was never written
    pub fn abort_topic_alias(&mut self, publish: &PublishPacket) {
        if publish.topic_alias().is_some() && !publish.topic_name.is_empty() {
            self.send_aliases.unbind_last(&publish.topic_name);
        }
    }

    /// Undoes [`SessionState::begin_request`] for a request that could not be
    /// encoded
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if identifier bookkeeping is inconsistent
    pub fn abort_request(&mut self, packet_id: u16) -> Result<()> {
        self.pending.remove(&packet_id);
        self.packet_ids.release(packet_id)
    }

    /// Substitutes a topic alias into a PUBLISH about to be written
    #[must_use]
    pub fn apply_topic_alias(&mut self, mut publish: PublishPacket) -> PublishPacket {
        match self.send_aliases.bind_or_reuse(&publish.topic_name) {
            AliasAssignment::Reuse(alias) => {
                publish.topic_name.clear();
                publish.properties.set_topic_alias(alias);
            }
            AliasAssignment::Bind(alias) => publish.properties.set_topic_alias(alias),
            AliasAssignment::None => {}
        }
        publish
    }

    /// Resolves the topic of an incoming PUBLISH in place
    ///
    /// # Errors
    ///
    /// Returns `TopicAliasInvalid` or `ProtocolError` for alias misuse
    pub fn resolve_topic(&mut self, publish: &mut PublishPacket) -> Result<()> {
        let alias = publish.topic_alias();
        publish.topic_name = self.receive_aliases.resolve(&publish.topic_name, alias)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ProtocolError` if the identifier belongs to a `QoS` 2 flow
    pub fn on_puback(&mut self, packet_id: u16, reason_code: ReasonCode) -> Result<FlowTransition> {
        let transition = self.flows.on_puback(packet_id, reason_code)?;
        self.settle(packet_id, transition)
    }

    /// # Errors
    ///
    /// Returns `ProtocolError` if the identifier belongs to a `QoS` 1 flow
    pub fn on_pubrec(&mut self, packet_id: u16, reason_code: ReasonCode) -> Result<FlowTransition> {
        let transition = self.flows.on_pubrec(packet_id, reason_code)?;
        self.settle(packet_id, transition)
    }

    /// # Errors
    ///
    /// Returns `ProtocolError` if PUBREC has not been received for the flow
    pub fn on_pubcomp(&mut self, packet_id: u16, reason_code: ReasonCode) -> Result<FlowTransition> {
        let transition = self.flows.on_pubcomp(packet_id, reason_code)?;
        self.settle(packet_id, transition)
    }

    fn settle(&mut self, packet_id: u16, transition: FlowTransition) -> Result<FlowTransition> {
        match transition {
            FlowTransition::Completed { .. } => {
                self.packet_ids.release(packet_id)?;
                self.flow_control.release_send()?;
            }
            FlowTransition::Unknown => {
                warn!(packet_id, "acknowledgment for unknown packet identifier");
            }
            FlowTransition::SendPubRel => {}
        }
        Ok(transition)
    }

    /// Registers an incoming `QoS` 2 PUBLISH
    ///
    /// Returns `false` for a retransmission of a message already delivered.
    ///
    /// # Errors
    ///
    /// Returns `ReceiveMaximumExceeded` if the broker has more unreleased
    /// `QoS` 2 messages in flight than we allow
    pub fn on_inbound_qos2(&mut self, packet_id: u16) -> Result<bool> {
        if self.flows.is_inbound_pending(packet_id) {
            debug!(packet_id, "duplicate QoS 2 publish, not delivered again");
            return Ok(false);
        }
        self.flow_control.acquire_receive()?;
        self.flows.on_inbound_publish(packet_id);
        Ok(true)
    }

    /// Ends an incoming `QoS` 2 flow; `false` if the identifier was unknown
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if quota bookkeeping is inconsistent
    pub fn on_pubrel(&mut self, packet_id: u16) -> Result<bool> {
        if self.flows.on_pubrel(packet_id) {
            self.flow_control.release_receive()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Draws an identifier for a SUBSCRIBE or UNSUBSCRIBE
    ///
    /// # Errors
    ///
    /// Returns `PacketIdExhausted` when every identifier is in flight
    pub fn begin_request(&mut self, request: PendingRequest) -> Result<u16> {
        let packet_id = self.packet_ids.allocate()?;
        self.pending.insert(packet_id, request);
        Ok(packet_id)
    }

    /// Matches a SUBACK or UNSUBACK to its request
    ///
    /// Returns `None` for an unknown identifier. A v3.1.1 UNSUBACK carries no
    /// reason codes, so `reason_count` is `None` for it.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the acknowledgment type or the number of
    /// reason codes does not match the request
    pub fn complete_request(
        &mut self,
        packet_id: u16,
        subscribe: bool,
        reason_count: Option<usize>,
    ) -> Result<Option<PendingRequest>> {
        let Some(request) = self.pending.get(&packet_id).copied() else {
            warn!(packet_id, "acknowledgment for unknown request");
            return Ok(None);
        };

        let expected = match (request, subscribe) {
            (PendingRequest::Subscribe { filters }, true)
            | (PendingRequest::Unsubscribe { filters }, false) => filters,
            _ => {
                return Err(MqttError::ProtocolError(format!(
                    "acknowledgment type does not match request {packet_id}"
                )))
            }
        };

        if let Some(count) = reason_count {
            if count != expected {
                return Err(MqttError::ProtocolError(format!(
                    "{count} reason code(s) for {expected} filter(s) in request {packet_id}"
                )));
            }
        }

        self.pending.remove(&packet_id);
        self.packet_ids.release(packet_id)?;
        Ok(Some(request))
    }

    /// Fails every pending subscription request, returning their identifiers
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if identifier bookkeeping is inconsistent
    pub fn take_pending_requests(&mut self) -> Result<Vec<(u16, PendingRequest)>> {
        let mut requests: Vec<_> = self.pending.drain().collect();
        requests.sort_unstable_by_key(|(id, _)| *id);
        for (packet_id, _) in &requests {
            self.packet_ids.release(*packet_id)?;
        }
        Ok(requests)
    }

    /// Drops every in-flight flow, returning outgoing identifiers in send order
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if identifier bookkeeping is inconsistent
    pub fn discard_flows(&mut self) -> Result<Vec<u16>> {
        let ids = self.flows.drain();
        for packet_id in &ids {
            self.packet_ids.release(*packet_id)?;
        }
        self.flow_control.clear();
        if !ids.is_empty() {
            debug!(flows = ids.len(), "discarded in-flight flows");
        }
        Ok(ids)
    }

    /// Packets that resume the in-flight flows on a continued session
    ///
    /// Flows still waiting for PUBACK or PUBREC resend their PUBLISH with DUP
    /// set and the full topic; flows waiting for PUBCOMP resend PUBREL.
    #[must_use]
    pub fn replay_packets(&self) -> Vec<Packet> {
        self.flows
            .outbound_in_order()
            .into_iter()
            .filter_map(|flow| match (flow.state, &flow.publish) {
                (OutboundState::AwaitingPubComp, _) => {
                    Some(Packet::PubRel(PubRelPacket::new(flow.packet_id)))
                }
                (_, Some(publish)) => Some(Packet::Publish(publish.clone().with_dup(true))),
                (_, None) => {
                    warn!(packet_id = flow.packet_id, "in-flight publish has no stored packet");
                    None
                }
            })
            .collect()
    }

    /// # Errors
    ///
    /// Returns an encoding error if a stored PUBLISH cannot be encoded
    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        let outbound = self
            .flows
            .outbound_in_order()
            .into_iter()
            .map(|flow| {
                let publish = match &flow.publish {
                    Some(publish) => Some(encode_packet(
                        &Packet::Publish(publish.clone()),
                        self.protocol_version,
                    )?),
                    None => None,
                };
                Ok(PersistedFlow {
                    packet_id: flow.packet_id,
                    state: flow.state,
                    publish,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SessionSnapshot {
            client_id: self.client_id.clone(),
            protocol_version: self.protocol_version,
            session_expiry_interval: self.session_expiry_interval,
            outbound,
            inbound_awaiting_release: self.flows.inbound_pending(),
        })
    }

    /// Rebuilds session state from a snapshot
    ///
    /// # Errors
    ///
    /// - `Storage` if the snapshot is for another protocol version or holds a
    ///   PUBLISH that does not decode
    /// - `InvariantViolation` if identifiers repeat
    pub fn restore(snapshot: &SessionSnapshot, receive_maximum: u16) -> Result<Self> {
        let mut state = Self::new(
            snapshot.client_id.clone(),
            snapshot.protocol_version,
            receive_maximum,
        );
        state.session_expiry_interval = snapshot.session_expiry_interval;

        for flow in &snapshot.outbound {
            let publish = match &flow.publish {
                Some(bytes) => match decode_packet(bytes, snapshot.protocol_version) {
                    Ok(Packet::Publish(publish)) => Some(publish),
                    Ok(other) => {
                        return Err(MqttError::Storage(format!(
                            "persisted flow {} holds {:?} instead of PUBLISH",
                            flow.packet_id,
                            other.packet_type()
                        )))
                    }
                    Err(e) => {
                        return Err(MqttError::Storage(format!(
                            "persisted flow {} does not decode: {e}",
                            flow.packet_id
                        )))
                    }
                },
                None => None,
            };

            if publish.is_none() && flow.state != OutboundState::AwaitingPubComp {
                return Err(MqttError::Storage(format!(
                    "persisted flow {} is missing its PUBLISH",
                    flow.packet_id
                )));
            }

            state.packet_ids.reserve(flow.packet_id)?;
            state.flow_control.acquire_send()?;
            state.flows.restore_outbound(flow.packet_id, flow.state, publish)?;
        }

        for packet_id in &snapshot.inbound_awaiting_release {
            state.on_inbound_qos2(*packet_id)?;
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionState {
        SessionState::new("client", ProtocolVersion::V5, 10)
    }

    fn publish(qos: QoS) -> PublishPacket {
        PublishPacket::new("a/b", b"hello".to_vec(), qos)
    }

    #[test]
    fn test_qos0_publish_takes_nothing() {
        let mut session = session();
        let packet = session.begin_publish(publish(QoS::AtMostOnce)).unwrap();
        assert_eq!(packet.packet_id, None);
        assert_eq!(session.packet_ids().in_flight(), 0);
        assert_eq!(session.flow_control().send_outstanding(), 0);
    }

    #[test]
    fn test_qos2_exchange_releases_identifier() {
        let mut session = session();
        let packet = session.begin_publish(publish(QoS::ExactlyOnce)).unwrap();
        let id = packet.packet_id.unwrap();

        assert_eq!(
            session.on_pubrec(id, ReasonCode::Success).unwrap(),
            FlowTransition::SendPubRel
        );
        assert!(session.packet_ids().is_allocated(id));

        assert!(matches!(
            session.on_pubcomp(id, ReasonCode::Success).unwrap(),
            FlowTransition::Completed { .. }
        ));
        assert!(!session.packet_ids().is_allocated(id));
        assert_eq!(session.flow_control().send_outstanding(), 0);
    }

    #[test]
    fn test_quota_refusal_leaves_no_trace() {
        let mut session = session();
        session.begin_connection(1, 0, 0, ServerLimits::default());

        session.begin_publish(publish(QoS::AtLeastOnce)).unwrap();
        assert!(matches!(
            session.begin_publish(publish(QoS::AtLeastOnce)),
            Err(MqttError::QuotaExceeded)
        ));
        assert_eq!(session.packet_ids().in_flight(), 1);
    }

    #[test]
    fn test_topic_alias_substitution() {
        let mut session = session();
        session.begin_connection(100, 2, 0, ServerLimits::default());

        let first = session.apply_topic_alias(publish(QoS::AtMostOnce));
        assert_eq!(first.topic_name, "a/b");
        assert_eq!(first.topic_alias(), Some(1));

        let second = session.apply_topic_alias(publish(QoS::AtMostOnce));
        assert_eq!(second.topic_name, "");
        assert_eq!(second.topic_alias(), Some(1));

        // Aliases do not survive a new connection
        session.begin_connection(100, 2, 0, ServerLimits::default());
        let third = session.apply_topic_alias(publish(QoS::AtMostOnce));
        assert_eq!(third.topic_name, "a/b");
    }

    #[test]
    fn test_request_completion_checks_count() {
        let mut session = session();
        let id = session
            .begin_request(PendingRequest::Subscribe { filters: 2 })
            .unwrap();

        assert!(matches!(
            session.complete_request(id, true, Some(1)),
            Err(MqttError::ProtocolError(_))
        ));
        assert!(matches!(
            session.complete_request(id, false, Some(2)),
            Err(MqttError::ProtocolError(_))
        ));
        assert_eq!(
            session.complete_request(id, true, Some(2)).unwrap(),
            Some(PendingRequest::Subscribe { filters: 2 })
        );
        assert_eq!(session.complete_request(id, true, Some(2)).unwrap(), None);
        assert_eq!(session.packet_ids().in_flight(), 0);
    }

    #[test]
    fn test_replay_order_and_forms() {
        let mut session = session();
        let first = session.begin_publish(publish(QoS::ExactlyOnce)).unwrap();
        let second = session.begin_publish(publish(QoS::AtLeastOnce)).unwrap();
        let first_id = first.packet_id.unwrap();
        session.on_pubrec(first_id, ReasonCode::Success).unwrap();

        let replay = session.replay_packets();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0], Packet::PubRel(PubRelPacket::new(first_id)));
        match &replay[1] {
            Packet::Publish(p) => {
                assert!(p.dup);
                assert_eq!(p.packet_id, second.packet_id);
                assert_eq!(p.topic_name, "a/b");
            }
            other => panic!("unexpected replay packet {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let mut session = session();
        session.set_session_expiry_interval(120);
        let first = session.begin_publish(publish(QoS::AtLeastOnce)).unwrap();
        let second = session.begin_publish(publish(QoS::ExactlyOnce)).unwrap();
        session
            .on_pubrec(second.packet_id.unwrap(), ReasonCode::Success)
            .unwrap();
        assert!(session.on_inbound_qos2(42).unwrap());

        let snapshot = session.snapshot().unwrap();
        let restored = SessionState::restore(&snapshot, 10).unwrap();

        assert_eq!(restored.session_expiry_interval(), 120);
        assert_eq!(restored.replay_packets(), session.replay_packets());
        assert!(restored.packet_ids().is_allocated(first.packet_id.unwrap()));
        assert_eq!(restored.flow_control().send_outstanding(), 2);
        assert!(restored.flows().is_inbound_pending(42));
    }

    #[test]
    fn test_discard_flows_frees_everything() {
        let mut session = session();
        let a = session.begin_publish(publish(QoS::AtLeastOnce)).unwrap();
        let b = session.begin_publish(publish(QoS::ExactlyOnce)).unwrap();
        session.on_inbound_qos2(7).unwrap();

        let ids = session.discard_flows().unwrap();
        assert_eq!(ids, vec![a.packet_id.unwrap(), b.packet_id.unwrap()]);
        assert_eq!(session.packet_ids().in_flight(), 0);
        assert_eq!(session.flow_control().send_quota(), u16::MAX);
        assert!(!session.flows().is_inbound_pending(7));
    }
}
