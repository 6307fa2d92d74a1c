//! `QoS` 1/2 acknowledgment handshakes
//!
//! Outgoing flows move `AwaitingPubAck -> done` for `QoS` 1 and
//! `AwaitingPubRec -> AwaitingPubComp -> done` for `QoS` 2. Incoming `QoS` 2
//! flows are remembered from the first PUBLISH until PUBREL so that a
//! retransmitted PUBLISH is acknowledged again without a second delivery.

use crate::error::{MqttError, Result};
use crate::packet::publish::PublishPacket;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::QoS;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboundState {
    AwaitingPubAck,
    AwaitingPubRec,
    AwaitingPubComp,
}

impl OutboundState {
    /// State entered when a PUBLISH of the given `QoS` is sent
    #[must_use]
    pub fn initial(qos: QoS) -> Option<Self> {
        match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(Self::AwaitingPubAck),
            QoS::ExactlyOnce => Some(Self::AwaitingPubRec),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFlow {
    pub packet_id: u16,
    pub state: OutboundState,
    /// The PUBLISH as first built, with its full topic; dropped once PUBREC
    /// arrives since only PUBREL is ever resent after that
    pub publish: Option<PublishPacket>,
    sequence: u64,
}

/// Result of feeding an acknowledgment to an outgoing flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowTransition {
    /// The exchange is over; the broker's reason code says how it ended
    Completed { reason_code: ReasonCode },
    /// PUBREC accepted; PUBREL must follow
    SendPubRel,
    /// No flow is waiting on this identifier
    Unknown,
}

/// In-flight `QoS` flows of one session, both directions
#[derive(Debug, Clone, Default)]
pub struct QosFlows {
    outbound: HashMap<u16, OutboundFlow>,
    next_sequence: u64,
    inbound: HashSet<u16>,
}

impl QosFlows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a PUBLISH that was just sent
    ///
    /// # Errors
    ///
    /// - `InvariantViolation` if the identifier already has a flow
    /// - `MalformedPacket` for a `QoS` 0 publish or a missing identifier
    pub fn start_outbound(&mut self, publish: &PublishPacket) -> Result<()> {
        let (Some(packet_id), Some(state)) = (publish.packet_id, OutboundState::initial(publish.qos))
        else {
            return Err(MqttError::MalformedPacket(
                "only QoS 1/2 publishes with an identifier have a flow".to_string(),
            ));
        };
        self.insert(packet_id, state, Some(publish.clone()))
    }

    /// Re-creates a flow restored from a persisted session
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the identifier already has a flow
    pub fn restore_outbound(
        &mut self,
        packet_id: u16,
        state: OutboundState,
        publish: Option<PublishPacket>,
    ) -> Result<()> {
        self.insert(packet_id, state, publish)
    }

    fn insert(
        &mut self,
        packet_id: u16,
        state: OutboundState,
        publish: Option<PublishPacket>,
    ) -> Result<()> {
        if self.outbound.contains_key(&packet_id) {
            return Err(MqttError::InvariantViolation(format!(
                "packet identifier {packet_id} already has an outgoing flow"
            )));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.outbound.insert(
            packet_id,
            OutboundFlow {
                packet_id,
                state,
                publish,
                sequence,
            },
        );
        Ok(())
    }

    /// Removes a flow whose PUBLISH could not be written
    pub fn remove_outbound(&mut self, packet_id: u16) -> Option<OutboundFlow> {
        self.outbound.remove(&packet_id)
    }

    /// # Errors
    ///
    /// Returns `ProtocolError` if the flow is a `QoS` 2 flow
    pub fn on_puback(&mut self, packet_id: u16, reason_code: ReasonCode) -> Result<FlowTransition> {
        self.finish(packet_id, OutboundState::AwaitingPubAck, reason_code, "PUBACK")
    }

    /// # Errors
    ///
    /// Returns `ProtocolError` if the flow is a `QoS` 1 flow
    pub fn on_pubrec(&mut self, packet_id: u16, reason_code: ReasonCode) -> Result<FlowTransition> {
        let Some(flow) = self.outbound.get_mut(&packet_id) else {
            return Ok(FlowTransition::Unknown);
        };

        match flow.state {
            OutboundState::AwaitingPubAck => Err(MqttError::ProtocolError(format!(
                "PUBREC for QoS 1 publish {packet_id}"
            ))),
            // Broker lost our PUBREL; send it again
            OutboundState::AwaitingPubComp => Ok(FlowTransition::SendPubRel),
            OutboundState::AwaitingPubRec if reason_code.is_error() => {
                self.outbound.remove(&packet_id);
                debug!(packet_id, reason = ?reason_code, "QoS 2 publish rejected at PUBREC");
                Ok(FlowTransition::Completed { reason_code })
            }
            OutboundState::AwaitingPubRec => {
                flow.state = OutboundState::AwaitingPubComp;
                flow.publish = None;
                Ok(FlowTransition::SendPubRel)
            }
        }
    }

    /// # Errors
    ///
    /// Returns `ProtocolError` if PUBREC has not been received for the flow
    pub fn on_pubcomp(
        &mut self,
        packet_id: u16,
        reason_code: ReasonCode,
    ) -> Result<FlowTransition> {
        self.finish(packet_id, OutboundState::AwaitingPubComp, reason_code, "PUBCOMP")
    }

    fn finish(
        &mut self,
        packet_id: u16,
        expected: OutboundState,
        reason_code: ReasonCode,
        ack: &str,
    ) -> Result<FlowTransition> {
        let Some(flow) = self.outbound.get(&packet_id) else {
            return Ok(FlowTransition::Unknown);
        };

        if flow.state != expected {
            return Err(MqttError::ProtocolError(format!(
                "{ack} for packet {packet_id} in state {:?}",
                flow.state
            )));
        }

        self.outbound.remove(&packet_id);
        debug!(packet_id, reason = ?reason_code, "outgoing flow completed");
        Ok(FlowTransition::Completed { reason_code })
    }

    /// Remembers an incoming `QoS` 2 PUBLISH
    ///
    /// Returns `false` if the identifier is already awaiting PUBREL, in which
    /// case the message must not be delivered again.
    pub fn on_inbound_publish(&mut self, packet_id: u16) -> bool {
        self.inbound.insert(packet_id)
    }

    #[must_use]
    pub fn is_inbound_pending(&self, packet_id: u16) -> bool {
        self.inbound.contains(&packet_id)
    }

    /// Forgets an incoming `QoS` 2 flow on PUBREL; `false` if it was unknown
    pub fn on_pubrel(&mut self, packet_id: u16) -> bool {
        self.inbound.remove(&packet_id)
    }

    /// Outgoing flows in the order their PUBLISH was first sent
    #[must_use]
    pub fn outbound_in_order(&self) -> Vec<&OutboundFlow> {
        let mut flows: Vec<_> = self.outbound.values().collect();
        flows.sort_by_key(|flow| flow.sequence);
        flows
    }

    /// Incoming identifiers awaiting PUBREL, ascending
    #[must_use]
    pub fn inbound_pending(&self) -> Vec<u16> {
        let mut ids: Vec<_> = self.inbound.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    #[must_use]
    pub fn outbound_state(&self, packet_id: u16) -> Option<OutboundState> {
        self.outbound.get(&packet_id).map(|flow| flow.state)
    }

    /// Removes every flow, returning outgoing identifiers in send order
    pub fn drain(&mut self) -> Vec<u16> {
        let ids = self
            .outbound_in_order()
            .into_iter()
            .map(|flow| flow.packet_id)
            .collect();
        self.outbound.clear();
        self.inbound.clear();
        ids
    }
}
