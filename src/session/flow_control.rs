use crate::constants::defaults;
use crate::error::{MqttError, Result};
use tracing::error;

/// Receive Maximum accounting for both directions
///
/// The send side is bounded by the Receive Maximum the broker advertised in
/// CONNACK and counts outgoing QoS 1/2 publishes until their handshake
/// completes. The receive side is bounded by the Receive Maximum we advertised
/// in CONNECT and counts incoming QoS 2 publishes until PUBREL arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControl {
    send_maximum: u16,
    send_outstanding: u16,
    receive_maximum: u16,
    receive_outstanding: u16,
}

impl FlowControl {
    #[must_use]
    pub fn new(receive_maximum: u16) -> Self {
        Self {
            send_maximum: defaults::RECEIVE_MAXIMUM,
            send_outstanding: 0,
            receive_maximum,
            receive_outstanding: 0,
        }
    }

    /// Applies the broker's Receive Maximum from a new CONNACK
    ///
    /// Outstanding publishes carried over from a resumed session keep
    /// counting against the new maximum.
    pub fn set_send_maximum(&mut self, maximum: u16) {
        self.send_maximum = maximum;
    }

    #[must_use]
    pub fn send_maximum(&self) -> u16 {
        self.send_maximum
    }

    /// Publishes that may still be started before the broker's limit is reached
    #[must_use]
    pub fn send_quota(&self) -> u16 {
        self.send_maximum.saturating_sub(self.send_outstanding)
    }

    #[must_use]
    pub fn send_outstanding(&self) -> u16 {
        self.send_outstanding
    }

    /// Takes one unit of send quota for a new QoS 1/2 publish
    ///
    /// # Errors
    ///
    /// Returns `MqttError::QuotaExceeded` when the quota is exhausted
    pub fn acquire_send(&mut self) -> Result<()> {
        if self.send_quota() == 0 {
            return Err(MqttError::QuotaExceeded);
        }
        self.send_outstanding += 1;
        Ok(())
    }

    /// Returns one unit of send quota when a publish handshake ends
    ///
    /// # Errors
    ///
    /// Returns `MqttError::InvariantViolation` if nothing is outstanding
    pub fn release_send(&mut self) -> Result<()> {
        if self.send_outstanding == 0 {
            error!("send quota released with no publish outstanding");
            return Err(MqttError::InvariantViolation(
                "send quota released with no publish outstanding".to_string(),
            ));
        }
        self.send_outstanding -= 1;
        Ok(())
    }

    #[must_use]
    pub fn receive_quota(&self) -> u16 {
        self.receive_maximum.saturating_sub(self.receive_outstanding)
    }

    /// Counts a new incoming QoS 2 publish against our Receive Maximum
    ///
    /// # Errors
    ///
    /// Returns `MqttError::ReceiveMaximumExceeded` if the broker already has
    /// as many unreleased QoS 2 publishes in flight as we allow
    pub fn acquire_receive(&mut self) -> Result<()> {
        if self.receive_quota() == 0 {
            return Err(MqttError::ReceiveMaximumExceeded);
        }
        self.receive_outstanding += 1;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `MqttError::InvariantViolation` if nothing is outstanding
    pub fn release_receive(&mut self) -> Result<()> {
        if self.receive_outstanding == 0 {
            error!("receive quota released with no publish outstanding");
            return Err(MqttError::InvariantViolation(
                "receive quota released with no publish outstanding".to_string(),
            ));
        }
        self.receive_outstanding -= 1;
        Ok(())
    }

    /// Forgets every outstanding exchange
    pub fn clear(&mut self) {
        self.send_outstanding = 0;
        self.receive_outstanding = 0;
    }
}
