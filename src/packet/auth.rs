use crate::encoding::decode_u8;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut, Bytes};

/// AUTH packet for MQTT v5.0 enhanced authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPacket {
    /// Reason code indicating the result of the authentication
    pub reason_code: ReasonCode,
    /// Properties associated with the authentication
    pub properties: Properties,
}

impl AuthPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn with_properties(reason_code: ReasonCode, properties: Properties) -> Self {
        Self {
            reason_code,
            properties,
        }
    }

    /// Creates an AUTH packet for continuing authentication
    #[must_use]
    pub fn continue_authentication(auth_method: String, auth_data: Option<Bytes>) -> Self {
        Self::with_method(ReasonCode::ContinueAuthentication, auth_method, auth_data)
    }

    /// Creates an AUTH packet for re-authentication
    #[must_use]
    pub fn re_authenticate(auth_method: String, auth_data: Option<Bytes>) -> Self {
        Self::with_method(ReasonCode::ReAuthenticate, auth_method, auth_data)
    }

    fn with_method(reason_code: ReasonCode, auth_method: String, auth_data: Option<Bytes>) -> Self {
        let mut properties = Properties::default();
        properties.set_authentication_method(auth_method);
        if let Some(data) = auth_data {
            properties.set_authentication_data(data);
        }
        Self::with_properties(reason_code, properties)
    }

    #[must_use]
    pub fn authentication_method(&self) -> Option<&str> {
        self.properties.authentication_method()
    }

    #[must_use]
    pub fn authentication_data(&self) -> Option<&Bytes> {
        self.properties.authentication_data()
    }
}

impl MqttPacket for AuthPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Auth
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if !version.is_v5() {
            return Err(MqttError::UnsupportedImplementation(
                "AUTH requires MQTT 5".to_string(),
            ));
        }

        if !self.reason_code.is_valid_for(PacketType::Auth) {
            return Err(MqttError::ProtocolError(format!(
                "reason code {:?} is not valid in AUTH",
                self.reason_code
            )));
        }

        buf.put_u8(u8::from(self.reason_code));
        if !self.properties.is_empty() {
            self.properties.encode(buf)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        _version: ProtocolVersion,
    ) -> Result<Self> {
        if fixed_header.remaining_length == 0 {
            return Err(MqttError::MalformedPacket(
                "AUTH requires a reason code".to_string(),
            ));
        }

        let reason_code = ReasonCode::decode_for(PacketType::Auth, decode_u8(buf)?)?;

        let properties = if fixed_header.remaining_length > 1 {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::Auth))?;
            properties
        } else {
            Properties::default()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}
