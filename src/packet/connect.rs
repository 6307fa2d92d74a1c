use crate::constants::protocol::PROTOCOL_NAME;
use crate::encoding::{decode_binary, decode_string, decode_u16, decode_u8, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::flags::ConnectFlags;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::ProtocolVersion;
use crate::types::{ConnectOptions, ConnectProperties};
use crate::QoS;
use bytes::{Buf, BufMut, Bytes};

/// Will message as carried in the CONNECT payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Will properties (v5.0 only)
    pub properties: Properties,
}

/// MQTT CONNECT packet
///
/// CONNECT carries its own protocol level, so `protocol_version` rather than
/// the codec's version decides the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_version: ProtocolVersion,
    /// Clean start flag (Clean Session in v3.1.1)
    pub clean_start: bool,
    /// Keep alive interval in seconds
    pub keep_alive: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<LastWill>,
    /// CONNECT properties (v5.0 only)
    pub properties: Properties,
}

impl ConnectPacket {
    /// Creates a CONNECT packet from connection options
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the keep-alive interval does not fit in
    /// 16 bits of seconds.
    pub fn new(options: &ConnectOptions) -> Result<Self> {
        let keep_alive = u16::try_from(options.keep_alive.as_secs()).map_err(|_| {
            MqttError::InvalidState(format!(
                "keep alive of {}s exceeds 65535 seconds",
                options.keep_alive.as_secs()
            ))
        })?;

        let version = options.protocol_version;
        let properties = if version.is_v5() {
            build_connect_properties(&options.properties)
        } else {
            Properties::default()
        };

        let will = options.will.as_ref().map(|will| LastWill {
            topic: will.topic.clone(),
            payload: Bytes::from(will.payload.clone()),
            qos: will.qos,
            retain: will.retain,
            properties: if version.is_v5() {
                Properties::from(will.properties.clone())
            } else {
                Properties::default()
            },
        });

        Ok(Self {
            protocol_version: version,
            clean_start: options.clean_start,
            keep_alive,
            client_id: options.client_id.clone(),
            username: options.username.clone(),
            password: options.password.clone().map(Bytes::from),
            will,
            properties,
        })
    }

    /// Creates connect flags byte
    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;

        if self.clean_start {
            flags |= ConnectFlags::CleanStart as u8;
        }

        if let Some(ref will) = self.will {
            flags |= ConnectFlags::WillFlag as u8;
            flags = ConnectFlags::with_will_qos(flags, will.qos as u8);
            if will.retain {
                flags |= ConnectFlags::WillRetain as u8;
            }
        }

        if self.username.is_some() {
            flags |= ConnectFlags::UsernameFlag as u8;
        }

        if self.password.is_some() {
            flags |= ConnectFlags::PasswordFlag as u8;
        }

        flags
    }
}

fn build_connect_properties(props: &ConnectProperties) -> Properties {
    let mut properties = Properties::default();

    if let Some(val) = props.session_expiry_interval {
        properties.set_session_expiry_interval(val);
    }
    if let Some(val) = props.receive_maximum {
        properties.set_receive_maximum(val);
    }
    if let Some(val) = props.maximum_packet_size {
        properties.set_maximum_packet_size(val);
    }
    if let Some(val) = props.topic_alias_maximum {
        properties.set_topic_alias_maximum(val);
    }
    if let Some(val) = props.request_response_information {
        properties.set_request_response_information(val);
    }
    if let Some(val) = props.request_problem_information {
        properties.set_request_problem_information(val);
    }
    if let Some(val) = &props.authentication_method {
        properties.set_authentication_method(val.clone());
    }
    if let Some(val) = &props.authentication_data {
        properties.set_authentication_data(Bytes::from(val.clone()));
    }
    for (key, value) in &props.user_properties {
        properties.add_user_property(key.clone(), value.clone());
    }

    properties
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, _version: ProtocolVersion) -> Result<()> {
        let v5 = self.protocol_version.is_v5();

        if !v5 {
            if !self.properties.is_empty()
                || self.will.as_ref().is_some_and(|w| !w.properties.is_empty())
            {
                return Err(MqttError::UnsupportedImplementation(
                    "CONNECT properties require MQTT 5".to_string(),
                ));
            }
            if self.password.is_some() && self.username.is_none() {
                return Err(MqttError::UnsupportedImplementation(
                    "MQTT 3.1.1 does not allow a password without a username".to_string(),
                ));
            }
        }

        // Variable header
        encode_string(buf, PROTOCOL_NAME)?;
        buf.put_u8(self.protocol_version.level());
        buf.put_u8(self.connect_flags());
        buf.put_u16(self.keep_alive);

        if v5 {
            self.properties.encode(buf)?;
        }

        // Payload
        encode_string(buf, &self.client_id)?;

        if let Some(ref will) = self.will {
            if v5 {
                will.properties.encode(buf)?;
            }
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.payload)?;
        }

        if let Some(ref username) = self.username {
            encode_string(buf, username)?;
        }

        if let Some(ref password) = self.password {
            encode_binary(buf, password)?;
        }

        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        _version: ProtocolVersion,
    ) -> Result<Self> {
        let protocol_version = Self::decode_protocol_header(buf)?;
        let (flags, keep_alive) = Self::decode_connect_flags_and_keepalive(buf)?;

        let properties = if protocol_version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::Connect))?;
            properties
        } else {
            Properties::default()
        };

        let client_id = decode_string(buf)?;
        let will = Self::decode_will(buf, &flags, protocol_version)?;
        let (username, password) = Self::decode_credentials(buf, &flags, protocol_version)?;

        Ok(Self {
            protocol_version,
            clean_start: flags.clean_start,
            keep_alive,
            client_id,
            username,
            password,
            will,
            properties,
        })
    }
}

/// Helper struct to hold decoded connect flags
struct DecodedConnectFlags {
    clean_start: bool,
    will_flag: bool,
    will_qos: u8,
    will_retain: bool,
    username_flag: bool,
    password_flag: bool,
}

impl ConnectPacket {
    fn decode_protocol_header<B: Buf>(buf: &mut B) -> Result<ProtocolVersion> {
        let protocol_name = decode_string(buf)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(MqttError::MalformedPacket(format!(
                "invalid protocol name: {protocol_name}"
            )));
        }

        ProtocolVersion::from_level(decode_u8(buf)?)
    }

    fn decode_connect_flags_and_keepalive<B: Buf>(
        buf: &mut B,
    ) -> Result<(DecodedConnectFlags, u16)> {
        let flags = decode_u8(buf)?;

        // Parse flags using BeBytes decomposition
        let decomposed_flags = ConnectFlags::decompose(flags);

        if decomposed_flags.contains(&ConnectFlags::Reserved) {
            return Err(MqttError::MalformedPacket(
                "reserved connect flag bit must be 0".to_string(),
            ));
        }

        let decoded_flags = DecodedConnectFlags {
            clean_start: decomposed_flags.contains(&ConnectFlags::CleanStart),
            will_flag: decomposed_flags.contains(&ConnectFlags::WillFlag),
            will_qos: ConnectFlags::extract_will_qos(flags),
            will_retain: decomposed_flags.contains(&ConnectFlags::WillRetain),
            username_flag: decomposed_flags.contains(&ConnectFlags::UsernameFlag),
            password_flag: decomposed_flags.contains(&ConnectFlags::PasswordFlag),
        };

        if !decoded_flags.will_flag && (decoded_flags.will_qos != 0 || decoded_flags.will_retain)
        {
            return Err(MqttError::MalformedPacket(
                "will QoS or retain set without the will flag".to_string(),
            ));
        }

        let keep_alive = decode_u16(buf)?;

        Ok((decoded_flags, keep_alive))
    }

    fn decode_will<B: Buf>(
        buf: &mut B,
        flags: &DecodedConnectFlags,
        protocol_version: ProtocolVersion,
    ) -> Result<Option<LastWill>> {
        if !flags.will_flag {
            return Ok(None);
        }

        let qos = QoS::from_u8(flags.will_qos).ok_or_else(|| {
            MqttError::MalformedPacket(format!("invalid will QoS {}", flags.will_qos))
        })?;

        let properties = if protocol_version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Will)?;
            properties
        } else {
            Properties::default()
        };

        let topic = decode_string(buf)?;
        let payload = decode_binary(buf)?;

        Ok(Some(LastWill {
            topic,
            payload,
            qos,
            retain: flags.will_retain,
            properties,
        }))
    }

    fn decode_credentials<B: Buf>(
        buf: &mut B,
        flags: &DecodedConnectFlags,
        protocol_version: ProtocolVersion,
    ) -> Result<(Option<String>, Option<Bytes>)> {
        if flags.password_flag && !flags.username_flag && !protocol_version.is_v5() {
            return Err(MqttError::MalformedPacket(
                "password without username is not allowed in MQTT 3.1.1".to_string(),
            ));
        }

        let username = if flags.username_flag {
            Some(decode_string(buf)?)
        } else {
            None
        };

        let password = if flags.password_flag {
            Some(decode_binary(buf)?)
        } else {
            None
        };

        Ok((username, password))
    }
}
