use crate::constants::limits::MAX_STRING_LENGTH;
use crate::error::{MqttError, Result};

const SHARED_SUBSCRIPTION_PREFIX: &str = "$share/";

/// Validates an MQTT topic name
///
/// # Rules:
/// - Must have at least one character
/// - Must not contain null characters (U+0000)
/// - Must not exceed maximum string length when UTF-8 encoded
/// - Must not contain wildcard characters (+, #)
#[must_use]
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= usize::from(MAX_STRING_LENGTH)
        && !topic.contains('\0')
        && !topic.contains(['+', '#'])
}

/// Validates an MQTT topic filter
///
/// # Rules:
/// - Same length and character rules as topic names
/// - Single-level wildcard (+) must occupy an entire level
/// - Multi-level wildcard (#) must occupy the last level
/// - A shared subscription `$share/<group>/<filter>` needs a non-empty group
///   without wildcards and a valid filter after it
#[must_use]
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > usize::from(MAX_STRING_LENGTH) || filter.contains('\0')
    {
        return false;
    }

    if let Some(rest) = filter.strip_prefix(SHARED_SUBSCRIPTION_PREFIX) {
        return match rest.split_once('/') {
            Some((group, inner)) => {
                !group.is_empty() && !group.contains(['+', '#']) && is_valid_plain_filter(inner)
            }
            None => false,
        };
    }

    is_valid_plain_filter(filter)
}

fn is_valid_plain_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return false;
        }
        if level.contains('+') && level != "+" {
            return false;
        }
    }
    true
}

/// Splits a shared subscription filter into its group and inner filter
#[must_use]
pub fn parse_shared_subscription(filter: &str) -> Option<(&str, &str)> {
    filter
        .strip_prefix(SHARED_SUBSCRIPTION_PREFIX)
        .and_then(|rest| rest.split_once('/'))
}

/// Validates an MQTT client identifier
///
/// An empty identifier asks the server to assign one. Servers must accept
/// 1 to 23 alphanumeric characters; anything else encodable as an MQTT string
/// is passed through and left for the server to accept or refuse.
#[must_use]
pub fn is_valid_client_id(client_id: &str) -> bool {
    client_id.len() <= usize::from(MAX_STRING_LENGTH) && !client_id.contains('\0')
}

/// Validates a topic name and returns an error if invalid
///
/// # Errors
///
/// Returns `MqttError::InvalidTopicName` if the topic name breaks any rule of
/// [`is_valid_topic_name`]
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if !is_valid_topic_name(topic) {
        return Err(MqttError::InvalidTopicName(topic.to_string()));
    }
    Ok(())
}

/// Validates a topic filter and returns an error if invalid
///
/// # Errors
///
/// Returns `MqttError::InvalidTopicFilter` if the filter breaks any rule of
/// [`is_valid_topic_filter`]
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if !is_valid_topic_filter(filter) {
        return Err(MqttError::InvalidTopicFilter(filter.to_string()));
    }
    Ok(())
}

/// # Errors
///
/// Returns `MqttError::InvalidClientId` if the identifier cannot be encoded
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if !is_valid_client_id(client_id) {
        return Err(MqttError::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}
