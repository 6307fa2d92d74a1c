use crate::error::{MqttError, Result};
use std::collections::HashMap;

/// How an outgoing PUBLISH should carry its topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasAssignment {
    /// Topic already bound: send the alias with an empty topic
    Reuse(u16),
    /// New binding: send both the topic and the alias
    Bind(u16),
    /// Aliasing disabled or capacity exhausted: send the topic alone
    None,
}

/// Client-to-broker topic aliases
///
/// Capacity is the Topic Alias Maximum from CONNACK. Bindings never expire
/// during a connection, so once every alias is taken further topics are sent
/// in full.
#[derive(Debug, Clone, Default)]
pub struct OutboundAliases {
    maximum: u16,
    topic_to_alias: HashMap<String, u16>,
}

impl OutboundAliases {
    #[must_use]
    pub fn new(maximum: u16) -> Self {
        Self {
            maximum,
            topic_to_alias: HashMap::new(),
        }
    }

    #[must_use]
    pub fn bind_or_reuse(&mut self, topic: &str) -> AliasAssignment {
        if let Some(&alias) = self.topic_to_alias.get(topic) {
            return AliasAssignment::Reuse(alias);
        }

        // Aliases are handed out densely from 1, so the count is the last one
        let bound = self.bound();
        if bound >= self.maximum {
            return AliasAssignment::None;
        }

        let alias = bound + 1;
        self.topic_to_alias.insert(topic.to_string(), alias);
        AliasAssignment::Bind(alias)
    }

    #[must_use]
    pub fn get_alias(&self, topic: &str) -> Option<u16> {
        self.topic_to_alias.get(topic).copied()
    }

    /// Withdraws the most recent binding when its PUBLISH was never written
    pub fn unbind_last(&mut self, topic: &str) {
        if self.topic_to_alias.get(topic) == Some(&self.bound()) {
            self.topic_to_alias.remove(topic);
        }
    }

    fn bound(&self) -> u16 {
        u16::try_from(self.topic_to_alias.len()).unwrap_or(u16::MAX)
    }

    #[must_use]
    pub fn maximum(&self) -> u16 {
        self.maximum
    }

    /// Drops all bindings; called for every new network connection
    pub fn reset(&mut self, maximum: u16) {
        *self = Self::new(maximum);
    }
}

/// Broker-to-client topic aliases
///
/// Capacity is the Topic Alias Maximum we advertised in CONNECT.
#[derive(Debug, Clone, Default)]
pub struct InboundAliases {
    maximum: u16,
    alias_to_topic: HashMap<u16, String>,
}

impl InboundAliases {
    #[must_use]
    pub fn new(maximum: u16) -> Self {
        Self {
            maximum,
            alias_to_topic: HashMap::new(),
        }
    }

    /// Resolves the topic of an incoming PUBLISH
    ///
    /// A non-empty topic with an alias (re)binds the alias; an empty topic
    /// looks the alias up.
    ///
    /// # Errors
    ///
    /// - `TopicAliasInvalid` for alias 0 or an alias above our maximum
    /// - `ProtocolError` for an empty topic whose alias was never bound, or
    ///   an empty topic without an alias
    pub fn resolve(&mut self, topic: &str, alias: Option<u16>) -> Result<String> {
        let Some(alias) = alias else {
            if topic.is_empty() {
                return Err(MqttError::ProtocolError(
                    "PUBLISH with empty topic and no topic alias".to_string(),
                ));
            }
            return Ok(topic.to_string());
        };

        if alias == 0 || alias > self.maximum {
            return Err(MqttError::TopicAliasInvalid(alias));
        }

        if topic.is_empty() {
            return self.alias_to_topic.get(&alias).cloned().ok_or_else(|| {
                MqttError::ProtocolError(format!("topic alias {alias} used before it was bound"))
            });
        }

        self.alias_to_topic.insert(alias, topic.to_string());
        Ok(topic.to_string())
    }

    #[must_use]
    pub fn get_topic(&self, alias: u16) -> Option<&str> {
        self.alias_to_topic.get(&alias).map(String::as_str)
    }

    pub fn reset(&mut self, maximum: u16) {
        *self = Self::new(maximum);
    }
}
