use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{ResultExt, Snafu};
use uuid::Uuid;

/// Prefix carried by every optimistic message key in its string form.
pub const LOCAL_KEY_PREFIX: &str = "local-";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IdError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
}

// Macro keeps all ID wrappers structurally identical, so future migrations stay predictable.
macro_rules! define_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> Result<Self, IdError> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(raw: &str) -> Result<Self, IdError> {
                Self::parse(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(AgentId, "agent-id");
define_id!(ConversationId, "conversation-id");
define_id!(MessageId, "message-id");
define_id!(LocalMessageId, "local-message-id");

/// Identity of a message as seen by the client.
///
/// Optimistic placeholders get a `Local` key minted on the client; everything
/// loaded from the backend carries the `Stored` key it was persisted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Stored(MessageId),
    Local(LocalMessageId),
}

impl MessageKey {
    pub fn new_local() -> Self {
        Self::Local(LocalMessageId::new_v7())
    }

    /// True for keys that were never assigned by the backend.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn stored(&self) -> Option<MessageId> {
        match self {
            Self::Stored(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl From<MessageId> for MessageKey {
    fn from(value: MessageId) -> Self {
        Self::Stored(value)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored(id) => write!(formatter, "{id}"),
            Self::Local(id) => write!(formatter, "{LOCAL_KEY_PREFIX}{id}"),
        }
    }
}

impl FromStr for MessageKey {
    type Err = IdError;

    fn from_str(raw: &str) -> Result<Self, IdError> {
        match raw.strip_prefix(LOCAL_KEY_PREFIX) {
            Some(local) => LocalMessageId::parse(local).map(Self::Local),
            None => MessageId::parse(raw).map(Self::Stored),
        }
    }
}

impl Serialize for MessageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_keys_render_with_reserved_prefix() {
        let key = MessageKey::new_local();
        let rendered = key.to_string();

        assert!(rendered.starts_with(LOCAL_KEY_PREFIX));
        assert!(key.is_placeholder());
        assert_eq!(rendered.parse::<MessageKey>().ok(), Some(key));
    }

    #[test]
    fn stored_keys_parse_without_prefix() {
        let id = MessageId::new_v7();
        let key: MessageKey = id.to_string().parse().expect("stored key parses");

        assert_eq!(key, MessageKey::Stored(id));
        assert!(!key.is_placeholder());
        assert_eq!(key.stored(), Some(id));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!("local-not-a-uuid".parse::<MessageKey>().is_err());
        assert!(AgentId::parse("agent-1").is_err());
    }
}
