//! Opaque durable identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an identifier handed out by a store
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Mint a fresh random identifier
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First eight characters, for display
            pub fn short(&self) -> &str {
                self.0.get(..8).unwrap_or(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_id!(
    /// Durable identifier of a conversation
    ConversationId
);
define_id!(
    /// Durable identifier of a message
    MessageId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn test_short_handles_short_ids() {
        assert_eq!(MessageId::from("abc").short(), "abc");
        assert_eq!(
            ConversationId::from("0123456789abcdef").short(),
            "01234567"
        );
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = MessageId::from("m-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m-1\"");
    }
}
