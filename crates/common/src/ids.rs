//! String-backed identifier newtypes.
//!
//! Identifiers travel over the wire and into the database as plain strings;
//! the newtypes exist to keep order, courier, and user ids from being mixed
//! up in signatures.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from an existing string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Unique identifier for an order.
    OrderId
}

string_id! {
    /// Unique identifier for a courier.
    CourierId
}

string_id! {
    /// Unique identifier for a user.
    UserId
}

impl OrderId {
    /// Generates a fresh random order id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl CourierId {
    /// Generates a fresh random courier id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_order_ids_are_unique() {
        let a = OrderId::generate();
        let b = OrderId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_preserves_value() {
        let id = CourierId::from("courier-7");
        assert_eq!(id.as_str(), "courier-7");
        assert_eq!(id.to_string(), "courier-7");
    }

    #[test]
    fn serialization_is_transparent() {
        let id = OrderId::new("order-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"order-1\"");
        let back: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn empty_check() {
        assert!(UserId::new("").is_empty());
        assert!(!UserId::new("u1").is_empty());
    }
}
