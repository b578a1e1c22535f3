//! Correlation IDs.
//!
//! Every call gets a random v4 UUID. It travels in the `correlation_id`
//! message property as the hyphenated lowercase string, and the responder
//! copies it onto the reply unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Links one reply to the one call waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Read an id from a reply's message properties.
    ///
    /// Accepts any UUID spelling the `uuid` crate does; ids we hand out are
    /// always hyphenated.
    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        raw.trim().parse()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_random_v4() {
        let id = CorrelationId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
        assert_ne!(id, CorrelationId::new());
    }

    #[test]
    fn test_no_collisions_in_large_batch() {
        let ids: HashSet<_> = (0..10_000).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_wire_form_is_hyphenated() {
        let id = CorrelationId::from(Uuid::nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
        assert_eq!(serde_json::to_value(id).unwrap(), serde_json::json!(id.to_string()));
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_case() {
        let id = CorrelationId::new();
        let shouted = format!("  {}\n", id.to_string().to_uppercase());
        assert_eq!(CorrelationId::parse(&shouted).unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CorrelationId::parse("not-a-uuid").is_err());
        assert!(CorrelationId::parse("").is_err());
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(bytes in any::<[u8; 16]>()) {
            let id = CorrelationId::from(Uuid::from_bytes(bytes));
            prop_assert_eq!(CorrelationId::parse(&id.to_string()).unwrap(), id);
        }
    }
}
