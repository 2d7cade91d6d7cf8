//! Leaf — immutable, self-describing typed event carried on Wind.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// An immutable event published on Wind.
///
/// A Leaf is produced once (by a Tree or a Nim), serialized, and handed to
/// subscribers by value. It is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    /// Dot-separated subject used for Wind routing, e.g. `payment.completed`.
    pub subject: String,

    /// Opaque payload bytes.
    pub data: Bytes,

    /// Non-empty producer identifier (Tree or Nim name).
    pub source: String,

    /// Wall-clock creation time, Unix milliseconds.
    pub timestamp: u64,
}

impl Leaf {
    /// Construct a Leaf, stamping `timestamp = now`.
    pub fn new(subject: impl Into<String>, data: impl Into<Bytes>, source: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            data: data.into(),
            source: source.into(),
            timestamp: now_millis(),
        }
    }

    /// Construct a Leaf with a JSON payload, convenience over `new`.
    pub fn with_json(
        subject: impl Into<String>,
        source: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self> {
        let data = serde_json::to_vec(payload)?;
        Ok(Self::new(subject, data, source))
    }

    /// A Leaf is valid iff `subject` and `source` are non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.subject.is_empty() {
            return Err(CoreError::InvalidInput("leaf subject must not be empty".into()));
        }
        if self.source.is_empty() {
            return Err(CoreError::InvalidInput("leaf source must not be empty".into()));
        }
        Ok(())
    }

    /// Deserialize `data` as JSON into `T`.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Stable encoding: `deserialize(serialize(leaf))` equals `leaf`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Inverse of `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_stamps_timestamp() {
        let leaf = Leaf::new("payment.completed", Bytes::from_static(b"{}"), "stripe-tree");
        assert_eq!(leaf.subject, "payment.completed");
        assert_eq!(leaf.source, "stripe-tree");
        assert!(leaf.timestamp > 0);
    }

    #[test]
    fn validate_rejects_empty_subject() {
        let leaf = Leaf::new("", Bytes::new(), "stripe-tree");
        assert!(matches!(leaf.validate(), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn validate_rejects_empty_source() {
        let leaf = Leaf::new("payment.completed", Bytes::new(), "");
        assert!(matches!(leaf.validate(), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn validate_accepts_well_formed_leaf() {
        let leaf = Leaf::new("payment.completed", Bytes::new(), "stripe-tree");
        assert!(leaf.validate().is_ok());
    }

    #[test]
    fn serialization_roundtrip() {
        let leaf = Leaf::with_json(
            "payment.completed",
            "stripe-tree",
            &serde_json::json!({"customerId": "cus_alice", "amount": 150.0}),
        )
        .unwrap();

        let bytes = leaf.to_bytes().unwrap();
        let parsed = Leaf::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, leaf);
    }

    #[test]
    fn payload_roundtrips_through_json() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Payload {
            rate: f64,
        }

        let leaf = Leaf::with_json("market.forex", "reuters", &Payload { rate: 7.35 }).unwrap();
        let payload: Payload = leaf.payload().unwrap();
        assert_eq!(payload, Payload { rate: 7.35 });
    }
}
