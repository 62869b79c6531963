//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Identifier of a restaurant branch (sede).
///
/// Branches are the tenancy dimension for realtime data. The backend stores
/// them either as UUIDs or short codes, so the value is kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    /// Creates a BranchId, rejecting blank values.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::empty_field("branch_id"));
        }
        Ok(Self(value))
    }

    /// Reads a branch id out of a row column (string or number).
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        scalar_to_string(value).map(Self)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BranchId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of an order row.
///
/// Orders use numeric primary keys in the backend; ids arriving from the
/// change feed or the REST API are normalized to their decimal text form so
/// `42` and `"42"` address the same snapshot entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Creates an OrderId, rejecting blank values.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::empty_field("order_id"));
        }
        Ok(Self(value))
    }

    /// Reads an order id out of a row column (string or number).
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        scalar_to_string(value).map(Self)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Process-unique identity of a change-feed subscriber.
///
/// Generated at registration time and used for idempotent unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Creates a new random SubscriberId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn branch_id_rejects_blank() {
        assert!(BranchId::new("  ").is_err());
        assert_eq!(BranchId::new("B1").unwrap().as_str(), "B1");
    }

    #[test]
    fn order_id_normalizes_numbers_and_strings() {
        let from_number = OrderId::from_json(&json!(42)).unwrap();
        let from_string = OrderId::from_json(&json!("42")).unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(OrderId::from(42), from_number);
    }

    #[test]
    fn order_id_from_json_ignores_non_scalars() {
        assert!(OrderId::from_json(&json!(null)).is_none());
        assert!(OrderId::from_json(&json!({"id": 1})).is_none());
        assert!(OrderId::from_json(&json!("")).is_none());
    }

    #[test]
    fn subscriber_ids_are_unique() {
        assert_ne!(SubscriberId::new(), SubscriberId::new());
    }

    #[test]
    fn subscriber_id_displays_as_uuid() {
        let display = SubscriberId::new().to_string();
        assert_eq!(display.len(), 36);
    }
}
