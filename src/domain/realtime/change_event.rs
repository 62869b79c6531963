//! Row-change events delivered by the realtime change feed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::domain::foundation::{BranchId, Timestamp};

/// One table row as delivered by the backend (column name → value).
pub type Row = Map<String, JsonValue>;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Parses the wire name (`INSERT`, `UPDATE`, `DELETE`), case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Operation::Insert),
            "UPDATE" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable row-change notification.
///
/// Constructed by a transport adapter from a raw notification and consumed
/// by the router. `before` is absent on inserts and `after` on deletes;
/// the constructors enforce that shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    table: String,
    schema: String,
    operation: Operation,
    before: Option<Row>,
    after: Option<Row>,
    committed_at: Option<Timestamp>,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(table: impl Into<String>, after: Row) -> Self {
        Self::build(table, Operation::Insert, None, Some(after))
    }

    /// Creates an update event. `before` is often partial (primary key only).
    pub fn update(table: impl Into<String>, before: Option<Row>, after: Row) -> Self {
        Self::build(table, Operation::Update, before, Some(after))
    }

    /// Creates a delete event.
    pub fn delete(table: impl Into<String>, before: Row) -> Self {
        Self::build(table, Operation::Delete, Some(before), None)
    }

    fn build(
        table: impl Into<String>,
        operation: Operation,
        before: Option<Row>,
        after: Option<Row>,
    ) -> Self {
        Self {
            table: table.into(),
            schema: "public".to_string(),
            operation,
            before,
            after,
            committed_at: None,
        }
    }

    /// Sets the schema the row belongs to.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Sets the server commit timestamp.
    pub fn with_committed_at(mut self, committed_at: Timestamp) -> Self {
        self.committed_at = Some(committed_at);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn before(&self) -> Option<&Row> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&Row> {
        self.after.as_ref()
    }

    pub fn committed_at(&self) -> Option<Timestamp> {
        self.committed_at
    }

    /// Reads a column, preferring the new row image over the old one.
    pub fn column(&self, name: &str) -> Option<&JsonValue> {
        self.after
            .as_ref()
            .and_then(|row| row.get(name))
            .filter(|value| !value.is_null())
            .or_else(|| {
                self.before
                    .as_ref()
                    .and_then(|row| row.get(name))
                    .filter(|value| !value.is_null())
            })
    }

    /// Branch the changed row belongs to, if the row carries `column`.
    pub fn branch(&self, column: &str) -> Option<BranchId> {
        self.column(column).and_then(BranchId::from_json)
    }
}
