//! In-memory projection of one order.

use serde_json::Value as JsonValue;

use crate::domain::foundation::{BranchId, DomainError, OrderId, Timestamp};
use crate::domain::realtime::Row;

pub const ID_COLUMN: &str = "id";
pub const STATUS_COLUMN: &str = "status";
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Snapshot of an order as the dashboard knows it.
///
/// `columns` holds the raw scalar columns of the `orders` row, `embedded`
/// the join-derived display data (customer, delivery person, ...) that only
/// a REST fetch can provide, and `line_items` the embedded line-item rows.
/// Not authoritative: the backend row always wins.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    id: OrderId,
    columns: Row,
    embedded: Row,
    line_items: Vec<Row>,
    stale: bool,
}

impl OrderRecord {
    /// Builds a record from a raw change-feed row.
    pub fn from_row(row: Row) -> Result<Self, DomainError> {
        let id = row
            .get(ID_COLUMN)
            .and_then(OrderId::from_json)
            .ok_or_else(|| DomainError::malformed_row("orders", "order row without id"))?;

        Ok(Self {
            id,
            columns: row,
            embedded: Row::new(),
            line_items: Vec::new(),
            stale: false,
        })
    }

    /// Builds a record from a REST row with embedded resources.
    ///
    /// The array under `line_items_key` becomes the line items; every other
    /// object or array value is treated as join-derived display data.
    pub fn from_fetched(row: Row, line_items_key: &str) -> Result<Self, DomainError> {
        let mut columns = Row::new();
        let mut embedded = Row::new();
        let mut line_items = Vec::new();

        for (key, value) in row {
            match value {
                JsonValue::Array(items) if key == line_items_key => {
                    line_items = items
                        .into_iter()
                        .filter_map(|item| match item {
                            JsonValue::Object(map) => Some(map),
                            _ => None,
                        })
                        .collect();
                }
                JsonValue::Object(_) | JsonValue::Array(_) => {
                    embedded.insert(key, value);
                }
                scalar => {
                    columns.insert(key, scalar);
                }
            }
        }

        let mut record = Self::from_row(columns)?;
        record.embedded = embedded;
        record.line_items = line_items;
        Ok(record)
    }

    pub fn id(&self) -> &OrderId {
        &self.id
    }

    pub fn column(&self, name: &str) -> Option<&JsonValue> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> &Row {
        &self.columns
    }

    pub fn embedded(&self) -> &Row {
        &self.embedded
    }

    pub fn line_items(&self) -> &[Row] {
        &self.line_items
    }

    /// True while a scoped refetch is pending for this order.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn branch(&self, branch_column: &str) -> Option<BranchId> {
        self.columns.get(branch_column).and_then(BranchId::from_json)
    }

    pub fn status(&self) -> Option<&str> {
        self.columns.get(STATUS_COLUMN).and_then(JsonValue::as_str)
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.columns
            .get(CREATED_AT_COLUMN)
            .and_then(Timestamp::from_json)
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Overwrites the given columns with their values from `after`.
    pub(crate) fn patch(&mut self, after: &Row, fields: &[String]) {
        for field in fields {
            if let Some(value) = after.get(field) {
                self.columns.insert(field.clone(), value.clone());
            }
        }
    }
}
