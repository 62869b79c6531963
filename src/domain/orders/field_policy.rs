//! Decides whether an order update can be merged in place.

use std::collections::BTreeSet;

use super::OrderRecord;
use crate::domain::realtime::ChangeEvent;

/// Result of classifying an update against the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePlan {
    /// Nothing the snapshot tracks changed.
    Unchanged,
    /// The listed columns can be copied from the new row image.
    Patch(Vec<String>),
    /// In-place merge is ambiguous; reload the order.
    Refetch(String),
}

/// Columns whose change invalidates join-derived display fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFieldPolicy {
    join_keys: BTreeSet<String>,
}

impl Default for OrderFieldPolicy {
    fn default() -> Self {
        Self::new(["customer_id", "delivery_person_id", "address_id"])
    }
}

impl OrderFieldPolicy {
    pub fn new<I, S>(join_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            join_keys: join_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_join_key(&self, column: &str) -> bool {
        self.join_keys.contains(column)
    }

    pub fn classify(&self, current: &OrderRecord, event: &ChangeEvent) -> UpdatePlan {
        let Some(after) = event.after() else {
            return UpdatePlan::Refetch("update without a new row image".to_string());
        };

        // Old-image columns missing from the new image mean a partial payload.
        if let Some(before) = event.before() {
            if let Some(missing) = before.keys().find(|key| !after.contains_key(*key)) {
                return UpdatePlan::Refetch(format!("{} missing from new row image", missing));
            }
        }

        let mut changed = Vec::new();
        for (column, value) in after {
            if current.column(column) == Some(value) {
                continue;
            }
            if self.is_join_key(column) {
                return UpdatePlan::Refetch(format!("{} feeds derived display fields", column));
            }
            if current.column(column).is_none() {
                return UpdatePlan::Refetch(format!("{} is not tracked by the snapshot", column));
            }
            changed.push(column.clone());
        }

        if changed.is_empty() {
            UpdatePlan::Unchanged
        } else {
            UpdatePlan::Patch(changed)
        }
    }
}
