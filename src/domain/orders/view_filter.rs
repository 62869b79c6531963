//! Which orders a dashboard view shows.

use std::collections::BTreeSet;

use super::OrderRecord;
use crate::domain::foundation::{BranchId, Timestamp};

/// Dashboard view filters: branch, status set and creation window.
///
/// `created_from` is inclusive and `created_to` exclusive. When a window is
/// set, orders without a readable `created_at` fall outside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewFilter {
    pub branch: Option<BranchId>,
    pub statuses: Option<BTreeSet<String>>,
    pub created_from: Option<Timestamp>,
    pub created_to: Option<Timestamp>,
}

impl ViewFilter {
    /// A filter that accepts every order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_branch(mut self, branch: BranchId) -> Self {
        self.branch = Some(branch);
        self
    }

    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses = Some(statuses.into_iter().map(Into::into).collect());
        self
    }

    pub fn created_between(mut self, from: Option<Timestamp>, to: Option<Timestamp>) -> Self {
        self.created_from = from;
        self.created_to = to;
        self
    }

    /// Checks whether `record` belongs in this view.
    pub fn matches(&self, record: &OrderRecord, branch_column: &str) -> bool {
        if let Some(branch) = &self.branch {
            if record.branch(branch_column).as_ref() != Some(branch) {
                return false;
            }
        }

        if let Some(statuses) = &self.statuses {
            match record.status() {
                Some(status) if statuses.contains(status) => {}
                _ => return false,
            }
        }

        if self.created_from.is_some() || self.created_to.is_some() {
            let Some(created_at) = record.created_at() else {
                return false;
            };
            if self.created_from.is_some_and(|from| created_at.is_before(&from)) {
                return false;
            }
            if self.created_to.is_some_and(|to| !created_at.is_before(&to)) {
                return false;
            }
        }

        true
    }
}
