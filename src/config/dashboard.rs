//! Dashboard consumer configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use super::realtime::split_list;

/// Dashboard reconciliation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Table holding order rows
    #[serde(default = "default_orders_table")]
    pub orders_table: String,

    /// Tables holding order line items (comma-separated)
    #[serde(default = "default_line_item_tables")]
    pub line_item_tables: String,

    /// Column on line-item rows that points at the order
    #[serde(default = "default_parent_column")]
    pub parent_column: String,

    /// Key of the embedded line-item array in fetched orders
    #[serde(default = "default_line_items_key")]
    pub line_items_key: String,

    /// Order columns that feed join-derived display fields (comma-separated)
    #[serde(default = "default_join_keys")]
    pub join_keys: String,

    /// Window in which refetches of one order collapse, in milliseconds
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window_ms: u64,

    /// Quiet period before a metrics refresh fires, in milliseconds
    #[serde(default = "default_metrics_quiet_window")]
    pub metrics_quiet_window_ms: u64,

    /// Longest a metrics refresh may be held back by a steady event stream, in milliseconds
    #[serde(default = "default_metrics_max_wait")]
    pub metrics_max_wait_ms: u64,

    /// Branch the binary watches; all branches when unset
    pub branch: Option<String>,

    /// Statuses shown on the dashboard (comma-separated); all when unset
    pub statuses: Option<String>,
}

impl DashboardConfig {
    pub fn line_item_tables_list(&self) -> Vec<String> {
        split_list(&self.line_item_tables)
    }

    pub fn join_keys_list(&self) -> Vec<String> {
        split_list(&self.join_keys)
    }

    pub fn statuses_list(&self) -> Option<Vec<String>> {
        self.statuses
            .as_deref()
            .map(split_list)
            .filter(|statuses| !statuses.is_empty())
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn metrics_quiet_window(&self) -> Duration {
        Duration::from_millis(self.metrics_quiet_window_ms)
    }

    pub fn metrics_max_wait(&self) -> Duration {
        Duration::from_millis(self.metrics_max_wait_ms)
    }

    /// Validate dashboard configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.orders_table.trim().is_empty() {
            return Err(ValidationError::MissingRequired("DASHBOARD__ORDERS_TABLE"));
        }
        if self.line_item_tables_list().is_empty() {
            return Err(ValidationError::EmptyList("DASHBOARD__LINE_ITEM_TABLES"));
        }
        if self.parent_column.trim().is_empty() {
            return Err(ValidationError::MissingRequired("DASHBOARD__PARENT_COLUMN"));
        }
        if self.metrics_max_wait_ms < self.metrics_quiet_window_ms {
            return Err(ValidationError::InvalidMetricsWindow);
        }
        Ok(())
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            orders_table: default_orders_table(),
            line_item_tables: default_line_item_tables(),
            parent_column: default_parent_column(),
            line_items_key: default_line_items_key(),
            join_keys: default_join_keys(),
            coalesce_window_ms: default_coalesce_window(),
            metrics_quiet_window_ms: default_metrics_quiet_window(),
            metrics_max_wait_ms: default_metrics_max_wait(),
            branch: None,
            statuses: None,
        }
    }
}

fn default_orders_table() -> String {
    "orders".to_string()
}

fn default_line_item_tables() -> String {
    "order_line_items".to_string()
}

fn default_parent_column() -> String {
    "order_id".to_string()
}

fn default_line_items_key() -> String {
    "order_line_items".to_string()
}

fn default_join_keys() -> String {
    "customer_id,delivery_person_id,address_id".to_string()
}

fn default_coalesce_window() -> u64 {
    250
}

fn default_metrics_quiet_window() -> u64 {
    2_000
}

fn default_metrics_max_wait() -> u64 {
    10_000
}
