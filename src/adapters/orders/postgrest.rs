//! PostgREST order fetcher.
//!
//! Point queries against the backend's REST API:
//! `GET /rest/v1/{orders}?id=eq.{id}&select=...` for scoped refetches and a
//! filtered listing for wholesale reloads. Zero rows means the order is gone
//! or hidden by row-level security.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::config::AppConfig;
use crate::domain::foundation::OrderId;
use crate::domain::orders::{OrderRecord, ViewFilter, CREATED_AT_COLUMN, ID_COLUMN, STATUS_COLUMN};
use crate::ports::{FetchError, OrderFetcher};

/// Settings for [`PostgrestOrderFetcher`].
#[derive(Debug, Clone)]
pub struct PostgrestSettings {
    pub base_url: String,
    pub api_key: SecretString,
    pub schema: String,
    pub orders_table: String,
    pub select: String,
    pub line_items_key: String,
    pub branch_column: String,
    pub request_timeout: Duration,
}

impl From<&AppConfig> for PostgrestSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.backend.url.trim_end_matches('/').to_string(),
            api_key: config.backend.api_key.clone(),
            schema: config.backend.schema.clone(),
            orders_table: config.dashboard.orders_table.clone(),
            select: config.backend.order_select.clone(),
            line_items_key: config.dashboard.line_items_key.clone(),
            branch_column: config.realtime.branch_column.clone(),
            request_timeout: config.backend.request_timeout(),
        }
    }
}

/// Order fetcher over the relational REST API.
pub struct PostgrestOrderFetcher {
    settings: PostgrestSettings,
    http_client: reqwest::Client,
}

impl PostgrestOrderFetcher {
    pub fn new(settings: PostgrestSettings) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            settings,
            http_client,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.settings.base_url, self.settings.orders_table)
    }

    async fn get_rows(&self, query: Vec<(String, String)>) -> Result<Vec<JsonValue>, FetchError> {
        let key = self.settings.api_key.expose_secret();
        let response = self
            .http_client
            .get(self.table_url())
            .query(&query)
            .header("apikey", key)
            .bearer_auth(key)
            .header("Accept-Profile", &self.settings.schema)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<JsonValue>>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn decode_row(&self, value: JsonValue) -> Result<OrderRecord, FetchError> {
        let JsonValue::Object(row) = value else {
            return Err(FetchError::Decode("order row is not an object".into()));
        };
        OrderRecord::from_fetched(row, &self.settings.line_items_key)
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// Query for one order by id.
pub fn single_order_query(id: &OrderId, select: &str) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), select.to_string()),
        (ID_COLUMN.to_string(), format!("eq.{}", id)),
        ("limit".to_string(), "1".to_string()),
    ]
}

/// Query listing every order in `view`, newest first.
pub fn order_list_query(view: &ViewFilter, select: &str, branch_column: &str) -> Vec<(String, String)> {
    let mut query = vec![("select".to_string(), select.to_string())];

    if let Some(branch) = &view.branch {
        query.push((branch_column.to_string(), format!("eq.{}", branch)));
    }
    if let Some(statuses) = &view.statuses {
        let list: Vec<&str> = statuses.iter().map(String::as_str).collect();
        query.push((STATUS_COLUMN.to_string(), format!("in.({})", list.join(","))));
    }
    if let Some(from) = &view.created_from {
        query.push((
            CREATED_AT_COLUMN.to_string(),
            format!("gte.{}", from.as_datetime().to_rfc3339()),
        ));
    }
    if let Some(to) = &view.created_to {
        query.push((
            CREATED_AT_COLUMN.to_string(),
            format!("lt.{}", to.as_datetime().to_rfc3339()),
        ));
    }
    query.push(("order".to_string(), format!("{}.desc", CREATED_AT_COLUMN)));
    query
}

#[async_trait]
impl OrderFetcher for PostgrestOrderFetcher {
    async fn fetch_order(&self, id: &OrderId) -> Result<Option<OrderRecord>, FetchError> {
        let rows = self
            .get_rows(single_order_query(id, &self.settings.select))
            .await?;
        tracing::debug!(order_id = %id, rows = rows.len(), "Fetched order");

        match rows.into_iter().next() {
            Some(row) => self.decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_orders(&self, view: &ViewFilter) -> Result<Vec<OrderRecord>, FetchError> {
        let rows = self
            .get_rows(order_list_query(
                view,
                &self.settings.select,
                &self.settings.branch_column,
            ))
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match self.decode_row(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable order row"),
            }
        }
        Ok(records)
    }
}
