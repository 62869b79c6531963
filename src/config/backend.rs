//! Backend (REST + realtime) configuration

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Hosted backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub url: String,

    /// Realtime base URL when it differs from `url`
    pub realtime_url: Option<String>,

    /// Public API key sent as `apikey` and bearer token
    pub api_key: SecretString,

    /// Database schema exposed through the REST API
    #[serde(default = "default_schema")]
    pub schema: String,

    /// REST request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// PostgREST `select` clause used for order fetches
    #[serde(default = "default_order_select")]
    pub order_select: String,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            realtime_url: None,
            api_key: SecretString::new(api_key.into()),
            schema: default_schema(),
            request_timeout_secs: default_request_timeout(),
            order_select: default_order_select(),
        }
    }

    pub fn realtime_base_url(&self) -> &str {
        self.realtime_url.as_deref().unwrap_or(&self.url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate backend configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("BACKEND__URL"));
        }
        if !is_http_url(&self.url) {
            return Err(ValidationError::InvalidUrl("BACKEND__URL"));
        }
        if let Some(realtime_url) = &self.realtime_url {
            if !is_http_url(realtime_url) && !realtime_url.starts_with("ws") {
                return Err(ValidationError::InvalidUrl("BACKEND__REALTIME_URL"));
            }
        }
        if secrecy::ExposeSecret::expose_secret(&self.api_key).is_empty() {
            return Err(ValidationError::MissingRequired("BACKEND__API_KEY"));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_order_select() -> String {
    "*,order_line_items(*),customer:customers(*),delivery_person:delivery_people(*)".to_string()
}
