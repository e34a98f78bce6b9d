use serde::Deserialize;
use serde_json::Value as JsonValue;
use url::Url;

use crate::app::constants::DEFAULT_BASE_URL;
use crate::app::errors::{AppError, AppResult};
use crate::monitoring::MonitoringOptions;

/// Who the application is, as far as the Apigee backend is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppIdentification {
    organization_id: String,
    application_id: String,
    base_url: String,
}

impl AppIdentification {
    pub fn new(organization_id: impl Into<String>, application_id: impl Into<String>) -> AppResult<Self> {
        let organization_id = organization_id.into().trim().to_string();
        let application_id = application_id.into().trim().to_string();
        if organization_id.is_empty() {
            return Err(AppError::MissingIdentifier {
                field: "organization id",
            });
        }
        if application_id.is_empty() {
            return Err(AppError::MissingIdentifier {
                field: "application id",
            });
        }
        Ok(Self {
            organization_id,
            application_id,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> AppResult<Self> {
        let parsed = Url::parse(base_url).map_err(|err| AppError::InvalidBaseUrl {
            url: base_url.to_string(),
            message: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidBaseUrl {
                url: base_url.to_string(),
                message: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/{organization}/{application}/`, the root every relative request
    /// target is resolved against.
    pub fn api_root(&self) -> String {
        format!(
            "{}/{}/{}/",
            self.base_url, self.organization_id, self.application_id
        )
    }

    /// Stable key for this application, e.g. for naming metrics batches.
    pub fn unique_identifier(&self) -> String {
        format!("{}_{}", self.organization_id, self.application_id)
    }
}

/// Optional settings accepted when constructing an [`ApigeeClient`](crate::app::ApigeeClient).
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApigeeClientOptions {
    /// Server root; only set when directed to by the backend operator.
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,
    /// Query fragment appended to every request the client builds.
    #[serde(rename = "urlTerms")]
    pub url_terms: Option<String>,
    #[serde(rename = "monitoringOptions")]
    pub monitoring: MonitoringOptions,
}

impl ApigeeClientOptions {
    pub fn from_json(value: &JsonValue) -> AppResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|err| AppError::InvalidOptions {
            message: err.to_string(),
        })
    }
}
