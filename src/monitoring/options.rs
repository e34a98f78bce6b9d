use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use url::Url;

use crate::monitoring::constants::{
    DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BUFFERED_RECORDS,
    DEFAULT_SAMPLING_RATE,
};
use crate::monitoring::error::{invalid_argument, MonitoringResult};

/// Knobs handed to the metrics sink at install time.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringOptions {
    pub monitoring_enabled: bool,
    /// When false the client façade does not install interception at all.
    pub intercept_network_calls: bool,
    /// Percentage (0-100) of finished calls forwarded to the reporter.
    pub sampling_rate: u8,
    pub max_buffered_records: usize,
    pub max_batch_size: usize,
    #[serde(rename = "flushIntervalMillis", deserialize_with = "duration_from_millis")]
    pub flush_interval: Duration,
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self {
            monitoring_enabled: true,
            intercept_network_calls: true,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            max_buffered_records: DEFAULT_MAX_BUFFERED_RECORDS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }
}

impl MonitoringOptions {
    pub fn validate(&self) -> MonitoringResult<()> {
        if self.sampling_rate > 100 {
            return Err(invalid_argument(format!(
                "sampling rate must be between 0 and 100, got {}",
                self.sampling_rate
            )));
        }
        if self.max_buffered_records == 0 {
            return Err(invalid_argument("max buffered records must be positive"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid_argument("max batch size must be positive"));
        }
        if self.flush_interval.is_zero() {
            return Err(invalid_argument("flush interval must be positive"));
        }
        Ok(())
    }

    /// Rolls the sampling dice for one finished call.
    pub fn should_sample(&self) -> bool {
        match self.sampling_rate {
            0 => false,
            rate if rate >= 100 => true,
            rate => rand::thread_rng().gen_range(0..100u8) < rate,
        }
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Configuration read once, when interception is installed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InterceptionConfig {
    pub base_url: Option<Url>,
    /// Query fragment (`a=1&b=2`) appended to every resolved request target.
    pub url_terms: Option<String>,
    pub monitoring: MonitoringOptions,
}

#[derive(Deserialize)]
struct RawInterceptionConfig {
    #[serde(default, rename = "baseURL")]
    base_url: Option<String>,
    #[serde(default, rename = "urlTerms")]
    url_terms: Option<String>,
    #[serde(default, rename = "monitoringOptions")]
    monitoring: MonitoringOptions,
}

impl InterceptionConfig {
    /// Parses `{ "baseURL": .., "urlTerms": .., "monitoringOptions": { .. } }`.
    pub fn from_json(value: &JsonValue) -> MonitoringResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let raw: RawInterceptionConfig = serde_json::from_value(value.clone())
            .map_err(|err| invalid_argument(format!("invalid interception config: {err}")))?;
        let mut config = Self {
            base_url: None,
            url_terms: raw.url_terms,
            monitoring: raw.monitoring,
        };
        if let Some(base) = raw.base_url {
            config = config.with_base_url(&base)?;
        }
        config.monitoring.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base: &str) -> MonitoringResult<Self> {
        let mut url = Url::parse(base)
            .map_err(|err| invalid_argument(format!("invalid base URL `{base}`: {err}")))?;
        if url.cannot_be_a_base() {
            return Err(invalid_argument(format!("`{base}` cannot be used as a base URL")));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn with_url_terms(mut self, terms: impl Into<String>) -> Self {
        self.url_terms = Some(terms.into());
        self
    }

    pub fn with_monitoring(mut self, monitoring: MonitoringOptions) -> Self {
        self.monitoring = monitoring;
        self
    }

    /// Resolves `target` against the base URL (absolute targets are kept as-is) and
    /// appends the URL terms to its query string.
    pub fn resolve(&self, target: &str) -> MonitoringResult<Url> {
        let mut url = match Url::parse(target) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.as_ref().ok_or_else(|| {
                    invalid_argument(format!("relative target `{target}` needs a base URL"))
                })?;
                base.join(target.trim_start_matches('/')).map_err(|err| {
                    invalid_argument(format!("cannot resolve `{target}` against {base}: {err}"))
                })?
            }
            Err(err) => {
                return Err(invalid_argument(format!("invalid target `{target}`: {err}")));
            }
        };

        let terms = self
            .url_terms
            .as_deref()
            .map(|terms| terms.trim_start_matches(['?', '&']))
            .filter(|terms| !terms.is_empty());
        if let Some(terms) = terms {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{terms}"),
                _ => terms.to_string(),
            };
            url.set_query(Some(&query));
        }
        Ok(url)
    }
}
