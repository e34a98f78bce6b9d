use std::sync::Arc;

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{AppIdentification, ApigeeClientOptions};
use crate::monitoring::{
    self, BufferedMetricsSink, InterceptionConfig, InterceptionInstaller, LogMetricsReporter,
    MetricsReporter, MetricsSink, MonitoringOptions,
};
use crate::net::{
    Completion, CompletionHandler, Connection, ConnectionDelegate, ExecutionContext, HttpMethod,
    HttpTransport, NetworkRequest,
};

/// Top-level entry point of the SDK.
///
/// Constructing a client validates the application identity and, unless monitoring is
/// switched off in the options, starts a [`BufferedMetricsSink`] and installs network call
/// interception with it. Interception is process-wide: the first client to install wins
/// and later clients reuse it.
pub struct ApigeeClient {
    identification: AppIdentification,
    config: InterceptionConfig,
    sink: Option<Arc<BufferedMetricsSink>>,
    installed_interception: bool,
}

impl ApigeeClient {
    /// Client with default options, reporting finished calls through the `log` facade.
    pub fn new(organization_id: &str, application_id: &str) -> AppResult<Self> {
        Self::builder(organization_id, application_id).build()
    }

    pub fn with_options(
        organization_id: &str,
        application_id: &str,
        options: ApigeeClientOptions,
    ) -> AppResult<Self> {
        Self::builder(organization_id, application_id)
            .options(options)
            .build()
    }

    pub fn builder(organization_id: &str, application_id: &str) -> ApigeeClientBuilder {
        ApigeeClientBuilder {
            organization_id: organization_id.to_string(),
            application_id: application_id.to_string(),
            options: ApigeeClientOptions::default(),
            reporter: None,
            transport: None,
        }
    }

    pub fn identification(&self) -> &AppIdentification {
        &self.identification
    }

    pub fn config(&self) -> &InterceptionConfig {
        &self.config
    }

    pub fn monitoring_options(&self) -> &MonitoringOptions {
        &self.config.monitoring
    }

    /// The sink this client created, or `None` when monitoring is disabled.
    pub fn metrics_sink(&self) -> Option<Arc<BufferedMetricsSink>> {
        self.sink.clone()
    }

    /// Whether this client is the one that installed interception.
    pub fn installed_interception(&self) -> bool {
        self.installed_interception
    }

    /// Builds a request for `target`, resolved against the application's API root with the
    /// configured URL terms appended.
    pub fn request(&self, method: HttpMethod, target: &str) -> AppResult<NetworkRequest> {
        let url = self
            .config
            .resolve(target)
            .map_err(|err| AppError::InvalidTarget {
                target: target.to_string(),
                message: err.to_string(),
            })?;
        Ok(NetworkRequest::new(method, url))
    }

    pub fn send_synchronous_request(&self, request: &NetworkRequest) -> Completion {
        monitoring::send_synchronous_request(request)
    }

    pub fn send_asynchronous_request(
        &self,
        request: NetworkRequest,
        context: Arc<dyn ExecutionContext>,
        handler: CompletionHandler,
    ) {
        monitoring::send_asynchronous_request(request, context, handler);
    }

    pub fn connection_with_request(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
    ) -> Arc<dyn Connection> {
        monitoring::connection_with_request(request, delegate)
    }

    /// Pushes every buffered timing record to the reporter.
    pub async fn flush(&self) -> AppResult<()> {
        let sink = self.sink.as_ref().ok_or_else(|| AppError::MonitoringUnavailable {
            message: "monitoring is disabled for this client".to_string(),
        })?;
        sink.flush()
            .await
            .map_err(|err| AppError::MonitoringUnavailable {
                message: err.to_string(),
            })
    }
}

pub struct ApigeeClientBuilder {
    organization_id: String,
    application_id: String,
    options: ApigeeClientOptions,
    reporter: Option<Arc<dyn MetricsReporter>>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl ApigeeClientBuilder {
    pub fn options(mut self, options: ApigeeClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.options.base_url = Some(base_url.into());
        self
    }

    pub fn url_terms(mut self, terms: impl Into<String>) -> Self {
        self.options.url_terms = Some(terms.into());
        self
    }

    pub fn monitoring(mut self, monitoring: MonitoringOptions) -> Self {
        self.options.monitoring = monitoring;
        self
    }

    /// Receives batches of timing records. Defaults to [`LogMetricsReporter`].
    pub fn reporter(mut self, reporter: Arc<dyn MetricsReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Transport wrapped by interception instead of the default native one.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> AppResult<ApigeeClient> {
        let ApigeeClientOptions {
            base_url,
            url_terms,
            monitoring,
        } = self.options;
        monitoring.validate()?;

        let mut identification = AppIdentification::new(self.organization_id, self.application_id)?;
        if let Some(base_url) = base_url.as_deref() {
            identification = identification.with_base_url(base_url)?;
        }

        let mut config = InterceptionConfig::default()
            .with_base_url(&identification.api_root())
            .map_err(|err| AppError::InvalidBaseUrl {
                url: identification.base_url().to_string(),
                message: err.to_string(),
            })?
            .with_monitoring(monitoring.clone());
        if let Some(terms) = url_terms {
            config = config.with_url_terms(terms);
        }

        if !monitoring.monitoring_enabled {
            log::info!(
                "monitoring disabled for {}; network calls will not be timed",
                identification.unique_identifier()
            );
            return Ok(ApigeeClient {
                identification,
                config,
                sink: None,
                installed_interception: false,
            });
        }

        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(LogMetricsReporter) as Arc<dyn MetricsReporter>);
        let sink = BufferedMetricsSink::new(reporter, monitoring.clone());

        let mut installed_interception = false;
        if monitoring.intercept_network_calls {
            let mut installer = InterceptionInstaller::new(Arc::clone(&sink) as Arc<dyn MetricsSink>)
                .with_config(config.clone());
            if let Some(transport) = self.transport {
                installer = installer.with_transport(transport);
            }
            installed_interception = installer.install();
            if !installed_interception {
                log::debug!(
                    "interception was installed earlier; {} keeps the existing metrics sink",
                    identification.unique_identifier()
                );
            }
        }

        Ok(ApigeeClient {
            identification,
            config,
            sink: Some(sink),
            installed_interception,
        })
    }
}
