//! Process-wide interception of the networking entry points.
//!
//! Application code issues requests through the free functions in this module
//! ([`send_synchronous_request`], [`send_asynchronous_request`],
//! [`connection_with_request`], [`init_connection`], [`string_with_contents_of_url`],
//! [`string_with_contents_of_url_detecting`]) or through the transport returned by
//! [`transport`]. Until interception is installed these route straight to the base
//! transport; afterwards every call goes through an [`InstrumentedTransport`]. The switch
//! is a single publication into a `OnceLock`, so it happens at most once per process,
//! concurrent installers all wait for it, and no caller ever sees a half-installed state.

use std::sync::{Arc, LazyLock, OnceLock};

use crate::monitoring::options::InterceptionConfig;
use crate::monitoring::sink::MetricsSink;
use crate::monitoring::wrapper::InstrumentedTransport;
use url::Url;

use crate::net::{
    self, Completion, CompletionHandler, Connection, ConnectionDelegate, ExecutionContext,
    HttpTransport, NativeTransport, NetworkRequest, TextEncoding, TransportResult,
};

/// State published by the one successful install.
struct InterceptionState {
    transport: Arc<InstrumentedTransport>,
    config: InterceptionConfig,
}

static INTERCEPTION: OnceLock<InterceptionState> = OnceLock::new();

static BASE_TRANSPORT: LazyLock<Arc<dyn HttpTransport>> =
    LazyLock::new(|| Arc::new(NativeTransport::default()));

/// Builder for the one-time activation of instrumentation.
pub struct InterceptionInstaller {
    sink: Arc<dyn MetricsSink>,
    config: InterceptionConfig,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl InterceptionInstaller {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            config: InterceptionConfig::default(),
            transport: None,
        }
    }

    pub fn with_config(mut self, config: InterceptionConfig) -> Self {
        self.config = config;
        self
    }

    /// Wraps `transport` instead of the default [`NativeTransport`].
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Redirects the entry points to the instrumented transport.
    ///
    /// Returns `true` for the call that performed installation and `false` for every other
    /// call, concurrent or later. When this returns, installation is complete regardless
    /// of which caller did it.
    pub fn install(self) -> bool {
        let mut performed = false;
        let state = INTERCEPTION.get_or_init(|| {
            performed = true;
            let base = self
                .transport
                .unwrap_or_else(|| Arc::clone(&BASE_TRANSPORT));
            self.sink.configure(&self.config.monitoring);
            InterceptionState {
                transport: Arc::new(InstrumentedTransport::new(base, self.sink)),
                config: self.config,
            }
        });
        if performed {
            log::info!(
                "network call interception installed (sampling {}%)",
                state.config.monitoring.sampling_rate
            );
        } else {
            log::debug!("network call interception already installed; ignoring request");
        }
        performed
    }
}

/// Installs interception with default configuration. See [`InterceptionInstaller::install`].
pub fn install(sink: Arc<dyn MetricsSink>) -> bool {
    InterceptionInstaller::new(sink).install()
}

pub fn is_installed() -> bool {
    INTERCEPTION.get().is_some()
}

/// Configuration captured by the install that took effect.
pub fn installed_config() -> Option<InterceptionConfig> {
    INTERCEPTION.get().map(|state| state.config.clone())
}

/// The instrumented transport, once installed.
pub fn instrumented_transport() -> Option<Arc<InstrumentedTransport>> {
    INTERCEPTION.get().map(|state| Arc::clone(&state.transport))
}

/// The transport every entry point currently routes through.
pub fn transport() -> Arc<dyn HttpTransport> {
    match INTERCEPTION.get() {
        Some(state) => Arc::clone(&state.transport) as Arc<dyn HttpTransport>,
        None => Arc::clone(&BASE_TRANSPORT),
    }
}

pub fn send_synchronous_request(request: &NetworkRequest) -> Completion {
    transport().send_synchronous_request(request)
}

pub fn send_asynchronous_request(
    request: NetworkRequest,
    context: Arc<dyn ExecutionContext>,
    handler: CompletionHandler,
) {
    transport().send_asynchronous_request(request, context, handler);
}

/// Opens and starts a delegate-driven connection.
pub fn connection_with_request(
    request: NetworkRequest,
    delegate: Arc<dyn ConnectionDelegate>,
) -> Arc<dyn Connection> {
    init_connection(request, delegate, true)
}

pub fn init_connection(
    request: NetworkRequest,
    delegate: Arc<dyn ConnectionDelegate>,
    start_immediately: bool,
) -> Arc<dyn Connection> {
    transport().open_connection(request, delegate, start_immediately)
}

/// Loads `url` synchronously and decodes its contents with `encoding`.
pub fn string_with_contents_of_url(url: &Url, encoding: TextEncoding) -> TransportResult<String> {
    match INTERCEPTION.get() {
        Some(state) => state.transport.timed_string_with_contents_of_url(url, encoding),
        None => net::string_with_contents_of_url(BASE_TRANSPORT.as_ref(), url, encoding),
    }
}

/// Loads `url` synchronously, returning its text and the encoding it was decoded with.
pub fn string_with_contents_of_url_detecting(url: &Url) -> TransportResult<(String, TextEncoding)> {
    match INTERCEPTION.get() {
        Some(state) => state.transport.timed_string_with_contents_of_url_detecting(url),
        None => net::string_with_contents_of_url_detecting(BASE_TRANSPORT.as_ref(), url),
    }
}
