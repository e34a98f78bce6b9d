//! Transparent timing of network calls.
//!
//! [`install`] (or [`InterceptionInstaller`]) routes the networking entry points through
//! an [`InstrumentedTransport`]. From then on every synchronous, asynchronous,
//! delegate-driven and text-loading call produces exactly one [`TimingRecord`], delivered to the configured
//! [`MetricsSink`] before the caller sees the result.
mod constants;
mod error;
mod interception;
mod options;
mod proxy;
mod sink;
mod timing;
mod wrapper;

#[doc(inline)]
pub use constants::{
    DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BUFFERED_RECORDS,
    DEFAULT_SAMPLING_RATE,
};

#[doc(inline)]
pub use error::{
    instrumentation_fault, internal_error, invalid_argument, MonitoringError,
    MonitoringErrorCode, MonitoringResult,
};

#[doc(inline)]
pub use interception::{
    connection_with_request, init_connection, install, installed_config,
    instrumented_transport, is_installed, send_asynchronous_request, send_synchronous_request,
    string_with_contents_of_url, string_with_contents_of_url_detecting, transport,
    InterceptionInstaller,
};

#[doc(inline)]
pub use options::{InterceptionConfig, MonitoringOptions};

#[doc(inline)]
pub use proxy::{DelegateProxy, ProxyPhase, TimedConnection};

#[doc(inline)]
pub use sink::{
    BufferedMetricsSink, CollectingMetricsSink, LogMetricsReporter, MemoryMetricsReporter,
    MetricsReporter, MetricsSink,
};

#[doc(inline)]
pub use timing::{CallOutcome, PendingCall, TimingRecord, TimingRecorder};

#[doc(inline)]
pub use wrapper::InstrumentedTransport;
