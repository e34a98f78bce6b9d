use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::net::{HttpMethod, NetworkRequest, TransportErrorKind};

/// How a measured call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    /// The exchange failed; the kind is absent when the transport completed without data
    /// but reported no error.
    Failure(Option<TransportErrorKind>),
    Cancelled,
}

impl CallOutcome {
    /// Outcome for a transport error: cancellations are not failures.
    pub fn from_error_kind(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Cancelled => CallOutcome::Cancelled,
            other => CallOutcome::Failure(Some(other)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success)
    }

    pub fn error_kind(&self) -> Option<TransportErrorKind> {
        match self {
            CallOutcome::Success => None,
            CallOutcome::Failure(kind) => *kind,
            CallOutcome::Cancelled => Some(TransportErrorKind::Cancelled),
        }
    }
}

/// In-flight measurement for exactly one call. Owned by whoever handles that call and
/// consumed by [`TimingRecorder::end`].
#[derive(Debug)]
pub struct PendingCall {
    start: Instant,
    started_at: DateTime<Utc>,
    url: String,
    method: HttpMethod,
    status: Option<u16>,
    response_at: Option<Instant>,
    bytes: Option<u64>,
}

impl PendingCall {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Notes the response headers. Only the first response counts for latency.
    pub fn observe_response(&mut self, status: u16) {
        self.status = Some(status);
        if self.response_at.is_none() {
            self.response_at = Some(Instant::now());
        }
    }

    pub fn add_bytes(&mut self, count: u64) {
        self.bytes = Some(self.bytes.unwrap_or(0).saturating_add(count));
    }

    /// Moves the start of the measurement to now, for calls created well before they
    /// touch the network.
    pub fn restart(&mut self) {
        self.start = Instant::now();
        self.started_at = Utc::now();
    }
}

/// Immutable measurement of one network call.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingRecord {
    start_time: Instant,
    end_time: Instant,
    started_at: DateTime<Utc>,
    url: String,
    http_method: HttpMethod,
    outcome: CallOutcome,
    bytes_transferred: Option<u64>,
    status_code: Option<u16>,
    response_latency: Option<Duration>,
}

impl TimingRecord {
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn end_time(&self) -> Instant {
        self.end_time
    }

    /// Wall-clock time the call started, for reporting. Durations never use it.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn duration(&self) -> Duration {
        self.end_time.duration_since(self.start_time)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn http_method(&self) -> HttpMethod {
        self.http_method
    }

    pub fn outcome(&self) -> CallOutcome {
        self.outcome
    }

    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn error_kind(&self) -> Option<TransportErrorKind> {
        self.outcome.error_kind()
    }

    pub fn bytes_transferred(&self) -> Option<u64> {
        self.bytes_transferred
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Time from start until the response headers arrived, when they did.
    pub fn response_latency(&self) -> Option<Duration> {
        self.response_latency
    }
}

#[derive(Serialize)]
struct SerializableTimingRecord<'a> {
    url: &'a str,
    http_method: HttpMethod,
    started_at_us: i64,
    duration_us: u128,
    success: bool,
    outcome: CallOutcome,
    error_kind: Option<TransportErrorKind>,
    bytes_transferred: Option<u64>,
    status_code: Option<u16>,
    response_latency_us: Option<u128>,
}

impl Serialize for TimingRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SerializableTimingRecord {
            url: &self.url,
            http_method: self.http_method,
            started_at_us: self.started_at.timestamp_micros(),
            duration_us: self.duration().as_micros(),
            success: self.success(),
            outcome: self.outcome,
            error_kind: self.error_kind(),
            bytes_transferred: self.bytes_transferred,
            status_code: self.status_code,
            response_latency_us: self.response_latency.map(|latency| latency.as_micros()),
        }
        .serialize(serializer)
    }
}

/// Brackets calls with monotonic timestamps and composes [`TimingRecord`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimingRecorder;

impl TimingRecorder {
    pub fn new() -> Self {
        Self
    }

    pub fn begin(&self, request: &NetworkRequest) -> PendingCall {
        PendingCall {
            start: Instant::now(),
            started_at: Utc::now(),
            url: sanitize_url(request),
            method: request.method,
            status: None,
            response_at: None,
            bytes: None,
        }
    }

    pub fn end(&self, call: PendingCall, outcome: CallOutcome) -> TimingRecord {
        let end_time = Instant::now();
        TimingRecord {
            start_time: call.start,
            end_time,
            started_at: call.started_at,
            url: call.url,
            http_method: call.method,
            outcome,
            bytes_transferred: call.bytes,
            status_code: call.status,
            response_latency: call
                .response_at
                .map(|at| at.saturating_duration_since(call.start)),
        }
    }
}

/// Request target without query string, fragment or credentials.
fn sanitize_url(request: &NetworkRequest) -> String {
    let mut url = request.url.clone();
    url.set_query(None);
    url.set_fragment(None);
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}
