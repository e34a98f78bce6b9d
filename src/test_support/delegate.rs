use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::monitoring::CollectingMetricsSink;
use crate::net::{
    AuthenticationChallenge, ChallengeDisposition, ConnectionDelegate, Credential,
    NetworkRequest, NetworkResponse, TransportError, TransportErrorKind,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelegateEvent {
    Redirect(String),
    Challenge(u32),
    Response(u16),
    Data(usize),
    Finished,
    Failed(TransportErrorKind),
}

impl DelegateEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, DelegateEvent::Finished | DelegateEvent::Failed(_))
    }
}

#[derive(Default)]
struct Recorded {
    events: Vec<DelegateEvent>,
    bytes: usize,
    last_error: Option<TransportError>,
    records_at_terminal: Option<usize>,
}

/// Delegate that records every callback, optionally answering challenges with a credential
/// and noting how many timing records a sink held when the terminal event arrived.
#[derive(Default)]
pub struct RecordingDelegate {
    recorded: Mutex<Recorded>,
    changed: Condvar,
    credential: Option<Credential>,
    sink: Option<Arc<CollectingMetricsSink>>,
}

impl RecordingDelegate {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
            ..Default::default()
        }
    }

    pub fn observing(sink: Arc<CollectingMetricsSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<DelegateEvent> {
        self.recorded.lock().unwrap().events.clone()
    }

    pub fn bytes_received(&self) -> usize {
        self.recorded.lock().unwrap().bytes
    }

    pub fn last_error(&self) -> Option<TransportError> {
        self.recorded.lock().unwrap().last_error.clone()
    }

    pub fn records_at_terminal(&self) -> Option<usize> {
        self.recorded.lock().unwrap().records_at_terminal
    }

    /// Blocks until a terminal event arrives (or `timeout` passes) and returns all events.
    pub fn wait_for_terminal(&self, timeout: Duration) -> Vec<DelegateEvent> {
        let deadline = Instant::now() + timeout;
        let mut recorded = self.recorded.lock().unwrap();
        while !recorded.events.iter().any(DelegateEvent::is_terminal) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            recorded = self.changed.wait_timeout(recorded, remaining).unwrap().0;
        }
        recorded.events.clone()
    }

    fn push(&self, event: DelegateEvent, update: impl FnOnce(&mut Recorded)) {
        let mut recorded = self.recorded.lock().unwrap();
        if event.is_terminal() {
            recorded.records_at_terminal = self.sink.as_ref().map(|sink| sink.len());
        }
        update(&mut recorded);
        recorded.events.push(event);
        self.changed.notify_all();
    }
}

impl ConnectionDelegate for RecordingDelegate {
    fn will_send_request(
        &self,
        request: NetworkRequest,
        _redirect_response: Option<&NetworkResponse>,
    ) -> Option<NetworkRequest> {
        self.push(DelegateEvent::Redirect(request.url.to_string()), |_| {});
        Some(request)
    }

    fn did_receive_challenge(&self, challenge: &AuthenticationChallenge) -> ChallengeDisposition {
        self.push(DelegateEvent::Challenge(challenge.previous_failure_count), |_| {});
        match &self.credential {
            Some(credential) => ChallengeDisposition::UseCredential(credential.clone()),
            None => ChallengeDisposition::PerformDefaultHandling,
        }
    }

    fn did_receive_response(&self, response: &NetworkResponse) {
        self.push(DelegateEvent::Response(response.status), |_| {});
    }

    fn did_receive_data(&self, data: &Bytes) {
        let len = data.len();
        self.push(DelegateEvent::Data(len), |recorded| recorded.bytes += len);
    }

    fn did_finish_loading(&self) {
        self.push(DelegateEvent::Finished, |_| {});
    }

    fn did_fail_with_error(&self, error: &TransportError) {
        let error = error.clone();
        self.push(DelegateEvent::Failed(error.kind), |recorded| {
            recorded.last_error = Some(error)
        });
    }
}
