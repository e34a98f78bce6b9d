use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use bytes::Bytes;

use crate::monitoring::error::instrumentation_fault;
use crate::monitoring::sink::{submit, MetricsSink};
use crate::monitoring::timing::{CallOutcome, PendingCall, TimingRecorder};
use crate::net::{
    AuthenticationChallenge, ChallengeDisposition, Connection, ConnectionDelegate,
    NetworkRequest, NetworkResponse, TransportError, TransportErrorKind,
};

/// Lifecycle of a proxied connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyPhase {
    Created,
    Started,
    Receiving,
    Finished,
    Failed,
    Cancelled,
}

impl ProxyPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProxyPhase::Finished | ProxyPhase::Failed | ProxyPhase::Cancelled
        )
    }
}

struct ProxyState {
    phase: ProxyPhase,
    call: Option<PendingCall>,
    /// Forwarding link to the caller's delegate; released at the terminal transition.
    delegate: Option<Arc<dyn ConnectionDelegate>>,
}

/// Stands in for the caller's delegate on a delegate-driven connection.
///
/// Every event is forwarded unchanged, on the thread that delivered it. Response and data
/// events feed the pending measurement; the first terminal event (finish, failure or
/// cancel) ends it, submits the record and only then notifies the caller. Events arriving
/// after that are contract violations of the underlying transport: they are logged and
/// counted, never forwarded.
pub struct DelegateProxy {
    state: Mutex<ProxyState>,
    sink: Arc<dyn MetricsSink>,
    recorder: TimingRecorder,
    faults: AtomicUsize,
}

impl DelegateProxy {
    pub fn new(
        request: &NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
        sink: Arc<dyn MetricsSink>,
        recorder: TimingRecorder,
    ) -> Self {
        Self {
            state: Mutex::new(ProxyState {
                phase: ProxyPhase::Created,
                call: Some(recorder.begin(request)),
                delegate: Some(delegate),
            }),
            sink,
            recorder,
            faults: AtomicUsize::new(0),
        }
    }

    pub fn phase(&self) -> ProxyPhase {
        self.lock().phase
    }

    /// Number of events rejected because the proxy had already terminated.
    pub fn fault_count(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// Moves `Created` to `Started`, restarting the clock so deferred connections are
    /// measured from the moment they hit the network.
    pub fn mark_started(&self) {
        let mut state = self.lock();
        if state.phase == ProxyPhase::Created {
            state.phase = ProxyPhase::Started;
            if let Some(call) = state.call.as_mut() {
                call.restart();
            }
        }
    }

    /// Terminates the measurement as cancelled. The caller's delegate is released without
    /// receiving a terminal event.
    pub fn cancel(&self) {
        let _ = self.terminate(ProxyPhase::Cancelled, CallOutcome::Cancelled, "cancel");
    }

    fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fault(&self, event: &str, phase: ProxyPhase) {
        self.faults.fetch_add(1, Ordering::SeqCst);
        log::warn!(
            "{}",
            instrumentation_fault(format!(
                "`{event}` arrived after the connection reached {phase:?}; not forwarded"
            ))
        );
    }

    /// Applies `observe` to the pending call and returns the delegate to forward to, unless
    /// the proxy has already terminated.
    fn live(
        &self,
        event: &str,
        observe: impl FnOnce(&mut ProxyState),
    ) -> Option<Arc<dyn ConnectionDelegate>> {
        let mut state = self.lock();
        if state.phase.is_terminal() {
            let phase = state.phase;
            drop(state);
            self.fault(event, phase);
            return None;
        }
        observe(&mut state);
        state.delegate.clone()
    }

    fn terminate(
        &self,
        phase: ProxyPhase,
        outcome: CallOutcome,
        event: &str,
    ) -> Option<Arc<dyn ConnectionDelegate>> {
        let (call, delegate) = {
            let mut state = self.lock();
            if state.phase.is_terminal() {
                let current = state.phase;
                drop(state);
                self.fault(event, current);
                return None;
            }
            state.phase = phase;
            (state.call.take(), state.delegate.take())
        };
        if let Some(call) = call {
            submit(self.sink.as_ref(), self.recorder.end(call, outcome));
        }
        delegate
    }
}

impl Drop for DelegateProxy {
    // Last reference gone without a terminal event: the connection was abandoned, or the
    // thread delivering events unwound.
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.phase.is_terminal() {
            return;
        }
        let Some(call) = state.call.take() else {
            return;
        };
        let outcome = if thread::panicking() {
            CallOutcome::Failure(None)
        } else {
            CallOutcome::Cancelled
        };
        state.phase = ProxyPhase::Cancelled;
        log::debug!("{} {} dropped before a terminal event", call.method(), call.url());
        submit(self.sink.as_ref(), self.recorder.end(call, outcome));
    }
}

impl ConnectionDelegate for DelegateProxy {
    fn will_send_request(
        &self,
        request: NetworkRequest,
        redirect_response: Option<&NetworkResponse>,
    ) -> Option<NetworkRequest> {
        let delegate = self.live("will_send_request", |_| {})?;
        delegate.will_send_request(request, redirect_response)
    }

    fn did_receive_challenge(&self, challenge: &AuthenticationChallenge) -> ChallengeDisposition {
        match self.live("did_receive_challenge", |_| {}) {
            Some(delegate) => delegate.did_receive_challenge(challenge),
            None => ChallengeDisposition::PerformDefaultHandling,
        }
    }

    fn did_receive_response(&self, response: &NetworkResponse) {
        let delegate = self.live("did_receive_response", |state| {
            if state.phase == ProxyPhase::Created {
                state.phase = ProxyPhase::Started;
            }
            if let Some(call) = state.call.as_mut() {
                call.observe_response(response.status);
            }
        });
        if let Some(delegate) = delegate {
            delegate.did_receive_response(response);
        }
    }

    fn did_receive_data(&self, data: &Bytes) {
        let delegate = self.live("did_receive_data", |state| {
            state.phase = ProxyPhase::Receiving;
            if let Some(call) = state.call.as_mut() {
                call.add_bytes(data.len() as u64);
            }
        });
        if let Some(delegate) = delegate {
            delegate.did_receive_data(data);
        }
    }

    fn did_finish_loading(&self) {
        if let Some(delegate) =
            self.terminate(ProxyPhase::Finished, CallOutcome::Success, "did_finish_loading")
        {
            delegate.did_finish_loading();
        }
    }

    fn did_fail_with_error(&self, error: &TransportError) {
        let phase = if error.kind == TransportErrorKind::Cancelled {
            ProxyPhase::Cancelled
        } else {
            ProxyPhase::Failed
        };
        let outcome = CallOutcome::from_error_kind(error.kind);
        if let Some(delegate) = self.terminate(phase, outcome, "did_fail_with_error") {
            delegate.did_fail_with_error(error);
        }
    }
}

/// Connection handle returned to callers of the instrumented transport. Behaves like the
/// underlying connection and keeps the proxy informed of start and cancel.
pub struct TimedConnection {
    inner: Arc<dyn Connection>,
    proxy: Arc<DelegateProxy>,
}

impl TimedConnection {
    pub(crate) fn new(inner: Arc<dyn Connection>, proxy: Arc<DelegateProxy>) -> Self {
        Self { inner, proxy }
    }

    pub fn phase(&self) -> ProxyPhase {
        self.proxy.phase()
    }

    pub fn proxy(&self) -> &Arc<DelegateProxy> {
        &self.proxy
    }
}

impl Connection for TimedConnection {
    fn original_request(&self) -> &NetworkRequest {
        self.inner.original_request()
    }

    fn start(&self) {
        self.proxy.mark_started();
        self.inner.start();
    }

    fn cancel(&self) {
        self.inner.cancel();
        self.proxy.cancel();
    }
}
