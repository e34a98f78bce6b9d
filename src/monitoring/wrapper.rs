use std::sync::Arc;
use std::thread;

use crate::monitoring::proxy::{DelegateProxy, TimedConnection};
use crate::monitoring::sink::{submit, MetricsSink};
use crate::monitoring::timing::{CallOutcome, PendingCall, TimingRecorder};
use url::Url;

use crate::net::{
    text_from_completion, text_from_completion_detecting, text_request, Completion,
    CompletionHandler, Connection, ConnectionDelegate, ExecutionContext, HttpTransport,
    NetworkRequest, TextEncoding, TransportErrorKind, TransportResult,
};

/// Decorator that times every call made through the wrapped transport.
///
/// Results, errors, handler scheduling and delegate events are passed through untouched;
/// the only added effect is one [`TimingRecord`](crate::monitoring::TimingRecord) per call,
/// submitted to the sink before the caller observes the outcome.
pub struct InstrumentedTransport {
    inner: Arc<dyn HttpTransport>,
    sink: Arc<dyn MetricsSink>,
    recorder: TimingRecorder,
}

impl InstrumentedTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner,
            sink,
            recorder: TimingRecorder::new(),
        }
    }

    pub fn inner(&self) -> &Arc<dyn HttpTransport> {
        &self.inner
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    pub fn timed_synchronous_request(&self, request: &NetworkRequest) -> Completion {
        let guard = CallGuard::begin(self.recorder, Arc::clone(&self.sink), request);
        let completion = self.inner.send_synchronous_request(request);
        guard.finish(&completion);
        completion
    }

    pub fn timed_asynchronous_request(
        &self,
        request: NetworkRequest,
        context: Arc<dyn ExecutionContext>,
        handler: CompletionHandler,
    ) {
        let guard = CallGuard::begin(self.recorder, Arc::clone(&self.sink), &request);
        self.inner.send_asynchronous_request(
            request,
            context,
            Box::new(move |completion| {
                guard.finish(&completion);
                handler(completion);
            }),
        );
    }

    pub fn init_timed_connection(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
        start_immediately: bool,
    ) -> Arc<TimedConnection> {
        let proxy = Arc::new(DelegateProxy::new(
            &request,
            delegate,
            Arc::clone(&self.sink),
            self.recorder,
        ));
        if start_immediately {
            proxy.mark_started();
        }
        let connection = self.inner.open_connection(
            request,
            Arc::clone(&proxy) as Arc<dyn ConnectionDelegate>,
            start_immediately,
        );
        Arc::new(TimedConnection::new(connection, proxy))
    }

    /// Loads the contents of `url` synchronously and decodes them with `encoding`.
    ///
    /// A decode failure is recorded as a failed call; transport errors are returned as the
    /// transport reported them.
    pub fn timed_string_with_contents_of_url(
        &self,
        url: &Url,
        encoding: TextEncoding,
    ) -> TransportResult<String> {
        let request = text_request(url);
        let guard = CallGuard::begin(self.recorder, Arc::clone(&self.sink), &request);
        let completion = self.inner.send_synchronous_request(&request);
        let text = text_from_completion(url, &completion, encoding);
        guard.finish_with(&completion, text_outcome(&completion, &text));
        text
    }

    /// Like [`timed_string_with_contents_of_url`](Self::timed_string_with_contents_of_url),
    /// detecting the encoding and returning it alongside the text.
    pub fn timed_string_with_contents_of_url_detecting(
        &self,
        url: &Url,
    ) -> TransportResult<(String, TextEncoding)> {
        let request = text_request(url);
        let guard = CallGuard::begin(self.recorder, Arc::clone(&self.sink), &request);
        let completion = self.inner.send_synchronous_request(&request);
        let text = text_from_completion_detecting(url, &completion);
        guard.finish_with(&completion, text_outcome(&completion, &text));
        text
    }

    /// Opens and immediately starts a timed connection.
    pub fn timed_connection(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
    ) -> Arc<TimedConnection> {
        self.init_timed_connection(request, delegate, true)
    }
}

impl HttpTransport for InstrumentedTransport {
    fn send_synchronous_request(&self, request: &NetworkRequest) -> Completion {
        self.timed_synchronous_request(request)
    }

    fn send_asynchronous_request(
        &self,
        request: NetworkRequest,
        context: Arc<dyn ExecutionContext>,
        handler: CompletionHandler,
    ) {
        self.timed_asynchronous_request(request, context, handler);
    }

    fn open_connection(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
        start_immediately: bool,
    ) -> Arc<dyn Connection> {
        self.init_timed_connection(request, delegate, start_immediately)
    }
}

/// Outcome of a one-shot exchange: success needs data and no error.
fn completion_outcome(completion: &Completion) -> CallOutcome {
    match &completion.error {
        Some(error) => CallOutcome::from_error_kind(error.kind),
        None if completion.data.is_some() => CallOutcome::Success,
        None => CallOutcome::Failure(None),
    }
}

fn text_outcome<T>(completion: &Completion, text: &TransportResult<T>) -> CallOutcome {
    match text {
        Ok(_) => CallOutcome::Success,
        Err(error) if completion.error.is_some() => CallOutcome::from_error_kind(error.kind),
        Err(_) => match completion_outcome(completion) {
            CallOutcome::Success => CallOutcome::Failure(Some(TransportErrorKind::Decode)),
            other => other,
        },
    }
}

/// Owns the pending call of a one-shot exchange and guarantees it is terminated exactly
/// once, even when the transport drops the handler or unwinds.
struct CallGuard {
    call: Option<PendingCall>,
    recorder: TimingRecorder,
    sink: Arc<dyn MetricsSink>,
}

impl CallGuard {
    fn begin(recorder: TimingRecorder, sink: Arc<dyn MetricsSink>, request: &NetworkRequest) -> Self {
        Self {
            call: Some(recorder.begin(request)),
            recorder,
            sink,
        }
    }

    fn finish(self, completion: &Completion) {
        let outcome = completion_outcome(completion);
        self.finish_with(completion, outcome);
    }

    fn finish_with(mut self, completion: &Completion, outcome: CallOutcome) {
        if let Some(mut call) = self.call.take() {
            if let Some(response) = &completion.response {
                call.observe_response(response.status);
            }
            if let Some(data) = &completion.data {
                call.add_bytes(data.len() as u64);
            }
            self.emit(call, outcome);
        }
    }

    fn emit(&self, call: PendingCall, outcome: CallOutcome) {
        let record = self.recorder.end(call, outcome);
        submit(self.sink.as_ref(), record);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            let outcome = if thread::panicking() {
                CallOutcome::Failure(None)
            } else {
                CallOutcome::Cancelled
            };
            log::debug!("{} {} ended without completing", call.method(), call.url());
            self.emit(call, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sink::CollectingMetricsSink;
    use crate::net::{InlineContext, NetworkResponse, SerialQueue, TransportError};
    use crate::test_support::{ScriptedTransport, Script};
    use bytes::Bytes;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Mutex;
    use std::time::Duration;

    fn request(path: &str) -> NetworkRequest {
        NetworkRequest::get(&format!("https://api.example.com/{path}")).unwrap()
    }

    fn instrumented(script: Script) -> (InstrumentedTransport, Arc<CollectingMetricsSink>) {
        let sink = Arc::new(CollectingMetricsSink::new());
        let transport = InstrumentedTransport::new(Arc::new(ScriptedTransport::new(script)), sink.clone());
        (transport, sink)
    }

    #[test]
    fn synchronous_success_returns_identical_completion() {
        let script = Script::respond(200, vec![Bytes::from("hello "), Bytes::from("world")]);
        let expected = ScriptedTransport::new(script.clone()).send_synchronous_request(&request("greeting"));
        let (transport, sink) = instrumented(script);

        let completion = transport.timed_synchronous_request(&request("greeting"));

        assert_eq!(completion, expected);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success());
        assert_eq!(records[0].bytes_transferred(), Some(11));
        assert_eq!(records[0].status_code(), Some(200));
        assert_eq!(records[0].url(), "https://api.example.com/greeting");
    }

    #[test]
    fn synchronous_failure_returns_same_error_and_failure_record() {
        let error = TransportError::new(TransportErrorKind::Timeout, "upstream timed out");
        let (transport, sink) = instrumented(Script::fail(error.clone()));

        let completion = transport.timed_synchronous_request(&request("slow"));

        assert_eq!(completion.error, Some(error));
        assert!(completion.data.is_none());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success());
        assert_eq!(records[0].error_kind(), Some(TransportErrorKind::Timeout));
    }

    #[test]
    fn response_without_data_is_recorded_as_failure() {
        struct HeadOnly;
        impl HttpTransport for HeadOnly {
            fn send_synchronous_request(&self, request: &NetworkRequest) -> Completion {
                Completion {
                    response: Some(NetworkResponse::new(request.url.clone(), 204)),
                    ..Default::default()
                }
            }
            fn send_asynchronous_request(
                &self,
                _request: NetworkRequest,
                _context: Arc<dyn ExecutionContext>,
                _handler: CompletionHandler,
            ) {
            }
            fn open_connection(
                &self,
                request: NetworkRequest,
                delegate: Arc<dyn ConnectionDelegate>,
                start_immediately: bool,
            ) -> Arc<dyn Connection> {
                ScriptedTransport::new(Script::hang()).open_connection(request, delegate, start_immediately)
            }
        }

        let sink = Arc::new(CollectingMetricsSink::new());
        let transport = InstrumentedTransport::new(Arc::new(HeadOnly), sink.clone());
        let completion = transport.timed_synchronous_request(&request("empty"));

        assert_eq!(completion.response.as_ref().map(|r| r.status), Some(204));
        let records = sink.records();
        assert_eq!(records[0].outcome(), CallOutcome::Failure(None));
        assert_eq!(records[0].status_code(), Some(204));
    }

    #[test]
    fn asynchronous_handler_runs_once_after_emission_on_callers_queue() {
        let (transport, sink) = instrumented(Script::respond(200, vec![Bytes::from("abc")]));
        let queue = Arc::new(SerialQueue::new("caller-queue").unwrap());
        let queue_thread = queue.thread_id();
        let (tx, rx) = async_channel::unbounded();
        let observed_sink = sink.clone();

        transport.timed_asynchronous_request(
            request("async"),
            queue.clone(),
            Box::new(move |completion| {
                let records_seen = observed_sink.len();
                let _ = tx.send_blocking((completion, records_seen, thread::current().id()));
            }),
        );

        let (completion, records_seen, ran_on) = rx.recv_blocking().unwrap();
        assert_eq!(records_seen, 1);
        assert_eq!(ran_on, queue_thread);
        assert_eq!(completion.data, Some(Bytes::from("abc")));
        drop(queue);
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn asynchronous_cancellation_error_is_cancelled_outcome() {
        let error = TransportError::new(TransportErrorKind::Cancelled, "cancelled");
        let (transport, sink) = instrumented(Script::fail(error.clone()));
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();

        transport.timed_asynchronous_request(
            request("cancel"),
            Arc::new(InlineContext),
            Box::new(move |completion| {
                *slot.lock().unwrap() = completion.error;
            }),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock().unwrap(), Some(error));
        assert_eq!(sink.records()[0].outcome(), CallOutcome::Cancelled);
    }

    #[test]
    fn dropped_handler_still_emits_terminal_record() {
        struct Forgetful;
        impl HttpTransport for Forgetful {
            fn send_synchronous_request(&self, _request: &NetworkRequest) -> Completion {
                panic!("transport failure");
            }
            fn send_asynchronous_request(
                &self,
                _request: NetworkRequest,
                _context: Arc<dyn ExecutionContext>,
                handler: CompletionHandler,
            ) {
                drop(handler);
            }
            fn open_connection(
                &self,
                request: NetworkRequest,
                delegate: Arc<dyn ConnectionDelegate>,
                start_immediately: bool,
            ) -> Arc<dyn Connection> {
                ScriptedTransport::new(Script::hang()).open_connection(request, delegate, start_immediately)
            }
        }

        let sink = Arc::new(CollectingMetricsSink::new());
        let transport = InstrumentedTransport::new(Arc::new(Forgetful), sink.clone());

        transport.timed_asynchronous_request(
            request("lost"),
            Arc::new(InlineContext),
            Box::new(|_| panic!("handler must not run")),
        );
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            transport.timed_synchronous_request(&request("boom"))
        }));

        assert!(unwound.is_err());
        let outcomes: Vec<_> = sink.records().iter().map(|r| r.outcome()).collect();
        assert_eq!(outcomes, vec![CallOutcome::Cancelled, CallOutcome::Failure(None)]);
    }

    #[test]
    fn string_load_decodes_and_records_success() {
        let (transport, sink) = instrumented(Script::respond(200, vec![Bytes::from("caf\u{e9} ol\u{e9}")]));
        let url = Url::parse("https://api.example.com/notes.txt?token=secret").unwrap();

        let text = transport.timed_string_with_contents_of_url(&url, TextEncoding::Utf8).unwrap();
        let (detected, encoding) = transport.timed_string_with_contents_of_url_detecting(&url).unwrap();

        assert_eq!(text, "caf\u{e9} ol\u{e9}");
        assert_eq!(detected, text);
        assert_eq!(encoding, TextEncoding::Utf8);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.success()));
        assert_eq!(records[0].bytes_transferred(), Some(text.len() as u64));
        assert_eq!(records[0].url(), "https://api.example.com/notes.txt");
    }

    #[test]
    fn string_load_with_wrong_encoding_records_decode_failure() {
        let (transport, sink) = instrumented(Script::respond(200, vec![Bytes::from_static(b"\xff\xfe\xfd")]));
        let url = Url::parse("https://api.example.com/binary").unwrap();

        let err = transport
            .timed_string_with_contents_of_url(&url, TextEncoding::Ascii)
            .unwrap_err();

        assert_eq!(err.kind, TransportErrorKind::Decode);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome(), CallOutcome::Failure(Some(TransportErrorKind::Decode)));
        assert_eq!(records[0].status_code(), Some(200));
    }

    #[test]
    fn string_load_returns_transport_error_unchanged() {
        let error = TransportError::new(TransportErrorKind::Connect, "refused");
        let (transport, sink) = instrumented(Script::fail(error.clone()));
        let url = Url::parse("https://api.example.com/down").unwrap();

        let err = transport
            .timed_string_with_contents_of_url(&url, TextEncoding::Utf8)
            .unwrap_err();

        assert_eq!(err, error);
        assert_eq!(
            sink.records()[0].outcome(),
            CallOutcome::Failure(Some(TransportErrorKind::Connect))
        );
    }
}
