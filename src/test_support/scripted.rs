use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use url::Url;

use crate::net::{
    AuthenticationChallenge, ChallengeDisposition, Completion, CompletionHandler, Connection,
    ConnectionDelegate, ExecutionContext, HttpTransport, NetworkRequest, NetworkResponse,
    TransportError, TransportErrorKind,
};

const POLL: Duration = Duration::from_millis(5);

/// One scripted transport event.
#[derive(Clone, Debug)]
pub enum Step {
    Redirect(String),
    Challenge,
    Response(u16),
    Data(Bytes),
    Wait(Duration),
    Finish,
    Fail(TransportError),
}

/// A deterministic exchange played back by [`ScriptedTransport`].
#[derive(Clone, Debug)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn respond(status: u16, chunks: Vec<Bytes>) -> Self {
        let mut steps = vec![Step::Response(status)];
        steps.extend(chunks.into_iter().map(Step::Data));
        steps.push(Step::Finish);
        Self { steps }
    }

    pub fn fail(error: TransportError) -> Self {
        Self {
            steps: vec![Step::Fail(error)],
        }
    }

    /// Never completes on its own; only cancellation ends it.
    pub fn hang() -> Self {
        Self {
            steps: vec![Step::Wait(Duration::from_secs(3600)), Step::Finish],
        }
    }

    fn play_one_shot(&self, url: &Url) -> Completion {
        let mut response = None;
        let mut data = BytesMut::new();
        for step in &self.steps {
            match step {
                Step::Redirect(_) | Step::Challenge => {}
                Step::Response(status) => response = Some(NetworkResponse::new(url.clone(), *status)),
                Step::Data(chunk) => data.extend_from_slice(chunk),
                Step::Wait(duration) => thread::sleep(*duration),
                Step::Finish => {
                    return Completion {
                        response,
                        data: Some(data.freeze()),
                        error: None,
                    }
                }
                Step::Fail(error) => {
                    return Completion {
                        response,
                        data: None,
                        error: Some(error.clone()),
                    }
                }
            }
        }
        Completion::failed(TransportError::new(
            TransportErrorKind::Other,
            "script ended without a terminal step",
        ))
    }
}

/// Transport that replays a [`Script`] instead of touching the network. Asynchronous
/// handlers and delegate events are delivered from a dedicated thread per call.
pub struct ScriptedTransport {
    script: Script,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl HttpTransport for ScriptedTransport {
    fn send_synchronous_request(&self, request: &NetworkRequest) -> Completion {
        self.script.play_one_shot(&request.url)
    }

    fn send_asynchronous_request(
        &self,
        request: NetworkRequest,
        context: Arc<dyn ExecutionContext>,
        handler: CompletionHandler,
    ) {
        let script = self.script.clone();
        thread::spawn(move || {
            let completion = script.play_one_shot(&request.url);
            context.execute(Box::new(move || handler(completion)));
        });
    }

    fn open_connection(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
        start_immediately: bool,
    ) -> Arc<dyn Connection> {
        let connection = Arc::new(ScriptedConnection {
            request,
            delegate,
            script: self.script.clone(),
            started: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        if start_immediately {
            connection.start();
        }
        connection
    }
}

struct ScriptedConnection {
    request: NetworkRequest,
    delegate: Arc<dyn ConnectionDelegate>,
    script: Script,
    started: AtomicBool,
    cancelled: Arc<AtomicBool>,
}

impl Connection for ScriptedConnection {
    fn original_request(&self) -> &NetworkRequest {
        &self.request
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let request = self.request.clone();
        let delegate = Arc::clone(&self.delegate);
        let steps = self.script.steps.clone();
        let cancelled = Arc::clone(&self.cancelled);
        thread::spawn(move || play_connection(request, delegate, steps, cancelled));
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn play_connection(
    mut request: NetworkRequest,
    delegate: Arc<dyn ConnectionDelegate>,
    steps: Vec<Step>,
    cancelled: Arc<AtomicBool>,
) {
    let live = || !cancelled.load(Ordering::SeqCst);
    let mut challenges = 0;
    for step in steps {
        if !live() {
            return;
        }
        match step {
            Step::Redirect(target) => {
                let Ok(url) = Url::parse(&target) else {
                    continue;
                };
                let redirect = NetworkResponse::new(request.url.clone(), 302);
                let mut proposed = request.clone();
                proposed.url = url;
                match delegate.will_send_request(proposed, Some(&redirect)) {
                    Some(next) => request = next,
                    None => return,
                }
            }
            Step::Challenge => {
                let challenge = AuthenticationChallenge {
                    url: request.url.clone(),
                    scheme: "Basic realm=\"script\"".into(),
                    previous_failure_count: challenges,
                };
                challenges += 1;
                if delegate.did_receive_challenge(&challenge) == ChallengeDisposition::CancelChallenge {
                    delegate.did_fail_with_error(&TransportError::new(
                        TransportErrorKind::Authentication,
                        "challenge cancelled",
                    ));
                    return;
                }
            }
            Step::Response(status) => {
                delegate.did_receive_response(&NetworkResponse::new(request.url.clone(), status))
            }
            Step::Data(chunk) => delegate.did_receive_data(&chunk),
            Step::Wait(duration) => {
                let deadline = Instant::now() + duration;
                while Instant::now() < deadline {
                    if !live() {
                        return;
                    }
                    thread::sleep(POLL.min(deadline.saturating_duration_since(Instant::now())));
                }
            }
            Step::Finish => {
                delegate.did_finish_loading();
                return;
            }
            Step::Fail(error) => {
                delegate.did_fail_with_error(&error);
                return;
            }
        }
    }
}
