use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Response};
use tokio_util::sync::CancellationToken;

use crate::net::error::{invalid_request, map_reqwest_error, TransportError, TransportErrorKind};
use crate::net::{
    AuthenticationChallenge, ChallengeDisposition, Completion, CompletionHandler, Connection,
    ConnectionDelegate, Credential, ExecutionContext, HttpTransport, NetworkRequest,
    NetworkResponse, TransportResult,
};
use crate::platform::runtime;

const DEFAULT_MAX_REDIRECTS: usize = 10;
const MAX_CHALLENGE_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct NativeTransportOptions {
    pub connect_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub max_redirects: usize,
}

impl Default for NativeTransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            user_agent: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl NativeTransportOptions {
    fn client_builder(&self) -> ClientBuilder {
        let mut builder = Client::builder();
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder
    }
}

/// The un-instrumented transport: performs real HTTP exchanges with `reqwest` on the
/// SDK's background runtime.
///
/// * synchronous requests block the calling thread until the exchange completes;
/// * asynchronous handlers are dispatched onto the caller's [`ExecutionContext`];
/// * connection delegate events are delivered from the background runtime's worker
///   threads, in order, one at a time.
pub struct NativeTransport {
    client: Client,
    options: NativeTransportOptions,
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self {
            client: Client::new(),
            options: NativeTransportOptions::default(),
        }
    }
}

impl NativeTransport {
    pub fn new(options: NativeTransportOptions) -> TransportResult<Self> {
        let client = options
            .client_builder()
            .redirect(Policy::limited(options.max_redirects))
            .build()
            .map_err(|err| invalid_request(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, options })
    }
}

impl HttpTransport for NativeTransport {
    fn send_synchronous_request(&self, request: &NetworkRequest) -> Completion {
        runtime::block_on_background(load(self.client.clone(), request.clone()))
    }

    fn send_asynchronous_request(
        &self,
        request: NetworkRequest,
        context: Arc<dyn ExecutionContext>,
        handler: CompletionHandler,
    ) {
        let client = self.client.clone();
        runtime::spawn_detached(async move {
            let completion = load(client, request).await;
            context.execute(Box::new(move || handler(completion)));
        });
    }

    fn open_connection(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
        start_immediately: bool,
    ) -> Arc<dyn Connection> {
        let connection = Arc::new(NativeConnection {
            inner: Arc::new(ConnectionInner {
                request,
                delegate,
                options: self.options.clone(),
                gate: DeliveryGate::default(),
                token: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
        });
        if start_immediately {
            connection.start();
        }
        connection
    }
}

fn build_headers(request: &NetworkRequest) -> TransportResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in &request.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| invalid_request(format!("invalid header name `{key}`: {err}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| invalid_request(format!("invalid header value for `{key}`: {err}")))?;
        map.insert(name, header_value);
    }
    Ok(map)
}

async fn send(
    client: &Client,
    request: &NetworkRequest,
    credential: Option<&Credential>,
) -> TransportResult<Response> {
    let mut builder = client
        .request(request.method.into(), request.url.clone())
        .headers(build_headers(request)?);
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(credential) = credential {
        builder = builder.basic_auth(&credential.user, credential.password.as_ref());
    }
    builder.send().await.map_err(map_reqwest_error)
}

fn response_head(response: &Response) -> NetworkResponse {
    let mut head = NetworkResponse::new(response.url().clone(), response.status().as_u16());
    for (key, value) in response.headers().iter() {
        if let Ok(val) = value.to_str() {
            head.headers.insert(key.as_str().to_owned(), val.to_owned());
        }
    }
    head
}

async fn load(client: Client, request: NetworkRequest) -> Completion {
    let response = match send(&client, &request, None).await {
        Ok(response) => response,
        Err(err) => return Completion::failed(err),
    };
    let head = response_head(&response);
    match response.bytes().await {
        Ok(data) => Completion::loaded(head, data),
        Err(err) => Completion {
            response: Some(head),
            data: None,
            error: Some(map_reqwest_error(err)),
        },
    }
}

/// Serializes delegate deliveries against cancellation: once `close` returns, no delivery
/// is running on another thread and none will start.
#[derive(Default)]
struct DeliveryGate {
    closed: AtomicBool,
    delivering: Mutex<()>,
    delivery_thread: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    fn deliver<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _guard = self.delivering.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.set_delivery_thread(Some(thread::current().id()));
        let result = f();
        self.set_delivery_thread(None);
        Some(result)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let current = thread::current().id();
        let reentrant = *self
            .delivery_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(current);
        // Wait out a delivery in progress on another thread.
        if !reentrant {
            drop(self.delivering.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    fn set_delivery_thread(&self, id: Option<ThreadId>) {
        *self
            .delivery_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }
}

struct ConnectionInner {
    request: NetworkRequest,
    delegate: Arc<dyn ConnectionDelegate>,
    options: NativeTransportOptions,
    gate: DeliveryGate,
    token: CancellationToken,
}

impl ConnectionInner {
    fn fail(&self, error: TransportError) {
        self.gate.deliver(|| self.delegate.did_fail_with_error(&error));
        self.gate.close();
    }

    fn redirect_policy(self: &Arc<Self>) -> Policy {
        let inner = Arc::clone(self);
        Policy::custom(move |attempt| {
            if attempt.previous().len() > inner.options.max_redirects {
                return attempt.error("too many redirects");
            }
            let Some(from) = attempt.previous().last().cloned() else {
                return attempt.follow();
            };
            let redirect_response = NetworkResponse::new(from, attempt.status().as_u16());
            let mut proposed = inner.request.clone();
            proposed.url = attempt.url().clone();
            let decision = inner.gate.deliver(|| {
                inner
                    .delegate
                    .will_send_request(proposed, Some(&redirect_response))
            });
            match decision {
                Some(Some(next)) if next.url == *attempt.url() => attempt.follow(),
                Some(Some(next)) => {
                    log::debug!(
                        "delegate rewrote redirect to {}; stopping at {}",
                        next.url,
                        attempt.url()
                    );
                    attempt.stop()
                }
                _ => attempt.stop(),
            }
        })
    }

    async fn run(self: Arc<Self>) {
        let client = match self
            .options
            .client_builder()
            .redirect(self.redirect_policy())
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                self.fail(invalid_request(format!("failed to build HTTP client: {err}")));
                return;
            }
        };

        let mut credential: Option<Credential> = None;
        let mut challenges = 0u32;
        let response = loop {
            let response = match send(&client, &self.request, credential.as_ref()).await {
                Ok(response) => response,
                Err(err) => return self.fail(err),
            };
            let Some(challenge) = challenge_for(&response, challenges) else {
                break response;
            };
            let disposition = match self
                .gate
                .deliver(|| self.delegate.did_receive_challenge(&challenge))
            {
                Some(disposition) => disposition,
                None => return,
            };
            match disposition {
                ChallengeDisposition::UseCredential(next) if challenges < MAX_CHALLENGE_ATTEMPTS => {
                    challenges += 1;
                    credential = Some(next);
                }
                ChallengeDisposition::CancelChallenge => {
                    return self.fail(TransportError::new(
                        TransportErrorKind::Authentication,
                        "authentication challenge cancelled by delegate",
                    ));
                }
                _ => break response,
            }
        };

        let head = response_head(&response);
        if self
            .gate
            .deliver(|| self.delegate.did_receive_response(&head))
            .is_none()
        {
            return;
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(data) => {
                    if self
                        .gate
                        .deliver(|| self.delegate.did_receive_data(&data))
                        .is_none()
                    {
                        return;
                    }
                }
                Err(err) => return self.fail(map_reqwest_error(err)),
            }
        }

        self.gate.deliver(|| self.delegate.did_finish_loading());
        self.gate.close();
    }
}

fn challenge_for(response: &Response, previous_failure_count: u32) -> Option<AuthenticationChallenge> {
    if response.status() != reqwest::StatusCode::UNAUTHORIZED {
        return None;
    }
    let scheme = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)?
        .to_str()
        .ok()?
        .to_string();
    Some(AuthenticationChallenge {
        url: response.url().clone(),
        scheme,
        previous_failure_count,
    })
}

struct NativeConnection {
    inner: Arc<ConnectionInner>,
    started: AtomicBool,
}

impl Connection for NativeConnection {
    fn original_request(&self) -> &NetworkRequest {
        &self.inner.request
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) || self.inner.token.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        runtime::spawn_detached(async move {
            let token = inner.token.clone();
            tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("connection to {} cancelled", inner.request.url);
                }
                _ = Arc::clone(&inner).run() => {}
            }
        });
    }

    fn cancel(&self) {
        self.inner.token.cancel();
        self.inner.gate.close();
    }
}
