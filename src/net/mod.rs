//! Networking primitives: the request/response model, the transport contracts that
//! application code calls through, and the reqwest-backed default transport.
//!
//! Three calling styles are supported, mirroring the classic URL-loading API surface:
//!
//! * synchronous: [`HttpTransport::send_synchronous_request`] blocks and returns a
//!   [`Completion`];
//! * asynchronous: [`HttpTransport::send_asynchronous_request`] returns immediately and
//!   later runs a handler on a caller-chosen [`ExecutionContext`];
//! * delegate-driven: [`HttpTransport::open_connection`] returns a [`Connection`] handle
//!   and reports progress to a [`ConnectionDelegate`].
mod context;
mod error;
mod native;
mod request;
mod text;

use std::sync::Arc;

use bytes::Bytes;

#[doc(inline)]
pub use context::{ExecutionContext, InlineContext, Job, RuntimeContext, SerialQueue};

#[doc(inline)]
pub use error::{
    cancelled, invalid_request, TransportError, TransportErrorKind, TransportResult,
};

#[doc(inline)]
pub use native::{NativeTransport, NativeTransportOptions};

#[doc(inline)]
pub use request::{
    AuthenticationChallenge, ChallengeDisposition, Completion, Credential, HttpMethod,
    NetworkRequest, NetworkResponse,
};

#[doc(inline)]
pub use text::{string_with_contents_of_url, string_with_contents_of_url_detecting, TextEncoding};

pub(crate) use text::{text_from_completion, text_from_completion_detecting, text_request};

/// Handler invoked once with the outcome of an asynchronous request.
pub type CompletionHandler = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Callback surface of a delegate-driven connection.
///
/// Every method has a default so delegates implement only what they care about. For a
/// given connection, events arrive in order: optional redirects and challenges, one
/// response, zero or more data chunks, then exactly one of `did_finish_loading` or
/// `did_fail_with_error`. A cancelled connection receives no further events.
pub trait ConnectionDelegate: Send + Sync {
    /// Called before following a redirect. Returning `None` stops the redirect chain and
    /// delivers the redirect response itself.
    fn will_send_request(
        &self,
        request: NetworkRequest,
        redirect_response: Option<&NetworkResponse>,
    ) -> Option<NetworkRequest> {
        let _ = redirect_response;
        Some(request)
    }

    fn did_receive_challenge(&self, challenge: &AuthenticationChallenge) -> ChallengeDisposition {
        let _ = challenge;
        ChallengeDisposition::PerformDefaultHandling
    }

    fn did_receive_response(&self, response: &NetworkResponse) {
        let _ = response;
    }

    fn did_receive_data(&self, data: &Bytes) {
        let _ = data;
    }

    fn did_finish_loading(&self) {}

    fn did_fail_with_error(&self, error: &TransportError) {
        let _ = error;
    }
}

/// Handle to an in-flight delegate-driven exchange.
pub trait Connection: Send + Sync {
    fn original_request(&self) -> &NetworkRequest;

    /// Starts loading. Calling `start` on a started connection has no effect.
    fn start(&self);

    /// Cancels loading. The delegate receives no further events once this returns.
    fn cancel(&self);
}

/// The networking entry points. Implemented by the native transport and by any decorator
/// registered in front of it.
pub trait HttpTransport: Send + Sync {
    fn send_synchronous_request(&self, request: &NetworkRequest) -> Completion;

    fn send_asynchronous_request(
        &self,
        request: NetworkRequest,
        context: Arc<dyn ExecutionContext>,
        handler: CompletionHandler,
    );

    fn open_connection(
        &self,
        request: NetworkRequest,
        delegate: Arc<dyn ConnectionDelegate>,
        start_immediately: bool,
    ) -> Arc<dyn Connection>;
}
