use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use url::Url;

use crate::net::error::{invalid_request, TransportError, TransportResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// A request handed to a transport. Cheap to clone: the body is reference counted.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    /// Upper bound for the whole exchange, enforced by the transport.
    pub timeout: Option<Duration>,
}

impl NetworkRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            url,
            method,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: &str) -> TransportResult<Self> {
        Ok(Self::new(HttpMethod::Get, parse_url(url)?))
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> TransportResult<Self> {
        Ok(Self::new(HttpMethod::Post, parse_url(url)?).with_body(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn parse_url(raw: &str) -> TransportResult<Url> {
    Url::parse(raw).map_err(|err| invalid_request(format!("invalid URL `{raw}`: {err}")))
}

/// Status line and headers of a response, without the body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkResponse {
    pub url: Url,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
}

impl NetworkResponse {
    pub fn new(url: Url, status: u16) -> Self {
        Self {
            url,
            status,
            headers: BTreeMap::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn expected_content_length(&self) -> Option<u64> {
        self.header("content-length")?.parse().ok()
    }
}

/// Result triple of a one-shot exchange: response, data and error, each possibly absent.
///
/// A transport reports HTTP error statuses as a response with data, not as an error;
/// `error` is reserved for exchanges that did not complete.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub response: Option<NetworkResponse>,
    pub data: Option<Bytes>,
    pub error: Option<TransportError>,
}

impl Completion {
    pub fn loaded(response: NetworkResponse, data: Bytes) -> Self {
        Self {
            response: Some(response),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: TransportError) -> Self {
        Self {
            response: None,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.data.is_some()
    }

    pub fn into_result(self) -> TransportResult<(NetworkResponse, Bytes)> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match (self.response, self.data) {
            (Some(response), Some(data)) => Ok((response, data)),
            (Some(response), None) => Ok((response, Bytes::new())),
            (None, _) => Err(TransportError::new(
                crate::net::TransportErrorKind::Other,
                "exchange completed without a response",
            )),
        }
    }
}

/// Credentials supplied in answer to an authentication challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationChallenge {
    pub url: Url,
    /// Raw `WWW-Authenticate` header value.
    pub scheme: String,
    pub previous_failure_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChallengeDisposition {
    UseCredential(Credential),
    #[default]
    PerformDefaultHandling,
    CancelChallenge,
}
