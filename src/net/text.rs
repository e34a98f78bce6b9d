use std::fmt::{Display, Formatter};

use bytes::Bytes;
use url::Url;

use crate::net::error::{TransportError, TransportErrorKind, TransportResult};
use crate::net::{Completion, HttpMethod, HttpTransport, NetworkRequest, NetworkResponse};

/// Character encodings understood when loading a URL's contents as text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Latin1 => "iso-8859-1",
            TextEncoding::Ascii => "us-ascii",
        }
    }

    /// Maps a `charset` label to an encoding. Labels are matched case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(TextEncoding::Utf8),
            "utf-16le" => Some(TextEncoding::Utf16Le),
            "utf-16be" | "utf-16" => Some(TextEncoding::Utf16Be),
            "iso-8859-1" | "latin1" | "latin-1" | "l1" => Some(TextEncoding::Latin1),
            "us-ascii" | "ascii" => Some(TextEncoding::Ascii),
            _ => None,
        }
    }

    /// Strictly decodes `data`; `None` when the bytes are not valid in this encoding.
    pub fn decode(&self, data: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(strip_bom(data, &[0xEF, 0xBB, 0xBF]))
                .ok()
                .map(str::to_owned),
            TextEncoding::Utf16Le => decode_utf16(strip_bom(data, &[0xFF, 0xFE]), u16::from_le_bytes),
            TextEncoding::Utf16Be => decode_utf16(strip_bom(data, &[0xFE, 0xFF]), u16::from_be_bytes),
            TextEncoding::Latin1 => Some(data.iter().map(|&byte| byte as char).collect()),
            TextEncoding::Ascii => data
                .is_ascii()
                .then(|| data.iter().map(|&byte| byte as char).collect()),
        }
    }
}

impl Display for TextEncoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn strip_bom<'a>(data: &'a [u8], bom: &[u8]) -> &'a [u8] {
    data.strip_prefix(bom).unwrap_or(data)
}

fn decode_utf16(data: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if data.len() % 2 != 0 {
        return None;
    }
    let units = data.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Encoding announced by a byte-order mark or the response's `Content-Type` charset.
fn announced_encoding(response: Option<&NetworkResponse>, data: &[u8]) -> Option<TextEncoding> {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some(TextEncoding::Utf8);
    }
    if data.starts_with(&[0xFF, 0xFE]) {
        return Some(TextEncoding::Utf16Le);
    }
    if data.starts_with(&[0xFE, 0xFF]) {
        return Some(TextEncoding::Utf16Be);
    }
    let content_type = response?.header("content-type")?;
    content_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, label)| TextEncoding::from_label(label))
}

fn decode_error(url: &Url, encoding: TextEncoding) -> TransportError {
    TransportError::new(
        TransportErrorKind::Decode,
        format!("contents of {url} are not valid {encoding}"),
    )
}

fn loaded_data(completion: &Completion) -> TransportResult<&Bytes> {
    if let Some(error) = &completion.error {
        return Err(error.clone());
    }
    completion.data.as_ref().ok_or_else(|| {
        TransportError::new(TransportErrorKind::Body, "response carried no body")
    })
}

/// Decodes a finished load with the caller's encoding.
pub(crate) fn text_from_completion(
    url: &Url,
    completion: &Completion,
    encoding: TextEncoding,
) -> TransportResult<String> {
    let data = loaded_data(completion)?;
    encoding
        .decode(data)
        .ok_or_else(|| decode_error(url, encoding))
}

/// Decodes a finished load, working out the encoding from a byte-order mark, the
/// `Content-Type` charset, or else UTF-8.
pub(crate) fn text_from_completion_detecting(
    url: &Url,
    completion: &Completion,
) -> TransportResult<(String, TextEncoding)> {
    let data = loaded_data(completion)?;
    let encoding = announced_encoding(completion.response.as_ref(), data).unwrap_or(TextEncoding::Utf8);
    encoding
        .decode(data)
        .map(|text| (text, encoding))
        .ok_or_else(|| decode_error(url, encoding))
}

pub(crate) fn text_request(url: &Url) -> NetworkRequest {
    NetworkRequest::new(HttpMethod::Get, url.clone())
}

/// Reads the contents of `url` through `transport` and decodes them with `encoding`.
pub fn string_with_contents_of_url(
    transport: &dyn HttpTransport,
    url: &Url,
    encoding: TextEncoding,
) -> TransportResult<String> {
    let completion = transport.send_synchronous_request(&text_request(url));
    text_from_completion(url, &completion, encoding)
}

/// Like [`string_with_contents_of_url`] but also returns the encoding that was used.
pub fn string_with_contents_of_url_detecting(
    transport: &dyn HttpTransport,
    url: &Url,
) -> TransportResult<(String, TextEncoding)> {
    let completion = transport.send_synchronous_request(&text_request(url));
    text_from_completion_detecting(url, &completion)
}
