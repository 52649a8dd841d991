//! # HTTP Request
//!
//! Inbound request view handed to middleware and handlers.
//!
//! The body is collected once before dispatch; merged input (query string plus
//! JSON or urlencoded body) is parsed on first access and cached.

use crate::error::{Error, Result};
use crate::json::parse_json_bytes;
use crate::router::Method;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, COOKIE};
use hyper::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

/// HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    query_string: Option<String>,
    query_params: HashMap<String, String>,
    headers: HeaderMap,
    body: Option<Bytes>,
    remote_addr: Option<SocketAddr>,
    input: OnceLock<Map<String, Value>>,
}

impl Request {
    /// Create a request manually (for tests and in-process dispatch)
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };

        let mut headers = HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                headers.insert(n, v);
            }
        }

        Self {
            method,
            path,
            query_params: parse_query_string(query_string.as_deref()),
            query_string,
            headers,
            body,
            remote_addr: None,
            input: OnceLock::new(),
        }
    }

    /// Create from a hyper request, rejecting bodies over `max_body_size`
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` when the declared or actual body size
    /// exceeds the limit, and a 400 `Error::Http` for unsupported methods.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let method = Method::try_from(req.method())?;

        let uri = req.uri();
        let path = uri.path().to_string();
        let query_string = uri.query().map(String::from);

        let headers = req.headers().clone();
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(actual) = declared.filter(|len| *len > max_body_size) {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual,
            });
        }

        // Bodies without a Content-Length stop being read once past the limit
        let bytes = match Limited::new(req.into_body(), max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => return Err(body_read_error(err, max_body_size)),
        };

        Ok(Self {
            method,
            path,
            query_params: parse_query_string(query_string.as_deref()),
            query_string,
            headers,
            body: (!bytes.is_empty()).then_some(bytes),
            remote_addr: None,
            input: OnceLock::new(),
        })
    }

    /// Attach the peer address
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Raw header map
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Query parameters (last value wins for duplicate keys)
    #[must_use]
    pub const fn query_map(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Request body bytes
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Request body as UTF-8 text
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        self.body_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Deserialize the body as JSON
    ///
    /// # Errors
    ///
    /// Returns a 400 `Error::Http` if the body is missing or not valid JSON
    /// for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body_bytes()
            .ok_or_else(|| Error::bad_request("Request body is empty"))?;
        let mut bytes = body.to_vec();
        parse_json_bytes(&mut bytes)
    }

    /// Query string merged with the body
    ///
    /// JSON object bodies and urlencoded forms are merged for POST, PUT and
    /// PATCH; body keys override query keys.
    pub fn all(&self) -> &Map<String, Value> {
        self.input.get_or_init(|| self.collect_input())
    }

    fn collect_input(&self) -> Map<String, Value> {
        let mut input: Map<String, Value> = self
            .query_params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        if !matches!(self.method, Method::Post | Method::Put | Method::Patch) {
            return input;
        }

        let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or_default();
        if content_type.starts_with("application/json") {
            if let Ok(Value::Object(body)) = self.json::<Value>() {
                input.extend(body);
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let form = parse_query_string(self.body_str());
            input.extend(form.into_iter().map(|(k, v)| (k, Value::String(v))));
        }
        input
    }

    /// String input by key
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&str> {
        self.all().get(key).and_then(Value::as_str)
    }

    /// String input by key, or `default`
    #[must_use]
    pub fn input_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.input(key).unwrap_or(default)
    }

    /// Only the listed input keys
    #[must_use]
    pub fn only(&self, keys: &[&str]) -> Map<String, Value> {
        let all = self.all();
        keys.iter()
            .filter_map(|k| all.get(*k).map(|v| ((*k).to_string(), v.clone())))
            .collect()
    }

    /// Every input key except the listed ones
    #[must_use]
    pub fn except(&self, keys: &[&str]) -> Map<String, Value> {
        self.all()
            .iter()
            .filter(|(k, _)| !keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Cookie value by name
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| percent_decode(v, true))
    }

    /// Address of the directly connected peer, ignoring forwarding headers
    #[must_use]
    pub fn peer_ip(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.ip().to_string())
    }

    /// Client IP: `X-Forwarded-For`, then `X-Real-Ip`, then the peer address
    ///
    /// The forwarding headers are client-controlled unless a trusted proxy
    /// sets them; use [`Request::peer_ip`] for anything security-relevant.
    #[must_use]
    pub fn ip(&self) -> Option<String> {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next().map(str::trim) {
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }
        if let Some(real) = self.header("x-real-ip") {
            return Some(real.to_string());
        }
        self.peer_ip()
    }

    /// Whether the request was sent by `XMLHttpRequest`
    #[must_use]
    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with") == Some("XMLHttpRequest")
    }
}

fn body_read_error(err: Box<dyn std::error::Error + Send + Sync>, limit: usize) -> Error {
    if err.is::<LengthLimitError>() {
        return Error::PayloadTooLarge {
            limit,
            actual: limit.saturating_add(1),
        };
    }
    match err.downcast::<hyper::Error>() {
        Ok(hyper_err) => Error::Hyper(*hyper_err),
        Err(other) => Error::other(other),
    }
}

/// Parse a query string into a map
///
/// Handles URL decoding and duplicate keys (last value wins).
fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (percent_decode(key, true), percent_decode(value, true))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode `%XX` escapes, and `+` as space when `plus_as_space` is set
///
/// Malformed escapes are kept verbatim; invalid UTF-8 is replaced.
pub(crate) fn percent_decode(input: &str, plus_as_space: bool) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' if plus_as_space => out.push(b' '),
            b'%' => {
                let decoded = input
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Query-style escape: unreserved bytes pass through, space becomes `+`.
pub(crate) fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(b));
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
