//! # HTTP Response
//!
//! Outbound response buffer with a one-way `Open -> Committed` transition.
//!
//! Every body-producing write (`json`, `send`, `redirect`, `no_content`, ...)
//! commits the response. Once committed, further writes and header changes
//! are ignored and logged, so the first write is what the client receives.

use crate::error::Result;
use crate::json::to_json_bytes;
use crate::request::percent_encode;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::warn;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Structured body used for not-found, abort and failure responses
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    /// Short label, the canonical reason phrase
    pub error: &'a str,
    /// Human-readable detail
    pub message: &'a str,
    /// Numeric HTTP status
    pub status: u16,
}

/// Options for [`Response::cookie`]
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    /// `Max-Age` in seconds; zero leaves it unset
    pub max_age: i64,
    /// Cookie path, `/` when empty
    pub path: Option<String>,
    /// Cookie domain
    pub domain: Option<String>,
    /// `Secure` attribute
    pub secure: bool,
    /// `HttpOnly` attribute
    pub http_only: bool,
    /// `SameSite` value (`Lax`, `Strict`, `None`)
    pub same_site: Option<String>,
}

/// HTTP response under construction
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    committed: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            committed: false,
        }
    }
}

impl Response {
    /// Create an open response with status 200
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status used by the next write
    ///
    /// Unknown codes fall back to 500.
    pub fn status(&mut self, code: u16) -> &mut Self {
        if self.reject_after_commit("status") {
            return self;
        }
        self.status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    /// Set or replace a header
    pub fn header(&mut self, key: &str, value: &str) -> &mut Self {
        if self.reject_after_commit("header") {
            return self;
        }
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = %key, "Ignoring invalid response header"),
        }
        self
    }

    /// Serialize `data` as the JSON body and commit
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails; the response stays open.
    pub fn json<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<()> {
        if self.reject_after_commit("json") {
            return Ok(());
        }
        let body = to_json_bytes(data)?;
        self.commit_body(Some(JSON_CONTENT_TYPE), Bytes::from(body));
        Ok(())
    }

    /// Send a plain-text body and commit
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for handler ergonomics.
    pub fn send(&mut self, text: impl Into<String>) -> Result<()> {
        if !self.reject_after_commit("send") {
            self.commit_body(Some(TEXT_CONTENT_TYPE), Bytes::from(text.into()));
        }
        Ok(())
    }

    /// Send raw bytes and commit, leaving `Content-Type` as set by the caller
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for handler ergonomics.
    pub fn send_bytes(&mut self, data: impl Into<Bytes>) -> Result<()> {
        if !self.reject_after_commit("send_bytes") {
            self.commit_body(None, data.into());
        }
        Ok(())
    }

    /// 201 Created with a JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    pub fn created<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<()> {
        if self.reject_after_commit("created") {
            return Ok(());
        }
        self.status = StatusCode::CREATED;
        self.json(data)
    }

    /// 302 redirect to `url`
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for handler ergonomics.
    pub fn redirect(&mut self, url: &str) -> Result<()> {
        self.redirect_status(url, StatusCode::FOUND.as_u16())
    }

    /// Redirect with an explicit status
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for handler ergonomics.
    pub fn redirect_status(&mut self, url: &str, code: u16) -> Result<()> {
        if self.reject_after_commit("redirect") {
            return Ok(());
        }
        match HeaderValue::from_str(url) {
            Ok(location) => {
                self.headers.insert(LOCATION, location);
            }
            Err(_) => warn!(url = %url, "Redirect target is not a valid header value"),
        }
        self.status = StatusCode::from_u16(code).unwrap_or(StatusCode::FOUND);
        self.commit_body(None, Bytes::new());
        Ok(())
    }

    /// 204 No Content
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for handler ergonomics.
    pub fn no_content(&mut self) -> Result<()> {
        if !self.reject_after_commit("no_content") {
            self.status = StatusCode::NO_CONTENT;
            self.commit_body(None, Bytes::new());
        }
        Ok(())
    }

    /// Write the structured error body with `code` and commit
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the body cannot be serialized.
    pub fn abort(&mut self, code: u16, message: &str) -> Result<()> {
        if self.reject_after_commit("abort") {
            return Ok(());
        }
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.status = status;
        self.json(&ErrorBody {
            error: status.canonical_reason().unwrap_or("Error"),
            message,
            status: status.as_u16(),
        })
    }

    /// Append a `Set-Cookie` header; the value is query-escaped
    pub fn cookie(&mut self, name: &str, value: &str, options: &CookieOptions) -> &mut Self {
        let path = options.path.as_deref().filter(|p| !p.is_empty()).unwrap_or("/");
        let mut cookie = format!("{name}={}; Path={path}", percent_encode(value));
        if let Some(domain) = &options.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if options.max_age > 0 {
            cookie.push_str(&format!("; Max-Age={}", options.max_age));
        } else if options.max_age < 0 {
            cookie.push_str("; Max-Age=0");
        }
        if options.http_only {
            cookie.push_str("; HttpOnly");
        }
        if options.secure {
            cookie.push_str("; Secure");
        }
        if let Some(same_site) = &options.same_site {
            cookie.push_str(&format!("; SameSite={same_site}"));
        }
        self.append_cookie(&cookie)
    }

    /// Expire a cookie on the client
    pub fn clear_cookie(&mut self, name: &str) -> &mut Self {
        self.append_cookie(&format!("{name}=; Path=/; Max-Age=0"))
    }

    fn append_cookie(&mut self, cookie: &str) -> &mut Self {
        if self.reject_after_commit("cookie") {
            return self;
        }
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                self.headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!("Ignoring cookie with invalid characters"),
        }
        self
    }

    /// Whether a status line and body have been written
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Current status code
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Body written so far (empty while open)
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Read back a response header
    #[must_use]
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// All response headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Write the structured error body for `status`
    ///
    /// Callers check [`Response::is_committed`] first.
    pub(crate) fn write_error(&mut self, status: StatusCode, message: &str) {
        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("Error"),
            message,
            status: status.as_u16(),
        };
        // ErrorBody only holds strings and an integer
        let bytes = to_json_bytes(&body).unwrap_or_default();
        self.status = status;
        self.commit_body(Some(JSON_CONTENT_TYPE), Bytes::from(bytes));
    }

    /// Convert to a hyper response
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn commit_body(&mut self, content_type: Option<&'static str>, body: Bytes) {
        if let Some(content_type) = content_type {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        self.body = body;
        self.committed = true;
    }

    fn reject_after_commit(&self, operation: &str) -> bool {
        if self.committed {
            warn!(
                operation = %operation,
                status = self.status.as_u16(),
                "Response already committed, ignoring write"
            );
        }
        self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_response_is_open() {
        let res = Response::new();
        assert!(!res.is_committed());
        assert_eq!(res.status_code(), 200);
        assert!(res.body().is_empty());
    }

    #[test]
    fn test_json_commits() {
        let mut res = Response::new();
        res.status(202).json(&serde_json::json!({"ok": true})).unwrap();

        assert!(res.is_committed());
        assert_eq!(res.status_code(), 202);
        assert_eq!(res.body().as_ref(), br#"{"ok":true}"#);
        assert_eq!(res.header_value("content-type"), Some(JSON_CONTENT_TYPE));
    }

    #[test]
    fn test_second_write_is_ignored() {
        let mut res = Response::new();
        res.created(&serde_json::json!({"id": 1})).unwrap();
        res.status(500).send("oops").unwrap();
        res.header("x-late", "1");

        assert_eq!(res.status_code(), 201);
        assert_eq!(res.body().as_ref(), br#"{"id":1}"#);
        assert_eq!(res.header_value("x-late"), None);
    }

    #[test]
    fn test_send_text() {
        let mut res = Response::new();
        res.send("hello").unwrap();
        assert_eq!(res.body().as_ref(), b"hello");
        assert_eq!(res.header_value("content-type"), Some(TEXT_CONTENT_TYPE));
    }

    #[test]
    fn test_redirect() {
        let mut res = Response::new();
        res.redirect("/login").unwrap();
        assert_eq!(res.status_code(), 302);
        assert_eq!(res.header_value("location"), Some("/login"));
        assert!(res.is_committed());

        let mut res = Response::new();
        res.redirect_status("/moved", 301).unwrap();
        assert_eq!(res.status_code(), 301);
    }

    #[test]
    fn test_no_content() {
        let mut res = Response::new();
        res.no_content().unwrap();
        assert_eq!(res.status_code(), 204);
        assert!(res.body().is_empty());
        assert!(res.is_committed());
    }

    #[test]
    fn test_abort_body() {
        let mut res = Response::new();
        res.abort(403, "nope").unwrap();
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "Forbidden");
        assert_eq!(body["message"], "nope");
        assert_eq!(body["status"], 403);
    }

    #[test]
    fn test_cookies_append() {
        let mut res = Response::new();
        let options = CookieOptions {
            max_age: 3600,
            http_only: true,
            ..CookieOptions::default()
        };
        res.cookie("session", "a b", &options).clear_cookie("old");

        let cookies: Vec<_> = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            cookies,
            vec![
                "session=a+b; Path=/; Max-Age=3600; HttpOnly".to_string(),
                "old=; Path=/; Max-Age=0".to_string(),
            ]
        );
    }

    #[test]
    fn test_into_hyper() {
        let mut res = Response::new();
        res.header("x-custom", "yes");
        res.status(418).send("teapot").unwrap();

        let hyper_res = res.into_hyper();
        assert_eq!(hyper_res.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(hyper_res.headers()["x-custom"], "yes");
    }
}
