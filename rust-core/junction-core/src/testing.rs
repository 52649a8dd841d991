//! # Test Client
//!
//! In-process requests against a [`Server`] for application tests. Requests
//! go through the dispatcher exactly as they would over the network, minus
//! the socket.
//!
//! ```ignore
//! let client = TestClient::from_router(router);
//! client
//!     .post("/posts")
//!     .with_json(&json!({"title": "Hello"}))
//!     .send()
//!     .assert_status(201)
//!     .assert_json_field("title", "Hello");
//! ```
//!
//! The assertion helpers panic on mismatch, like `assert_eq!`.

use crate::error::{Error, Result};
use crate::response::Response;
use crate::router::{Method, Router};
use crate::server::Server;
use hyper::body::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Sends in-process requests to a server
#[derive(Debug)]
pub struct TestClient {
    server: Server,
}

impl TestClient {
    /// Client over an existing server
    #[must_use]
    pub const fn new(server: Server) -> Self {
        Self { server }
    }

    /// Client over a router with default settings and no middleware
    #[must_use]
    pub fn from_router(router: Arc<Router>) -> Self {
        Self::new(Server::with_router(router))
    }

    /// The wrapped server
    #[must_use]
    pub const fn server(&self) -> &Server {
        &self.server
    }

    /// Start a request with any method
    #[must_use]
    pub fn request(&self, method: Method, path: &str) -> TestRequest<'_> {
        TestRequest {
            client: self,
            method,
            path: path.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Start a GET request
    #[must_use]
    pub fn get(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::Get, path)
    }

    /// Start a POST request
    #[must_use]
    pub fn post(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::Post, path)
    }

    /// Start a PUT request
    #[must_use]
    pub fn put(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::Put, path)
    }

    /// Start a PATCH request
    #[must_use]
    pub fn patch(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::Patch, path)
    }

    /// Start a DELETE request
    #[must_use]
    pub fn delete(&self, path: &str) -> TestRequest<'_> {
        self.request(Method::Delete, path)
    }
}

/// A request being built by [`TestClient`]
#[derive(Debug)]
pub struct TestRequest<'c> {
    client: &'c TestClient,
    method: Method,
    path: String,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
}

impl TestRequest<'_> {
    /// Add a header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    /// `Authorization: Bearer <token>`
    #[must_use]
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("authorization", &format!("Bearer {token}"))
    }

    /// Raw body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// JSON body with a matching `Content-Type`
    ///
    /// # Panics
    ///
    /// Panics if `data` cannot be serialized.
    #[must_use]
    pub fn with_json<T: Serialize + ?Sized>(self, data: &T) -> Self {
        let body = match serde_json::to_vec(data) {
            Ok(body) => body,
            Err(e) => panic!("with_json: body does not serialize: {e}"),
        };
        self.with_header("content-type", "application/json")
            .with_body(body)
    }

    /// Dispatch the request
    #[must_use]
    pub fn send(self) -> TestResponse {
        let response =
            self.client
                .server
                .test_request(self.method, &self.path, self.headers, self.body);
        TestResponse { response }
    }
}

/// Response returned by [`TestRequest::send`]
#[derive(Debug)]
pub struct TestResponse {
    response: Response,
}

impl TestResponse {
    /// Status code
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.response.status_code()
    }

    /// A response header
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.response.header_value(key)
    }

    /// Body as UTF-8 (lossy)
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.response.body()).into_owned()
    }

    /// Body parsed as JSON
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the body is not JSON.
    pub fn try_json(&self) -> Result<Value> {
        serde_json::from_slice(self.response.body()).map_err(Error::from)
    }

    /// Body parsed as JSON
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        match self.try_json() {
            Ok(value) => value,
            Err(e) => panic!("response body is not JSON ({e}): {}", self.text()),
        }
    }

    /// The underlying response
    #[must_use]
    pub const fn inner(&self) -> &Response {
        &self.response
    }

    /// # Panics
    ///
    /// Panics if the status differs.
    pub fn assert_status(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status(),
            expected,
            "unexpected status, body: {}",
            self.text()
        );
        self
    }

    /// # Panics
    ///
    /// Panics if the top-level JSON field `key` is missing or differs.
    pub fn assert_json_field(&self, key: &str, expected: impl Into<Value>) -> &Self {
        let json = self.json();
        let expected = expected.into();
        assert_eq!(
            json.get(key),
            Some(&expected),
            "JSON field '{key}' mismatch in {json}"
        );
        self
    }

    /// # Panics
    ///
    /// Panics if the body does not contain `needle`.
    pub fn assert_contains(&self, needle: &str) -> &Self {
        let text = self.text();
        assert!(
            text.contains(needle),
            "expected body to contain {needle:?}, got {text:?}"
        );
        self
    }

    /// # Panics
    ///
    /// Panics if the header is missing or differs.
    pub fn assert_header(&self, key: &str, expected: &str) -> &Self {
        assert_eq!(self.header(key), Some(expected), "header '{key}' mismatch");
        self
    }
}
