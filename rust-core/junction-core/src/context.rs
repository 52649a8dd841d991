//! # Request Context
//!
//! The single value threaded through middleware and the handler.

use crate::auth::AUTH_USER_KEY;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::state::{AppState, Values};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Per-request context: inbound request, outbound response, route params,
/// request-scoped values and a handle to shared state.
#[derive(Debug)]
pub struct HttpContext {
    /// Inbound request
    pub request: Request,
    /// Outbound response
    pub response: Response,
    /// Values set by middleware for later middleware and the handler
    pub values: Values,
    params: HashMap<String, String>,
    state: AppState,
    route_name: Option<String>,
}

impl HttpContext {
    /// Fresh context with an open response
    #[must_use]
    pub fn new(request: Request, state: AppState) -> Self {
        Self {
            request,
            response: Response::new(),
            values: Values::new(),
            params: HashMap::new(),
            state,
            route_name: None,
        }
    }

    /// A bound route parameter
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// A bound route parameter parsed as `T`
    ///
    /// # Errors
    ///
    /// Returns a 400 `Error::Http` if the parameter is missing or does not
    /// parse.
    pub fn param_as<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self
            .param(key)
            .ok_or_else(|| Error::bad_request(format!("Missing route parameter '{key}'")))?;
        raw.parse()
            .map_err(|_| Error::bad_request(format!("Invalid value for route parameter '{key}'")))
    }

    /// All bound route parameters
    #[must_use]
    pub const fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Replace the bound route parameters
    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Name of the matched route, if it has one
    #[must_use]
    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    pub(crate) fn set_route_name(&mut self, name: Option<String>) {
        self.route_name = name;
    }

    /// Claims attached by the auth middleware
    #[must_use]
    pub fn auth_user(&self) -> Option<&Value> {
        self.values.get::<Value>(AUTH_USER_KEY)
    }

    /// Shared application state
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Consume the context, keeping the response
    #[must_use]
    pub fn into_response(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Method;

    fn context() -> HttpContext {
        let request = Request::new(Method::Get, "/users/42", HashMap::new(), None);
        HttpContext::new(request, AppState::new())
    }

    #[test]
    fn test_params() {
        let mut ctx = context();
        assert_eq!(ctx.param("id"), None);

        ctx.set_params(HashMap::from([("id".to_string(), "42".to_string())]));
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param_as::<u32>("id").unwrap(), 42);
        assert_eq!(ctx.params().len(), 1);
    }

    #[test]
    fn test_param_as_rejects_bad_values() {
        let mut ctx = context();
        ctx.set_params(HashMap::from([("id".to_string(), "abc".to_string())]));

        let err = ctx.param_as::<u32>("id").unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
        assert!(ctx.param_as::<u32>("missing").is_err());
    }

    #[test]
    fn test_auth_user_from_values() {
        let mut ctx = context();
        assert!(ctx.auth_user().is_none());

        ctx.values
            .insert(AUTH_USER_KEY, serde_json::json!({"sub": "user-1"}));
        assert_eq!(ctx.auth_user().unwrap()["sub"], "user-1");
    }

    #[test]
    fn test_shared_state_handle() {
        let state = AppState::new();
        state.set("greeting", "hi".to_string());
        let request = Request::new(Method::Get, "/", HashMap::new(), None);
        let ctx = HttpContext::new(request, state);

        assert_eq!(ctx.state().get::<String>("greeting").as_deref(), Some("hi"));
    }
}
