//! # Junction Core
//!
//! Routing and middleware-dispatch core of the Junction web framework.
//!
//! ## Architecture
//!
//! Routes are registered and compiled once at startup, then resolved per
//! request. Each request runs through a synchronous chain of middleware
//! around its handler on a blocking worker, while Tokio and Hyper own the
//! sockets.
//!
//! ## Modules
//!
//! - `router` - Route table with static index and ordered dynamic lists
//! - `route` - Route patterns, matching and metadata
//! - `group` - Route groups and REST resources
//! - `dispatcher` - Per-request route resolution and middleware chain
//! - `middleware` - Middleware trait and built-in middleware
//! - `auth` - JWT bearer authentication middleware
//! - `context` - Per-request context passed to middleware and handlers
//! - `request` / `response` - HTTP request and response wrappers
//! - `server` - HTTP server built on Hyper
//! - `state` - Shared and per-request state
//! - `json` - JSON parsing with simd-json
//! - `config` - Environment-driven configuration
//! - `logging` - Tracing subscriber setup
//! - `testing` - In-process test client
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod group;
pub mod json;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod state;
pub mod testing;

pub use auth::{issue_token, AuthMiddleware, SilentAuthMiddleware, AUTH_USER_KEY};
pub use config::{load_env_file, load_env_file_override, AppConfig, CorsConfig};
pub use context::HttpContext;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use group::{ResourceController, RouteGroup};
pub use logging::{init_tracing, LogFormat};
pub use middleware::{
    from_fn, CorsMiddleware, LoggerMiddleware, Middleware, MiddlewareChain, Next,
    RateLimitMiddleware, RecoveryMiddleware, RequestIdMiddleware, SecureHeadersMiddleware,
};
pub use request::Request;
pub use response::{CookieOptions, Response};
pub use route::{Handler, Route};
pub use router::{Method, RouteMatch, RouteRef, Router};
pub use server::{Server, ServerConfig};
pub use state::{AppState, Values};
pub use testing::{TestClient, TestResponse};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.1");
    }
}
