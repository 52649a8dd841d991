//! # Middleware System
//!
//! Continuation-passing middleware around a route handler.
//!
//! A middleware receives the context and the rest of the chain as `next`.
//! Calling `next(ctx)` runs the remaining middleware and the handler; not
//! calling it short-circuits, in which case the middleware writes the
//! response itself. `next` is `FnOnce`, so it cannot run twice.

use crate::config::CorsConfig;
use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::route::Handler;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info};

/// The remainder of the chain
pub type Next<'a> = Box<dyn FnOnce(&mut HttpContext) -> Result<()> + 'a>;

/// Middleware trait for request/response interception
pub trait Middleware: Send + Sync {
    /// Run this middleware; call `next(ctx)` to continue the chain
    ///
    /// # Errors
    ///
    /// Returns the failure of this middleware or of the rest of the chain.
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()>;

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Middleware built from a closure, see [`from_fn`]
pub struct FnMiddleware<F> {
    f: F,
}

/// Adapt a closure into a [`Middleware`]
///
/// ```ignore
/// let timing = from_fn(|ctx, next| {
///     ctx.response.header("x-powered-by", "junction");
///     next(ctx)
/// });
/// ```
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&mut HttpContext, Next<'_>) -> Result<()> + Send + Sync,
{
    FnMiddleware { f }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut HttpContext, Next<'_>) -> Result<()> + Send + Sync,
{
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        (self.f)(ctx, next)
    }

    fn name(&self) -> &'static str {
        "FnMiddleware"
    }
}

/// Ordered middleware for one request
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a shared middleware
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Append a middleware by value
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Names in execution order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|mw| mw.name()).collect()
    }

    /// Run the chain around `handler`
    ///
    /// Continuations are built from the last middleware to the first, so the
    /// first middleware runs first and the handler runs innermost.
    ///
    /// # Errors
    ///
    /// Returns the first failure propagated out of the chain.
    pub fn run(&self, ctx: &mut HttpContext, handler: &Handler) -> Result<()> {
        let mut next: Next<'_> = Box::new(move |ctx: &mut HttpContext| handler(ctx));
        for middleware in self.middlewares.iter().rev() {
            let inner = next;
            next = Box::new(move |ctx: &mut HttpContext| middleware.handle(ctx, inner));
        }
        next(ctx)
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Logs method, path, status and duration after the rest of the chain
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerMiddleware;

impl LoggerMiddleware {
    /// Create a new logger middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        let start = Instant::now();
        let result = next(ctx);
        let status = logged_status(ctx, &result);
        let request_id = ctx.request.header("x-request-id").unwrap_or("-");
        info!(
            method = %ctx.request.method,
            path = %ctx.request.path,
            status,
            duration_us = %start.elapsed().as_micros(),
            request_id = %request_id,
            "Request handled"
        );
        result
    }

    fn name(&self) -> &'static str {
        "LoggerMiddleware"
    }
}

/// Status the client will see: a failure on an open response is reported
/// by the dispatcher with the error's own status
fn logged_status(ctx: &HttpContext, result: &Result<()>) -> u16 {
    match result {
        Err(err) if !ctx.response.is_committed() => err.status().as_u16(),
        _ => ctx.response.status_code(),
    }
}

/// CORS headers and preflight handling
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    /// Create a CORS middleware from configuration
    #[must_use]
    pub const fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Configured settings
    #[must_use]
    pub const fn config(&self) -> &CorsConfig {
        &self.config
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        let origin = ctx.request.header("origin").unwrap_or_default().to_string();

        if let Some(allow_origin) = self.config.allow_origin_for(&origin) {
            let methods = self.config.allowed_methods.join(", ");
            let headers = self.config.allowed_headers.join(", ");
            let max_age = self.config.max_age.to_string();
            let response = &mut ctx.response;
            response
                .header("Access-Control-Allow-Origin", allow_origin)
                .header("Access-Control-Allow-Methods", &methods)
                .header("Access-Control-Allow-Headers", &headers)
                .header("Access-Control-Max-Age", &max_age);
            if self.config.allow_credentials {
                response.header("Access-Control-Allow-Credentials", "true");
            }
        }

        if ctx.request.method == crate::router::Method::Options {
            return ctx.response.no_content();
        }
        next(ctx)
    }

    fn name(&self) -> &'static str {
        "CorsMiddleware"
    }
}

/// Sets a fixed set of security headers before the handler runs
#[derive(Debug, Default, Clone, Copy)]
pub struct SecureHeadersMiddleware;

impl SecureHeadersMiddleware {
    const HEADERS: [(&'static str, &'static str); 6] = [
        ("X-Content-Type-Options", "nosniff"),
        ("X-Frame-Options", "DENY"),
        ("X-XSS-Protection", "1; mode=block"),
        ("Referrer-Policy", "strict-origin-when-cross-origin"),
        ("X-Download-Options", "noopen"),
        ("X-Permitted-Cross-Domain-Policies", "none"),
    ];

    /// Create a new secure headers middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for SecureHeadersMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        for (key, value) in Self::HEADERS {
            ctx.response.header(key, value);
        }
        next(ctx)
    }

    fn name(&self) -> &'static str {
        "SecureHeadersMiddleware"
    }
}

/// Converts a panic in the rest of the chain into `Error::Panic`
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryMiddleware;

impl RecoveryMiddleware {
    /// Create a new recovery middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for RecoveryMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        match catch_unwind(AssertUnwindSafe(|| next(ctx))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    method = %ctx.request.method,
                    path = %ctx.request.path,
                    panic = %message,
                    "Handler panicked"
                );
                Err(Error::Panic(message))
            }
        }
    }

    fn name(&self) -> &'static str {
        "RecoveryMiddleware"
    }
}

/// Ensures every request carries an `x-request-id` and echoes it back
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

impl RequestIdMiddleware {
    /// Create a new request id middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for RequestIdMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        let request_id = match ctx.request.header("x-request-id") {
            Some(id) => id.to_string(),
            None => {
                let id = generate_request_id();
                ctx.request.set_header("x-request-id", &id);
                id
            }
        };
        ctx.response.header("x-request-id", &request_id);
        next(ctx)
    }

    fn name(&self) -> &'static str {
        "RequestIdMiddleware"
    }
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}

/// Token bucket rate limiting keyed by client IP
///
/// Buckets are keyed on the peer address. Forwarding headers are only
/// honoured after [`RateLimitMiddleware::trust_forwarded_headers`], for
/// deployments behind a proxy that overwrites them.
pub struct RateLimitMiddleware {
    /// Maximum burst capacity
    capacity: u64,
    /// Tokens refilled per second
    refill_per_sec: u64,
    /// Key on `X-Forwarded-For` / `X-Real-Ip` instead of the peer
    trust_forwarded: bool,
    /// Bucket count that triggers eviction
    max_keys: usize,
    /// Per-key buckets
    state: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl RateLimitMiddleware {
    /// Default bucket count before idle buckets are evicted
    pub const DEFAULT_MAX_KEYS: usize = 10_000;

    /// Create a new rate limiter
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            trust_forwarded: false,
            max_keys: Self::DEFAULT_MAX_KEYS,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Key buckets on forwarding headers set by a trusted proxy
    #[must_use]
    pub const fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    /// Cap on tracked clients
    #[must_use]
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Number of tracked buckets
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn key(&self, ctx: &HttpContext) -> String {
        let ip = if self.trust_forwarded {
            ctx.request.ip()
        } else {
            ctx.request.peer_ip()
        };
        ip.unwrap_or_else(|| "unknown".to_string())
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn refilled(&self, bucket: &Bucket, now: Instant) -> u64 {
        let elapsed = now.duration_since(bucket.last_refill);
        (elapsed.as_secs_f64() * self.refill_per_sec as f64) as u64
    }

    fn evict(&self, map: &mut HashMap<String, Bucket>, now: Instant) {
        // A bucket that has refilled to capacity is indistinguishable from a new one
        map.retain(|_, bucket| bucket.tokens.saturating_add(self.refilled(bucket, now)) < self.capacity);
        while map.len() >= self.max_keys {
            let oldest = map
                .iter()
                .min_by_key(|(_, bucket)| bucket.last_refill)
                .map(|(key, _)| key.clone());
            let Some(key) = oldest else { break };
            map.remove(&key);
        }
    }

    fn allow(&self, key: &str) -> bool {
        let mut map = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if !map.contains_key(key) && map.len() >= self.max_keys {
            self.evict(&mut map, now);
        }
        let bucket = map.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let refill = self.refilled(bucket, now);
        if refill > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.capacity);
            bucket.last_refill = now;
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        let key = self.key(ctx);
        if self.allow(&key) {
            next(ctx)
        } else {
            ctx.response.header("Retry-After", "1");
            ctx.response.abort(429, "Rate limit exceeded")
        }
    }

    fn name(&self) -> &'static str {
        "RateLimitMiddleware"
    }
}
