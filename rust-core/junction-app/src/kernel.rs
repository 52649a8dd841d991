//! Global and named middleware.

use junction_core::{
    from_fn, AppConfig, AuthMiddleware, CorsConfig, CorsMiddleware, Dispatcher, LoggerMiddleware,
    RateLimitMiddleware, RecoveryMiddleware, RequestIdMiddleware, SecureHeadersMiddleware,
    SilentAuthMiddleware,
};
use tracing::warn;

/// Requests per client before throttling kicks in
pub(crate) const THROTTLE_BURST: u64 = 60;
/// Tokens regained per second
const THROTTLE_REFILL: u64 = 1;

/// Register middleware on `dispatcher`
///
/// Global order: request id, logger, recovery, CORS, secure headers, silent
/// auth. Named: `auth`, `throttle`.
pub fn register_middleware(dispatcher: &Dispatcher, config: &AppConfig) {
    dispatcher.use_middleware(RequestIdMiddleware::new());
    dispatcher.use_middleware(LoggerMiddleware::new());
    dispatcher.use_middleware(RecoveryMiddleware::new());
    dispatcher.use_middleware(CorsMiddleware::new(CorsConfig::default()));
    dispatcher.use_middleware(SecureHeadersMiddleware::new());

    match config.app_key.as_deref() {
        Some(secret) => {
            dispatcher.use_middleware(SilentAuthMiddleware::new(secret));
            dispatcher.register_named("auth", AuthMiddleware::new(secret));
        }
        None => {
            warn!("APP_KEY is not set, routes using 'auth' will answer 500");
            dispatcher.register_named(
                "auth",
                from_fn(|ctx, _next| {
                    ctx.response
                        .abort(500, "Server misconfigured: auth required but no secret set")
                }),
            );
        }
    }

    dispatcher.register_named(
        "throttle",
        RateLimitMiddleware::new(THROTTLE_BURST, THROTTLE_REFILL)
            .trust_forwarded_headers(config.trust_proxy),
    );
}
