//! # JWT Authentication
//!
//! Bearer-token middleware backed by `jsonwebtoken` (HS256). Verified claims
//! are stored in the request values under [`AUTH_USER_KEY`] and read back with
//! [`HttpContext::auth_user`].

use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::middleware::{Middleware, Next};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Request value key holding the verified claims
pub const AUTH_USER_KEY: &str = "auth_user";

/// Authentication Configuration (JWT)
#[derive(Clone)]
pub struct AuthConfig {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthConfig {
    /// Create auth config from shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and return its claims
    ///
    /// # Errors
    ///
    /// Returns a 401 `Error::Http` if the signature, algorithm or expiry is
    /// invalid.
    pub fn verify(&self, token: &str) -> Result<Value> {
        decode::<Value>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "JWT validation failed");
                Error::unauthorized("Authentication required")
            })
    }

    fn authenticate(&self, ctx: &HttpContext) -> Result<Value> {
        let token = ctx
            .request
            .header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| Error::unauthorized("Missing or invalid Authorization header"))?;
        self.verify(token.trim())
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

/// Rejects requests without a valid bearer token with a 401 body
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    config: AuthConfig,
}

impl AuthMiddleware {
    /// Create from a shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            config: AuthConfig::new(secret),
        }
    }
}

impl Middleware for AuthMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        match self.config.authenticate(ctx) {
            Ok(claims) => {
                ctx.values.insert(AUTH_USER_KEY, claims);
                next(ctx)
            }
            Err(e) => {
                warn!(
                    method = %ctx.request.method,
                    path = %ctx.request.path,
                    reason = %e,
                    "Rejected unauthenticated request"
                );
                ctx.response.abort(401, "Authentication required")
            }
        }
    }

    fn name(&self) -> &'static str {
        "AuthMiddleware"
    }
}

/// Attaches claims when a valid token is present and always continues
#[derive(Debug, Clone)]
pub struct SilentAuthMiddleware {
    config: AuthConfig,
}

impl SilentAuthMiddleware {
    /// Create from a shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            config: AuthConfig::new(secret),
        }
    }
}

impl Middleware for SilentAuthMiddleware {
    fn handle(&self, ctx: &mut HttpContext, next: Next<'_>) -> Result<()> {
        if let Ok(claims) = self.config.authenticate(ctx) {
            ctx.values.insert(AUTH_USER_KEY, claims);
        }
        next(ctx)
    }

    fn name(&self) -> &'static str {
        "SilentAuthMiddleware"
    }
}

/// Sign an HS256 token for `subject` valid for `ttl`
///
/// # Errors
///
/// Returns `Error::Other` if the token cannot be encoded.
pub fn issue_token(secret: &str, subject: &str, ttl: Duration) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let claims = json!({
        "sub": subject,
        "iat": now,
        "exp": now + ttl.as_secs(),
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(Error::other)
}
