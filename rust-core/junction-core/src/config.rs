//! # Configuration
//!
//! Application settings loaded from environment variables, plus CORS
//! settings for [`CorsMiddleware`](crate::middleware::CorsMiddleware).
//!
//! A `.env` file in the working directory is loaded first. It supports
//! quoted values, `export` prefixes, comments and `${VAR}` expansion, and
//! never overrides variables already set in the process.

use crate::error::{Error, Result};
use crate::logging::LogFormat;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Application name
    pub name: String,
    /// `development`, `production` or `test`
    pub environment: String,
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Expose internal error messages in 500 responses
    pub debug: bool,
    /// Default tracing level when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Max request body size in bytes
    pub max_body_size: usize,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
    /// Secret for signing and verifying JWTs
    pub app_key: Option<String>,
    /// Trust `X-Forwarded-For` / `X-Real-Ip` from a fronting proxy
    pub trust_proxy: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Junction".to_string(),
            environment: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 3333,
            debug: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            max_body_size: 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
            app_key: None,
            trust_proxy: false,
        }
    }
}

impl AppConfig {
    /// Load `.env`, then read the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `.env` is unreadable or a variable is set
    /// but malformed.
    pub fn from_env() -> Result<Self> {
        load_env_file(".env")?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults for unset
    /// or empty keys
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            name: get("APP_NAME").unwrap_or(defaults.name),
            environment: get("APP_ENV").unwrap_or(defaults.environment),
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_or("PORT", get("PORT"), defaults.port)?,
            debug: match get("APP_DEBUG") {
                Some(raw) => parse_bool("APP_DEBUG", &raw)?,
                None => defaults.debug,
            },
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or("LOG_FORMAT", get("LOG_FORMAT"), defaults.log_format)?,
            max_body_size: parse_or("MAX_BODY_SIZE", get("MAX_BODY_SIZE"), defaults.max_body_size)?,
            shutdown_timeout: Duration::from_secs(parse_or(
                "SHUTDOWN_TIMEOUT",
                get("SHUTDOWN_TIMEOUT"),
                defaults.shutdown_timeout.as_secs(),
            )?),
            app_key: get("APP_KEY"),
            trust_proxy: match get("TRUST_PROXY") {
                Some(raw) => parse_bool("TRUST_PROXY", &raw)?,
                None => defaults.trust_proxy,
            },
        })
    }

    /// `host:port` string for binding
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the environment is `production`
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Load a dotenv file into the process environment without overriding
/// variables that are already set
///
/// Returns `false` when the file does not exist.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    env_file_result(path, dotenvy::from_path(path))
}

/// Load a dotenv file, overriding variables that are already set
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_env_file_override(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    env_file_result(path, dotenvy::from_path_override(path))
}

fn env_file_result(path: &Path, result: dotenvy::Result<()>) -> Result<bool> {
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "Loaded environment file");
            Ok(true)
        }
        Err(err) if err.not_found() => Ok(false),
        Err(err) => Err(Error::Config {
            key: path.display().to_string(),
            reason: err.to_string(),
        }),
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |raw| {
        raw.trim().parse().map_err(|e: T::Err| Error::Config {
            key: key.to_string(),
            reason: format!("'{raw}': {e}"),
        })
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config {
            key: key.to_string(),
            reason: format!("'{raw}' is not a boolean"),
        }),
    }
}

/// CORS settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Methods listed in `Access-Control-Allow-Methods`
    pub allowed_methods: Vec<String>,
    /// Headers listed in `Access-Control-Allow-Headers`
    pub allowed_headers: Vec<String>,
    /// Send `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Content-Type", "Accept", "Authorization", "X-Requested-With"]
                .map(String::from)
                .to_vec(),
            allow_credentials: true,
            max_age: 86_400,
        }
    }
}

impl CorsConfig {
    /// Value for `Access-Control-Allow-Origin`, or `None` if `origin` is not
    /// allowed
    ///
    /// A wildcard echoes the request origin, or `*` when the request has none.
    #[must_use]
    pub fn allow_origin_for<'a>(&'a self, origin: &'a str) -> Option<&'a str> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");
        if wildcard {
            return Some(if origin.is_empty() { "*" } else { origin });
        }
        self.allowed_origins
            .iter()
            .find(|o| !origin.is_empty() && o.as_str() == origin)
            .map(String::as_str)
    }
}
