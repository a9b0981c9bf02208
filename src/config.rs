//! Realtime configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), each with a default that matches the
//! dashboard's production deployment.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::TenantId;
use crate::error::RealtimeError;
use crate::ws::backoff::BackoffPolicy;

/// Default WebSocket base URL when `REALTIME_WS_BASE_URL` is unset.
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000";

/// Default tenant used when no session record names one.
pub const DEFAULT_TENANT_ID: &str = "default";

/// Default keepalive interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// Default limit for a single connect attempt in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Highest reconnect exponent accepted from configuration.
const MAX_CONFIGURABLE_EXPONENT: u32 = 16;

/// Top-level realtime configuration.
///
/// Loaded once at startup via [`RealtimeConfig::from_env`], or built in code
/// with [`RealtimeConfig::new`] and the `with_*` setters.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL of the realtime endpoint (`ws://` or `wss://`).
    pub ws_base_url: String,

    /// Tenant used when the session record carries none.
    pub default_tenant_id: TenantId,

    /// Path to the persisted session record, if any.
    pub session_file: Option<PathBuf>,

    /// Interval between keepalive pings while the connection is open.
    pub heartbeat_interval: Duration,

    /// Upper bound on a single connect attempt, handshake included.
    pub connect_timeout: Duration,

    /// Reconnection backoff policy.
    pub backoff: BackoffPolicy,

    /// Emit logs as JSON lines instead of the human-readable format.
    pub log_json: bool,
}

impl RealtimeConfig {
    /// Creates a configuration for `ws_base_url` with every other setting
    /// at its default.
    #[must_use]
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            default_tenant_id: TenantId::new(DEFAULT_TENANT_ID),
            session_file: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            backoff: BackoffPolicy::default(),
            log_json: false,
        }
    }

    /// Sets the fallback tenant.
    #[must_use]
    pub fn with_default_tenant(mut self, tenant: TenantId) -> Self {
        self.default_tenant_id = tenant;
        self
    }

    /// Sets the session record path.
    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Sets the keepalive interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the connect attempt limit.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    /// Numeric values that fail to parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidConfig`] if the resulting
    /// configuration fails [`RealtimeConfig::validate`].
    pub fn from_env() -> Result<Self, RealtimeError> {
        dotenvy::dotenv().ok();

        let ws_base_url = std::env::var("REALTIME_WS_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_WS_BASE_URL.to_string());

        let default_tenant_id = std::env::var("REALTIME_DEFAULT_TENANT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| TenantId::new(DEFAULT_TENANT_ID), TenantId::new);

        let session_file = std::env::var("REALTIME_SESSION_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let heartbeat_interval = Duration::from_secs(parse_env(
            "REALTIME_HEARTBEAT_INTERVAL_SECS",
            DEFAULT_HEARTBEAT_INTERVAL_SECS,
        ));

        let connect_timeout = Duration::from_secs(parse_env(
            "REALTIME_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));

        let backoff = BackoffPolicy::new(
            Duration::from_millis(parse_env(
                "REALTIME_RECONNECT_BASE_DELAY_MS",
                BackoffPolicy::DEFAULT_BASE_DELAY_MS,
            )),
            parse_env(
                "REALTIME_RECONNECT_MAX_EXPONENT",
                BackoffPolicy::DEFAULT_MAX_EXPONENT,
            ),
        );

        let log_json = parse_env_bool("REALTIME_LOG_JSON", false);

        let config = Self {
            ws_base_url,
            default_tenant_id,
            session_file,
            heartbeat_interval,
            connect_timeout,
            backoff,
            log_json,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the connection manager cannot
    /// work with.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidConfig`] if the base URL is not a
    /// `ws://`/`wss://` URL, the heartbeat interval, connect timeout or
    /// base delay is zero, or the reconnect exponent is out of range.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        let base = self.ws_base_url.trim();
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(RealtimeError::InvalidConfig(format!(
                "ws base url must start with ws:// or wss://, got {base:?}"
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "connect timeout must be positive".to_string(),
            ));
        }
        if self.backoff.base_delay().is_zero() {
            return Err(RealtimeError::InvalidConfig(
                "reconnect base delay must be positive".to_string(),
            ));
        }
        if self.backoff.max_exponent() > MAX_CONFIGURABLE_EXPONENT {
            return Err(RealtimeError::InvalidConfig(format!(
                "reconnect max exponent must be at most {MAX_CONFIGURABLE_EXPONENT}"
            )));
        }
        Ok(())
    }

    /// Builds the transport endpoint for `tenant`: `{base}/ws/{tenant}`.
    #[must_use]
    pub fn endpoint_url(&self, tenant: &TenantId) -> String {
        format!("{}/ws/{}", self.ws_base_url.trim().trim_end_matches('/'), tenant)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WS_BASE_URL)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
