//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Every value has a default, so
//! [`ClientConfig::default`] is a working configuration for a local
//! backend.

use std::time::Duration;

/// Top-level client configuration.
///
/// Loaded once at startup via [`ClientConfig::from_env`], or built in code
/// from [`Default`] and the per-component sections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Persistent connection settings.
    pub connection: ConnectionConfig,
    /// HTTP data API settings.
    pub request: RequestConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Capacity of the session event broadcast channel.
    pub session_bus_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            request: RequestConfig::default(),
            cache: CacheConfig::default(),
            session_bus_capacity: 64,
        }
    }
}

/// Settings for the persistent publish/subscribe connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// STOMP endpoint (`http(s)://` or `ws(s)://`).
    pub endpoint: String,
    /// Reconnect delay unit; attempt `n` waits `base * (n + 1)`.
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_max: Duration,
    /// Consecutive failures tolerated before entering `Failed`.
    pub max_reconnect_attempts: u32,
    /// Interval of the transport liveness check.
    pub heartbeat_interval: Duration,
    /// Bound on transport open plus the STOMP `CONNECT` handshake.
    pub connect_timeout: Duration,
    /// STOMP `heart-beat` header value advertised to the broker, in ms.
    pub stomp_heartbeat_ms: (u64, u64),
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/ws/connect".to_string(),
            reconnect_base: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stomp_heartbeat_ms: (10_000, 10_000),
        }
    }
}

/// Settings for the HTTP data API.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Minimum spacing between two outbound requests.
    pub throttle_interval: Duration,
    /// Delay before the single automatic retry.
    pub retry_backoff: Duration,
    /// Credential lifetime used by the time-since-issue expiry check.
    pub credential_lifetime: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout: Duration::from_secs(15),
            throttle_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(1),
            credential_lifetime: Duration::from_secs(60 * 60),
        }
    }
}

/// Cache and pagination policy for one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicy {
    /// Time-to-live of a cached page.
    pub ttl: Duration,
    /// Largest page size requested from the server.
    pub page_size: u32,
    /// Timeout of a page fetch.
    pub timeout: Duration,
}

/// Settings for the response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Policy for one-to-one conversations.
    pub direct: ClassPolicy,
    /// Policy for multi-party conversations.
    pub group: ClassPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            direct: ClassPolicy {
                ttl: Duration::from_secs(60),
                page_size: 50,
                timeout: Duration::from_secs(10),
            },
            group: ClassPolicy {
                ttl: Duration::from_secs(30),
                page_size: 40,
                timeout: Duration::from_secs(10),
            },
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] value of each field when a variable
    /// is missing or unparsable. Calls `dotenvy::dotenv().ok()` to
    /// optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `MAX_RECONNECT_ATTEMPTS`,
    /// `HEARTBEAT_INTERVAL_MS` or a cache page size is set to `0`.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let defaults = ConnectionConfig::default();
        let connection = ConnectionConfig {
            endpoint: std::env::var("WS_ENDPOINT").unwrap_or(defaults.endpoint),
            reconnect_base: parse_env_ms("RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_max: parse_env_ms("RECONNECT_MAX_MS", defaults.reconnect_max),
            max_reconnect_attempts: parse_env(
                "MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: parse_env_ms("HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval),
            connect_timeout: parse_env_ms("CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            stomp_heartbeat_ms: defaults.stomp_heartbeat_ms,
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            base_url: std::env::var("API_BASE_URL").unwrap_or(defaults.base_url),
            timeout: parse_env_ms("REQUEST_TIMEOUT_MS", defaults.timeout),
            throttle_interval: parse_env_ms("THROTTLE_INTERVAL_MS", defaults.throttle_interval),
            retry_backoff: parse_env_ms("RETRY_BACKOFF_MS", defaults.retry_backoff),
            credential_lifetime: Duration::from_secs(
                parse_env("CREDENTIAL_LIFETIME_MINS", 60u64).saturating_mul(60),
            ),
        };

        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            direct: ClassPolicy {
                ttl: parse_env_ms("DIRECT_CACHE_TTL_MS", defaults.direct.ttl),
                page_size: parse_env("DIRECT_PAGE_SIZE", defaults.direct.page_size),
                timeout: parse_env_ms("MESSAGE_FETCH_TIMEOUT_MS", defaults.direct.timeout),
            },
            group: ClassPolicy {
                ttl: parse_env_ms("GROUP_CACHE_TTL_MS", defaults.group.ttl),
                page_size: parse_env("GROUP_PAGE_SIZE", defaults.group.page_size),
                timeout: parse_env_ms("MESSAGE_FETCH_TIMEOUT_MS", defaults.group.timeout),
            },
        };

        let config = Self {
            connection,
            request,
            cache,
            session_bus_capacity: parse_env("SESSION_BUS_CAPACITY", 64usize).max(1),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the values the client cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconnect attempt cap, the heartbeat
    /// interval or a cache page size is zero.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.connection.max_reconnect_attempts == 0 {
            return Err("MAX_RECONNECT_ATTEMPTS must be at least 1".into());
        }
        if self.connection.heartbeat_interval.is_zero() {
            return Err("HEARTBEAT_INTERVAL_MS must be positive".into());
        }
        if self.cache.direct.page_size == 0 || self.cache.group.page_size == 0 {
            return Err("page sizes must be positive".into());
        }
        Ok(())
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

/// Parses an environment variable holding milliseconds.
fn parse_env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.connection.reconnect_base, Duration::from_secs(5));
        assert_eq!(config.connection.reconnect_max, Duration::from_secs(30));
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.request.throttle_interval, Duration::from_millis(100));
        assert_eq!(config.request.timeout, Duration::from_secs(15));
        assert_eq!(config.request.credential_lifetime, Duration::from_secs(3600));
        assert_eq!(config.cache.direct.page_size, 50);
        assert_eq!(config.cache.group.ttl, Duration::from_secs(30));
        assert!(config.session_bus_capacity > 0);
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let mut config = ClientConfig::default();
        assert!(config.validate().is_ok());
        config.connection.heartbeat_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_env_falls_back_on_missing_key() {
        let value: u32 = parse_env("CHATWIRE_TEST_UNSET_KEY", 7);
        assert_eq!(value, 7);
        let d = parse_env_ms("CHATWIRE_TEST_UNSET_MS", Duration::from_millis(250));
        assert_eq!(d, Duration::from_millis(250));
    }
}
