//! Environment configuration.
//!
//! Every tunable is read and validated once at startup; the core modules
//! receive already-validated typed values. Parsers work over an injected
//! lookup so tests never mutate process environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors; any of these aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("REDIS_TLS_CERT_FILE and REDIS_TLS_KEY_FILE must be set together")]
    TlsPairing,
}

/// Redis connection and behavior settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Event-log stream name; defaults to `location_events`.
    pub stream: String,
    pub dial_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub pool_size: Option<u32>,
    pub min_idle_conns: Option<u32>,
    pub max_retries: Option<u32>,
    pub healthcheck_timeout: Duration,
    pub location_ttl: Duration,
    pub stream_max_len: i64,
    pub enable_otel: bool,
    pub tls: Option<RedisTlsConfig>,
}

/// Optional mutual-TLS material for Redis.
#[derive(Debug, Clone)]
pub struct RedisTlsConfig {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
}

/// Retry, breaker, and egress rate-limit settings for outbound order calls.
#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub breaker_max_failures: u32,
    pub breaker_reset_timeout: Duration,
    pub rate_limit_interval: Duration,
    pub rate_limit_burst: u32,
}

/// Ingress rate-limit settings for inbound RPCs.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub rate_limit_interval: Duration,
    pub rate_limit_burst: u32,
}

/// Observability HTTP server settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub addr: String,
}

/// Fully validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis: RedisConfig,
    pub reliability: ReliabilityConfig,
    pub ingress: IngressConfig,
    pub observability: ObservabilityConfig,
    pub app_env: String,
}

impl Config {
    /// Loads and validates configuration from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&|name| std::env::var(name).ok())
    }

    /// Loads configuration through the given lookup.
    pub fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required_string(lookup, "DATABASE_URL")?,
            redis: RedisConfig::load(lookup)?,
            reliability: ReliabilityConfig::load(lookup)?,
            ingress: IngressConfig::load(lookup)?,
            observability: ObservabilityConfig {
                addr: required_string(lookup, "OBS_ADDR")?,
            },
            app_env: optional_string(lookup, "APP_ENV").unwrap_or_default(),
        })
    }

    /// Debug reflection is enabled outside production.
    pub fn debug_endpoints_enabled(&self) -> bool {
        self.app_env != "production"
    }
}

impl RedisConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            url: required_string(lookup, "REDIS_URL")?,
            stream: optional_string(lookup, "REDIS_STREAM")
                .unwrap_or_else(|| "location_events".to_string()),
            dial_timeout: optional_duration(lookup, "REDIS_DIAL_TIMEOUT")?,
            read_timeout: optional_duration(lookup, "REDIS_READ_TIMEOUT")?,
            write_timeout: optional_duration(lookup, "REDIS_WRITE_TIMEOUT")?,
            pool_size: optional_u32(lookup, "REDIS_POOL_SIZE")?,
            min_idle_conns: optional_u32(lookup, "REDIS_MIN_IDLE_CONNS")?,
            max_retries: optional_u32(lookup, "REDIS_MAX_RETRIES")?,
            healthcheck_timeout: required_duration(lookup, "REDIS_HEALTHCHECK_TIMEOUT")?,
            location_ttl: required_duration(lookup, "REDIS_LOCATION_TTL")?,
            stream_max_len: required_i64(lookup, "REDIS_STREAM_MAXLEN")?,
            enable_otel: optional_bool(lookup, "REDIS_OTEL")?,
            tls: RedisTlsConfig::load(lookup)?,
        })
    }
}

impl RedisTlsConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Option<Self>, ConfigError> {
        let ca_file = optional_string(lookup, "REDIS_TLS_CA_FILE");
        let cert_file = optional_string(lookup, "REDIS_TLS_CERT_FILE");
        let key_file = optional_string(lookup, "REDIS_TLS_KEY_FILE");
        let server_name = optional_string(lookup, "REDIS_TLS_SERVER_NAME");
        let insecure = optional_bool(lookup, "REDIS_TLS_INSECURE_SKIP_VERIFY")?;

        if ca_file.is_none()
            && cert_file.is_none()
            && key_file.is_none()
            && server_name.is_none()
            && !insecure
        {
            return Ok(None);
        }

        if cert_file.is_some() != key_file.is_some() {
            return Err(ConfigError::TlsPairing);
        }

        Ok(Some(Self {
            ca_file: ca_file.map(PathBuf::from),
            cert_file: cert_file.map(PathBuf::from),
            key_file: key_file.map(PathBuf::from),
            server_name,
            insecure_skip_verify: insecure,
        }))
    }
}

impl ReliabilityConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            retry_max_attempts: required_u32(lookup, "ORDER_RETRY_MAX_ATTEMPTS")?,
            retry_base_delay: required_duration(lookup, "ORDER_RETRY_BASE_DELAY")?,
            retry_max_delay: required_duration(lookup, "ORDER_RETRY_MAX_DELAY")?,
            breaker_max_failures: required_u32(lookup, "ORDER_BREAKER_MAX_FAILURES")?,
            breaker_reset_timeout: required_duration(lookup, "ORDER_BREAKER_RESET_TIMEOUT")?,
            rate_limit_interval: required_duration(lookup, "ORDER_RATE_LIMIT_INTERVAL")?,
            rate_limit_burst: required_u32(lookup, "ORDER_RATE_LIMIT_BURST")?,
        })
    }
}

impl IngressConfig {
    fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            rate_limit_interval: required_duration(lookup, "GRPC_RATE_LIMIT_INTERVAL")?,
            rate_limit_burst: required_u32(lookup, "GRPC_RATE_LIMIT_BURST")?,
        })
    }
}

fn raw(lookup: &dyn Fn(&str) -> Option<String>, name: &'static str) -> Option<String> {
    lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required_string(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    raw(lookup, name).ok_or(ConfigError::Missing(name))
}

fn optional_string(lookup: &dyn Fn(&str) -> Option<String>, name: &'static str) -> Option<String> {
    raw(lookup, name)
}

fn required_duration(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Duration, ConfigError> {
    let value = raw(lookup, name).ok_or(ConfigError::Missing(name))?;
    parse_duration(&value).map_err(|reason| ConfigError::Invalid { name, reason })
}

fn optional_duration(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match raw(lookup, name) {
        None => Ok(None),
        Some(value) => parse_duration(&value)
            .map(Some)
            .map_err(|reason| ConfigError::Invalid { name, reason }),
    }
}

fn required_u32(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<u32, ConfigError> {
    let value = raw(lookup, name).ok_or(ConfigError::Missing(name))?;
    value.parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("expected a non-negative integer, got {value:?}"),
    })
}

fn optional_u32(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u32>, ConfigError> {
    match raw(lookup, name) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("expected a non-negative integer, got {value:?}"),
        }),
    }
}

fn required_i64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<i64, ConfigError> {
    let value = raw(lookup, name).ok_or(ConfigError::Missing(name))?;
    let parsed: i64 = value.parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("expected an integer, got {value:?}"),
    })?;
    if parsed < 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be >= 0".to_string(),
        });
    }
    Ok(parsed)
}

fn optional_bool(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<bool, ConfigError> {
    match raw(lookup, name) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {other:?}"),
            }),
        },
    }
}

/// Parses durations in the `250ms` / `5s` / `2m` / `1h` form. Values must
/// be non-negative; a bare number without a unit is rejected.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let unit_start = raw
        .find(|c: char| c.is_ascii_alphabetic() || c == 'µ')
        .ok_or_else(|| format!("missing duration unit in {raw:?}"))?;
    let (value, unit) = raw.split_at(unit_start);

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration value {raw:?}"))?;
    if value < 0.0 {
        return Err("must be >= 0".to_string());
    }

    let nanos_per_unit: f64 = match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3_600e9,
        other => return Err(format!("unknown duration unit {other:?}")),
    };

    Ok(Duration::from_nanos((value * nanos_per_unit) as u64))
}
