//! Endpoint configuration.
//!
//! The only tunable is the close-handshake timeout. It is resolved in this
//! order:
//! 1. an explicit value set on the builder
//! 2. the `DUPLEX_WS_CLOSE_TIMEOUT` environment variable (whole seconds)
//! 3. the default of 30 seconds
//!
//! An unparsable environment value silently falls back to the default.
//!
//! The configuration can also be embedded in an application's JSON config:
//!
//! ```
//! use duplex_ws::EndpointConfig;
//! use std::time::Duration;
//!
//! let config = EndpointConfig::from_json(r#"{"close_timeout_secs": 5}"#).unwrap();
//! assert_eq!(config.close_timeout, Duration::from_secs(5));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Environment variable holding the close timeout in seconds.
pub const CLOSE_TIMEOUT_ENV: &str = "DUPLEX_WS_CLOSE_TIMEOUT";

/// Default close-handshake timeout in seconds.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 30;

/// Default close-handshake timeout.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS);

/// Configuration for a WebSocket endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    /// How long to wait for a close message to be sent before tearing down
    /// the connection.
    pub close_timeout: Duration,
}

impl EndpointConfig {
    /// Configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let value = std::env::var(CLOSE_TIMEOUT_ENV).ok();
        Self {
            close_timeout: parse_close_timeout(value.as_deref()),
        }
    }

    /// Parse configuration from a JSON document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        Ok(file.into())
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// On-disk representation.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    close_timeout_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
        }
    }
}

impl From<ConfigFile> for EndpointConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            close_timeout: Duration::from_secs(file.close_timeout_secs),
        }
    }
}

/// Resolve the close timeout from a raw property value.
fn parse_close_timeout(value: Option<&str>) -> Duration {
    let secs = value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(u64::from)
        .unwrap_or(DEFAULT_CLOSE_TIMEOUT_SECS);
    tracing::debug!(
        "{}={:?}, using value {}",
        CLOSE_TIMEOUT_ENV,
        value,
        secs
    );
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WsError;

    #[test]
    fn test_config_default() {
        let config = EndpointConfig::default();
        assert_eq!(config.close_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_missing_uses_default() {
        assert_eq!(parse_close_timeout(None), DEFAULT_CLOSE_TIMEOUT);
    }

    #[test]
    fn test_parse_valid_value() {
        assert_eq!(parse_close_timeout(Some("5")), Duration::from_secs(5));
        assert_eq!(parse_close_timeout(Some(" 12 ")), Duration::from_secs(12));
        assert_eq!(parse_close_timeout(Some("0")), Duration::ZERO);
    }

    #[test]
    fn test_parse_garbage_falls_back_silently() {
        assert_eq!(parse_close_timeout(Some("soon")), DEFAULT_CLOSE_TIMEOUT);
        assert_eq!(parse_close_timeout(Some("-1")), DEFAULT_CLOSE_TIMEOUT);
        assert_eq!(parse_close_timeout(Some("1.5")), DEFAULT_CLOSE_TIMEOUT);
        assert_eq!(parse_close_timeout(Some("")), DEFAULT_CLOSE_TIMEOUT);
    }

    #[test]
    fn test_from_json() {
        let config = EndpointConfig::from_json(r#"{"close_timeout_secs": 7}"#).unwrap();
        assert_eq!(config.close_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_from_json_missing_field_uses_default() {
        let config = EndpointConfig::from_json("{}").unwrap();
        assert_eq!(config, EndpointConfig::default());
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let result = EndpointConfig::from_json(r#"{"close_timeout": 7}"#);
        assert!(matches!(result, Err(WsError::Json(_))));
    }
}
