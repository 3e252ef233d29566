//! Downstream connection configuration for the forwarding core.
//!
//! Wiring code either builds a [`DownstreamConfig`] directly (the demo
//! binary maps its CLI arguments onto one) or loads it from JSON:
//!
//! ```json
//! { "host": "broker.local", "port": 5672, "path_separator": ".",
//!   "reconnect_interval_ms": 500 }
//! ```
//!
//! Missing fields take their defaults. Durations are in milliseconds.

use std::time::Duration;

use serde::Deserialize;

use courier_domain::{CourierError, Result};

// ---------------------------------------------------------------------------
// DownstreamConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    // ---
    pub host: String,
    pub port: u16,

    /// Virtual host presented in the open frame.
    pub hostname: String,

    /// Replaces `/` in client addresses before they are used downstream.
    pub path_separator: String,

    /// Keep retrying failed connect attempts. When `false` a single failed
    /// attempt fails the caller of `connect()`.
    pub reconnect: bool,

    /// `start()` blocks until the first connection is open.
    pub wait_for_downstream_connection: bool,

    /// Upper bound for one connect attempt.
    pub connect_timeout_ms: u64,

    /// Fixed pause between connect attempts.
    pub reconnect_interval_ms: u64,

    /// How long a forwarded drain request may stay unanswered.
    pub drain_timeout_ms: u64,

    /// How long a command request waits for its reply.
    pub request_timeout_ms: u64,
}

// ---

impl Default for DownstreamConfig {
    fn default() -> Self {
        // ---
        Self {
            host: "localhost".into(),
            port: 5672,
            hostname: "courier-internal".into(),
            path_separator: "/".into(),
            reconnect: true,
            wait_for_downstream_connection: false,
            connect_timeout_ms: 100,
            reconnect_interval_ms: 200,
            drain_timeout_ms: 10_000,
            request_timeout_ms: 5_000,
        }
    }
}

// ---

impl DownstreamConfig {
    // ---
    /// Parse from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        // ---
        let config: Self =
            serde_json::from_str(json).map_err(|e| CourierError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // ---

    pub fn validate(&self) -> Result<()> {
        // ---
        if self.host.trim().is_empty() {
            return Err(CourierError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(CourierError::InvalidConfig(
                "port must be in 1..=65535".into(),
            ));
        }
        if self.path_separator.is_empty() {
            return Err(CourierError::InvalidConfig(
                "path separator must not be empty".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(CourierError::InvalidConfig(
                "connect timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    // ---

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Translate a client address into its downstream form.
    pub fn translate_address(&self, address: &str) -> String {
        address.replace('/', &self.path_separator)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::time::Duration;

    use courier_domain::CourierError;

    use super::DownstreamConfig;

    // ---

    #[test]
    fn defaults_match_engine_timings() {
        // ---
        let config = DownstreamConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_millis(100));
        assert_eq!(config.reconnect_interval(), Duration::from_millis(200));
        assert_eq!(config.drain_timeout(), Duration::from_secs(10));
        assert!(config.reconnect);
        assert!(config.validate().is_ok());
    }

    // ---

    #[test]
    fn partial_json_keeps_defaults() {
        // ---
        let config = DownstreamConfig::from_json(r#"{ "host": "broker", "path_separator": "." }"#)
            .expect("valid config");
        assert_eq!(config.host, "broker");
        assert_eq!(config.port, 5672);
        assert_eq!(
            config.translate_address("telemetry/tenantA"),
            "telemetry.tenantA"
        );
    }

    // ---

    #[test]
    fn rejects_invalid_values() {
        // ---
        let err = DownstreamConfig::from_json(r#"{ "port": 0 }"#).unwrap_err();
        assert!(matches!(err, CourierError::InvalidConfig(_)));

        let err = DownstreamConfig::from_json(r#"{ "path_separator": "" }"#).unwrap_err();
        assert!(matches!(err, CourierError::InvalidConfig(_)));

        let err = DownstreamConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, CourierError::InvalidConfig(_)));
    }
}
