//! Environment-driven configuration
//!
//! Bad values never stop the relay from starting: each one is logged and
//! replaced by its default.

use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::delivery::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default shutdown drain period, in milliseconds
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;

/// Default shutdown drain period
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Bind address (`RELAY_HOST`)
    pub host: IpAddr,
    /// Listen port (`PORT`)
    pub port: u16,
    /// Per-connection outbound queue bound (`RELAY_QUEUE_CAPACITY`)
    pub queue_capacity: usize,
    /// Slow-consumer policy (`RELAY_OVERFLOW_POLICY`)
    pub overflow_policy: OverflowPolicy,
    /// How long shutdown waits for connections to drain (`RELAY_SHUTDOWN_GRACE_MS`)
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl RelayConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: parse_or("RELAY_HOST", lookup("RELAY_HOST"), defaults.host, |_| true),
            port: parse_or("PORT", lookup("PORT"), defaults.port, |port| *port != 0),
            queue_capacity: parse_or(
                "RELAY_QUEUE_CAPACITY",
                lookup("RELAY_QUEUE_CAPACITY"),
                defaults.queue_capacity,
                |cap| *cap > 0,
            ),
            overflow_policy: parse_or(
                "RELAY_OVERFLOW_POLICY",
                lookup("RELAY_OVERFLOW_POLICY"),
                defaults.overflow_policy,
                |_| true,
            ),
            shutdown_grace: Duration::from_millis(parse_or(
                "RELAY_SHUTDOWN_GRACE_MS",
                lookup("RELAY_SHUTDOWN_GRACE_MS"),
                DEFAULT_SHUTDOWN_GRACE_MS,
                |_| true,
            )),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Parse `raw` if present and valid, otherwise warn and fall back
fn parse_or<T>(key: &str, raw: Option<String>, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            warn!("{}={} is out of range, using {}", key, value, default);
            default
        }
        Err(e) => {
            warn!("{}={:?} is invalid ({}), using {}", key, raw, e, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> RelayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg, RelayConfig::default());
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.listen_addr().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_port_from_env() {
        assert_eq!(config(&[("PORT", "8080")]).port, 8080);
        assert_eq!(config(&[("PORT", " 4000 ")]).port, 4000);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        assert_eq!(config(&[("PORT", "0")]).port, DEFAULT_PORT);
        assert_eq!(config(&[("PORT", "")]).port, DEFAULT_PORT);
        assert_eq!(config(&[("PORT", "http")]).port, DEFAULT_PORT);
        assert_eq!(config(&[("PORT", "70000")]).port, DEFAULT_PORT);
    }

    #[test]
    fn test_delivery_settings() {
        let cfg = config(&[
            ("RELAY_QUEUE_CAPACITY", "8"),
            ("RELAY_OVERFLOW_POLICY", "drop-oldest"),
            ("RELAY_SHUTDOWN_GRACE_MS", "250"),
            ("RELAY_HOST", "127.0.0.1"),
        ]);
        assert_eq!(cfg.queue_capacity, 8);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(cfg.shutdown_grace, Duration::from_millis(250));
        assert_eq!(cfg.listen_addr().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_shutdown_grace_bounds() {
        let max = u64::MAX.to_string();
        assert_eq!(config(&[]).shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(
            config(&[("RELAY_SHUTDOWN_GRACE_MS", "-1")]).shutdown_grace,
            Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS)
        );
        assert_eq!(
            config(&[("RELAY_SHUTDOWN_GRACE_MS", max.as_str())]).shutdown_grace,
            Duration::from_millis(u64::MAX)
        );
    }

    #[test]
    fn test_bad_delivery_settings_fall_back() {
        let cfg = config(&[
            ("RELAY_QUEUE_CAPACITY", "0"),
            ("RELAY_OVERFLOW_POLICY", "block"),
        ]);
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DisconnectConsumer);
    }
}
