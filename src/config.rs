use std::ops::Range;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::adc::MAX_CHANNEL;
use crate::rest::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT};
use crate::spi::DEFAULT_CLOCK_HZ;

pub const DEFAULT_SPI_DEVICE: &str = "/dev/spidev0.0";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_VREF: f64 = 3.3;
pub const DEFAULT_ENDPOINT: &str = "/api/v1/breathing/raw";
pub const DEFAULT_LOG_EVERY: u32 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{name}={value} is not valid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub endpoint: String,
    pub spi_device: String,
    pub spi_clock_hz: u32,
    pub channel: u8,
    pub poll_interval: Duration,
    pub vref: f64,
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
    /// Half-open range of HTTP status codes counted as delivered.
    pub success_status: Range<u16>,
    pub log_every: u32,
    pub simulate: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any `name -> value` source. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let api_url = get("RAILWAY_API_URL").ok_or(ConfigError::Missing("RAILWAY_API_URL"))?;

        let poll_interval_ms = match get("POLL_INTERVAL_MS") {
            None => DEFAULT_POLL_INTERVAL_MS,
            Some(v) => match v.parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    warn!(value = %v, "Invalid POLL_INTERVAL_MS, using default");
                    DEFAULT_POLL_INTERVAL_MS
                }
            },
        };

        let channel = parse_or("ADC_CHANNEL", get("ADC_CHANNEL"), 0u8)?;
        if channel > MAX_CHANNEL {
            return Err(ConfigError::Invalid {
                name: "ADC_CHANNEL",
                value: channel.to_string(),
                reason: "channel must be 0-7",
            });
        }

        let vref = parse_or("VREF", get("VREF"), DEFAULT_VREF)?;
        if !vref.is_finite() || vref <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "VREF",
                value: vref.to_string(),
                reason: "reference voltage must be positive",
            });
        }

        let status_min = parse_or("SUCCESS_STATUS_MIN", get("SUCCESS_STATUS_MIN"), 200u16)?;
        let status_max = parse_or("SUCCESS_STATUS_MAX", get("SUCCESS_STATUS_MAX"), 300u16)?;
        if status_min >= status_max {
            return Err(ConfigError::Invalid {
                name: "SUCCESS_STATUS_MAX",
                value: status_max.to_string(),
                reason: "success range is empty",
            });
        }

        let log_every = parse_or("LOG_EVERY", get("LOG_EVERY"), DEFAULT_LOG_EVERY)?.max(1);

        Ok(Config {
            api_url,
            endpoint: get("API_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            spi_device: get("SPI_DEVICE").unwrap_or_else(|| DEFAULT_SPI_DEVICE.to_string()),
            spi_clock_hz: parse_or("SPI_CLOCK_HZ", get("SPI_CLOCK_HZ"), DEFAULT_CLOCK_HZ)?,
            channel,
            poll_interval: Duration::from_millis(poll_interval_ms),
            vref,
            http_timeout: positive_secs("HTTP_TIMEOUT_S", get("HTTP_TIMEOUT_S"), DEFAULT_TIMEOUT),
            http_connect_timeout: positive_secs(
                "HTTP_CONNECT_TIMEOUT_S",
                get("HTTP_CONNECT_TIMEOUT_S"),
                DEFAULT_CONNECT_TIMEOUT,
            ),
            success_status: status_min..status_max,
            log_every,
            simulate: get("SIMULATE").as_deref() == Some("1"),
        })
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  API URL: {}{}", self.api_url, self.endpoint);
        if self.simulate {
            info!("  SPI Device: simulated");
        } else {
            info!("  SPI Device: {} @ {} Hz, channel {}", self.spi_device, self.spi_clock_hz, self.channel);
        }
        info!("  Poll Interval: {} ms", self.poll_interval.as_millis());
        info!("  Reference Voltage: {} V", self.vref);
        info!(
            "  HTTP timeouts: {} s request, {} s connect",
            self.http_timeout.as_secs(),
            self.http_connect_timeout.as_secs()
        );
    }
}

// A zero deadline fails every request, so it gets the same treatment as a
// malformed value.
fn positive_secs(name: &'static str, value: Option<String>, default: Duration) -> Duration {
    match value {
        None => default,
        Some(v) => match v.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!(value = %v, "Invalid {}, using default", name);
                default
            }
        },
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: v,
            reason: "not a number",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("RAILWAY_API_URL", "https://example.com")]).unwrap();
        assert_eq!(config.api_url, "https://example.com");
        assert_eq!(config.endpoint, "/api/v1/breathing/raw");
        assert_eq!(config.spi_device, "/dev/spidev0.0");
        assert_eq!(config.spi_clock_hz, 1_000_000);
        assert_eq!(config.channel, 0);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.vref, 3.3);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.http_connect_timeout, Duration::from_secs(3));
        assert_eq!(config.success_status, 200..300);
        assert_eq!(config.log_every, 5);
        assert!(!config.simulate);
    }

    #[test]
    fn test_api_url_required() {
        assert_eq!(config_from(&[]), Err(ConfigError::Missing("RAILWAY_API_URL")));
        assert_eq!(
            config_from(&[("RAILWAY_API_URL", "")]),
            Err(ConfigError::Missing("RAILWAY_API_URL"))
        );
    }

    #[test]
    fn test_bad_poll_interval_falls_back() {
        for bad in ["0", "-5", "fast"] {
            let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("POLL_INTERVAL_MS", bad)]).unwrap();
            assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        }
        let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("POLL_INTERVAL_MS", "1000")]).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_http_timeouts_fall_back() {
        let config = config_from(&[
            ("RAILWAY_API_URL", "http://x"),
            ("HTTP_TIMEOUT_S", "0"),
            ("HTTP_CONNECT_TIMEOUT_S", "0"),
        ])
        .unwrap();
        assert_eq!(config.http_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.http_connect_timeout, DEFAULT_CONNECT_TIMEOUT);

        let config = config_from(&[
            ("RAILWAY_API_URL", "http://x"),
            ("HTTP_TIMEOUT_S", "slow"),
            ("HTTP_CONNECT_TIMEOUT_S", "10"),
        ])
        .unwrap();
        assert_eq!(config.http_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.http_connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_channel_range() {
        let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("ADC_CHANNEL", "7")]).unwrap();
        assert_eq!(config.channel, 7);

        assert!(matches!(
            config_from(&[("RAILWAY_API_URL", "http://x"), ("ADC_CHANNEL", "8")]),
            Err(ConfigError::Invalid { name: "ADC_CHANNEL", .. })
        ));
    }

    #[test]
    fn test_vref_must_be_positive() {
        for bad in ["0", "-3.3", "NaN", "inf"] {
            assert!(matches!(
                config_from(&[("RAILWAY_API_URL", "http://x"), ("VREF", bad)]),
                Err(ConfigError::Invalid { name: "VREF", .. })
            ));
        }
        let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("VREF", "5.0")]).unwrap();
        assert_eq!(config.vref, 5.0);
    }

    #[test]
    fn test_success_range() {
        let config = config_from(&[
            ("RAILWAY_API_URL", "http://x"),
            ("SUCCESS_STATUS_MIN", "200"),
            ("SUCCESS_STATUS_MAX", "201"),
        ])
        .unwrap();
        assert_eq!(config.success_status, 200..201);

        assert!(config_from(&[("RAILWAY_API_URL", "http://x"), ("SUCCESS_STATUS_MAX", "200")]).is_err());
    }

    #[test]
    fn test_simulate_flag() {
        let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("SIMULATE", "1")]).unwrap();
        assert!(config.simulate);
        let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("SIMULATE", "yes")]).unwrap();
        assert!(!config.simulate);
    }

    #[test]
    fn test_log_every_at_least_one() {
        let config = config_from(&[("RAILWAY_API_URL", "http://x"), ("LOG_EVERY", "0")]).unwrap();
        assert_eq!(config.log_every, 1);
    }
}
