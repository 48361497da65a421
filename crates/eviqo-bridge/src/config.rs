//! Environment-based configuration (§6), grounded on the teacher's
//! `#[serde(default = "fn")]` config pattern — adapted to env vars, since
//! this system's config source is the process environment, not a file.

use std::time::Duration;

use crate::error::ConfigError;

fn default_topic_prefix() -> String {
    "eviqo".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ws_reconnect_interval_ms() -> u64 {
    86_400_000
}

#[derive(Debug, Clone)]
pub struct Config {
    pub email: String,
    pub password: String,
    pub mqtt_url: String,
    pub topic_prefix: String,
    pub discovery_prefix: String,
    pub poll_interval: Duration,
    pub log_level: String,
    /// `None` means disabled (`EVIQO_WS_RECONNECT_INTERVAL=0`).
    pub ws_reconnect_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let email = require_var("EVIQO_EMAIL")?;
        let password = require_var("EVIQO_PASSWORD")?;
        let mqtt_url = require_var("EVIQO_MQTT_URL")?;

        let topic_prefix = optional_var("EVIQO_TOPIC_PREFIX", default_topic_prefix);
        let discovery_prefix = optional_var("HASS_DISCOVERY_PREFIX", default_discovery_prefix);
        let log_level = optional_var("EVIQO_LOG_LEVEL", default_log_level);

        let poll_interval_ms = optional_parsed_var("EVIQO_POLL_INTERVAL", default_poll_interval_ms)?;
        let ws_reconnect_ms = optional_parsed_var("EVIQO_WS_RECONNECT_INTERVAL", default_ws_reconnect_interval_ms)?;

        Ok(Self {
            email,
            password,
            mqtt_url,
            topic_prefix,
            discovery_prefix,
            poll_interval: Duration::from_millis(poll_interval_ms),
            log_level,
            ws_reconnect_interval: if ws_reconnect_ms == 0 { None } else { Some(Duration::from_millis(ws_reconnect_ms)) },
        })
    }

    pub fn bridge_status_topic(&self) -> String {
        format!("{}/bridge/status", self.topic_prefix)
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn optional_var(name: &'static str, default: fn() -> String) -> String {
    std::env::var(name).unwrap_or_else(|_| default())
}

fn optional_parsed_var(name: &'static str, default: fn() -> u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue { var: name, value }),
        Err(_) => Ok(default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that
    // touch them rather than risk a racing test flipping another's view.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_eviqo_vars() {
        for var in [
            "EVIQO_EMAIL",
            "EVIQO_PASSWORD",
            "EVIQO_MQTT_URL",
            "EVIQO_TOPIC_PREFIX",
            "HASS_DISCOVERY_PREFIX",
            "EVIQO_POLL_INTERVAL",
            "EVIQO_LOG_LEVEL",
            "EVIQO_WS_RECONNECT_INTERVAL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_eviqo_vars();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("EVIQO_EMAIL")));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_eviqo_vars();
        std::env::set_var("EVIQO_EMAIL", "a@b.com");
        std::env::set_var("EVIQO_PASSWORD", "pw");
        std::env::set_var("EVIQO_MQTT_URL", "mqtt://localhost");

        let config = Config::from_env().unwrap();
        assert_eq!(config.topic_prefix, "eviqo");
        assert_eq!(config.discovery_prefix, "homeassistant");
        assert_eq!(config.poll_interval, Duration::from_millis(30_000));
        assert_eq!(config.ws_reconnect_interval, Some(Duration::from_millis(86_400_000)));
        clear_eviqo_vars();
    }

    #[test]
    fn zero_reconnect_interval_disables_it() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_eviqo_vars();
        std::env::set_var("EVIQO_EMAIL", "a@b.com");
        std::env::set_var("EVIQO_PASSWORD", "pw");
        std::env::set_var("EVIQO_MQTT_URL", "mqtt://localhost");
        std::env::set_var("EVIQO_WS_RECONNECT_INTERVAL", "0");

        let config = Config::from_env().unwrap();
        assert_eq!(config.ws_reconnect_interval, None);
        clear_eviqo_vars();
    }
}
