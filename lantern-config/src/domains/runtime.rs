//! Extension runtime configuration

use lantern_ipc::WireCodec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_socket_path, Validatable};

/// Socket server, timers and restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Unix socket extensions connect to
    pub socket_path: PathBuf,

    /// Payload encoding used on every connection
    pub codec: WireCodec,

    /// Delay before a "Loading..." placeholder replaces stale results
    #[serde(rename = "loading_delay_ms", with = "crate::domains::utils::serde_duration_millis")]
    pub loading_delay: Duration,

    /// Input debounce for extensions whose manifest does not set one
    #[serde(
        rename = "default_input_debounce_ms",
        with = "crate::domains::utils::serde_duration_millis"
    )]
    pub default_input_debounce: Duration,

    /// Processes exiting sooner than this after spawn are not restarted
    #[serde(
        rename = "instant_exit_threshold_ms",
        with = "crate::domains::utils::serde_duration_millis"
    )]
    pub instant_exit_threshold: Duration,

    /// Time between SIGTERM and SIGKILL when stopping an extension
    #[serde(
        rename = "stop_grace_period_ms",
        with = "crate::domains::utils::serde_duration_millis"
    )]
    pub stop_grace_period: Duration,

    /// Restart policy after an extension crashes
    pub restart: RestartConfig,
}

/// Capped exponential restart delays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    #[serde(rename = "initial_delay_ms", with = "crate::domains::utils::serde_duration_millis")]
    pub initial_delay: Duration,

    #[serde(rename = "max_delay_ms", with = "crate::domains::utils::serde_duration_millis")]
    pub max_delay: Duration,

    pub multiplier: f64,

    /// Uptime after which the attempt counter starts over
    #[serde(rename = "reset_after_secs", with = "crate::domains::utils::serde_duration")]
    pub reset_after: Duration,

    /// Spread each delay by up to 20% either way
    pub jitter: bool,
}

/// `$XDG_RUNTIME_DIR/lantern/extensions.sock`, or the same under the temp dir
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lantern")
        .join("extensions.sock")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            codec: WireCodec::Json,
            loading_delay: Duration::from_millis(300),
            default_input_debounce: Duration::from_millis(50),
            instant_exit_threshold: Duration::from_millis(1000),
            stop_grace_period: Duration::from_millis(500),
            restart: RestartConfig::default(),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            reset_after: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl Validatable for RuntimeConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_socket_path(&self.socket_path, "socket_path", self.domain_name())?;
        validate_positive(
            self.instant_exit_threshold.as_millis(),
            "instant_exit_threshold_ms",
            self.domain_name(),
        )?;
        validate_positive(
            self.stop_grace_period.as_millis(),
            "stop_grace_period_ms",
            self.domain_name(),
        )?;
        self.restart.validate()
    }

    fn domain_name(&self) -> &'static str {
        "runtime"
    }
}

impl Validatable for RestartConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.initial_delay.as_millis(),
            "initial_delay_ms",
            self.domain_name(),
        )?;

        if self.max_delay < self.initial_delay {
            return Err(self.validation_error(format!(
                "max_delay_ms ({}) must not be below initial_delay_ms ({})",
                self.max_delay.as_millis(),
                self.initial_delay.as_millis()
            )));
        }

        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(self.validation_error(format!(
                "multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "runtime.restart"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.loading_delay, Duration::from_millis(300));
        assert_eq!(config.default_input_debounce, Duration::from_millis(50));
        assert_eq!(config.instant_exit_threshold, Duration::from_secs(1));
        assert_eq!(config.stop_grace_period, Duration::from_millis(500));
        assert!(config.socket_path.ends_with("lantern/extensions.sock"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_restart_validation() {
        let mut restart = RestartConfig::default();
        assert!(restart.validate().is_ok());

        restart.max_delay = Duration::from_millis(10);
        assert!(restart.validate().is_err());

        let mut restart = RestartConfig::default();
        restart.multiplier = 0.5;
        assert!(restart.validate().is_err());

        restart.multiplier = f64::NAN;
        assert!(restart.validate().is_err());
    }

    #[test]
    fn test_millisecond_keys() {
        let config: RuntimeConfig = serde_yaml::from_str(
            "loading_delay_ms: 120\ncodec: msgpack\nrestart:\n  reset_after_secs: 5\n",
        )
        .unwrap();
        assert_eq!(config.loading_delay, Duration::from_millis(120));
        assert_eq!(config.codec, WireCodec::Msgpack);
        assert_eq!(config.restart.reset_after, Duration::from_secs(5));
        assert_eq!(config.restart.initial_delay, Duration::from_secs(1));
        assert!(!config.restart.jitter);
    }
}
