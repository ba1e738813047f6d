//! Threshold and pipeline configuration.
//!
//! Loaded once at startup and treated as read-only by the pipeline.
//! Invalid configuration is fatal: the pipeline must not start with a
//! threshold table it cannot trust.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::finding::RuleId;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum RuleConfigError {
    /// A rule-map key does not name a known rule.
    #[error("unknown rule id in threshold map: {0}")]
    UnknownRule(String),

    /// A threshold value is unusable.
    #[error("invalid threshold for {rule}: {message}")]
    InvalidThreshold { rule: &'static str, message: String },

    /// Two thresholds contradict each other.
    #[error("contradictory thresholds: {0}")]
    Contradiction(String),

    /// An environment override could not be parsed.
    #[error("invalid value for {var}: {message}")]
    InvalidEnvVar { var: String, message: String },
}

/// Numeric thresholds backing the rule table.
///
/// Defaults follow common EPON ONU optics expectations; deployments
/// override them per rule id via [`ThresholdConfig::from_rule_map`] or
/// the `PONWATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    /// RX power below this is critical (dBm).
    pub rx_power_floor_dbm: f64,
    /// RX power below this (but at or above the floor) is a warning (dBm).
    pub rx_power_low_dbm: f64,
    /// SNR below this is critical (dB).
    pub snr_floor_db: f64,
    /// SNR below this (but at or above the floor) is a warning (dB).
    pub snr_low_db: f64,
    /// Post-FEC BER above this is critical.
    pub ber_post_fec_max: f64,
    /// Pre-FEC BER above this is critical (beyond FEC's correction
    /// capability).
    pub ber_pre_fec_max: f64,
    /// Pre-FEC BER above this (but at or below the max) is a warning.
    pub ber_pre_fec_warn: f64,
    /// Temperature above this is a warning (°C).
    pub temperature_max_c: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            rx_power_floor_dbm: -28.0,
            rx_power_low_dbm: -25.0,
            snr_floor_db: 12.0,
            snr_low_db: 15.0,
            ber_post_fec_max: 1e-6,
            ber_pre_fec_max: 1e-3,
            ber_pre_fec_warn: 1e-4,
            temperature_max_c: 75.0,
        }
    }
}

impl ThresholdConfig {
    /// Apply per-rule overrides from a rule-id → value map, then validate.
    ///
    /// Unknown rule ids are rejected rather than ignored so a typo in a
    /// deployment config cannot silently leave a default in place.
    pub fn from_rule_map(overrides: &HashMap<String, f64>) -> Result<Self, RuleConfigError> {
        let mut cfg = Self::default();
        for (key, value) in overrides {
            let rule: RuleId = key
                .parse()
                .map_err(|_| RuleConfigError::UnknownRule(key.clone()))?;
            match rule {
                RuleId::RxPowerFloor => cfg.rx_power_floor_dbm = *value,
                RuleId::RxPowerLow => cfg.rx_power_low_dbm = *value,
                RuleId::SnrFloor => cfg.snr_floor_db = *value,
                RuleId::SnrLow => cfg.snr_low_db = *value,
                RuleId::BerPostFec => cfg.ber_post_fec_max = *value,
                RuleId::BerPreFecMax => cfg.ber_pre_fec_max = *value,
                RuleId::BerPreFec => cfg.ber_pre_fec_warn = *value,
                RuleId::TemperatureHigh => cfg.temperature_max_c = *value,
                // State rules carry no numeric threshold.
                RuleId::DspFailed
                | RuleId::DspAdapting
                | RuleId::OperDown
                | RuleId::OperDegraded => {
                    return Err(RuleConfigError::InvalidThreshold {
                        rule: rule.as_str(),
                        message: "state rule takes no numeric threshold".to_string(),
                    })
                }
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load overrides from `PONWATCH_*` environment variables.
    pub fn from_env() -> Result<Self, RuleConfigError> {
        let mut cfg = Self::default();
        cfg.rx_power_floor_dbm = env_f64("PONWATCH_RX_POWER_FLOOR_DBM", cfg.rx_power_floor_dbm)?;
        cfg.rx_power_low_dbm = env_f64("PONWATCH_RX_POWER_LOW_DBM", cfg.rx_power_low_dbm)?;
        cfg.snr_floor_db = env_f64("PONWATCH_SNR_FLOOR_DB", cfg.snr_floor_db)?;
        cfg.snr_low_db = env_f64("PONWATCH_SNR_LOW_DB", cfg.snr_low_db)?;
        cfg.ber_post_fec_max = env_f64("PONWATCH_BER_POST_FEC_MAX", cfg.ber_post_fec_max)?;
        cfg.ber_pre_fec_max = env_f64("PONWATCH_BER_PRE_FEC_MAX", cfg.ber_pre_fec_max)?;
        cfg.ber_pre_fec_warn = env_f64("PONWATCH_BER_PRE_FEC_WARN", cfg.ber_pre_fec_warn)?;
        cfg.temperature_max_c = env_f64("PONWATCH_TEMPERATURE_MAX_C", cfg.temperature_max_c)?;
        cfg.validate()?;
        info!(?cfg, "threshold configuration loaded");
        Ok(cfg)
    }

    /// Check internal consistency of the threshold table.
    pub fn validate(&self) -> Result<(), RuleConfigError> {
        let numeric = [
            (RuleId::RxPowerFloor, self.rx_power_floor_dbm),
            (RuleId::RxPowerLow, self.rx_power_low_dbm),
            (RuleId::SnrFloor, self.snr_floor_db),
            (RuleId::SnrLow, self.snr_low_db),
            (RuleId::BerPostFec, self.ber_post_fec_max),
            (RuleId::BerPreFecMax, self.ber_pre_fec_max),
            (RuleId::BerPreFec, self.ber_pre_fec_warn),
            (RuleId::TemperatureHigh, self.temperature_max_c),
        ];
        for (rule, value) in numeric {
            if !value.is_finite() {
                return Err(RuleConfigError::InvalidThreshold {
                    rule: rule.as_str(),
                    message: format!("must be finite, got {value}"),
                });
            }
        }
        if self.rx_power_floor_dbm >= self.rx_power_low_dbm {
            return Err(RuleConfigError::Contradiction(format!(
                "rx-power-floor ({}) must be below rx-power-low ({})",
                self.rx_power_floor_dbm, self.rx_power_low_dbm
            )));
        }
        if self.snr_floor_db >= self.snr_low_db {
            return Err(RuleConfigError::Contradiction(format!(
                "snr-floor ({}) must be below snr-low ({})",
                self.snr_floor_db, self.snr_low_db
            )));
        }
        if self.ber_post_fec_max <= 0.0 || self.ber_pre_fec_max <= 0.0 || self.ber_pre_fec_warn <= 0.0
        {
            return Err(RuleConfigError::Contradiction(
                "BER bounds must be positive".to_string(),
            ));
        }
        if self.ber_pre_fec_warn >= self.ber_pre_fec_max {
            return Err(RuleConfigError::Contradiction(format!(
                "ber-pre-fec ({}) must be below ber-pre-fec-max ({})",
                self.ber_pre_fec_warn, self.ber_pre_fec_max
            )));
        }
        Ok(())
    }
}

/// Default background refresh interval in seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Default session-tier max-age in seconds.
pub const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 120;

/// Default external-fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Default number of retained records per ONU.
pub const DEFAULT_HISTORY_DEPTH: usize = 5;

/// Timing and sizing knobs for the orchestrator and refresher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Max-age for session-tier cache hits.
    pub session_max_age: Duration,
    /// Background refresher period; also the background tier's max-age.
    pub refresh_interval: Duration,
    /// Bound on the external telemetry fetch.
    pub fetch_timeout: Duration,
    /// Raw records retained per ONU for trend consumers.
    pub history_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            session_max_age: Duration::from_secs(DEFAULT_SESSION_MAX_AGE_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            history_depth: DEFAULT_HISTORY_DEPTH,
        }
    }
}

impl PipelineConfig {
    /// Load overrides from `PONWATCH_*` environment variables.
    pub fn from_env() -> Result<Self, RuleConfigError> {
        let defaults = Self::default();
        let cfg = Self {
            session_max_age: Duration::from_secs(env_u64(
                "PONWATCH_SESSION_MAX_AGE_SECS",
                defaults.session_max_age.as_secs(),
            )?),
            refresh_interval: Duration::from_secs(env_u64(
                "PONWATCH_REFRESH_INTERVAL_SECS",
                defaults.refresh_interval.as_secs(),
            )?),
            fetch_timeout: Duration::from_secs(env_u64(
                "PONWATCH_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            history_depth: env_u64("PONWATCH_HISTORY_DEPTH", defaults.history_depth as u64)?
                as usize,
        };
        cfg.validate()?;
        info!(?cfg, "pipeline configuration loaded");
        Ok(cfg)
    }

    /// Reject zero intervals and empty history windows.
    pub fn validate(&self) -> Result<(), RuleConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(RuleConfigError::Contradiction(
                "refresh interval must be non-zero".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(RuleConfigError::Contradiction(
                "fetch timeout must be non-zero".to_string(),
            ));
        }
        if self.history_depth == 0 {
            return Err(RuleConfigError::Contradiction(
                "history depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_f64(var: &str, default: f64) -> Result<f64, RuleConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| RuleConfigError::InvalidEnvVar {
            var: var.to_string(),
            message: format!("expected a number, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_u64(var: &str, default: u64) -> Result<u64, RuleConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| RuleConfigError::InvalidEnvVar {
            var: var.to_string(),
            message: format!("expected an integer, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
