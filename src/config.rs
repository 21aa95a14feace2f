//! Engine configuration.
//!
//! Every knob has a default matching the shipped policy, so the host may pass
//! `{}` (or only the fields it wants to override) across the C ABI.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub stabilizer: StabilizerConfig,
    /// Override for the preferences file; platform data dir when absent.
    #[serde(default)]
    pub preferences_path: Option<String>,
}

impl EngineConfig {
    /// Parse a JSON document, filling every omitted field with its default.
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| EngineError::Config(format!("Invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.quality.window_capacity == 0 {
            return Err(EngineError::Config(
                "quality.window_capacity must be at least 1".into(),
            ));
        }
        if self.selector.evaluation_interval_secs == 0 || self.selector.error_backoff_secs == 0 {
            return Err(EngineError::Config(
                "selector intervals must be non-zero".into(),
            ));
        }
        if self.stabilizer.sample_interval_secs == 0
            || self.stabilizer.monitor_interval_secs == 0
            || self.stabilizer.keep_alive_interval_secs == 0
        {
            return Err(EngineError::Config(
                "stabilizer intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Latency probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Port used for the TCP handshake measurement (default: 443)
    #[serde(default = "default_probe_port")]
    pub port: u16,
    /// Handshake timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Port used by the reachability fallback (default: 7, echo)
    #[serde(default = "default_reachability_port")]
    pub reachability_port: u16,
    /// Reachability fallback timeout in milliseconds (default: 5000)
    #[serde(default = "default_reachability_timeout_ms")]
    pub reachability_timeout_ms: u64,
    /// Keep-alive connect timeout in milliseconds (default: 3000)
    #[serde(default = "default_keep_alive_timeout_ms")]
    pub keep_alive_timeout_ms: u64,
}

fn default_probe_port() -> u16 {
    443
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_reachability_port() -> u16 {
    7
}
fn default_reachability_timeout_ms() -> u64 {
    5000
}
fn default_keep_alive_timeout_ms() -> u64 {
    3000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: default_probe_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reachability_port: default_reachability_port(),
            reachability_timeout_ms: default_reachability_timeout_ms(),
            keep_alive_timeout_ms: default_keep_alive_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }
}

/// Rolling-window settings for the quality aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Samples kept per endpoint (default: 60, one minute at 1 Hz)
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Samples at or above this RTT count as lost (default: 500)
    #[serde(default = "default_timeout_threshold_ms")]
    pub timeout_threshold_ms: u32,
    /// Samples required before loss is reported (default: 10)
    #[serde(default = "default_min_loss_samples")]
    pub min_loss_samples: usize,
}

fn default_window_capacity() -> usize {
    60
}
fn default_timeout_threshold_ms() -> u32 {
    500
}
fn default_min_loss_samples() -> usize {
    10
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            timeout_threshold_ms: default_timeout_threshold_ms(),
            min_loss_samples: default_min_loss_samples(),
        }
    }
}

/// Selector loop cadence and hysteresis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Seconds between evaluation cycles (default: 30)
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
    /// Seconds to wait after a failed cycle (default: 60)
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// Absolute improvement needed to switch, exclusive (default: 10)
    #[serde(default = "default_min_improvement_ms")]
    pub min_improvement_ms: i64,
    /// Relative improvement needed to switch, exclusive (default: 10.0)
    #[serde(default = "default_min_improvement_pct")]
    pub min_improvement_pct: f64,
    /// Start with auto-selection armed (default: true)
    #[serde(default = "default_auto_select")]
    pub auto_select: bool,
}

fn default_evaluation_interval_secs() -> u64 {
    30
}
fn default_error_backoff_secs() -> u64 {
    60
}
fn default_min_improvement_ms() -> i64 {
    10
}
fn default_min_improvement_pct() -> f64 {
    10.0
}
fn default_auto_select() -> bool {
    true
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: default_evaluation_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            min_improvement_ms: default_min_improvement_ms(),
            min_improvement_pct: default_min_improvement_pct(),
            auto_select: default_auto_select(),
        }
    }
}

impl SelectorConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Connectivity stabilizer cadence and reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizerConfig {
    /// Seconds between active-endpoint latency samples (default: 1)
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Seconds between active-endpoint quality checks (default: 10)
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Seconds between keep-alive probes (default: 30)
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    /// Reconnection attempts after a loss (default: 5)
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Wait before attempt `n` is `n * reconnect_step_secs` (default: 2)
    #[serde(default = "default_reconnect_step_secs")]
    pub reconnect_step_secs: u64,
    /// MTU sizes tried by the link tuner, in order
    #[serde(default = "default_mtu_candidates")]
    pub mtu_candidates: Vec<u16>,
}

fn default_sample_interval_secs() -> u64 {
    1
}
fn default_monitor_interval_secs() -> u64 {
    10
}
fn default_keep_alive_interval_secs() -> u64 {
    30
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_step_secs() -> u64 {
    2
}
fn default_mtu_candidates() -> Vec<u16> {
    vec![1500, 1400, 1300, 1200]
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_step_secs: default_reconnect_step_secs(),
            mtu_candidates: default_mtu_candidates(),
        }
    }
}

impl StabilizerConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.reconnect_step_secs * u64::from(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let parsed = EngineConfig::from_json("{}").expect("valid json");
        assert_eq!(parsed, EngineConfig::default());
        assert_eq!(EngineConfig::from_json("  ").expect("blank"), EngineConfig::default());

        assert_eq!(parsed.probe.port, 443);
        assert_eq!(parsed.quality.window_capacity, 60);
        assert_eq!(parsed.selector.evaluation_interval(), Duration::from_secs(30));
        assert_eq!(parsed.selector.error_backoff(), Duration::from_secs(60));
        assert_eq!(parsed.stabilizer.reconnect_attempts, 5);
        assert_eq!(parsed.stabilizer.sample_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let parsed = EngineConfig::from_json(
            r#"{"selector":{"evaluation_interval_secs":15},"probe":{"port":8443}}"#,
        )
        .expect("valid json");

        assert_eq!(parsed.selector.evaluation_interval_secs, 15);
        assert_eq!(parsed.selector.error_backoff_secs, 60);
        assert_eq!(parsed.probe.port, 8443);
        assert_eq!(parsed.probe.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn reconnect_delay_grows_linearly() {
        let cfg = StabilizerConfig::default();
        let delays: Vec<u64> = (1..=5).map(|n| cfg.reconnect_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn rejects_invalid_documents() {
        assert!(EngineConfig::from_json("{not-json}").is_err());
        assert!(EngineConfig::from_json(r#"{"quality":{"window_capacity":0}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"selector":{"error_backoff_secs":0}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"stabilizer":{"sample_interval_secs":0}}"#).is_err());
    }
}
