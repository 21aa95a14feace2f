//! Rolling quality windows and stability tiers.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;

use super::probe::UNREACHABLE_PING_MS;

/// A single probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub timestamp: DateTime<Utc>,
    /// Round-trip time, or the unreachable sentinel.
    pub rtt_ms: u32,
}

impl ProbeSample {
    pub fn new(rtt_ms: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            rtt_ms,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.rtt_ms >= UNREACHABLE_PING_MS
    }
}

/// Coarse connection-quality bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityTier {
    Excellent,
    Stable,
    Degraded,
    Unstable,
}

impl Default for StabilityTier {
    fn default() -> Self {
        StabilityTier::Stable
    }
}

impl StabilityTier {
    /// Tier from ping spread and loss ratio over a window.
    pub fn from_window(variation_ms: u32, packet_loss: f64) -> Self {
        match (variation_ms, packet_loss) {
            (v, _) if v < 10 => StabilityTier::Excellent,
            (v, l) if v < 20 && l < 0.005 => StabilityTier::Excellent,
            (v, l) if v < 50 && l < 0.01 => StabilityTier::Stable,
            (v, l) if v < 100 && l < 0.02 => StabilityTier::Degraded,
            _ => StabilityTier::Unstable,
        }
    }

    /// Tier from the latest ping and the window's loss ratio.
    pub fn from_ping_and_loss(ping_ms: u32, packet_loss: f64) -> Self {
        if ping_ms < 50 && packet_loss < 0.001 {
            StabilityTier::Excellent
        } else if ping_ms < 100 && packet_loss < 0.005 {
            StabilityTier::Stable
        } else if ping_ms < 200 && packet_loss < 0.01 {
            StabilityTier::Degraded
        } else {
            StabilityTier::Unstable
        }
    }

    /// Tier from the link bandwidth reported by the OS.
    pub fn from_bandwidth(downstream_kbps: u32, upstream_kbps: u32) -> Self {
        if downstream_kbps > 10_000 && upstream_kbps > 1_000 {
            StabilityTier::Excellent
        } else if downstream_kbps > 5_000 && upstream_kbps > 500 {
            StabilityTier::Stable
        } else if downstream_kbps > 1_000 && upstream_kbps > 100 {
            StabilityTier::Degraded
        } else {
            StabilityTier::Unstable
        }
    }

    /// Convert to FFI-friendly integer code
    pub fn as_code(&self) -> i32 {
        match self {
            StabilityTier::Excellent => 0,
            StabilityTier::Stable => 1,
            StabilityTier::Degraded => 2,
            StabilityTier::Unstable => 3,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StabilityTier::Excellent => "Excellent",
            StabilityTier::Stable => "Stable",
            StabilityTier::Degraded => "Degraded",
            StabilityTier::Unstable => "Unstable",
        }
    }

    /// User-facing advice for this tier.
    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            StabilityTier::Unstable => &[
                "Try switching to a different server",
                "Check your internet connection",
                "Consider using mobile data if on WiFi",
            ],
            StabilityTier::Degraded => &[
                "Connection quality is reduced",
                "Consider switching to a closer server",
            ],
            StabilityTier::Stable => &["Connection is stable"],
            StabilityTier::Excellent => &["Excellent connection quality", "Optimal for gaming"],
        }
    }
}

impl std::fmt::Display for StabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Metrics derived from one endpoint's window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub avg_ping_ms: u32,
    /// Max minus min RTT in the window.
    pub variation_ms: u32,
    /// Fraction of samples at or above the timeout threshold (0.0 - 1.0).
    pub packet_loss: f64,
    pub sample_count: usize,
    pub stability: StabilityTier,
}

impl QualityMetrics {
    /// Overall network quality score (0-100, higher is better).
    pub fn score(&self) -> u32 {
        let ping_score: u32 = match self.avg_ping_ms {
            p if p < 20 => 100,
            p if p < 50 => 90,
            p if p < 100 => 70,
            p if p < 150 => 50,
            _ => 20,
        };
        let loss_score: u32 = match self.packet_loss {
            l if l < 0.001 => 100,
            l if l < 0.005 => 80,
            l if l < 0.01 => 60,
            l if l < 0.02 => 40,
            _ => 20,
        };
        (ping_score * 7 + loss_score * 3) / 10
    }
}

/// Bounded FIFO of the most recent samples for one endpoint.
#[derive(Debug, Clone)]
pub struct QualityWindow {
    samples: VecDeque<ProbeSample>,
    capacity: usize,
}

impl QualityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once full.
    pub fn push(&mut self, sample: ProbeSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> impl Iterator<Item = &ProbeSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&ProbeSample> {
        self.samples.back()
    }

    pub fn average_ping(&self) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }
        let total: u64 = self.samples.iter().map(|s| u64::from(s.rtt_ms)).sum();
        (total / self.samples.len() as u64) as u32
    }

    pub fn variation(&self) -> u32 {
        if self.samples.len() < 2 {
            return 0;
        }
        let max = self.samples.iter().map(|s| s.rtt_ms).max().unwrap_or(0);
        let min = self.samples.iter().map(|s| s.rtt_ms).min().unwrap_or(0);
        max - min
    }

    /// Loss ratio, or 0 until `min_samples` have been collected.
    pub fn packet_loss(&self, threshold_ms: u32, min_samples: usize) -> f64 {
        if self.samples.len() < min_samples || self.samples.is_empty() {
            return 0.0;
        }
        let timeouts = self
            .samples
            .iter()
            .filter(|s| s.rtt_ms >= threshold_ms)
            .count();
        timeouts as f64 / self.samples.len() as f64
    }

    pub fn metrics(&self, threshold_ms: u32, min_samples: usize) -> QualityMetrics {
        if self.samples.is_empty() {
            return QualityMetrics::default();
        }
        let variation_ms = self.variation();
        let packet_loss = self.packet_loss(threshold_ms, min_samples);
        QualityMetrics {
            avg_ping_ms: self.average_ping(),
            variation_ms,
            packet_loss,
            sample_count: self.samples.len(),
            stability: StabilityTier::from_window(variation_ms, packet_loss),
        }
    }
}

/// Per-endpoint rolling windows.
pub struct QualityAggregator {
    windows: RwLock<HashMap<String, QualityWindow>>,
    config: QualityConfig,
}

impl QualityAggregator {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn record(&self, endpoint_id: &str, sample: ProbeSample) {
        let mut windows = self.windows.write();
        windows
            .entry(endpoint_id.to_string())
            .or_insert_with(|| QualityWindow::new(self.config.window_capacity))
            .push(sample);
    }

    /// Metrics for an endpoint; defaults when nothing was recorded.
    pub fn metrics(&self, endpoint_id: &str) -> QualityMetrics {
        self.windows
            .read()
            .get(endpoint_id)
            .map(|w| {
                w.metrics(
                    self.config.timeout_threshold_ms,
                    self.config.min_loss_samples,
                )
            })
            .unwrap_or_default()
    }

    /// RTT history, oldest first.
    pub fn history(&self, endpoint_id: &str) -> Vec<u32> {
        self.windows
            .read()
            .get(endpoint_id)
            .map(|w| w.samples().map(|s| s.rtt_ms).collect())
            .unwrap_or_default()
    }

    pub fn reset(&self, endpoint_id: &str) {
        self.windows.write().remove(endpoint_id);
    }

    pub fn tracked(&self) -> usize {
        self.windows.read().len()
    }
}

impl Default for QualityAggregator {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}
