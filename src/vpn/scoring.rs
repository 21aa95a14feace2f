//! Endpoint scoring
//!
//! Pure functions over (endpoint, measurement, game context). Lower scores
//! are better. Known games replace the default multi-factor formula with a
//! strategy of their own; ties always break on endpoint id so a ranking is
//! reproducible.

use serde::Serialize;

use crate::config::SelectorConfig;
use crate::monitor::quality::{QualityMetrics, StabilityTier};

use super::profiles::OptimizationProfile;
use super::servers::Endpoint;

const PING_WEIGHT: f64 = 0.5;
const LOAD_WEIGHT: f64 = 0.3;
const REGION_WEIGHT: f64 = 0.2;

const BULLET_ECHO_COUNTRIES: &[&str] = &["Germany", "Netherlands", "France", "United Kingdom"];

/// Ping bucket, 1 (best) to 5.
pub fn ping_tier(ping_ms: u32) -> f64 {
    match ping_ms {
        p if p < 20 => 1.0,
        p if p < 50 => 2.0,
        p if p < 100 => 3.0,
        p if p < 150 => 4.0,
        _ => 5.0,
    }
}

/// Load normalized to 0-5.
pub fn load_score(load: u8) -> f64 {
    f64::from(load) / 20.0
}

pub fn region_tier(country: &str) -> f64 {
    match country {
        "Germany" | "Netherlands" | "France" => 1.0,
        "United Kingdom" => 1.5,
        "United States" => 2.0,
        _ => 3.0,
    }
}

/// Game-specific replacement for the default formula.
#[derive(Debug, Clone, PartialEq)]
pub enum GameStrategy {
    /// Only the listed countries, lowest ping wins.
    RegionLowestPing { countries: &'static [&'static str] },
    /// Weighted blend of raw ping and load.
    PingLoadBlend { ping_weight: f64, load_weight: f64 },
    /// Only endpoints under the ceiling, lowest ping wins.
    LatencyCeiling { max_ping_ms: u32 },
}

impl GameStrategy {
    /// Strategy for a game name, matched case-insensitively.
    pub fn for_game(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "bullet echo" => Some(GameStrategy::RegionLowestPing {
                countries: BULLET_ECHO_COUNTRIES,
            }),
            "fortnite" => Some(GameStrategy::PingLoadBlend {
                ping_weight: 0.7,
                load_weight: 0.3,
            }),
            "valorant" => Some(GameStrategy::LatencyCeiling { max_ping_ms: 50 }),
            _ => None,
        }
    }

    fn admits(&self, endpoint: &Endpoint, ping_ms: u32) -> bool {
        match self {
            GameStrategy::RegionLowestPing { countries } => {
                countries.iter().any(|c| *c == endpoint.country)
            }
            GameStrategy::PingLoadBlend { .. } => true,
            GameStrategy::LatencyCeiling { max_ping_ms } => ping_ms < *max_ping_ms,
        }
    }

    fn score(&self, endpoint: &Endpoint, ping_ms: u32) -> f64 {
        match self {
            GameStrategy::RegionLowestPing { .. } | GameStrategy::LatencyCeiling { .. } => {
                f64::from(ping_ms)
            }
            GameStrategy::PingLoadBlend {
                ping_weight,
                load_weight,
            } => f64::from(ping_ms) * ping_weight + f64::from(endpoint.load) * load_weight,
        }
    }
}

/// What is known about one candidate when it is scored: the ping from the
/// current round and the metrics of its quality window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub ping_ms: u32,
    pub quality: QualityMetrics,
}

impl Measurement {
    pub fn new(ping_ms: u32, quality: QualityMetrics) -> Self {
        Self { ping_ms, quality }
    }

    /// A fresh ping with no window history.
    pub fn from_ping(ping_ms: u32) -> Self {
        Self::new(ping_ms, QualityMetrics::default())
    }
}

/// Game the user is playing, as resolved by the detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameContext {
    pub name: String,
    pub profile: Option<OptimizationProfile>,
}

impl GameContext {
    pub fn new(name: impl Into<String>, profile: Option<OptimizationProfile>) -> Self {
        Self {
            name: name.into(),
            profile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEndpoint {
    pub endpoint: Endpoint,
    pub ping_ms: u32,
    pub score: f64,
    /// Stability of the endpoint's window when it was scored.
    pub stability: StabilityTier,
}

/// Stateless scoring policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringPolicy;

impl ScoringPolicy {
    pub fn strategy_for(&self, context: Option<&GameContext>) -> Option<GameStrategy> {
        context.and_then(|c| GameStrategy::for_game(&c.name))
    }

    /// Default multi-factor score: 50% ping tier, 30% load, 20% region.
    pub fn default_score(&self, endpoint: &Endpoint, ping_ms: u32) -> f64 {
        PING_WEIGHT * ping_tier(ping_ms)
            + LOAD_WEIGHT * load_score(endpoint.load)
            + REGION_WEIGHT * region_tier(&endpoint.country)
    }

    pub fn score(
        &self,
        endpoint: &Endpoint,
        measurement: &Measurement,
        context: Option<&GameContext>,
    ) -> f64 {
        self.score_with(self.strategy_for(context).as_ref(), endpoint, measurement)
    }

    fn score_with(
        &self,
        strategy: Option<&GameStrategy>,
        endpoint: &Endpoint,
        measurement: &Measurement,
    ) -> f64 {
        match strategy {
            Some(strategy) => strategy.score(endpoint, measurement.ping_ms),
            None => self.default_score(endpoint, measurement.ping_ms),
        }
    }

    /// Rank measured candidates best first.
    pub fn rank(
        &self,
        measured: &[(Endpoint, Measurement)],
        context: Option<&GameContext>,
    ) -> Vec<ScoredEndpoint> {
        let mut pool: Vec<&(Endpoint, Measurement)> = measured.iter().collect();

        if let Some(region) = context
            .and_then(|c| c.profile.as_ref())
            .and_then(|p| p.region_filter())
        {
            let preferred: Vec<_> = pool
                .iter()
                .copied()
                .filter(|(e, _)| e.matches_region(region))
                .collect();
            if !preferred.is_empty() {
                pool = preferred;
            }
        }

        let strategy = self.strategy_for(context);
        if let Some(ref strategy) = strategy {
            let admitted: Vec<_> = pool
                .iter()
                .copied()
                .filter(|(e, m)| strategy.admits(e, m.ping_ms))
                .collect();
            if !admitted.is_empty() {
                pool = admitted;
            }
        }

        let mut ranked: Vec<ScoredEndpoint> = pool
            .into_iter()
            .map(|(endpoint, measurement)| ScoredEndpoint {
                score: self.score_with(strategy.as_ref(), endpoint, measurement),
                endpoint: endpoint.clone(),
                ping_ms: measurement.ping_ms,
                stability: measurement.quality.stability,
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.endpoint.id.cmp(&b.endpoint.id))
        });
        ranked
    }
}

/// Hysteresis test for replacing the locked endpoint.
///
/// Both thresholds are exclusive; either one is enough.
pub fn should_switch(current_ping_ms: u32, candidate_ping_ms: u32, config: &SelectorConfig) -> bool {
    let improvement_ms = i64::from(current_ping_ms) - i64::from(candidate_ping_ms);
    let improvement_pct = if current_ping_ms == 0 {
        0.0
    } else {
        improvement_ms as f64 / f64::from(current_ping_ms) * 100.0
    };
    improvement_ms > config.min_improvement_ms || improvement_pct > config.min_improvement_pct
}
