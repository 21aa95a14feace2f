//! Network monitoring
//!
//! - probe.rs: TCP latency probe and keep-alives
//! - quality.rs: rolling quality windows and stability tiers
//! - stabilizer.rs: connectivity events, reconnection backoff, monitor loops

pub mod probe;
pub mod quality;
pub mod stabilizer;

pub use probe::{Prober, TcpProber, UNREACHABLE_PING_MS};
pub use quality::{ProbeSample, QualityAggregator, QualityMetrics, QualityWindow, StabilityTier};
pub use stabilizer::{
    ConnectivityEvent, ConnectivityProbe, HostConnectivity, ReconnectOutcome, StabilityState,
    Stabilizer,
};
