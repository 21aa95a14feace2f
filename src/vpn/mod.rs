//! Server selection and tunnel control
//!
//! ## Architecture
//!
//! - servers.rs: endpoint catalog (copy-on-write candidate store)
//! - scoring.rs: multi-factor scoring and per-game strategies
//! - selector.rs: periodic evaluation loop, hysteresis, manual override
//! - profiles.rs: game detection and optimization profiles
//! - tunnel.rs: tunnel driver trait and connection state machine

pub mod profiles;
pub mod scoring;
pub mod selector;
pub mod servers;
pub mod tunnel;

pub use profiles::{GameDetector, GameInfo, OptimizationProfile, StaticGameDetector};
pub use scoring::{GameContext, GameStrategy, Measurement, ScoredEndpoint, ScoringPolicy};
pub use selector::{ActiveEndpoint, Decision, SelectionEvent, SelectionState, Selector, SelectorState};
pub use servers::{CandidateStore, Endpoint};
pub use tunnel::{ConnectionState, TunnelDriver, TunnelRequest, VpnConnection, VpnProtocol};
