//! Game detection and per-game optimization profiles.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::tunnel::VpnProtocol;

/// Region value meaning "no preference".
pub const AUTO_REGION: &str = "Auto";

/// Package-name fragments that suggest a game.
const GAME_KEYWORDS: &[&str] = &[
    "game", "play", "battle", "war", "fight", "shoot", "racing", "puzzle", "adventure", "action",
    "strategy", "rpg", "mmo", "clash", "craft", "legends", "mobile", "online",
];

/// Tunnel settings tuned for one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationProfile {
    pub preferred_protocol: VpnProtocol,
    /// Country or continent, or [`AUTO_REGION`]
    pub preferred_region: String,
    pub custom_dns: Option<Vec<String>>,
    pub split_tunneling: bool,
}

impl OptimizationProfile {
    /// Region to prefilter candidates by, if any.
    pub fn region_filter(&self) -> Option<&str> {
        let region = self.preferred_region.trim();
        if region.is_empty() || region.eq_ignore_ascii_case(AUTO_REGION) {
            None
        } else {
            Some(region)
        }
    }

    fn generic() -> Self {
        Self {
            preferred_protocol: VpnProtocol::WireGuard,
            preferred_region: AUTO_REGION.to_string(),
            custom_dns: Some(dns(&["8.8.8.8", "1.1.1.1"])),
            split_tunneling: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub package_name: String,
    pub name: String,
    pub is_running: bool,
    pub optimization_profile: Option<OptimizationProfile>,
}

/// Resolves the game in the foreground and its profile.
pub trait GameDetector: Send + Sync {
    fn current_game(&self) -> Option<GameInfo>;

    fn profile_for(&self, package_name: &str) -> Option<OptimizationProfile>;
}

/// Detector over a fixed table of known games.
///
/// The host reports running packages; known games win over the keyword
/// heuristic, which yields a generic profile.
pub struct StaticGameDetector {
    known: Vec<GameInfo>,
    running: RwLock<Vec<String>>,
}

impl StaticGameDetector {
    pub fn new() -> Self {
        Self {
            known: known_games(),
            running: RwLock::new(Vec::new()),
        }
    }

    pub fn set_running_packages(&self, packages: Vec<String>) {
        *self.running.write() = packages;
    }

    pub fn known_games(&self) -> &[GameInfo] {
        &self.known
    }

    fn known(&self, package_name: &str) -> Option<&GameInfo> {
        self.known.iter().find(|g| g.package_name == package_name)
    }
}

impl Default for StaticGameDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl GameDetector for StaticGameDetector {
    fn current_game(&self) -> Option<GameInfo> {
        let running = self.running.read();

        if let Some(game) = running.iter().find_map(|p| self.known(p)) {
            return Some(GameInfo {
                is_running: true,
                ..game.clone()
            });
        }

        running
            .iter()
            .find(|p| is_likely_game_package(p))
            .map(|p| GameInfo {
                package_name: p.clone(),
                name: "Unknown Game".to_string(),
                is_running: true,
                optimization_profile: Some(OptimizationProfile::generic()),
            })
    }

    fn profile_for(&self, package_name: &str) -> Option<OptimizationProfile> {
        self.known(package_name)
            .and_then(|g| g.optimization_profile.clone())
    }
}

pub fn is_likely_game_package(package_name: &str) -> bool {
    let lower = package_name.to_lowercase();
    GAME_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn dns(servers: &[&str]) -> Vec<String> {
    servers.iter().map(|s| s.to_string()).collect()
}

fn game(
    package_name: &str,
    name: &str,
    protocol: VpnProtocol,
    region: &str,
    custom_dns: &[&str],
    split_tunneling: bool,
) -> GameInfo {
    GameInfo {
        package_name: package_name.to_string(),
        name: name.to_string(),
        is_running: false,
        optimization_profile: Some(OptimizationProfile {
            preferred_protocol: protocol,
            preferred_region: region.to_string(),
            custom_dns: Some(dns(custom_dns)),
            split_tunneling,
        }),
    }
}

fn known_games() -> Vec<GameInfo> {
    use VpnProtocol::*;
    vec![
        game("com.zeptolab.bulletecho.google", "Bullet Echo", WireGuard, "Europe", &["8.8.8.8", "1.1.1.1"], false),
        game("com.epicgames.fortnite", "Fortnite", WireGuard, "United States", &["8.8.8.8", "8.8.4.4"], true),
        game("com.riotgames.league.wildrift", "Wild Rift", WireGuard, "Europe", &["1.1.1.1", "1.0.0.1"], false),
        game("com.garena.game.codm", "Call of Duty Mobile", WireGuard, "United States", &["8.8.8.8", "8.8.4.4"], false),
        game("com.pubg.imobile", "PUBG Mobile", WireGuard, "Asia", &["8.8.8.8", "1.1.1.1"], false),
        game("com.supercell.clashofclans", "Clash of Clans", OpenVpn, "Europe", &["8.8.8.8", "8.8.4.4"], true),
    ]
}
