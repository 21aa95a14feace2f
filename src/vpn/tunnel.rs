//! Tunnel connection management
//!
//! The engine never speaks a VPN protocol itself. A [`TunnelDriver`] per
//! protocol brings the tunnel up and down; [`VpnConnection`] picks the driver
//! matching the request and tracks the connection state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::EngineError;

use super::profiles::OptimizationProfile;
use super::servers::Endpoint;

/// Default DNS servers when no game profile overrides them
pub const DEFAULT_DNS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnProtocol {
    WireGuard,
    OpenVpn,
    IkeV2,
}

impl Default for VpnProtocol {
    fn default() -> Self {
        VpnProtocol::WireGuard
    }
}

impl VpnProtocol {
    /// Convert to FFI-friendly integer code
    pub fn as_code(&self) -> i32 {
        match self {
            VpnProtocol::WireGuard => 0,
            VpnProtocol::OpenVpn => 1,
            VpnProtocol::IkeV2 => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(VpnProtocol::WireGuard),
            1 => Some(VpnProtocol::OpenVpn),
            2 => Some(VpnProtocol::IkeV2),
            _ => None,
        }
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnProtocol::WireGuard => write!(f, "WireGuard"),
            VpnProtocol::OpenVpn => write!(f, "OpenVPN"),
            VpnProtocol::IkeV2 => write!(f, "IKEv2"),
        }
    }
}

/// Everything a driver needs to bring a tunnel up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunnelRequest {
    pub endpoint: Endpoint,
    pub protocol: VpnProtocol,
    pub mtu: u16,
    pub dns: Vec<String>,
    pub split_tunneling: bool,
}

impl TunnelRequest {
    /// Build a request, taking protocol, DNS and split tunneling from the game
    /// profile. Without a profile the request uses `fallback` as its protocol.
    pub fn new(
        endpoint: Endpoint,
        profile: Option<&OptimizationProfile>,
        mtu: u16,
        fallback: VpnProtocol,
    ) -> Self {
        match profile {
            Some(profile) => Self {
                endpoint,
                protocol: profile.preferred_protocol,
                mtu,
                dns: profile
                    .custom_dns
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DNS.iter().map(|s| s.to_string()).collect()),
                split_tunneling: profile.split_tunneling,
            },
            None => Self {
                endpoint,
                protocol: fallback,
                mtu,
                dns: DEFAULT_DNS.iter().map(|s| s.to_string()).collect(),
                split_tunneling: false,
            },
        }
    }
}

/// Opaque tunnel capability for one protocol.
#[async_trait]
pub trait TunnelDriver: Send + Sync {
    fn protocol(&self) -> VpnProtocol;

    async fn connect(&self, request: &TunnelRequest) -> Result<(), EngineError>;

    async fn disconnect(&self) -> Result<(), EngineError>;
}

/// Tunnel connection state
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected {
        since: Instant,
        endpoint_id: String,
        protocol: VpnProtocol,
        mtu: u16,
    },
    Disconnecting,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ConnectionState::Error(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn status_text(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting to server...",
            ConnectionState::Connected { .. } => "Connected",
            ConnectionState::Disconnecting => "Disconnecting...",
            ConnectionState::Error(_) => "Error",
        }
    }

    /// Convert to FFI-friendly integer code
    pub fn as_code(&self) -> i32 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected { .. } => 2,
            ConnectionState::Disconnecting => 3,
            ConnectionState::Error(_) => -1,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

/// Tunnel connection manager
pub struct VpnConnection {
    state: Arc<Mutex<ConnectionState>>,
    drivers: Vec<Arc<dyn TunnelDriver>>,
    active: Mutex<Option<Arc<dyn TunnelDriver>>>,
}

impl VpnConnection {
    pub fn new(drivers: Vec<Arc<dyn TunnelDriver>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            drivers,
            active: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    pub fn supports(&self, protocol: VpnProtocol) -> bool {
        self.driver_for(protocol).is_some()
    }

    fn driver_for(&self, protocol: VpnProtocol) -> Option<Arc<dyn TunnelDriver>> {
        self.drivers
            .iter()
            .find(|d| d.protocol() == protocol)
            .cloned()
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.lock().await = state.clone();
        announce(&state);
    }

    /// Bring the tunnel up with the driver for the requested protocol.
    pub async fn connect(&self, request: TunnelRequest) -> Result<(), EngineError> {
        let driver = {
            let mut state = self.state.lock().await;
            if state.is_connected() || state.is_connecting() {
                return Err(EngineError::AlreadyConnected);
            }
            let driver = self.driver_for(request.protocol);
            if driver.is_some() {
                // Claimed under the same guard so a concurrent connect sees it.
                *state = ConnectionState::Connecting;
            }
            driver
        };

        let Some(driver) = driver else {
            let e = EngineError::Tunnel(format!("No driver for {}", request.protocol));
            self.set_state(ConnectionState::Error(e.to_string())).await;
            return Err(e);
        };

        log::info!(
            "Connecting to {} via {} (mtu {})",
            request.endpoint.id,
            request.protocol,
            request.mtu
        );
        announce(&ConnectionState::Connecting);

        if let Err(e) = driver.connect(&request).await {
            self.set_state(ConnectionState::Error(e.to_string())).await;
            return Err(e);
        }

        *self.active.lock().await = Some(driver);
        self.set_state(ConnectionState::Connected {
            since: Instant::now(),
            endpoint_id: request.endpoint.id.clone(),
            protocol: request.protocol,
            mtu: request.mtu,
        })
        .await;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        let Some(driver) = self.active.lock().await.take() else {
            return Err(EngineError::NotConnected);
        };

        self.set_state(ConnectionState::Disconnecting).await;
        let result = driver.disconnect().await;
        if let Err(ref e) = result {
            log::warn!("Driver reported error on disconnect: {}", e);
        }
        self.set_state(ConnectionState::Disconnected).await;
        result
    }
}

/// Report a state change to the host. Called with the state lock released.
fn announce(state: &ConnectionState) {
    log::info!("Connection state: {:?}", state);
    if let Some(msg) = state.error_message() {
        crate::callbacks::fire_error(crate::error::ERROR_TUNNEL, msg);
    }
    crate::callbacks::fire_connection_state(state.as_code());
}
