//! Shared fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::EngineError;
use crate::monitor::probe::Prober;
use crate::monitor::stabilizer::ConnectivityProbe;
use crate::vpn::servers::Endpoint;
use crate::vpn::tunnel::{TunnelDriver, TunnelRequest, VpnProtocol};

/// Serializes tests that touch the global callback registry.
pub static CALLBACK_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Endpoint whose hostname is `<id>.test`.
pub fn sample_endpoint(id: &str, ping_ms: u32, load: u8) -> Endpoint {
    Endpoint {
        id: id.to_string(),
        name: id.to_string(),
        country: "Germany".to_string(),
        city: "Frankfurt".to_string(),
        region: "Europe".to_string(),
        hostname: format!("{}.test", id),
        ping_ms,
        load,
        favorite: false,
    }
}

/// Prober with scripted latencies per address.
pub struct FakeProber {
    default_ping: u32,
    pings: Mutex<HashMap<String, u32>>,
    mtu_pings: Mutex<HashMap<u16, u32>>,
    delay: Mutex<Option<Duration>>,
    keep_alive_fails: AtomicBool,
    measure_calls: AtomicUsize,
    keep_alive_calls: AtomicUsize,
}

impl FakeProber {
    pub fn new(default_ping: u32) -> Self {
        Self {
            default_ping,
            pings: Mutex::new(HashMap::new()),
            mtu_pings: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            keep_alive_fails: AtomicBool::new(false),
            measure_calls: AtomicUsize::new(0),
            keep_alive_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_ping(&self, address: &str, ping_ms: u32) {
        self.pings.lock().insert(address.to_string(), ping_ms);
    }

    pub fn set_mtu_ping(&self, mtu: u16, ping_ms: u32) {
        self.mtu_pings.lock().insert(mtu, ping_ms);
    }

    /// Make every measurement take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn fail_keep_alive(&self, fail: bool) {
        self.keep_alive_fails.store(fail, Ordering::SeqCst);
    }

    pub fn measure_calls(&self) -> usize {
        self.measure_calls.load(Ordering::SeqCst)
    }

    pub fn keep_alive_calls(&self) -> usize {
        self.keep_alive_calls.load(Ordering::SeqCst)
    }

    fn ping_for(&self, address: &str) -> u32 {
        self.pings
            .lock()
            .get(address)
            .copied()
            .unwrap_or(self.default_ping)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn measure(&self, address: &str) -> u32 {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ping_for(address)
    }

    async fn measure_with_mtu(&self, address: &str, mtu: u16) -> u32 {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.mtu_pings.lock().get(&mtu).copied();
        match scripted {
            Some(ping) => ping,
            None => self.ping_for(address),
        }
    }

    async fn try_keep_alive(&self, address: &str) -> Result<(), EngineError> {
        self.keep_alive_calls.fetch_add(1, Ordering::SeqCst);
        if self.keep_alive_fails.load(Ordering::SeqCst) {
            Err(EngineError::Network(format!("{} unreachable", address)))
        } else {
            Ok(())
        }
    }
}

/// Connectivity probe replaying scripted reachability results.
pub struct FakeConnectivity {
    backup_path: AtomicBool,
    results: Mutex<VecDeque<bool>>,
    checks: Mutex<Vec<Instant>>,
}

impl FakeConnectivity {
    /// Never reachable.
    pub fn unreachable() -> Self {
        Self::with_results(&[])
    }

    /// Answers `results` in order, then `false`.
    pub fn with_results(results: &[bool]) -> Self {
        Self {
            backup_path: AtomicBool::new(false),
            results: Mutex::new(results.iter().copied().collect()),
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_backup_path(&self, available: bool) {
        self.backup_path.store(available, Ordering::SeqCst);
    }

    /// When each reachability check ran.
    pub fn checks(&self) -> Vec<Instant> {
        self.checks.lock().clone()
    }
}

#[async_trait]
impl ConnectivityProbe for FakeConnectivity {
    fn has_backup_path(&self) -> bool {
        self.backup_path.load(Ordering::SeqCst)
    }

    async fn internet_reachable(&self) -> bool {
        self.checks.lock().push(Instant::now());
        self.results.lock().pop_front().unwrap_or(false)
    }
}

/// Tunnel driver that records every call.
pub struct RecordingDriver {
    protocol: VpnProtocol,
    connects: Mutex<Vec<TunnelRequest>>,
    disconnects: AtomicUsize,
    fail_next: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl RecordingDriver {
    pub fn new(protocol: VpnProtocol) -> Self {
        Self {
            protocol,
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
        }
    }

    /// Make every handshake take `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> Vec<TunnelRequest> {
        self.connects.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelDriver for RecordingDriver {
    fn protocol(&self) -> VpnProtocol {
        self.protocol
    }

    async fn connect(&self, request: &TunnelRequest) -> Result<(), EngineError> {
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Tunnel("handshake rejected".into()));
        }
        self.connects.lock().push(request.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
