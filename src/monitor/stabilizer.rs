//! Connectivity stabilizer.
//!
//! Reacts to host connectivity events with a bounded reconnection backoff,
//! samples the active endpoint every second into its quality window, folds
//! that window into a stability tier, and keeps
//! the path warm with periodic keep-alives. State is published on a `watch`
//! channel; each background loop owns a cancellation token.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StabilizerConfig;
use crate::runtime::LoopHandle;
use crate::vpn::selector::ActiveEndpoint;
use crate::vpn::servers::Endpoint;

use super::probe::{Prober, UNREACHABLE_PING_MS};
use super::quality::{ProbeSample, QualityAggregator, StabilityTier};

/// Connectivity change reported by the host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Available,
    Lost,
    CapabilitiesChanged {
        downstream_kbps: u32,
        upstream_kbps: u32,
    },
}

/// Host-side view of the network used during reconnection.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Whether another interface can still carry traffic.
    fn has_backup_path(&self) -> bool;

    /// Whether the internet answers right now.
    async fn internet_reachable(&self) -> bool;
}

/// Connectivity probe backed by a host-reported path flag and a TCP check.
pub struct HostConnectivity {
    backup_path: AtomicBool,
    target: SocketAddr,
    timeout: Duration,
}

impl HostConnectivity {
    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self {
            backup_path: AtomicBool::new(false),
            target,
            timeout,
        }
    }

    /// Record whether the host still sees an internet-capable interface.
    pub fn set_backup_path(&self, available: bool) {
        self.backup_path.store(available, Ordering::Release);
    }
}

impl Default for HostConnectivity {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 53)), Duration::from_secs(3))
    }
}

#[async_trait]
impl ConnectivityProbe for HostConnectivity {
    fn has_backup_path(&self) -> bool {
        self.backup_path.load(Ordering::Acquire)
    }

    async fn internet_reachable(&self) -> bool {
        matches!(
            timeout(self.timeout, TcpStream::connect(self.target)).await,
            Ok(Ok(_))
        )
    }
}

/// Published stabilizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StabilityState {
    pub tier: StabilityTier,
    pub internet_reachable: bool,
    pub recommended_mtu: u16,
}

impl Default for StabilityState {
    fn default() -> Self {
        Self {
            tier: StabilityTier::Stable,
            internet_reachable: true,
            recommended_mtu: 1500,
        }
    }
}

/// How a connectivity loss was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Another interface carried traffic; no reconnection needed.
    BackupPath,
    Recovered { attempts: u32 },
    Exhausted { attempts: u32 },
    /// Superseded by an `Available` event or shutdown.
    Cancelled { attempts: u32 },
}

#[derive(Default)]
struct Loops {
    events: Option<LoopHandle>,
    sampler: Option<LoopHandle>,
    monitor: Option<LoopHandle>,
    keep_alive: Option<LoopHandle>,
    reconnect: Option<CancellationToken>,
}

struct Inner {
    config: StabilizerConfig,
    prober: Arc<dyn Prober>,
    connectivity: Arc<dyn ConnectivityProbe>,
    aggregator: Arc<QualityAggregator>,
    active: ActiveEndpoint,
    state_tx: watch::Sender<StabilityState>,
    accepting: AtomicBool,
    loops: Mutex<Loops>,
}

/// Connectivity stabilizer handle. Clones share one instance.
#[derive(Clone)]
pub struct Stabilizer {
    inner: Arc<Inner>,
}

impl Stabilizer {
    pub fn new(
        config: StabilizerConfig,
        prober: Arc<dyn Prober>,
        connectivity: Arc<dyn ConnectivityProbe>,
        aggregator: Arc<QualityAggregator>,
        active: ActiveEndpoint,
    ) -> Self {
        let (state_tx, _) = watch::channel(StabilityState::default());
        Self {
            inner: Arc::new(Inner {
                config,
                prober,
                connectivity,
                aggregator,
                active,
                state_tx,
                accepting: AtomicBool::new(true),
                loops: Mutex::new(Loops::default()),
            }),
        }
    }

    pub fn state(&self) -> StabilityState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StabilityState> {
        self.inner.state_tx.subscribe()
    }

    /// Advice strings for the current tier.
    pub fn recommendations(&self) -> Vec<String> {
        self.state()
            .tier
            .recommendations()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Subscribe to connectivity events and start the sampling, monitor and
    /// keep-alive loops.
    pub fn start(&self, events: mpsc::Receiver<ConnectivityEvent>) {
        self.inner.accepting.store(true, Ordering::Release);

        let token = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run_events(events, token.clone()));
        let previous = self.inner.loops.lock().events.replace(LoopHandle::new(token, handle));
        if let Some(previous) = previous {
            previous.stop();
        }

        self.arm_sampler();
        self.spawn_monitor();
        self.arm_keep_alive();
        log::info!("Stabilizer started");
    }

    /// Unsubscribe and stop every loop. Later state changes are dropped.
    pub fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::Release);
        let mut loops = self.inner.loops.lock();
        for handle in [
            loops.events.take(),
            loops.sampler.take(),
            loops.monitor.take(),
            loops.keep_alive.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.stop();
        }
        if let Some(token) = loops.reconnect.take() {
            token.cancel();
        }
        log::info!("Stabilizer stopped");
    }

    async fn run_events(
        self,
        mut events: mpsc::Receiver<ConnectivityEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        log::debug!("Connectivity event channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Apply one connectivity event. A loss starts reconnection in the background.
    pub fn handle_event(&self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::Available => {
                if let Some(token) = self.inner.loops.lock().reconnect.take() {
                    token.cancel();
                }
                self.update(|s| {
                    s.internet_reachable = true;
                    s.tier = StabilityTier::Stable;
                });
                log::info!("Network available");
            }
            ConnectivityEvent::Lost => {
                if let Some(token) = self.begin_loss() {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.reconnect(token).await;
                    });
                }
            }
            ConnectivityEvent::CapabilitiesChanged {
                downstream_kbps,
                upstream_kbps,
            } => {
                let tier = StabilityTier::from_bandwidth(downstream_kbps, upstream_kbps);
                log::debug!(
                    "Link capabilities {}/{} kbps -> {}",
                    downstream_kbps,
                    upstream_kbps,
                    tier
                );
                self.set_tier(tier);
            }
        }
    }

    /// Handle a connectivity loss to completion.
    pub async fn handle_loss(&self) -> ReconnectOutcome {
        match self.begin_loss() {
            Some(token) => self.reconnect(token).await,
            None => ReconnectOutcome::BackupPath,
        }
    }

    fn begin_loss(&self) -> Option<CancellationToken> {
        self.set_tier(StabilityTier::Unstable);
        if self.inner.connectivity.has_backup_path() {
            log::info!("Network lost, backup path still available");
            return None;
        }
        self.update(|s| s.internet_reachable = false);
        log::warn!("Network lost, starting reconnection");

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.loops.lock().reconnect.replace(token.clone()) {
            previous.cancel();
        }
        Some(token)
    }

    async fn reconnect(&self, token: CancellationToken) -> ReconnectOutcome {
        let attempts = self.inner.config.reconnect_attempts;
        for attempt in 1..=attempts {
            tokio::select! {
                _ = token.cancelled() => {
                    return ReconnectOutcome::Cancelled { attempts: attempt - 1 };
                }
                _ = sleep(self.inner.config.reconnect_delay(attempt)) => {}
            }

            if self.inner.connectivity.internet_reachable().await {
                if token.is_cancelled() {
                    return ReconnectOutcome::Cancelled { attempts: attempt };
                }
                self.update(|s| {
                    s.internet_reachable = true;
                    s.tier = StabilityTier::Stable;
                });
                log::info!("Reconnected after {} attempt(s)", attempt);
                return ReconnectOutcome::Recovered { attempts: attempt };
            }
            log::debug!("Reconnection attempt {}/{} failed", attempt, attempts);
        }

        if token.is_cancelled() {
            return ReconnectOutcome::Cancelled { attempts };
        }
        self.set_tier(StabilityTier::Degraded);
        log::warn!("Reconnection failed after {} attempts", attempts);
        ReconnectOutcome::Exhausted { attempts }
    }

    /// (Re)start the per-second sampling loop for the current active endpoint.
    pub fn arm_sampler(&self) {
        let token = CancellationToken::new();
        let this = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(this.inner.config.sample_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.sample_tick().await;
                    }
                }
            }
        });

        if let Some(previous) = self
            .inner
            .loops
            .lock()
            .sampler
            .replace(LoopHandle::new(token, handle))
        {
            previous.stop();
        }
    }

    /// Measure the active endpoint once and record it in its window.
    ///
    /// Returns `None` when offline or when no endpoint is active.
    pub async fn sample_tick(&self) -> Option<u32> {
        if !self.state().internet_reachable {
            return None;
        }
        let endpoint = self.inner.active.current()?;
        let ping = self.inner.prober.measure(endpoint.address()).await;
        self.inner
            .aggregator
            .record(&endpoint.id, ProbeSample::new(ping));
        Some(ping)
    }

    fn spawn_monitor(&self) {
        let token = CancellationToken::new();
        let this = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(this.inner.config.monitor_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.monitor_tick().await;
                    }
                }
            }
        });

        if let Some(previous) = self
            .inner
            .loops
            .lock()
            .monitor
            .replace(LoopHandle::new(token, handle))
        {
            previous.stop();
        }
    }

    /// Fold the active endpoint's window into the tier, using the latest
    /// sample and the window's loss. Samples once if the window is empty.
    ///
    /// Returns `None` when the tick was skipped.
    pub async fn monitor_tick(&self) -> Option<StabilityTier> {
        if !self.state().internet_reachable {
            return None;
        }
        let endpoint = self.inner.active.current()?;

        let ping = match self.inner.aggregator.history(&endpoint.id).last() {
            Some(&ping) => ping,
            None => self.sample_tick().await?,
        };
        let loss = self.inner.aggregator.metrics(&endpoint.id).packet_loss;

        let tier = StabilityTier::from_ping_and_loss(ping, loss);
        log::debug!(
            "Monitor {}: {} ms, loss {:.3} -> {}",
            endpoint.id,
            ping,
            loss,
            tier
        );
        self.set_tier(tier);
        Some(tier)
    }

    /// (Re)start the keep-alive loop for the current active endpoint.
    ///
    /// The loop ends on the first failed keep-alive.
    pub fn arm_keep_alive(&self) {
        let token = CancellationToken::new();
        let this = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(this.inner.config.keep_alive_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !this.state().internet_reachable {
                    continue;
                }
                let Some(endpoint) = this.inner.active.current() else {
                    continue;
                };
                if let Err(e) = this.inner.prober.try_keep_alive(endpoint.address()).await {
                    if loop_token.is_cancelled() {
                        break;
                    }
                    log::warn!("Keep-alive to {} failed, stopping: {}", endpoint.id, e);
                    this.set_tier(StabilityTier::Unstable);
                    break;
                }
            }
        });

        if let Some(previous) = self
            .inner
            .loops
            .lock()
            .keep_alive
            .replace(LoopHandle::new(token, handle))
        {
            previous.stop();
        }
    }

    /// Find the MTU with the lowest measured latency and store it.
    pub async fn optimize_mtu(&self, endpoint: &Endpoint) -> u16 {
        let mut best: Option<(u16, u32)> = None;
        for &mtu in &self.inner.config.mtu_candidates {
            let ping = self
                .inner
                .prober
                .measure_with_mtu(endpoint.address(), mtu)
                .await;
            log::debug!("MTU {} to {}: {} ms", mtu, endpoint.id, ping);
            if best.map_or(true, |(_, best_ping)| ping < best_ping) {
                best = Some((mtu, ping));
            }
        }

        let mtu = match best {
            Some((mtu, ping)) if ping < UNREACHABLE_PING_MS => mtu,
            Some((mtu, _)) => {
                log::warn!("MTU probing to {} failed, keeping {}", endpoint.id, mtu);
                mtu
            }
            None => self.state().recommended_mtu,
        };
        self.update(|s| s.recommended_mtu = mtu);
        log::info!("Recommended MTU for {}: {}", endpoint.id, mtu);
        mtu
    }

    fn set_tier(&self, tier: StabilityTier) {
        self.update(|s| s.tier = tier);
    }

    fn update(&self, apply: impl FnOnce(&mut StabilityState)) -> bool {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return false;
        }
        self.inner.state_tx.send_if_modified(|state| {
            let before = *state;
            apply(state);
            if *state != before {
                log::debug!("Stability state: {:?} -> {:?}", before, state);
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_endpoint, FakeConnectivity, FakeProber};
    use tokio::time::Instant;

    fn stabilizer_with(
        prober: Arc<FakeProber>,
        connectivity: Arc<FakeConnectivity>,
        active: Option<Endpoint>,
    ) -> (Stabilizer, watch::Sender<Option<Endpoint>>) {
        let (tx, rx) = watch::channel(active);
        let stabilizer = Stabilizer::new(
            StabilizerConfig::default(),
            prober,
            connectivity,
            Arc::new(QualityAggregator::default()),
            ActiveEndpoint::new(rx),
        );
        (stabilizer, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn five_failed_attempts_settle_on_degraded() {
        let connectivity = Arc::new(FakeConnectivity::unreachable());
        let (stabilizer, _tx) =
            stabilizer_with(Arc::new(FakeProber::new(40)), connectivity.clone(), None);

        let started = Instant::now();
        let outcome = stabilizer.handle_loss().await;

        assert_eq!(outcome, ReconnectOutcome::Exhausted { attempts: 5 });
        let state = stabilizer.state();
        assert_eq!(state.tier, StabilityTier::Degraded);
        assert!(!state.internet_reachable);

        let offsets: Vec<u64> = connectivity
            .checks()
            .iter()
            .map(|at| at.duration_since(started).as_secs())
            .collect();
        // Waits of 2, 4, 6, 8 and 10 seconds before each check.
        assert_eq!(offsets, vec![2, 6, 12, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_succeeds_on_third_attempt() {
        let connectivity = Arc::new(FakeConnectivity::with_results(&[false, false, true]));
        let (stabilizer, _tx) =
            stabilizer_with(Arc::new(FakeProber::new(40)), connectivity.clone(), None);

        let outcome = stabilizer.handle_loss().await;
        assert_eq!(outcome, ReconnectOutcome::Recovered { attempts: 3 });
        assert_eq!(stabilizer.state().tier, StabilityTier::Stable);
        assert!(stabilizer.state().internet_reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn backup_path_skips_reconnection() {
        let connectivity = Arc::new(FakeConnectivity::unreachable());
        connectivity.set_backup_path(true);
        let (stabilizer, _tx) =
            stabilizer_with(Arc::new(FakeProber::new(40)), connectivity.clone(), None);

        assert_eq!(stabilizer.handle_loss().await, ReconnectOutcome::BackupPath);
        assert_eq!(stabilizer.state().tier, StabilityTier::Unstable);
        assert!(stabilizer.state().internet_reachable);
        assert!(connectivity.checks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn available_cancels_reconnection() {
        let connectivity = Arc::new(FakeConnectivity::unreachable());
        let (stabilizer, _tx) =
            stabilizer_with(Arc::new(FakeProber::new(40)), connectivity.clone(), None);

        let (events_tx, events_rx) = mpsc::channel(8);
        stabilizer.start(events_rx);

        events_tx.send(ConnectivityEvent::Lost).await.expect("send");
        sleep(Duration::from_secs(3)).await;
        assert!(!stabilizer.state().internet_reachable);

        events_tx.send(ConnectivityEvent::Available).await.expect("send");
        sleep(Duration::from_secs(60)).await;

        let state = stabilizer.state();
        assert!(state.internet_reachable);
        assert_eq!(state.tier, StabilityTier::Stable);
        // Only the first check ran before the cancel.
        assert_eq!(connectivity.checks().len(), 1);

        stabilizer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn capabilities_map_to_tiers() {
        let (stabilizer, _tx) = stabilizer_with(
            Arc::new(FakeProber::new(40)),
            Arc::new(FakeConnectivity::unreachable()),
            None,
        );
        let mut rx = stabilizer.subscribe();

        stabilizer.handle_event(ConnectivityEvent::CapabilitiesChanged {
            downstream_kbps: 50_000,
            upstream_kbps: 10_000,
        });
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(rx.borrow_and_update().tier, StabilityTier::Excellent);

        stabilizer.handle_event(ConnectivityEvent::CapabilitiesChanged {
            downstream_kbps: 800,
            upstream_kbps: 50,
        });
        assert_eq!(stabilizer.state().tier, StabilityTier::Unstable);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_tick_skips_without_active_endpoint() {
        let prober = Arc::new(FakeProber::new(30));
        let (stabilizer, tx) = stabilizer_with(
            prober.clone(),
            Arc::new(FakeConnectivity::unreachable()),
            None,
        );

        assert_eq!(stabilizer.monitor_tick().await, None);
        assert_eq!(stabilizer.sample_tick().await, None);
        assert_eq!(prober.measure_calls(), 0);

        tx.send_replace(Some(sample_endpoint("de-frankfurt-01", 30, 40)));
        assert_eq!(stabilizer.monitor_tick().await, Some(StabilityTier::Excellent));
        assert_eq!(prober.measure_calls(), 1);

        prober.set_ping("de-frankfurt-01.test", 150);
        // Folds the window without measuring again.
        assert_eq!(stabilizer.monitor_tick().await, Some(StabilityTier::Excellent));
        assert_eq!(prober.measure_calls(), 1);

        assert_eq!(stabilizer.sample_tick().await, Some(150));
        assert_eq!(stabilizer.monitor_tick().await, Some(StabilityTier::Degraded));
        assert_eq!(stabilizer.state().tier, StabilityTier::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_fills_window_every_second() {
        let prober = Arc::new(FakeProber::new(UNREACHABLE_PING_MS));
        let aggregator = Arc::new(QualityAggregator::default());
        let (_tx, rx) = watch::channel(Some(sample_endpoint("se-stockholm-01", 30, 40)));
        let stabilizer = Stabilizer::new(
            StabilizerConfig::default(),
            prober,
            Arc::new(FakeConnectivity::unreachable()),
            aggregator.clone(),
            ActiveEndpoint::new(rx),
        );

        let (_events_tx, events_rx) = mpsc::channel(1);
        stabilizer.start(events_rx);
        sleep(Duration::from_secs(61)).await;

        // Window is capped at one minute of samples.
        assert_eq!(aggregator.history("se-stockholm-01").len(), 60);
        let metrics = aggregator.metrics("se-stockholm-01");
        assert_eq!(metrics.packet_loss, 1.0);
        assert_eq!(stabilizer.state().tier, StabilityTier::Unstable);
        stabilizer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_follows_rearm_and_skips_offline() {
        let aggregator = Arc::new(QualityAggregator::default());
        let (tx, rx) = watch::channel(None);
        let connectivity = Arc::new(FakeConnectivity::unreachable());
        let stabilizer = Stabilizer::new(
            StabilizerConfig::default(),
            Arc::new(FakeProber::new(25)),
            connectivity,
            aggregator.clone(),
            ActiveEndpoint::new(rx),
        );

        stabilizer.arm_sampler();
        sleep(Duration::from_millis(5_500)).await;
        assert_eq!(aggregator.tracked(), 0);

        tx.send_replace(Some(sample_endpoint("pl-warsaw-01", 25, 30)));
        stabilizer.arm_sampler();
        sleep(Duration::from_millis(4_500)).await;
        // Ticks at 0 through 4 seconds after re-arm.
        assert_eq!(aggregator.history("pl-warsaw-01").len(), 5);

        stabilizer.handle_event(ConnectivityEvent::Lost);
        sleep(Duration::from_secs(1)).await;
        assert!(!stabilizer.state().internet_reachable);
        let frozen = aggregator.history("pl-warsaw-01").len();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(aggregator.history("pl-warsaw-01").len(), frozen);
        stabilizer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_failure_marks_unstable_and_stops() {
        let prober = Arc::new(FakeProber::new(30));
        prober.fail_keep_alive(true);
        let (stabilizer, _tx) = stabilizer_with(
            prober.clone(),
            Arc::new(FakeConnectivity::unreachable()),
            Some(sample_endpoint("nl-amsterdam-01", 30, 40)),
        );

        stabilizer.arm_keep_alive();
        sleep(Duration::from_secs(95)).await;

        assert_eq!(stabilizer.state().tier, StabilityTier::Unstable);
        assert_eq!(prober.keep_alive_calls(), 1);
        stabilizer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_repeats_on_interval() {
        let prober = Arc::new(FakeProber::new(30));
        let (stabilizer, _tx) = stabilizer_with(
            prober.clone(),
            Arc::new(FakeConnectivity::unreachable()),
            Some(sample_endpoint("nl-amsterdam-01", 30, 40)),
        );

        stabilizer.arm_keep_alive();
        sleep(Duration::from_secs(61)).await;
        // Ticks at 0, 30 and 60 seconds.
        assert_eq!(prober.keep_alive_calls(), 3);
        assert_eq!(stabilizer.state().tier, StabilityTier::Stable);
        stabilizer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn optimize_mtu_keeps_fastest_and_first_on_ties() {
        let prober = Arc::new(FakeProber::new(30));
        prober.set_mtu_ping(1500, 60);
        prober.set_mtu_ping(1400, 35);
        prober.set_mtu_ping(1300, 35);
        prober.set_mtu_ping(1200, 50);
        let (stabilizer, _tx) = stabilizer_with(
            prober,
            Arc::new(FakeConnectivity::unreachable()),
            None,
        );

        let endpoint = sample_endpoint("fr-paris-01", 45, 52);
        assert_eq!(stabilizer.optimize_mtu(&endpoint).await, 1400);
        assert_eq!(stabilizer.state().recommended_mtu, 1400);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_later_updates() {
        let (stabilizer, _tx) = stabilizer_with(
            Arc::new(FakeProber::new(30)),
            Arc::new(FakeConnectivity::unreachable()),
            None,
        );
        let (_events_tx, events_rx) = mpsc::channel(1);
        stabilizer.start(events_rx);
        stabilizer.shutdown();

        stabilizer.handle_event(ConnectivityEvent::CapabilitiesChanged {
            downstream_kbps: 0,
            upstream_kbps: 0,
        });
        assert_eq!(stabilizer.state().tier, StabilityTier::Stable);
        assert_eq!(
            stabilizer.recommendations(),
            vec!["Connection is stable".to_string()]
        );
    }
}
