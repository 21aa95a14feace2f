//! Engine wiring.
//!
//! One [`Engine`] owns one instance of every component and the glue between
//! them: the selector's active endpoint feeds the stabilizer, and observable
//! state changes are forwarded to the host callbacks.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::callbacks::{fire_selection_change, fire_stability_change};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::monitor::probe::Prober;
use crate::monitor::quality::QualityAggregator;
use crate::monitor::stabilizer::{ConnectivityEvent, ConnectivityProbe, Stabilizer};
use crate::persistence::Persistence;
use crate::runtime::LoopHandle;
use crate::vpn::profiles::{GameDetector, GameInfo};
use crate::vpn::scoring::GameContext;
use crate::vpn::selector::Selector;
use crate::vpn::servers::{CandidateStore, Endpoint};
use crate::vpn::tunnel::{TunnelDriver, TunnelRequest, VpnConnection, VpnProtocol};

const EVENT_QUEUE_CAPACITY: usize = 32;

/// External capabilities the engine is built on.
pub struct Collaborators {
    pub prober: Arc<dyn Prober>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
    pub persistence: Arc<dyn Persistence>,
    pub drivers: Vec<Arc<dyn TunnelDriver>>,
    pub detector: Arc<dyn GameDetector>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<CandidateStore>,
    aggregator: Arc<QualityAggregator>,
    selector: Selector,
    stabilizer: Stabilizer,
    connection: VpnConnection,
    persistence: Arc<dyn Persistence>,
    detector: Arc<dyn GameDetector>,
    protocol: RwLock<VpnProtocol>,
    events: Mutex<Option<mpsc::Sender<ConnectivityEvent>>>,
    watcher: Mutex<Option<LoopHandle>>,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            prober,
            connectivity,
            persistence,
            drivers,
            detector,
        } = collaborators;

        let store = Arc::new(CandidateStore::with_default_catalog());
        let aggregator = Arc::new(QualityAggregator::new(config.quality.clone()));
        let selector = Selector::new(
            config.selector.clone(),
            Arc::clone(&store),
            Arc::clone(&prober),
            Arc::clone(&aggregator),
            Arc::clone(&persistence),
        );
        let stabilizer = Stabilizer::new(
            config.stabilizer.clone(),
            prober,
            connectivity,
            Arc::clone(&aggregator),
            selector.active_endpoint(),
        );

        Self {
            config,
            store,
            aggregator,
            selector,
            stabilizer,
            connection: VpnConnection::new(drivers),
            persistence,
            detector,
            protocol: RwLock::new(VpnProtocol::default()),
            events: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CandidateStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &Arc<QualityAggregator> {
        &self.aggregator
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn stabilizer(&self) -> &Stabilizer {
        &self.stabilizer
    }

    pub fn connection(&self) -> &VpnConnection {
        &self.connection
    }

    pub fn is_running(&self) -> bool {
        self.events.lock().is_some()
    }

    /// Tunnel protocol used when no game profile picks one.
    pub fn protocol(&self) -> VpnProtocol {
        *self.protocol.read()
    }

    /// Change the preferred tunnel protocol and persist it.
    pub fn set_protocol(&self, protocol: VpnProtocol) -> Result<(), EngineError> {
        if !self.connection.supports(protocol) {
            return Err(EngineError::Tunnel(format!("No driver for {}", protocol)));
        }
        *self.protocol.write() = protocol;
        let saved = self
            .persistence
            .load()
            .unwrap_or_default()
            .with_protocol(protocol);
        self.persistence.save(&saved)?;
        log::info!("Preferred protocol: {}", protocol);
        Ok(())
    }

    /// Restore the saved selection and protocol, then start every loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.is_running() {
            return;
        }

        let restored = match self.persistence.load() {
            Ok(preferences) => {
                *self.protocol.write() = preferences.protocol;
                preferences
                    .selected_endpoint_id
                    .and_then(|id| match self.selector.restore(&id) {
                        Ok(endpoint) => Some(endpoint),
                        Err(e) => {
                            log::warn!("Ignoring saved selection: {}", e);
                            None
                        }
                    })
            }
            Err(e) => {
                log::warn!("Failed to load preferences, using defaults: {}", e);
                None
            }
        };

        match restored {
            Some(endpoint) => log::info!("Restored endpoint {}", endpoint.id),
            None if self.config.selector.auto_select => self.selector.enable(),
            None => {}
        }

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        self.stabilizer.start(rx);
        *self.events.lock() = Some(tx);

        let token = CancellationToken::new();
        let handle = tokio::spawn(forward_changes(
            self.selector.clone(),
            self.stabilizer.clone(),
            token.clone(),
        ));
        if let Some(previous) = self.watcher.lock().replace(LoopHandle::new(token, handle)) {
            previous.stop();
        }
        log::info!("Engine started");
    }

    /// Stop every loop and bring the tunnel down.
    pub async fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        self.events.lock().take();
        self.selector.disable();
        self.stabilizer.shutdown();

        if self.connection.state().await.is_connected() {
            if let Err(e) = self.connection.disconnect().await {
                log::warn!("Disconnect during shutdown failed: {}", e);
            }
        }
        log::info!("Engine stopped");
    }

    /// Hand a host connectivity event to the stabilizer.
    pub fn push_event(&self, event: ConnectivityEvent) -> Result<(), EngineError> {
        let events = self.events.lock();
        let Some(tx) = events.as_ref() else {
            return Err(EngineError::NotInitialized);
        };
        tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::Internal("Connectivity event queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => EngineError::NotInitialized,
        })
    }

    /// Ask the detector for the foreground game and feed it to the selector.
    pub fn refresh_game(&self) -> Option<GameInfo> {
        let game = self.detector.current_game();
        let context = game
            .as_ref()
            .map(|g| GameContext::new(g.name.clone(), g.optimization_profile.clone()));
        self.selector.set_game(context);
        game
    }

    /// Connect to the locked endpoint, or to the best one right now.
    pub async fn connect(&self) -> Result<Endpoint, EngineError> {
        let endpoint = match self.selector.state().state.endpoint().cloned() {
            Some(endpoint) => endpoint,
            None => self
                .selector
                .recommendations(1)
                .await?
                .into_iter()
                .next()
                .map(|scored| scored.endpoint)
                .ok_or(EngineError::NoCandidates)?,
        };

        let game = self.selector.game();
        let profile = game.as_ref().and_then(|g| g.profile.as_ref());
        let mtu = self.stabilizer.state().recommended_mtu;
        let request = TunnelRequest::new(endpoint.clone(), profile, mtu, self.protocol());
        self.connection.connect(request).await?;
        Ok(endpoint)
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.connection.disconnect().await
    }
}

/// Forward selection and stability changes to the host. Whenever the active
/// endpoint changes, re-arm the sampler and keep-alive and retune the MTU in
/// the background.
async fn forward_changes(selector: Selector, stabilizer: Stabilizer, token: CancellationToken) {
    let mut selection = selector.subscribe();
    let mut active = selector.active_endpoint();
    let mut stability = stabilizer.subscribe();
    let mut last_tier = stability.borrow().tier;
    let mut tuning: Option<LoopHandle> = None;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            changed = selection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = selection.borrow_and_update().clone();
                match serde_json::to_string(&state) {
                    Ok(json) => fire_selection_change(&json),
                    Err(e) => log::warn!("Failed to serialize selection state: {}", e),
                }
            }

            changed = active.changed() => {
                if !changed {
                    break;
                }
                stabilizer.arm_sampler();
                stabilizer.arm_keep_alive();
                if let Some(previous) = tuning.take() {
                    previous.stop();
                }
                if let Some(endpoint) = active.current() {
                    let child = token.child_token();
                    tuning = Some(spawn_mtu_tuning(stabilizer.clone(), endpoint, child));
                }
            }

            changed = stability.changed() => {
                if changed.is_err() {
                    break;
                }
                let tier = stability.borrow_and_update().tier;
                if tier != last_tier {
                    last_tier = tier;
                    fire_stability_change(tier.as_code());
                }
            }
        }
    }

    if let Some(tuning) = tuning {
        tuning.stop();
    }
}

fn spawn_mtu_tuning(
    stabilizer: Stabilizer,
    endpoint: Endpoint,
    token: CancellationToken,
) -> LoopHandle {
    let task_token = token.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = task_token.cancelled() => {
                log::debug!("MTU tuning for {} cancelled", endpoint.id);
            }
            _ = stabilizer.optimize_mtu(&endpoint) => {}
        }
    });
    LoopHandle::new(token, handle)
}
