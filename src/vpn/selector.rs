//! Server selection: periodic evaluation, hysteresis and manual override.
//!
//! While auto-selection is on, a background loop probes every candidate,
//! ranks them with the scoring policy and replaces the locked endpoint only
//! when the winner is clearly faster. Every state change bumps a generation
//! counter; an evaluation that started before the latest change is discarded
//! instead of committed, so a manual selection always wins.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::SelectorConfig;
use crate::error::EngineError;
use crate::monitor::probe::{Prober, UNREACHABLE_PING_MS};
use crate::monitor::quality::{ProbeSample, QualityAggregator};
use crate::persistence::Persistence;
use crate::runtime::LoopHandle;

use super::scoring::{should_switch, GameContext, Measurement, ScoredEndpoint, ScoringPolicy};
use super::servers::{CandidateStore, Endpoint};

const MAX_EVENT_LOG: usize = 20;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "endpoint", rename_all = "snake_case")]
pub enum SelectorState {
    Disabled,
    Selecting,
    Locked(Endpoint),
}

impl SelectorState {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            SelectorState::Locked(endpoint) => Some(endpoint),
            _ => None,
        }
    }

    /// Convert to FFI-friendly integer code
    pub fn as_code(&self) -> i32 {
        match self {
            SelectorState::Disabled => 0,
            SelectorState::Selecting => 1,
            SelectorState::Locked(_) => 2,
        }
    }
}

/// Published selector state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    #[serde(flatten)]
    pub state: SelectorState,
    pub auto_enabled: bool,
    pub last_decision_at: Option<DateTime<Utc>>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            state: SelectorState::Disabled,
            auto_enabled: false,
            last_decision_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionEvent {
    pub timestamp_ms: u64,
    pub event_type: String,
    pub from_endpoint: Option<String>,
    pub to_endpoint: Option<String>,
    pub reason: String,
}

/// Result of one evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Switched { from: Option<String>, to: Endpoint },
    Kept { endpoint_id: String },
    NoCandidates,
    /// A newer state change superseded this cycle.
    Discarded,
}

/// Read-only view of the selected endpoint.
#[derive(Clone)]
pub struct ActiveEndpoint {
    rx: watch::Receiver<Option<Endpoint>>,
}

impl ActiveEndpoint {
    pub fn new(rx: watch::Receiver<Option<Endpoint>>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> Option<Endpoint> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change. Returns false once the selector is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

struct Shared {
    selection: SelectionState,
    generation: u64,
}

struct Inner {
    config: SelectorConfig,
    store: Arc<CandidateStore>,
    prober: Arc<dyn Prober>,
    aggregator: Arc<QualityAggregator>,
    persistence: Arc<dyn Persistence>,
    policy: ScoringPolicy,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<SelectionState>,
    active_tx: watch::Sender<Option<Endpoint>>,
    game: RwLock<Option<GameContext>>,
    event_log: RwLock<VecDeque<SelectionEvent>>,
    task: Mutex<Option<LoopHandle>>,
}

/// Server selector handle. Clones share one instance.
#[derive(Clone)]
pub struct Selector {
    inner: Arc<Inner>,
}

impl Selector {
    pub fn new(
        config: SelectorConfig,
        store: Arc<CandidateStore>,
        prober: Arc<dyn Prober>,
        aggregator: Arc<QualityAggregator>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SelectionState::default());
        let (active_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                prober,
                aggregator,
                persistence,
                policy: ScoringPolicy,
                shared: Mutex::new(Shared {
                    selection: SelectionState::default(),
                    generation: 0,
                }),
                state_tx,
                active_tx,
                game: RwLock::new(None),
                event_log: RwLock::new(VecDeque::new()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SelectionState {
        self.inner.shared.lock().selection.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn active_endpoint(&self) -> ActiveEndpoint {
        ActiveEndpoint::new(self.inner.active_tx.subscribe())
    }

    pub fn is_auto_enabled(&self) -> bool {
        self.inner.shared.lock().selection.auto_enabled
    }

    pub fn is_loop_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map_or(false, |t| !t.is_finished())
    }

    pub fn set_game(&self, context: Option<GameContext>) {
        if let Some(ref c) = context {
            log::info!("Selector game context: {}", c.name);
        }
        *self.inner.game.write() = context;
    }

    pub fn game(&self) -> Option<GameContext> {
        self.inner.game.read().clone()
    }

    pub fn recent_events(&self, max: usize) -> Vec<SelectionEvent> {
        self.inner
            .event_log
            .read()
            .iter()
            .rev()
            .take(max)
            .cloned()
            .collect()
    }

    /// Turn auto-selection on and (re)arm the evaluation loop.
    pub fn enable(&self) {
        self.transition("auto_enabled", "Auto-selection enabled", |selection| {
            selection.auto_enabled = true;
            if selection.state == SelectorState::Disabled {
                selection.state = SelectorState::Selecting;
            }
        });
        self.spawn_loop();
    }

    /// Turn auto-selection off and release the active endpoint.
    pub fn disable(&self) {
        self.stop_loop();
        self.transition("disabled", "Auto-selection disabled", |selection| {
            selection.auto_enabled = false;
            selection.state = SelectorState::Disabled;
        });
    }

    /// Lock a user-chosen endpoint and persist the choice.
    pub fn manual_select(&self, endpoint_id: &str) -> Result<Endpoint, EngineError> {
        let endpoint = self.lock_endpoint(endpoint_id, "manual_select", "User selected")?;

        let saved = self
            .inner
            .persistence
            .load()
            .unwrap_or_default()
            .with_selection(Some(endpoint_id));
        if let Err(e) = self.inner.persistence.save(&saved) {
            log::warn!("Failed to persist selection {}: {}", endpoint_id, e);
        }
        Ok(endpoint)
    }

    /// Re-lock a persisted selection at startup without writing it back.
    pub fn restore(&self, endpoint_id: &str) -> Result<Endpoint, EngineError> {
        self.lock_endpoint(endpoint_id, "restored", "Restored selection")
    }

    fn lock_endpoint(
        &self,
        endpoint_id: &str,
        event_type: &str,
        reason: &str,
    ) -> Result<Endpoint, EngineError> {
        let endpoint = self
            .inner
            .store
            .by_id(endpoint_id)
            .ok_or_else(|| EngineError::UnknownEndpoint(endpoint_id.to_string()))?;

        self.stop_loop();
        let locked = endpoint.clone();
        self.transition(
            event_type,
            &format!("{} {}", reason, endpoint.id),
            move |selection| {
                selection.auto_enabled = false;
                selection.state = SelectorState::Locked(locked);
            },
        );
        Ok(endpoint)
    }

    /// Apply a user-driven change under the lock, bumping the generation.
    fn transition(
        &self,
        event_type: &str,
        reason: &str,
        apply: impl FnOnce(&mut SelectionState),
    ) {
        let (from, to) = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            let from = shared.selection.state.endpoint().map(|e| e.id.clone());
            apply(&mut shared.selection);
            let to = shared.selection.state.endpoint().map(|e| e.id.clone());
            self.publish(&shared.selection);
            (from, to)
        };
        log::info!("{}", reason);
        self.log_event(event_type, from, to, reason.to_string());
    }

    fn publish(&self, selection: &SelectionState) {
        self.inner.state_tx.send_replace(selection.clone());
        let active = selection.state.endpoint().cloned();
        self.inner.active_tx.send_if_modified(|current| {
            if *current != active {
                *current = active;
                true
            } else {
                false
            }
        });
    }

    fn log_event(
        &self,
        event_type: &str,
        from_endpoint: Option<String>,
        to_endpoint: Option<String>,
        reason: String,
    ) {
        let mut log = self.inner.event_log.write();
        log.push_back(SelectionEvent {
            timestamp_ms: now_millis(),
            event_type: event_type.to_string(),
            from_endpoint,
            to_endpoint,
            reason,
        });
        if log.len() > MAX_EVENT_LOG {
            log.pop_front();
        }
    }

    fn spawn_loop(&self) {
        let token = CancellationToken::new();
        let this = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { this.run_loop(loop_token).await });
        if let Some(previous) = self.inner.task.lock().replace(LoopHandle::new(token, handle)) {
            previous.stop();
        }
    }

    fn stop_loop(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.stop();
        }
    }

    async fn run_loop(self, token: CancellationToken) {
        log::info!("Selector loop started");
        loop {
            let delay = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.run_cycle() => self.next_delay(result),
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        log::info!("Selector loop stopped");
    }

    fn next_delay(&self, result: Result<Decision, EngineError>) -> Duration {
        match result {
            Ok(Decision::Switched { from, to }) => {
                log::info!(
                    "Switched endpoint {} -> {}",
                    from.as_deref().unwrap_or("none"),
                    to.id
                );
                self.inner.config.evaluation_interval()
            }
            Ok(decision) => {
                log::debug!("Evaluation cycle: {:?}", decision);
                self.inner.config.evaluation_interval()
            }
            Err(e) => {
                log::warn!(
                    "Evaluation cycle failed, retrying in {}s: {}",
                    self.inner.config.error_backoff_secs,
                    e
                );
                crate::callbacks::fire_error(e.code(), &e.to_string());
                self.inner.config.error_backoff()
            }
        }
    }

    /// Run one evaluation cycle immediately.
    pub async fn evaluate_now(&self) -> Result<Decision, EngineError> {
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> Result<Decision, EngineError> {
        let (generation, current) = {
            let shared = self.inner.shared.lock();
            (
                shared.generation,
                shared.selection.state.endpoint().cloned(),
            )
        };

        let candidates = self.inner.store.list();
        if candidates.is_empty() {
            log::debug!("No candidates, skipping evaluation");
            return Ok(Decision::NoCandidates);
        }

        let measured = self.probe_all(candidates).await?;
        for (endpoint, ping) in &measured {
            self.inner
                .aggregator
                .record(&endpoint.id, ProbeSample::new(*ping));
        }

        let context = self.game();
        let ranked = self
            .inner
            .policy
            .rank(&self.with_quality(measured), context.as_ref());
        let Some(best) = ranked.into_iter().next() else {
            return Ok(Decision::NoCandidates);
        };

        let switch = match current {
            None => true,
            Some(ref current) if current.id == best.endpoint.id => false,
            Some(ref current) => {
                let (current_ping, best_ping) = tokio::join!(
                    self.inner.prober.measure(current.address()),
                    self.inner.prober.measure(best.endpoint.address()),
                );
                log::debug!(
                    "Switch test {} ({} ms) vs {} ({} ms)",
                    current.id,
                    current_ping,
                    best.endpoint.id,
                    best_ping
                );
                should_switch(current_ping, best_ping, &self.inner.config)
            }
        };

        let mut shared = self.inner.shared.lock();
        if shared.generation != generation || !shared.selection.auto_enabled {
            log::debug!("Discarding stale evaluation result");
            return Ok(Decision::Discarded);
        }
        shared.selection.last_decision_at = Some(Utc::now());

        if !switch {
            self.publish(&shared.selection);
            let endpoint_id = current.map(|e| e.id).unwrap_or_default();
            return Ok(Decision::Kept { endpoint_id });
        }

        let from = current.map(|e| e.id);
        shared.selection.state = SelectorState::Locked(best.endpoint.clone());
        self.publish(&shared.selection);
        drop(shared);

        self.log_event(
            "auto_switch",
            from.clone(),
            Some(best.endpoint.id.clone()),
            format!(
                "Best score {:.3} at {} ms",
                best.score, best.ping_ms
            ),
        );
        Ok(Decision::Switched {
            from,
            to: best.endpoint,
        })
    }

    /// Probe every endpoint concurrently; results keep the input order.
    async fn probe_all(&self, endpoints: Vec<Endpoint>) -> Result<Vec<(Endpoint, u32)>, EngineError> {
        let mut set = JoinSet::new();
        for (idx, endpoint) in endpoints.iter().enumerate() {
            let prober = Arc::clone(&self.inner.prober);
            let address = endpoint.address().to_string();
            set.spawn(async move { (idx, prober.measure(&address).await) });
        }

        let mut pings = vec![UNREACHABLE_PING_MS; endpoints.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, ping) =
                joined.map_err(|e| EngineError::Internal(format!("Probe task failed: {}", e)))?;
            pings[idx] = ping;
        }

        Ok(endpoints.into_iter().zip(pings).collect())
    }

    /// Attach each endpoint's window metrics to its fresh ping.
    fn with_quality(&self, measured: Vec<(Endpoint, u32)>) -> Vec<(Endpoint, Measurement)> {
        measured
            .into_iter()
            .map(|(endpoint, ping)| {
                let quality = self.inner.aggregator.metrics(&endpoint.id);
                (endpoint, Measurement::new(ping, quality))
            })
            .collect()
    }

    /// Probe every candidate and store the results.
    pub async fn refresh_all(&self) -> Result<Vec<(String, u32)>, EngineError> {
        let candidates = self.inner.store.list();
        if candidates.is_empty() {
            return Err(EngineError::NoCandidates);
        }

        let results: Vec<(String, u32)> = self
            .probe_all(candidates)
            .await?
            .into_iter()
            .map(|(endpoint, ping)| (endpoint.id, ping))
            .collect();
        for (id, ping) in &results {
            self.inner.aggregator.record(id, ProbeSample::new(*ping));
        }
        self.inner.store.update_pings(&results);
        log::info!("Refreshed ping for {} endpoints", results.len());
        Ok(results)
    }

    /// Best `limit` endpoints right now. Does not change the selection.
    pub async fn recommendations(&self, limit: usize) -> Result<Vec<ScoredEndpoint>, EngineError> {
        let candidates = self.inner.store.list();
        if candidates.is_empty() {
            return Err(EngineError::NoCandidates);
        }

        let measured = self.with_quality(self.probe_all(candidates).await?);
        let context = self.game();
        let mut ranked = self.inner.policy.rank(&measured, context.as_ref());
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::persistence::MemoryPreferences;
    use crate::testing::FakeProber;
    use crate::vpn::servers::default_catalog;

    struct Fixture {
        selector: Selector,
        prober: Arc<FakeProber>,
        store: Arc<CandidateStore>,
        persistence: Arc<MemoryPreferences>,
    }

    /// Fake prober answering with each endpoint's catalog ping.
    fn fixture() -> Fixture {
        let prober = Arc::new(FakeProber::new(UNREACHABLE_PING_MS));
        for endpoint in default_catalog() {
            prober.set_ping(&endpoint.hostname, endpoint.ping_ms);
        }
        let store = Arc::new(CandidateStore::with_default_catalog());
        let persistence = Arc::new(MemoryPreferences::default());
        let selector = Selector::new(
            SelectorConfig::default(),
            store.clone(),
            prober.clone(),
            Arc::new(QualityAggregator::default()),
            persistence.clone(),
        );
        Fixture {
            selector,
            prober,
            store,
            persistence,
        }
    }

    fn locked_id(selector: &Selector) -> Option<String> {
        selector.state().state.endpoint().map(|e| e.id.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn enable_locks_best_endpoint() {
        let f = fixture();
        let active = f.selector.active_endpoint();

        f.selector.enable();
        assert!(f.selector.is_auto_enabled());
        sleep(Duration::from_millis(10)).await;

        assert_eq!(locked_id(&f.selector).as_deref(), Some("nl-amsterdam-01"));
        assert_eq!(active.current().map(|e| e.id).as_deref(), Some("nl-amsterdam-01"));
        assert!(f.selector.state().last_decision_at.is_some());
        assert_eq!(f.selector.recent_events(5)[0].event_type, "auto_switch");
        f.selector.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_continues_while_locked() {
        let f = fixture();
        f.selector.enable();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(locked_id(&f.selector).as_deref(), Some("nl-amsterdam-01"));

        // Frankfurt gets much faster; the next cycle switches.
        f.prober.set_ping("de1.gameboost.pro", 5);
        sleep(Duration::from_secs(31)).await;
        assert_eq!(locked_id(&f.selector).as_deref(), Some("de-frankfurt-01"));
        f.selector.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn small_improvement_keeps_current() {
        let f = fixture();
        f.selector.enable();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(locked_id(&f.selector).as_deref(), Some("nl-amsterdam-01"));
        f.selector.disable();

        // Re-lock Paris, then let auto run with Paris only slightly slower.
        f.selector.restore("fr-paris-01").expect("known");
        f.prober.set_ping("fr1.gameboost.pro", 33);
        f.prober.set_ping("nl1.gameboost.pro", 31);
        f.selector.enable();
        assert_eq!(locked_id(&f.selector).as_deref(), Some("fr-paris-01"));

        let decision = f.selector.evaluate_now().await.expect("cycle");
        assert_eq!(
            decision,
            Decision::Kept {
                endpoint_id: "fr-paris-01".into()
            }
        );
        sleep(Duration::from_millis(10)).await;
        assert_eq!(locked_id(&f.selector).as_deref(), Some("fr-paris-01"));
        f.selector.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_selection_beats_in_flight_evaluation() {
        let f = fixture();
        f.prober.set_delay(Duration::from_millis(100));

        f.selector.enable();
        sleep(Duration::from_millis(20)).await;
        // Evaluation is now waiting on probes.
        let endpoint = f.selector.manual_select("jp-tokyo-01").expect("known");
        assert_eq!(endpoint.id, "jp-tokyo-01");

        sleep(Duration::from_secs(5)).await;
        let state = f.selector.state();
        assert_eq!(locked_id(&f.selector).as_deref(), Some("jp-tokyo-01"));
        assert!(!state.auto_enabled);
        assert!(!f.selector.is_loop_running());

        let saved = f.persistence.load().expect("load");
        assert_eq!(saved.selected_endpoint_id.as_deref(), Some("jp-tokyo-01"));
        assert!(saved.updated_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cycle_is_discarded() {
        let f = fixture();
        f.prober.set_delay(Duration::from_millis(100));
        f.selector.enable();
        assert_eq!(f.selector.state().state, SelectorState::Selecting);

        let selector = f.selector.clone();
        let cycle = tokio::spawn(async move { selector.evaluate_now().await });
        sleep(Duration::from_millis(20)).await;
        f.selector.restore("sg-singapore-01").expect("known");

        let decision = cycle.await.expect("join").expect("cycle");
        assert_eq!(decision, Decision::Discarded);
        assert!(!f.selector.is_loop_running());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(locked_id(&f.selector).as_deref(), Some("sg-singapore-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn disable_releases_endpoint_and_stops_loop() {
        let f = fixture();
        let mut rx = f.selector.subscribe();
        f.selector.enable();
        sleep(Duration::from_millis(10)).await;
        assert!(f.selector.is_loop_running());

        f.selector.disable();
        sleep(Duration::from_millis(10)).await;
        assert!(!f.selector.is_loop_running());
        assert!(f.selector.active_endpoint().current().is_none());
        assert_eq!(rx.borrow_and_update().state, SelectorState::Disabled);

        let calls = f.prober.measure_calls();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(f.prober.measure_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_catalog_makes_no_decision() {
        let f = fixture();
        f.store.replace_catalog(Vec::new());
        f.selector.enable();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(f.selector.state().state, SelectorState::Selecting);
        assert!(matches!(
            f.selector.recommendations(3).await,
            Err(EngineError::NoCandidates)
        ));
        assert!(matches!(
            f.selector.refresh_all().await,
            Err(EngineError::NoCandidates)
        ));
        f.selector.disable();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_endpoint_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.selector.manual_select("xx-nowhere-01"),
            Err(EngineError::UnknownEndpoint(_))
        ));
        assert_eq!(f.selector.state(), SelectionState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_and_recommendations() {
        let f = fixture();
        f.prober.set_ping("jp1.gameboost.pro", 15);

        let results = f.selector.refresh_all().await.expect("refresh");
        assert_eq!(results.len(), 10);
        assert_eq!(f.store.by_id("jp-tokyo-01").map(|e| e.ping_ms), Some(15));

        f.selector
            .set_game(Some(GameContext::new("Valorant", None)));
        let top = f.selector.recommendations(2).await.expect("ranked");
        let ids: Vec<&str> = top.iter().map(|s| s.endpoint.id.as_str()).collect();
        assert_eq!(ids, vec!["jp-tokyo-01", "de-frankfurt-01"]);
        assert_eq!(f.selector.state(), SelectionState::default());
    }

    /// Prober whose measurements always panic.
    struct PanickingProber {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Prober for PanickingProber {
        async fn measure(&self, address: &str) -> u32 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("measurement of {} blew up", address);
        }

        async fn measure_with_mtu(&self, address: &str, _mtu: u16) -> u32 {
            self.measure(address).await
        }

        async fn try_keep_alive(&self, _address: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_backs_off_and_keeps_looping() {
        let _guard = crate::testing::CALLBACK_LOCK.lock();
        let prober = Arc::new(PanickingProber {
            calls: AtomicUsize::new(0),
        });
        let selector = Selector::new(
            SelectorConfig::default(),
            Arc::new(CandidateStore::with_default_catalog()),
            prober.clone(),
            Arc::new(QualityAggregator::default()),
            Arc::new(MemoryPreferences::default()),
        );

        selector.enable();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 10);
        assert_eq!(selector.state().state, SelectorState::Selecting);

        // The retry waits the error backoff, not the evaluation interval.
        sleep(Duration::from_secs(45)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 10);

        sleep(Duration::from_secs(20)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 20);
        assert_eq!(selector.state().state, SelectorState::Selecting);
        assert!(selector.is_auto_enabled());
        assert!(selector.is_loop_running());
        selector.disable();
    }
}
