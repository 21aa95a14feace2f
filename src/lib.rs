//! GameBoost engine: C FFI entry point
//!
//! Adaptive network-quality monitoring and server selection for a gaming VPN
//! client. The engine measures latency to candidate endpoints, scores them,
//! switches the active endpoint with hysteresis and rides out connectivity
//! loss with bounded reconnection backoff.
//!
//! The `extern "C"` functions below are consumed by the Android JNI glue via
//! `cdylib`. All async work is dispatched through the global Tokio runtime
//! (`runtime().block_on()`).

pub mod callbacks;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod persistence;
pub mod runtime;
pub mod vpn;

#[cfg(test)]
mod testing;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;

pub use config::EngineConfig;
pub use engine::{Collaborators, Engine};
pub use error::EngineError;

use callbacks::{
    register_connection_state_callback, register_error_callback, register_selection_callback,
    register_stability_callback, register_tunnel_callback, ConnectionStateCallback, ErrorCallback,
    HostTunnelDriver, SelectionCallback, StabilityCallback, TunnelCallback,
};
use error::{
    clear_error, last_error_code, set_engine_error, set_error, take_last_error,
    ERROR_NOT_INITIALIZED, SUCCESS,
};
use monitor::probe::TcpProber;
use monitor::stabilizer::{ConnectivityEvent, HostConnectivity};
use persistence::{JsonFilePreferences, MemoryPreferences, Persistence};
use runtime::runtime;
use vpn::profiles::{GameDetector, StaticGameDetector};
use vpn::tunnel::VpnProtocol;

// ── Global engine state ─────────────────────────────────────────────────────

struct EngineState {
    engine: Engine,
    connectivity: Arc<HostConnectivity>,
    detector: Arc<StaticGameDetector>,
}

static ENGINE: Lazy<Mutex<Option<EngineState>>> = Lazy::new(|| Mutex::new(None));

/// Convenience: run `body` while holding the engine lock.
/// Returns `ERROR_NOT_INITIALIZED` (and sets the last-error) when the engine
/// has not been initialised yet.
fn with_engine<F>(body: F) -> i32
where
    F: FnOnce(&EngineState) -> Result<i32, EngineError>,
{
    let guard = ENGINE.lock();
    match guard.as_ref() {
        Some(state) => match body(state) {
            Ok(code) => code,
            Err(e) => {
                set_engine_error(&e);
                e.code()
            }
        },
        None => {
            set_engine_error(&EngineError::NotInitialized);
            ERROR_NOT_INITIALIZED
        }
    }
}

/// Like [`with_engine`], but serializes the result to a JSON C string.
/// Returns null on error.
fn with_engine_json<F, T>(body: F) -> *mut c_char
where
    F: FnOnce(&EngineState) -> Result<T, EngineError>,
    T: Serialize,
{
    let guard = ENGINE.lock();
    let state = match guard.as_ref() {
        Some(s) => s,
        None => {
            set_engine_error(&EngineError::NotInitialized);
            return ptr::null_mut();
        }
    };

    match body(state) {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(s) => to_c_string(&s),
            Err(e) => {
                set_error(format!("JSON serialization failed: {}", e));
                ptr::null_mut()
            }
        },
        Err(e) => {
            set_engine_error(&e);
            ptr::null_mut()
        }
    }
}

/// Allocate a C string on the heap.  Caller frees via `gameboost_free_string`.
fn to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Read a `*const c_char` into a `&str`, returning `None` on null or invalid UTF-8.
unsafe fn from_c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

fn required_str<'a>(p: *const c_char, name: &str) -> Result<&'a str, EngineError> {
    unsafe { from_c_str(p) }
        .ok_or_else(|| EngineError::InvalidParam(format!("{} is null or invalid", name)))
}

fn parse_packages_json(raw: &str) -> Result<Vec<String>, EngineError> {
    serde_json::from_str(raw)
        .map_err(|e| EngineError::InvalidParam(format!("Invalid packages_json: {}", e)))
}

fn preferences_store(config: &EngineConfig) -> Arc<dyn Persistence> {
    let path = config
        .preferences_path
        .as_ref()
        .map(std::path::PathBuf::from)
        .or_else(JsonFilePreferences::default_path);
    match path {
        Some(path) => Arc::new(JsonFilePreferences::new(path)),
        None => {
            log::warn!("No data directory, preferences will not survive a restart");
            Arc::new(MemoryPreferences::default())
        }
    }
}

#[derive(Serialize)]
struct StabilityReport {
    #[serde(flatten)]
    state: monitor::stabilizer::StabilityState,
    tier_name: &'static str,
    recommendations: Vec<String>,
}

#[derive(Serialize)]
struct QualityReport {
    endpoint_id: String,
    #[serde(flatten)]
    metrics: monitor::quality::QualityMetrics,
    score: u32,
}

// ═══════════════════════════════════════════════════════════════════════════
//  Core
// ═══════════════════════════════════════════════════════════════════════════

/// Initialise the engine from a JSON config (null or `""` for defaults) and
/// start its loops.  Returns 0 on success, negative on error.
#[no_mangle]
pub unsafe extern "C" fn gameboost_init(config_json: *const c_char) -> i32 {
    clear_error();

    let mut guard = ENGINE.lock();
    if guard.is_some() {
        return SUCCESS; // already initialised
    }

    // Initialise logger (ignore errors if already set)
    let _ = env_logger::try_init();

    log::info!(
        "GameBoost engine v{} initialising",
        env!("CARGO_PKG_VERSION")
    );

    let config = match from_c_str(config_json).map(EngineConfig::from_json) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            set_engine_error(&e);
            return e.code();
        }
        None => EngineConfig::default(),
    };

    let connectivity = Arc::new(HostConnectivity::default());
    let detector = Arc::new(StaticGameDetector::new());
    let engine = Engine::new(
        config.clone(),
        Collaborators {
            prober: Arc::new(TcpProber::new(config.probe.clone())),
            connectivity: connectivity.clone(),
            persistence: preferences_store(&config),
            drivers: HostTunnelDriver::all(),
            detector: detector.clone(),
        },
    );

    {
        let _rt = runtime().enter();
        engine.start();
    }

    *guard = Some(EngineState {
        engine,
        connectivity,
        detector,
    });

    log::info!("GameBoost engine initialised");
    SUCCESS
}

/// Tear down the engine: stop every loop, disconnect, drop all state.
#[no_mangle]
pub extern "C" fn gameboost_cleanup() {
    clear_error();

    let mut guard = ENGINE.lock();
    if let Some(state) = guard.take() {
        runtime().block_on(state.engine.shutdown());
        log::info!("GameBoost engine cleaned up");
    }
}

/// Return the engine version string.  Caller must free with `gameboost_free_string`.
#[no_mangle]
pub extern "C" fn gameboost_version() -> *mut c_char {
    to_c_string(env!("CARGO_PKG_VERSION"))
}

/// Free a string previously returned by the engine.
#[no_mangle]
pub unsafe extern "C" fn gameboost_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Servers
// ═══════════════════════════════════════════════════════════════════════════

/// Get the endpoint catalog as a JSON array.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_servers_json() -> *mut c_char {
    clear_error();
    with_engine_json(|state| Ok(state.engine.store().list()))
}

/// Get endpoints in a country or continent as a JSON array.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_servers_in_region_json(region: *const c_char) -> *mut c_char {
    clear_error();
    with_engine_json(|state| {
        let region = required_str(region, "region")?;
        Ok(state.engine.store().by_region(region))
    })
}

/// Get favourite endpoints as a JSON array.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_favorites_json() -> *mut c_char {
    clear_error();
    with_engine_json(|state| Ok(state.engine.store().favorites()))
}

/// Flip the favourite flag.  Returns 1 if now a favourite, 0 if not,
/// negative on error.
#[no_mangle]
pub extern "C" fn gameboost_toggle_favorite(endpoint_id: *const c_char) -> i32 {
    clear_error();
    with_engine(|state| {
        let id = required_str(endpoint_id, "endpoint_id")?;
        match state.engine.store().toggle_favorite(id) {
            Some(true) => Ok(1),
            Some(false) => Ok(0),
            None => Err(EngineError::UnknownEndpoint(id.to_string())),
        }
    })
}

/// Probe every endpoint and store the measured pings.  Blocks until done.
/// Returns 0 on success.
#[no_mangle]
pub extern "C" fn gameboost_refresh_pings() -> i32 {
    clear_error();
    with_engine(|state| {
        runtime().block_on(state.engine.selector().refresh_all())?;
        Ok(SUCCESS)
    })
}

/// Get quality metrics for one endpoint as JSON.
/// Caller must free the returned string.
///
/// JSON shape: `{"endpoint_id":"...","avg_ping_ms":..,"variation_ms":..,
/// "packet_loss":..,"sample_count":..,"stability":"...","score":..}`
#[no_mangle]
pub extern "C" fn gameboost_get_quality_json(endpoint_id: *const c_char) -> *mut c_char {
    clear_error();
    with_engine_json(|state| {
        let id = required_str(endpoint_id, "endpoint_id")?;
        if state.engine.store().by_id(id).is_none() {
            return Err(EngineError::UnknownEndpoint(id.to_string()));
        }
        let metrics = state.engine.aggregator().metrics(id);
        Ok(QualityReport {
            endpoint_id: id.to_string(),
            metrics,
            score: metrics.score(),
        })
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  Selection
// ═══════════════════════════════════════════════════════════════════════════

/// Probe and rank endpoints, returning the best `limit` as JSON.
/// Does not change the selection.  Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_recommendations_json(limit: i32) -> *mut c_char {
    clear_error();
    with_engine_json(|state| {
        let limit = usize::try_from(limit)
            .map_err(|_| EngineError::InvalidParam("limit must not be negative".into()))?;
        runtime().block_on(state.engine.selector().recommendations(limit))
    })
}

/// Get the selector state as JSON.
/// Caller must free the returned string.
///
/// JSON shape: `{"state":"locked","endpoint":{...},"auto_enabled":true,"last_decision_at":"..."}`
#[no_mangle]
pub extern "C" fn gameboost_get_selection_json() -> *mut c_char {
    clear_error();
    with_engine_json(|state| Ok(state.engine.selector().state()))
}

/// Get up to `max` recent selection events (newest first) as JSON.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_selection_events_json(max: i32) -> *mut c_char {
    clear_error();
    with_engine_json(|state| {
        let max = usize::try_from(max).unwrap_or(0);
        Ok(state.engine.selector().recent_events(max))
    })
}

/// Turn on automatic endpoint selection.
#[no_mangle]
pub extern "C" fn gameboost_enable_auto_selection() -> i32 {
    clear_error();
    with_engine(|state| {
        let _rt = runtime().enter();
        state.engine.selector().enable();
        Ok(SUCCESS)
    })
}

/// Turn off automatic endpoint selection and release the active endpoint.
#[no_mangle]
pub extern "C" fn gameboost_disable_auto_selection() -> i32 {
    clear_error();
    with_engine(|state| {
        state.engine.selector().disable();
        Ok(SUCCESS)
    })
}

/// Lock a user-chosen endpoint.  Turns automatic selection off.
#[no_mangle]
pub extern "C" fn gameboost_select_endpoint(endpoint_id: *const c_char) -> i32 {
    clear_error();
    with_engine(|state| {
        let id = required_str(endpoint_id, "endpoint_id")?;
        state.engine.selector().manual_select(id)?;
        Ok(SUCCESS)
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  Stability
// ═══════════════════════════════════════════════════════════════════════════

/// Get the stabilizer state with advice strings as JSON.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_stability_json() -> *mut c_char {
    clear_error();
    with_engine_json(|state| {
        let stabilizer = state.engine.stabilizer();
        let current = stabilizer.state();
        Ok(StabilityReport {
            state: current,
            tier_name: current.tier.display_name(),
            recommendations: stabilizer.recommendations(),
        })
    })
}

/// The host regained an internet-capable network.
#[no_mangle]
pub extern "C" fn gameboost_on_network_available() -> i32 {
    clear_error();
    with_engine(|state| {
        state.engine.push_event(ConnectivityEvent::Available)?;
        Ok(SUCCESS)
    })
}

/// The host lost its network.  `has_backup_path` is 1 when another interface
/// can still carry traffic.
#[no_mangle]
pub extern "C" fn gameboost_on_network_lost(has_backup_path: i32) -> i32 {
    clear_error();
    with_engine(|state| {
        state.connectivity.set_backup_path(has_backup_path != 0);
        state.engine.push_event(ConnectivityEvent::Lost)?;
        Ok(SUCCESS)
    })
}

/// The link bandwidth estimate changed.
#[no_mangle]
pub extern "C" fn gameboost_on_capabilities_changed(downstream_kbps: u32, upstream_kbps: u32) -> i32 {
    clear_error();
    with_engine(|state| {
        state.engine.push_event(ConnectivityEvent::CapabilitiesChanged {
            downstream_kbps,
            upstream_kbps,
        })?;
        Ok(SUCCESS)
    })
}

/// Probe MTU sizes against the active endpoint.  Returns the recommended MTU,
/// or negative on error.
#[no_mangle]
pub extern "C" fn gameboost_optimize_mtu() -> i32 {
    clear_error();
    with_engine(|state| {
        let endpoint = state
            .engine
            .selector()
            .state()
            .state
            .endpoint()
            .cloned()
            .ok_or_else(|| EngineError::InvalidParam("No endpoint selected".into()))?;
        let mtu = runtime().block_on(state.engine.stabilizer().optimize_mtu(&endpoint));
        Ok(i32::from(mtu))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  Games
// ═══════════════════════════════════════════════════════════════════════════

/// Report running packages (`["com.example.game", ...]`) and re-detect the
/// current game.  Returns 1 if a game was detected, 0 if not, negative on error.
#[no_mangle]
pub extern "C" fn gameboost_set_running_packages(packages_json: *const c_char) -> i32 {
    clear_error();
    with_engine(|state| {
        let packages = parse_packages_json(required_str(packages_json, "packages_json")?)?;
        state.detector.set_running_packages(packages);
        Ok(i32::from(state.engine.refresh_game().is_some()))
    })
}

/// Get the detected game as JSON, or null if none.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_current_game_json() -> *mut c_char {
    clear_error();
    let guard = ENGINE.lock();
    let state = match guard.as_ref() {
        Some(s) => s,
        None => {
            set_engine_error(&EngineError::NotInitialized);
            return ptr::null_mut();
        }
    };

    match state.detector.current_game() {
        Some(game) => match serde_json::to_string(&game) {
            Ok(s) => to_c_string(&s),
            Err(e) => {
                set_error(format!("JSON serialization failed: {}", e));
                ptr::null_mut()
            }
        },
        None => ptr::null_mut(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Tunnel
// ═══════════════════════════════════════════════════════════════════════════

/// Connect to the selected endpoint (or the best one when nothing is
/// selected) through the host tunnel callback.  Returns 0 on success.
#[no_mangle]
pub extern "C" fn gameboost_connect() -> i32 {
    clear_error();
    with_engine(|state| {
        runtime().block_on(state.engine.connect())?;
        Ok(SUCCESS)
    })
}

/// Disconnect the tunnel.  Returns 0 on success.
#[no_mangle]
pub extern "C" fn gameboost_disconnect() -> i32 {
    clear_error();
    with_engine(|state| {
        runtime().block_on(state.engine.disconnect())?;
        Ok(SUCCESS)
    })
}

/// Set the preferred tunnel protocol (0 WireGuard, 1 OpenVPN, 2 IKEv2) used
/// when no game profile picks one.  The choice is persisted.  Returns 0 on
/// success.
#[no_mangle]
pub extern "C" fn gameboost_set_protocol(protocol: i32) -> i32 {
    clear_error();
    with_engine(|state| {
        let protocol = VpnProtocol::from_code(protocol).ok_or_else(|| {
            EngineError::InvalidParam(format!("Unknown protocol code {}", protocol))
        })?;
        state.engine.set_protocol(protocol)?;
        Ok(SUCCESS)
    })
}

/// Get the preferred tunnel protocol code, or negative on error.
#[no_mangle]
pub extern "C" fn gameboost_get_protocol() -> i32 {
    with_engine(|state| Ok(state.engine.protocol().as_code()))
}

/// Get the tunnel state code (0 disconnected, 1 connecting, 2 connected,
/// 3 disconnecting, -1 error).
#[no_mangle]
pub extern "C" fn gameboost_get_connection_state() -> i32 {
    let guard = ENGINE.lock();
    match guard.as_ref() {
        Some(state) => runtime().block_on(state.engine.connection().state()).as_code(),
        None => 0,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Callbacks
// ═══════════════════════════════════════════════════════════════════════════

/// Register a callback for tunnel state changes.
///
/// Signature: `fn(state_code: i32, user_context: *mut c_void)`
#[no_mangle]
pub extern "C" fn gameboost_on_connection_state_change(
    cb: ConnectionStateCallback,
    ctx: *mut c_void,
) {
    register_connection_state_callback(cb, ctx);
}

/// Register a callback for selector state changes.
///
/// Signature: `fn(selection_json: *const c_char, user_context: *mut c_void)`
#[no_mangle]
pub extern "C" fn gameboost_on_selection_change(cb: SelectionCallback, ctx: *mut c_void) {
    register_selection_callback(cb, ctx);
}

/// Register a callback for stability tier changes.
///
/// Signature: `fn(stability_tier: i32, user_context: *mut c_void)`
#[no_mangle]
pub extern "C" fn gameboost_on_stability_change(cb: StabilityCallback, ctx: *mut c_void) {
    register_stability_callback(cb, ctx);
}

/// Register a callback for errors.
///
/// Signature: `fn(error_code: i32, message: *const c_char, user_context: *mut c_void)`
#[no_mangle]
pub extern "C" fn gameboost_on_error(cb: ErrorCallback, ctx: *mut c_void) {
    register_error_callback(cb, ctx);
}

/// Register the host tunnel implementation.
///
/// Signature: `fn(op: i32, request_json: *const c_char, user_context: *mut c_void) -> i32`
#[no_mangle]
pub extern "C" fn gameboost_set_tunnel_handler(cb: TunnelCallback, ctx: *mut c_void) {
    register_tunnel_callback(cb, ctx);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Error
// ═══════════════════════════════════════════════════════════════════════════

/// Get the last error message.  Returns null if no error.
/// Caller must free the returned string.
#[no_mangle]
pub extern "C" fn gameboost_get_last_error() -> *mut c_char {
    match take_last_error() {
        Some(msg) => to_c_string(&msg),
        None => ptr::null_mut(),
    }
}

/// Get the last error code.  Returns 0 (`SUCCESS`) if no error.
#[no_mangle]
pub extern "C" fn gameboost_get_last_error_code() -> i32 {
    last_error_code()
}

/// Clear the stored error state.
#[no_mangle]
pub extern "C" fn gameboost_clear_error() {
    clear_error();
}
