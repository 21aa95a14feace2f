//! C-callable callback registry for connection, selection and stability changes.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::raw::{c_char, c_void};

use crate::error::EngineError;
use crate::vpn::tunnel::{TunnelDriver, TunnelRequest, VpnProtocol};

// ── Callback type aliases ───────────────────────────────────────────────────

/// `fn(state_code: i32, user_context: *mut c_void)`
pub type ConnectionStateCallback = Option<unsafe extern "C" fn(i32, *mut c_void)>;

/// `fn(selection_json: *const c_char, user_context: *mut c_void)`
pub type SelectionCallback = Option<unsafe extern "C" fn(*const c_char, *mut c_void)>;

/// `fn(stability_tier: i32, user_context: *mut c_void)`
pub type StabilityCallback = Option<unsafe extern "C" fn(i32, *mut c_void)>;

/// `fn(error_code: i32, message: *const c_char, user_context: *mut c_void)`
pub type ErrorCallback = Option<unsafe extern "C" fn(i32, *const c_char, *mut c_void)>;

/// `fn(op: i32, request_json: *const c_char, user_context: *mut c_void) -> i32`
///
/// `op` is [`TUNNEL_OP_CONNECT`] or [`TUNNEL_OP_DISCONNECT`]; the request is
/// null on disconnect. A non-zero return is reported as a tunnel error.
pub type TunnelCallback = Option<unsafe extern "C" fn(i32, *const c_char, *mut c_void) -> i32>;

pub const TUNNEL_OP_DISCONNECT: i32 = 0;
pub const TUNNEL_OP_CONNECT: i32 = 1;

// ── Send + Sync wrapper for raw pointers ────────────────────────────────────

/// Wrapper so that raw user-context pointers can be stored in a `Mutex`.
/// The caller is responsible for thread-safety of the pointed-to data.
#[derive(Clone, Copy)]
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

impl Default for SendPtr {
    fn default() -> Self {
        SendPtr(std::ptr::null_mut())
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CallbackRegistry {
    connection_cb: ConnectionStateCallback,
    connection_ctx: SendPtr,

    selection_cb: SelectionCallback,
    selection_ctx: SendPtr,

    stability_cb: StabilityCallback,
    stability_ctx: SendPtr,

    error_cb: ErrorCallback,
    error_ctx: SendPtr,

    tunnel_cb: TunnelCallback,
    tunnel_ctx: SendPtr,
}

pub static CALLBACKS: Lazy<Mutex<CallbackRegistry>> =
    Lazy::new(|| Mutex::new(CallbackRegistry::default()));

// ── Registration ────────────────────────────────────────────────────────────

pub fn register_connection_state_callback(cb: ConnectionStateCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.connection_cb = cb;
    reg.connection_ctx = SendPtr(ctx);
}

pub fn register_selection_callback(cb: SelectionCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.selection_cb = cb;
    reg.selection_ctx = SendPtr(ctx);
}

pub fn register_stability_callback(cb: StabilityCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.stability_cb = cb;
    reg.stability_ctx = SendPtr(ctx);
}

pub fn register_error_callback(cb: ErrorCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.error_cb = cb;
    reg.error_ctx = SendPtr(ctx);
}

pub fn register_tunnel_callback(cb: TunnelCallback, ctx: *mut c_void) {
    let mut reg = CALLBACKS.lock();
    reg.tunnel_cb = cb;
    reg.tunnel_ctx = SendPtr(ctx);
}

// ── Invocation helpers ──────────────────────────────────────────────────────

/// Notify the host application that the tunnel state changed.
pub fn fire_connection_state(state: i32) {
    let reg = CALLBACKS.lock();
    if let Some(cb) = reg.connection_cb {
        let ctx = reg.connection_ctx.0;
        // Drop lock before calling into foreign code to avoid deadlocks.
        drop(reg);
        unsafe { cb(state, ctx) };
    }
}

/// Notify the host application of a new selector state.
pub fn fire_selection_change(selection_json: &str) {
    let reg = CALLBACKS.lock();
    if let Some(cb) = reg.selection_cb {
        let ctx = reg.selection_ctx.0;
        drop(reg);
        if let Ok(c_json) = CString::new(selection_json) {
            unsafe { cb(c_json.as_ptr(), ctx) };
        }
    }
}

/// Notify the host application that the stability tier changed.
pub fn fire_stability_change(tier: i32) {
    let reg = CALLBACKS.lock();
    if let Some(cb) = reg.stability_cb {
        let ctx = reg.stability_ctx.0;
        drop(reg);
        unsafe { cb(tier, ctx) };
    }
}

/// Notify the host application of an error.
pub fn fire_error(code: i32, msg: &str) {
    let reg = CALLBACKS.lock();
    if let Some(cb) = reg.error_cb {
        let ctx = reg.error_ctx.0;
        drop(reg);
        if let Ok(c_msg) = CString::new(msg) {
            unsafe { cb(code, c_msg.as_ptr(), ctx) };
        }
    }
}

fn call_tunnel(op: i32, request_json: Option<&str>) -> Result<(), EngineError> {
    let reg = CALLBACKS.lock();
    let Some(cb) = reg.tunnel_cb else {
        return Err(EngineError::Tunnel("No tunnel callback registered".into()));
    };
    let ctx = reg.tunnel_ctx.0;
    drop(reg);

    let c_json = request_json
        .map(CString::new)
        .transpose()
        .map_err(|e| EngineError::InvalidParam(e.to_string()))?;
    let ptr = c_json
        .as_ref()
        .map_or(std::ptr::null(), |json| json.as_ptr());

    let rc = unsafe { cb(op, ptr, ctx) };
    if rc == 0 {
        Ok(())
    } else {
        Err(EngineError::Tunnel(format!("Host tunnel returned {}", rc)))
    }
}

/// Tunnel driver that forwards to the host's registered tunnel callback.
pub struct HostTunnelDriver {
    protocol: VpnProtocol,
}

impl HostTunnelDriver {
    pub fn new(protocol: VpnProtocol) -> Self {
        Self { protocol }
    }

    /// One driver per protocol, all backed by the same callback.
    pub fn all() -> Vec<std::sync::Arc<dyn TunnelDriver>> {
        [VpnProtocol::WireGuard, VpnProtocol::OpenVpn, VpnProtocol::IkeV2]
            .into_iter()
            .map(|p| std::sync::Arc::new(HostTunnelDriver::new(p)) as std::sync::Arc<dyn TunnelDriver>)
            .collect()
    }
}

#[async_trait]
impl TunnelDriver for HostTunnelDriver {
    fn protocol(&self) -> VpnProtocol {
        self.protocol
    }

    async fn connect(&self, request: &TunnelRequest) -> Result<(), EngineError> {
        let json =
            serde_json::to_string(request).map_err(|e| EngineError::Internal(e.to_string()))?;
        call_tunnel(TUNNEL_OP_CONNECT, Some(&json))
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        call_tunnel(TUNNEL_OP_DISCONNECT, None)
    }
}
