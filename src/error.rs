//! Engine error types, error codes, and last-error storage for the C ABI.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;

// ── Error codes (stable across the JNI boundary) ────────────────────────────

pub const SUCCESS: i32 = 0;
pub const ERROR_INVALID_PARAM: i32 = -1;
pub const ERROR_NOT_INITIALIZED: i32 = -2;
pub const ERROR_ALREADY_CONNECTED: i32 = -3;
pub const ERROR_NOT_CONNECTED: i32 = -4;
pub const ERROR_INTERNAL: i32 = -5;
pub const ERROR_UNKNOWN_ENDPOINT: i32 = -6;
pub const ERROR_NETWORK: i32 = -7;
pub const ERROR_CONFIG: i32 = -8;
pub const ERROR_NO_CANDIDATES: i32 = -9;
pub const ERROR_TUNNEL: i32 = -10;
pub const ERROR_STORAGE: i32 = -11;

// ── EngineError enum ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("No recommendation available: candidate list is empty")]
    NoCandidates,

    #[error("Not initialized")]
    NotInitialized,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Map this error to its integer error code for the C API.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Network(_) => ERROR_NETWORK,
            EngineError::Config(_) => ERROR_CONFIG,
            EngineError::Tunnel(_) => ERROR_TUNNEL,
            EngineError::Storage(_) => ERROR_STORAGE,
            EngineError::InvalidParam(_) => ERROR_INVALID_PARAM,
            EngineError::UnknownEndpoint(_) => ERROR_UNKNOWN_ENDPOINT,
            EngineError::NoCandidates => ERROR_NO_CANDIDATES,
            EngineError::NotInitialized => ERROR_NOT_INITIALIZED,
            EngineError::AlreadyConnected => ERROR_ALREADY_CONNECTED,
            EngineError::NotConnected => ERROR_NOT_CONNECTED,
            EngineError::Internal(_) => ERROR_INTERNAL,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

// ── Last-error storage ──────────────────────────────────────────────────────

static LAST_ERROR: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));
static LAST_ERROR_CODE: Lazy<Mutex<i32>> = Lazy::new(|| Mutex::new(SUCCESS));

/// Store an error message so it can be retrieved by the FFI caller.
pub fn set_error(msg: impl Into<String>) {
    *LAST_ERROR.lock() = Some(msg.into());
}

/// Store an `EngineError`, recording both the message and code.
pub fn set_engine_error(err: &EngineError) {
    *LAST_ERROR_CODE.lock() = err.code();
    *LAST_ERROR.lock() = Some(err.to_string());
}

/// Clear the stored error.
pub fn clear_error() {
    *LAST_ERROR.lock() = None;
    *LAST_ERROR_CODE.lock() = SUCCESS;
}

/// Take the last error message, leaving `None` behind.
pub fn take_last_error() -> Option<String> {
    LAST_ERROR.lock().take()
}

/// Return the last error code without clearing it.
pub fn last_error_code() -> i32 {
    *LAST_ERROR_CODE.lock()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_negative() {
        let errors = [
            EngineError::Network(String::new()),
            EngineError::Config(String::new()),
            EngineError::Tunnel(String::new()),
            EngineError::Storage(String::new()),
            EngineError::InvalidParam(String::new()),
            EngineError::UnknownEndpoint(String::new()),
            EngineError::NoCandidates,
            EngineError::NotInitialized,
            EngineError::AlreadyConnected,
            EngineError::NotConnected,
            EngineError::Internal(String::new()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(EngineError::code).collect();
        assert!(codes.iter().all(|c| *c < SUCCESS));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn last_error_round_trip() {
        set_engine_error(&EngineError::UnknownEndpoint("xx-nowhere-01".into()));
        assert_eq!(last_error_code(), ERROR_UNKNOWN_ENDPOINT);
        assert_eq!(
            take_last_error().as_deref(),
            Some("Unknown endpoint: xx-nowhere-01")
        );
        assert!(take_last_error().is_none());

        clear_error();
        assert_eq!(last_error_code(), SUCCESS);
    }
}
