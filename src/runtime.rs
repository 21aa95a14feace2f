//! Tokio runtime for the C ABI.
//!
//! Provides a lazily-initialized global multi-thread runtime. FFI functions
//! enter it to spawn the engine loops and `block_on` one-shot probes.

use once_cell::sync::Lazy;

static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("gameboost-engine")
        .build()
        .expect("failed to create tokio runtime")
});

/// Returns a reference to the global Tokio runtime.
pub fn runtime() -> &'static tokio::runtime::Runtime {
    &RUNTIME
}

/// Cancellation token plus join handle for one background loop.
pub(crate) struct LoopHandle {
    token: tokio_util::sync::CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn new(
        token: tokio_util::sync::CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self { token, handle }
    }

    /// Cancel the loop. The task exits at its next suspension point.
    pub(crate) fn stop(self) {
        self.token.cancel();
        drop(self.handle);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
