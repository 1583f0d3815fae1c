use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use crate::engine::Engine;

// Process-wide lock serializing accelerator access. Concurrent command-buffer
// submission against the single local device corrupts the kernel queue, so at
// most one generation may be inside the engine at any time.
static ENGINE_LOCK: Mutex<()> = Mutex::new(());

// Gauge of callers inside the critical section, for instrumentation.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Scoped guard over the engine critical section.
///
/// Acquiring blocks until the previous caller releases; callers queue on the
/// underlying mutex. The guard releases on every exit path, panics included.
pub struct EngineGuard {
    _guard: MutexGuard<'static, ()>,
}

impl EngineGuard {
    /// Enter the engine critical section, blocking until it is free.
    pub fn acquire() -> Self {
        // A poisoned lock only means a previous generation panicked; the
        // engine itself holds no state behind this mutex.
        let guard = ENGINE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
        log::debug!("engine lock acquired");

        Self { _guard: guard }
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
        log::debug!("engine lock released");
    }
}

/// Number of callers currently inside the engine critical section.
/// At most 1 by construction; exposed so tests can verify it.
pub fn in_flight() -> usize {
    IN_FLIGHT.load(Ordering::SeqCst)
}

/// Clear accelerator caches after a generation. Best effort: failures are
/// logged and swallowed. Runs outside the critical section so the next
/// caller is not held up by it.
pub fn clear_cache(engine: &dyn Engine) {
    match engine.clear_cache() {
        Ok(()) => log::debug!("cleared accelerator cache"),
        Err(error) => log::warn!("could not clear accelerator cache: {error}"),
    }
}
