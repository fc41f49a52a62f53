//! Per-session cooperative cancellation flags

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;

/// Shared flag polled by the executor at window boundaries.
pub type CancelFlag = Arc<AtomicBool>;

/// Registry of cancellation flags keyed by session id.
///
/// Owned by the orchestrating service and shared by handle (`Arc`), so
/// several bulk operations can run side by side without touching each
/// other's flags.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    flags: Mutex<FxHashMap<String, CancelFlag>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, CancelFlag>> {
        // Flags stay valid even if a holder panicked mid-update
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session with a fresh, uncancelled flag.
    ///
    /// Overwrites any stale entry with the same id. The returned guard
    /// unregisters the session when dropped.
    pub fn register(self: &Arc<Self>, session_id: impl Into<String>) -> CancellationGuard {
        let session_id = session_id.into();
        let flag: CancelFlag = Arc::new(AtomicBool::new(false));
        if self
            .lock()
            .insert(session_id.clone(), flag.clone())
            .is_some()
        {
            log::debug!("{session_id}: replaced stale cancellation entry");
        }
        CancellationGuard {
            registry: Arc::clone(self),
            session_id,
            flag,
        }
    }

    /// Ask a running session to stop at its next window boundary.
    ///
    /// Returns `false` (and does nothing) when no such session is registered.
    pub fn request_cancel(&self, session_id: &str) -> bool {
        match self.lock().get(session_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                log::info!("{session_id}: cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Read a session's flag; unknown sessions are not cancelled.
    pub fn is_cancelled(&self, session_id: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Remove a session's entry. Prefer dropping the [`CancellationGuard`].
    pub fn unregister(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    /// Cancellation predicate bound to a session id, for `BatchConfig`.
    pub fn predicate(self: &Arc<Self>, session_id: &str) -> impl Fn() -> bool + Send + Sync + 'static {
        let registry = Arc::clone(self);
        let session_id = session_id.to_string();
        move || registry.is_cancelled(&session_id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live registration; unregisters its session on drop, including on early
/// return or panic.
#[derive(Debug)]
pub struct CancellationGuard {
    registry: Arc<CancellationRegistry>,
    session_id: String,
    flag: CancelFlag,
}

impl CancellationGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Underlying flag, e.g. for binding to a signal handler
    pub fn flag(&self) -> CancelFlag {
        Arc::clone(&self.flag)
    }

    /// Predicate reading this registration's flag directly.
    pub fn predicate(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let flag = Arc::clone(&self.flag);
        move || flag.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        let mut flags = self.registry.lock();
        // A later register() under the same id owns the entry now
        if flags
            .get(&self.session_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.flag))
        {
            flags.remove(&self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_starts_uncancelled() {
        let registry = Arc::new(CancellationRegistry::new());
        let _guard = registry.register("s1");
        assert!(!registry.is_cancelled("s1"));
    }

    #[test]
    fn request_cancel_sets_flag() {
        let registry = Arc::new(CancellationRegistry::new());
        let guard = registry.register("s1");
        assert!(registry.request_cancel("s1"));
        assert!(registry.is_cancelled("s1"));
        assert!(guard.is_cancelled());
    }

    #[test]
    fn request_cancel_unknown_is_noop() {
        let registry = CancellationRegistry::new();
        assert!(!registry.request_cancel("nobody"));
        assert!(!registry.is_cancelled("nobody"));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_overwrites_stale_entry() {
        let registry = Arc::new(CancellationRegistry::new());
        let stale = registry.register("s1");
        registry.request_cancel("s1");
        let fresh = registry.register("s1");
        assert!(!registry.is_cancelled("s1"));
        assert!(stale.is_cancelled());

        // Dropping the stale guard must not remove the fresh entry
        drop(stale);
        assert_eq!(registry.len(), 1);
        drop(fresh);
        assert!(registry.is_empty());
    }

    #[test]
    fn sessions_do_not_interfere() {
        let registry = Arc::new(CancellationRegistry::new());
        let _a = registry.register("a");
        let _b = registry.register("b");
        registry.request_cancel("a");
        assert!(registry.is_cancelled("a"));
        assert!(!registry.is_cancelled("b"));
    }

    #[test]
    fn guard_drop_unregisters() {
        let registry = Arc::new(CancellationRegistry::new());
        {
            let _guard = registry.register("s1");
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn guard_unregisters_on_panic() {
        let registry = Arc::new(CancellationRegistry::new());
        let r = Arc::clone(&registry);
        let result = std::panic::catch_unwind(move || {
            let _guard = r.register("crashy");
            panic!("operation crashed");
        });
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn predicate_tracks_registry() {
        let registry = Arc::new(CancellationRegistry::new());
        let guard = registry.register("s1");
        let by_id = registry.predicate("s1");
        let by_guard = guard.predicate();
        assert!(!by_id());
        assert!(!by_guard());
        registry.request_cancel("s1");
        assert!(by_id());
        assert!(by_guard());
    }

    #[test]
    fn explicit_unregister() {
        let registry = Arc::new(CancellationRegistry::new());
        let guard = registry.register("s1");
        registry.unregister("s1");
        assert!(registry.is_empty());
        // Guard drop after explicit unregister is harmless
        drop(guard);
        assert!(registry.is_empty());
    }
}
