//! Application context owned by the process entry point.
//!
//! Carries the process-wide shutdown signal and the set of active remote
//! sessions, so neither lives in module-level globals. Components receive
//! a clone and derive their own child signals from it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::utils::sos::SignalOfStop;

/// Opaque id of a registered remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

#[derive(Debug, Clone)]
pub struct AppContext {
    sos: SignalOfStop,
    sessions: Arc<Mutex<HashSet<SessionId>>>,
    next_id: Arc<AtomicU64>,
}

impl AppContext {
    pub fn new() -> Self {
        Self {
            sos: SignalOfStop::new(),
            sessions: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The process-wide shutdown signal.
    pub fn sos(&self) -> &SignalOfStop {
        &self.sos
    }

    /// Request shutdown of everything attached to this context.
    pub fn shutdown(&self) {
        self.sos.cancel();
    }

    /// Track a new active session; the returned id is used to release it.
    pub fn register_session(&self) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().unwrap().insert(id);
        id
    }

    /// Drop a session from the active set. Safe to call more than once.
    pub fn unregister_session(&self, id: SessionId) {
        self.sessions.lock().unwrap().remove(&id);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_register_and_release() {
        let ctx = AppContext::new();
        let a = ctx.register_session();
        let b = ctx.register_session();
        assert_ne!(a, b);
        assert_eq!(ctx.active_sessions(), 2);

        ctx.unregister_session(a);
        ctx.unregister_session(a);
        assert_eq!(ctx.active_sessions(), 1);

        ctx.unregister_session(b);
        assert_eq!(ctx.active_sessions(), 0);
    }

    #[test]
    fn shutdown_cancels_the_shared_signal() {
        let ctx = AppContext::new();
        let clone = ctx.clone();
        ctx.shutdown();
        assert!(clone.sos().cancelled());
    }
}
