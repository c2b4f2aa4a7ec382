//! Cooperative cancellation for in-flight turns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared per-session abort signal.
///
/// The session protocol sets it when new user speech or an explicit
/// cancel arrives; the turn pipeline and the synthesis stream observe it
/// between steps. There is no preemption — cancellation takes effect at
/// the next checkpoint, which may be up to one audio chunk later.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abandonment of the current turn.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Re-arm for a new turn.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear() {
        let token = CancelToken::new();
        assert!(!token.is_set());
        token.set();
        assert!(token.is_set());
        token.clear();
        assert!(!token.is_set());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.set();
        assert!(token.is_set());
    }
}
