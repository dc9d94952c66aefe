//! # Shutdown Token
//!
//! Explicit replacement for a process-wide "is the middleware still running"
//! flag. A token is shared by cloning; triggering any clone trips them all.
//! Blocking waits register a [`ShutdownListener`] so a trigger wakes them
//! immediately instead of at their next timeout.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::info;

/// Something that blocks and must be woken when a token fires.
pub trait ShutdownListener: Send + Sync {
    /// Wake every thread blocked on this listener.
    fn on_shutdown(&self);
}

struct TokenInner {
    triggered: AtomicBool,
    listeners: Mutex<Vec<Weak<dyn ShutdownListener>>>,
}

/// Shared, atomically readable shutdown flag.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

impl ShutdownToken {
    /// Create an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                triggered: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Request shutdown and wake all registered listeners.
    ///
    /// Triggering twice is harmless.
    pub fn trigger(&self) {
        if self.inner.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutdown requested, waking blocked waits");

        let listeners: Vec<_> = {
            let mut guard = self.inner.listeners.lock();
            guard.retain(|weak| weak.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_shutdown();
        }
    }

    /// Register a listener. Registering the same listener twice keeps one entry.
    pub fn register(&self, listener: &Arc<dyn ShutdownListener>) {
        let mut guard = self.inner.listeners.lock();
        guard.retain(|weak| weak.strong_count() > 0);

        let target = Arc::downgrade(listener);
        if !guard.iter().any(|weak| Weak::ptr_eq(weak, &target)) {
            guard.push(target);
        }
    }

    /// Whether two tokens share the same flag.
    #[must_use]
    pub fn same_as(&self, other: &ShutdownToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl ShutdownListener for Counter {
        fn on_shutdown(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_trigger_is_shared_by_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_triggered());
        token.trigger();
        assert!(clone.is_triggered());
        assert!(token.same_as(&clone));
    }

    #[test]
    fn test_listeners_notified_once() {
        let token = ShutdownToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listener: Arc<dyn ShutdownListener> = counter.clone();
        token.register(&listener);
        token.register(&listener);
        assert_eq!(token.listener_count(), 1);

        token.trigger();
        token.trigger();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let token = ShutdownToken::new();
        {
            let listener: Arc<dyn ShutdownListener> = Arc::new(Counter(AtomicUsize::new(0)));
            token.register(&listener);
        }
        let other: Arc<dyn ShutdownListener> = Arc::new(Counter(AtomicUsize::new(0)));
        token.register(&other);
        assert_eq!(token.listener_count(), 1);
    }

    #[test]
    fn test_independent_tokens() {
        let a = ShutdownToken::new();
        let b = ShutdownToken::new();
        a.trigger();
        assert!(!b.is_triggered());
        assert!(!a.same_as(&b));
    }
}
