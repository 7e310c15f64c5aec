//! Timing and feedback-loop primitives shared by the text and scene engines.
//!
//! Everything here is driven by explicit [`Instant`]s so engines stay pure:
//! the runtime supplies `now` and sleeps until [`Debouncer::deadline`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Digest;

/// Single-slot trailing debounce.
///
/// Each [`schedule`](Self::schedule) replaces the pending value and pushes the
/// deadline out by a full window; only the last value is released.
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    /// Create a debouncer with the given quiet window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// The quiet window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Replace the pending value and restart the quiet window at `now`.
    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((now + self.window, value));
    }

    /// When the pending value becomes due, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(deadline, _)| *deadline)
    }

    /// Whether a value is waiting.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending value if its quiet window has elapsed.
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        match self.pending {
            Some((deadline, _)) if deadline <= now => self.pending.take().map(|(_, value)| value),
            _ => None,
        }
    }

    /// Take the pending value regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(_, value)| value)
    }

    /// Drop the pending value without releasing it.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }
}

/// Remembers the digest of the last payload this session broadcast.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGuard {
    last_emitted: Option<Digest>,
}

impl EchoGuard {
    /// Create an empty guard.
    #[must_use]
    pub const fn new() -> Self {
        Self { last_emitted: None }
    }

    /// Record a digest as just emitted.
    pub fn record(&mut self, digest: Digest) {
        self.last_emitted = Some(digest);
    }

    /// Whether `digest` matches what this session last emitted.
    #[must_use]
    pub fn is_echo(&self, digest: Digest) -> bool {
        self.last_emitted == Some(digest)
    }

    /// The last emitted digest.
    #[must_use]
    pub const fn last_emitted(&self) -> Option<Digest> {
        self.last_emitted
    }
}

/// Re-entrancy flag marking a programmatic state load in progress.
///
/// Clones share the flag, so a handle held outside the engine observes the
/// same state. Not a lock: it only tells mutation handlers to stand down.
#[derive(Debug, Clone, Default)]
pub struct ReentrancyGuard {
    active: Arc<AtomicBool>,
}

impl ReentrancyGuard {
    /// Create an inactive guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a guarded load is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark a load in progress until the returned scope is dropped.
    ///
    /// Returns `None` if the guard is already active.
    #[must_use]
    pub fn enter(&self) -> Option<GuardScope<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardScope { guard: self })
    }
}

/// RAII scope returned by [`ReentrancyGuard::enter`].
#[derive(Debug)]
pub struct GuardScope<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_debouncer_releases_only_after_quiet_window() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.schedule(1, t0);

        assert_eq!(debouncer.fire(t0 + Duration::from_millis(99)), None);
        assert_eq!(debouncer.fire(t0 + WINDOW), Some(1));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_debouncer_trailing_keeps_last_value_and_extends_deadline() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        for i in 0..5u64 {
            debouncer.schedule(i, t0 + Duration::from_millis(i * 30));
        }
        let last = t0 + Duration::from_millis(120);
        assert_eq!(debouncer.deadline(), Some(last + WINDOW));
        assert_eq!(debouncer.fire(t0 + Duration::from_millis(200)), None);
        assert_eq!(debouncer.fire(last + WINDOW), Some(4));
    }

    #[test]
    fn test_debouncer_cancel() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        assert!(!debouncer.cancel());
        debouncer.schedule("x", t0);
        assert!(debouncer.cancel());
        assert_eq!(debouncer.fire(t0 + WINDOW * 2), None);
    }

    #[test]
    fn test_echo_guard() {
        let mut guard = EchoGuard::new();
        let digest = Digest::of_text("payload");
        assert!(!guard.is_echo(digest));
        guard.record(digest);
        assert!(guard.is_echo(digest));
        assert!(!guard.is_echo(Digest::of_text("other")));
    }

    #[test]
    fn test_reentrancy_guard_scope() {
        let guard = ReentrancyGuard::new();
        let observer = guard.clone();
        {
            let scope = guard.enter();
            assert!(scope.is_some());
            assert!(observer.is_active());
            assert!(guard.enter().is_none());
        }
        assert!(!observer.is_active());
    }
}
