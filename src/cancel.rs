//! A cooperative cancellation flag consulted before each spawn attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Mirrors the role a `context.Context` plays in the original source: the
/// supervision loop checks it immediately before every spawn attempt
/// (spec §4.B), and a tripped flag aborts that spawn without touching an
/// already-running child (spec §5).
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// Creates a fresh, untripped flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the flag. All clones observe it immediately.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once `cancel` has been called on this flag or any of its clones.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_flag_is_not_cancelled() {
        assert!(!Cancellation::new().is_cancelled());
    }

    #[test]
    fn clone_observes_cancellation() {
        let a = Cancellation::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }
}
