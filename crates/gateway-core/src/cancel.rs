use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-connection one-shot cancellation signal (spec's "Cancel flag").
///
/// Shared by clone across the connection pump, the streaming sender, and
/// whichever [`crate::dispatch::GenerationDispatcher`] is driving the
/// current turn, so a `"stop"` frame observed by the receiver is visible
/// at every suspension point of the in-flight generation, including
/// across the async-to-worker-thread bridge the local dispatcher uses.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reads and clears the flag in one step. Called at the start of a
    /// turn so a stray `"stop"` sent while idle doesn't cancel the next
    /// generation before it begins.
    pub fn test_and_clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}
