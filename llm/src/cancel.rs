//! Turn-scoped cancellation flag.
//!
//! A [`CancelSignal`] is created by whoever owns a turn and cloned into every
//! task taking part in it. Tasks poll [`CancelSignal::is_cancelled`] at their
//! checkpoints or await [`CancelSignal::cancelled`] inside a `select!`.
//!
//! ```
//! use llm::CancelSignal;
//!
//! let signal = CancelSignal::new();
//! let observer = signal.clone();
//! assert!(signal.cancel());
//! assert!(!signal.cancel());
//! assert!(observer.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

/// Shared, set-once stop flag.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter.
    ///
    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.flag.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Whether both handles refer to the same flag.
    pub fn same_as(&self, other: &CancelSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve once the flag is set. Resolves immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent `cancel` cannot slip
            // between the load and the await.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
