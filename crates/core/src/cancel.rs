//! One-shot cooperative cancellation.
//!
//! A request owns one [`CancellationToken`]. Any party holding a clone may
//! signal it (a client disconnect, Ctrl-C, a timeout in the transport); the
//! worker polls it at every checkpoint. Nothing ever blocks on the flag.

use tokio_util::sync::CancellationToken as SharedToken;

/// Shared abort flag. Clones observe the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: SharedToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Idempotent; returns `false` if it was already set.
    pub fn signal(&self) -> bool {
        let first = !self.inner.is_cancelled();
        self.inner.cancel();
        first
    }

    /// Non-blocking read of the flag.
    pub fn is_set(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the flag is set.
    pub async fn signalled(&self) {
        self.inner.cancelled().await
    }
}
