use tokio_util::sync::CancellationToken;

/// Process-wide shutdown signal.
///
/// Cloned into every downstream connection task and the upstream link.
/// Triggering it closes downstream sockets with a normal close frame and
/// stops the upstream reconnect loop.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`Shutdown::trigger`] has been called on any clone.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}
