use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

/// In-memory set of session IDs the relay has seen opened and not yet closed.
///
/// This is a hint, not an authority: the backend owns the real terminals and
/// the set starts empty on every relay start. Session IDs are client-chosen
/// and no uniqueness is enforced here.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the ID was already present.
    pub fn add(&self, session_id: &str) -> bool {
        self.inner.write().insert(session_id.to_string())
    }

    /// Returns `false` if the ID was not present.
    pub fn remove(&self, session_id: &str) -> bool {
        self.inner.write().remove(session_id)
    }

    pub fn has(&self, session_id: &str) -> bool {
        self.inner.read().contains(session_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
