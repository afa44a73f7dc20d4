use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use subtle::ConstantTimeEq;

use crate::connection::ConnectionId;

/// Message sent back to a client whose credential did not match.
pub const INVALID_PASSWORD: &str = "Invalid password";

/// Proof that a connection has joined the authorization set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated;

/// A failed credential check. Terminal for the connection that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub reason: String,
}

/// Shared-secret gate in front of every session-control event.
///
/// Holds the process-wide credential and the set of connections that have
/// presented it. Entries only leave the set through [`AuthGate::forget`].
#[derive(Clone)]
pub struct AuthGate {
    secret: Arc<str>,
    authorized: Arc<RwLock<HashSet<ConnectionId>>>,
}

impl AuthGate {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
            authorized: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Check `credential` against the shared secret.
    ///
    /// On a mismatch the connection is also removed from the set, so a
    /// previously authenticated connection that retries with a wrong
    /// password loses its access.
    pub fn authenticate(
        &self,
        conn: ConnectionId,
        credential: &str,
    ) -> Result<Authenticated, Rejected> {
        if credential.as_bytes().ct_eq(self.secret.as_bytes()).into() {
            self.authorized.write().insert(conn);
            Ok(Authenticated)
        } else {
            self.authorized.write().remove(&conn);
            Err(Rejected {
                reason: INVALID_PASSWORD.to_string(),
            })
        }
    }

    pub fn is_authenticated(&self, conn: ConnectionId) -> bool {
        self.authorized.read().contains(&conn)
    }

    /// Drop `conn` from the authorization set. Idempotent.
    pub fn forget(&self, conn: ConnectionId) {
        self.authorized.write().remove(&conn);
    }

    /// Number of connections currently authorized.
    pub fn len(&self) -> usize {
        self.authorized.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorized.read().is_empty()
    }
}
