//! Session registry.
//!
//! The registry is the sole authority for which username a connection chose.
//! All three operations go through `DashMap`'s per-key locking, so a bind,
//! lookup or unbind on one connection is serialized with every other
//! operation on that same connection. Connections never share a key.

use crate::session::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The connection already has a username bound.
    #[error("Connection already joined: {0}")]
    DuplicateBind(ConnectionId),

    /// The connection has no username bound.
    #[error("Connection not joined: {0}")]
    NotBound(ConnectionId),
}

/// Authoritative `connection -> username` store.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, String>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `username` to `connection_id`.
    ///
    /// Display names are not unique: two connections may bind the same name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateBind`] if the connection is already
    /// bound. The existing binding is left untouched.
    pub fn bind(
        &self,
        connection_id: &ConnectionId,
        username: impl Into<String>,
    ) -> Result<(), RegistryError> {
        match self.sessions.entry(connection_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateBind(connection_id.clone())),
            Entry::Vacant(slot) => {
                let username = username.into();
                debug!(connection = %connection_id, username = %username, "Session bound");
                slot.insert(username);
                Ok(())
            }
        }
    }

    /// Get the username bound to `connection_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotBound`] if no binding exists.
    pub fn lookup(&self, connection_id: &ConnectionId) -> Result<String, RegistryError> {
        self.sessions
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotBound(connection_id.clone()))
    }

    /// Remove and return the binding for `connection_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotBound`] if no binding exists.
    pub fn unbind(&self, connection_id: &ConnectionId) -> Result<String, RegistryError> {
        let (_, username) = self
            .sessions
            .remove(connection_id)
            .ok_or_else(|| RegistryError::NotBound(connection_id.clone()))?;
        debug!(connection = %connection_id, username = %username, "Session unbound");
        Ok(username)
    }

    /// Number of bound sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no session is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of bound usernames, sorted. Repeated names appear once per
    /// connection.
    #[must_use]
    pub fn participants(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.iter().map(|e| e.value().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let registry = SessionRegistry::new();

        registry.bind(&conn("a"), "alice").unwrap();
        assert_eq!(registry.lookup(&conn("a")).unwrap(), "alice");
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.unbind(&conn("a")).unwrap(), "alice");
        assert!(registry.is_empty());
        assert!(registry.lookup(&conn("a")).is_err());
    }

    #[test]
    fn test_duplicate_bind_keeps_first_name() {
        let registry = SessionRegistry::new();

        registry.bind(&conn("a"), "alice").unwrap();
        assert_eq!(
            registry.bind(&conn("a"), "mallory"),
            Err(RegistryError::DuplicateBind(conn("a")))
        );
        assert_eq!(registry.lookup(&conn("a")).unwrap(), "alice");
    }

    #[test]
    fn test_not_bound() {
        let registry = SessionRegistry::new();

        assert_eq!(
            registry.lookup(&conn("b")),
            Err(RegistryError::NotBound(conn("b")))
        );
        assert_eq!(
            registry.unbind(&conn("b")),
            Err(RegistryError::NotBound(conn("b")))
        );
    }

    #[test]
    fn test_unbind_twice() {
        let registry = SessionRegistry::new();

        registry.bind(&conn("a"), "alice").unwrap();
        registry.unbind(&conn("a")).unwrap();
        assert!(matches!(
            registry.unbind(&conn("a")),
            Err(RegistryError::NotBound(_))
        ));
    }

    #[test]
    fn test_same_name_on_two_connections() {
        let registry = SessionRegistry::new();

        registry.bind(&conn("a"), "bob").unwrap();
        registry.bind(&conn("b"), "bob").unwrap();
        assert_eq!(registry.participants(), vec!["bob", "bob"]);

        registry.unbind(&conn("a")).unwrap();
        assert_eq!(registry.lookup(&conn("b")).unwrap(), "bob");
    }
}
