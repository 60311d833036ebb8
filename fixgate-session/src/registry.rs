//! Owns sessions by [`CompositeKey`] and by connection id, rejects duplicate
//! binds, and routes inbound frames to their owning session.
//!
//! Grounded on the teacher's `SessionsMap`/`ActiveSessionsMap`/`Acceptor`
//! split in `acceptor.rs`: the registry here generalizes `register_session`/
//! `is_session_active`/`logout`/`disconnect`/`reset`/`force_reset` across
//! both protocol families instead of being FIX-specific.

use std::collections::HashMap;

use fixgate_core::CompositeKey;

use crate::error::RegistryError;

/// Identifies a market-segment host a session is bound to, so the same
/// `CompositeKey` may be legitimately live on two different host profiles
/// at once (the ILink3 case called out in the registry's spec).
pub type HostProfile = u32;

/// A handle onto a live session that the registry can issue administrative
/// commands to, mirroring the teacher's `Acceptor::reset`/`disconnect`/
/// `logout` dispatching directly onto `Session`/`SessionState`.
pub trait SessionHandle {
    /// Resets persisted sequence state back to its initial epoch.
    fn request_reset(&self);
    /// Tears the session down without a Logout handshake.
    fn request_disconnect(&self);
    /// Sends Logout and waits for the counterparty's reply/timeout.
    fn request_logout(&self);
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ConnectionId(pub u64);

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct RegistryKey {
    composite_key: CompositeKey,
    host_profile: HostProfile,
}

/// A registry over some session handle type `S`, typically an index into
/// the engine's slab of live sessions.
pub struct SessionRegistry<S> {
    by_key: HashMap<RegistryKey, S>,
    by_connection: HashMap<ConnectionId, RegistryKey>,
    live: HashMap<RegistryKey, bool>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> SessionRegistry<S> {
        SessionRegistry {
            by_key: HashMap::new(),
            by_connection: HashMap::new(),
            live: HashMap::new(),
        }
    }
}

impl<S: Clone> SessionRegistry<S> {
    pub fn new() -> SessionRegistry<S> {
        SessionRegistry::default()
    }

    /// Returns the existing session for `key`/`host_profile`, or creates one
    /// via `create` and registers it. The `bool` is `true` iff `create` ran.
    pub fn lookup_or_create(
        &mut self,
        key: CompositeKey,
        host_profile: HostProfile,
        create: impl FnOnce() -> S,
    ) -> (S, bool) {
        let rk = RegistryKey {
            composite_key: key,
            host_profile,
        };
        if let Some(existing) = self.by_key.get(&rk) {
            (existing.clone(), false)
        } else {
            let session = create();
            self.live.insert(rk.clone(), true);
            self.by_key.insert(rk, session.clone());
            (session, true)
        }
    }

    /// Binds `connection_id` to the session for `key`/`host_profile`.
    /// Fails with `DuplicateConnection` if that key is already bound to a
    /// *live* session on the same host profile via a different connection.
    pub fn bind(
        &mut self,
        connection_id: ConnectionId,
        key: CompositeKey,
        host_profile: HostProfile,
    ) -> Result<(), RegistryError> {
        let rk = RegistryKey {
            composite_key: key,
            host_profile,
        };
        if !self.by_key.contains_key(&rk) {
            return Err(RegistryError::UnknownSession);
        }
        let already_bound = self
            .by_connection
            .values()
            .any(|existing| *existing == rk && *self.live.get(existing).unwrap_or(&false));
        if already_bound {
            return Err(RegistryError::DuplicateConnection);
        }
        self.by_connection.insert(connection_id, rk);
        Ok(())
    }

    pub fn route(&self, connection_id: ConnectionId) -> Result<&S, RegistryError> {
        let rk = self
            .by_connection
            .get(&connection_id)
            .ok_or(RegistryError::UnknownSession)?;
        self.by_key.get(rk).ok_or(RegistryError::UnknownSession)
    }

    pub fn mark_torn_down(&mut self, key: &CompositeKey, host_profile: HostProfile) {
        let rk = RegistryKey {
            composite_key: key.clone(),
            host_profile,
        };
        self.live.insert(rk, false);
    }

    pub fn is_live(&self, key: &CompositeKey, host_profile: HostProfile) -> bool {
        let rk = RegistryKey {
            composite_key: key.clone(),
            host_profile,
        };
        *self.live.get(&rk).unwrap_or(&false)
    }

    /// Administrative lookup used by `reset`/`disconnect`/`logout`; fails
    /// `UnknownSession` only if the key was never registered.
    pub fn find(&self, key: &CompositeKey, host_profile: HostProfile) -> Result<&S, RegistryError> {
        let rk = RegistryKey {
            composite_key: key.clone(),
            host_profile,
        };
        self.by_key.get(&rk).ok_or(RegistryError::UnknownSession)
    }
}

impl<S: Clone + SessionHandle> SessionRegistry<S> {
    /// Resets a session's persisted sequence state back to its initial
    /// epoch. Mirrors the teacher's `Acceptor::reset`: rejected with
    /// `SessionActive` while the session is still live, since resetting
    /// sequence numbers under a connected counterparty would desync it.
    pub fn reset(&self, key: &CompositeKey, host_profile: HostProfile) -> Result<(), RegistryError> {
        if self.is_live(key, host_profile) {
            return Err(RegistryError::SessionActive);
        }
        self.find(key, host_profile)?.request_reset();
        Ok(())
    }

    /// Tears a session down immediately, without a Logout handshake.
    /// Mirrors the teacher's `Acceptor::disconnect`. A no-op (not an error)
    /// if the session is already torn down.
    pub fn disconnect(&mut self, key: &CompositeKey, host_profile: HostProfile) -> Result<(), RegistryError> {
        if !self.is_live(key, host_profile) {
            return self.find(key, host_profile).map(|_| ());
        }
        self.find(key, host_profile)?.request_disconnect();
        self.mark_torn_down(key, host_profile);
        Ok(())
    }

    /// Initiates a graceful Logout for a live session. Mirrors the
    /// teacher's `Acceptor::logout`. A no-op (not an error) if the session
    /// is already torn down.
    pub fn logout(&mut self, key: &CompositeKey, host_profile: HostProfile) -> Result<(), RegistryError> {
        if !self.is_live(key, host_profile) {
            return self.find(key, host_profile).map(|_| ());
        }
        self.find(key, host_profile)?.request_logout();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use fixgate_core::AsciiString;

    fn key(sender: &str) -> CompositeKey {
        CompositeKey::new(
            AsciiString::try_from(sender).unwrap(),
            AsciiString::try_from("TRGT").unwrap(),
        )
    }

    #[derive(Clone, Default)]
    struct MockSession {
        reset_called: Rc<Cell<bool>>,
        disconnect_called: Rc<Cell<bool>>,
        logout_called: Rc<Cell<bool>>,
    }

    impl SessionHandle for MockSession {
        fn request_reset(&self) {
            self.reset_called.set(true);
        }
        fn request_disconnect(&self) {
            self.disconnect_called.set(true);
        }
        fn request_logout(&self) {
            self.logout_called.set(true);
        }
    }

    #[test]
    fn lookup_or_create_only_creates_once() {
        let mut registry: SessionRegistry<u32> = SessionRegistry::new();
        let (first, created_first) = registry.lookup_or_create(key("A"), 0, || 1);
        assert!(created_first);
        let (second, created_second) = registry.lookup_or_create(key("A"), 0, || 2);
        assert!(!created_second);
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_bind_on_same_host_profile_rejected() {
        let mut registry: SessionRegistry<u32> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, || 1);
        registry.bind(ConnectionId(1), key("A"), 0).unwrap();
        let err = registry.bind(ConnectionId(2), key("A"), 0).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateConnection));
    }

    #[test]
    fn same_key_different_host_profile_is_independent() {
        let mut registry: SessionRegistry<u32> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, || 1);
        registry.lookup_or_create(key("A"), 1, || 2);
        registry.bind(ConnectionId(1), key("A"), 0).unwrap();
        registry.bind(ConnectionId(2), key("A"), 1).unwrap();
    }

    #[test]
    fn route_unknown_connection_fails() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        assert!(matches!(
            registry.route(ConnectionId(99)),
            Err(RegistryError::UnknownSession)
        ));
    }

    #[test]
    fn torn_down_session_frees_the_key_for_rebind() {
        let mut registry: SessionRegistry<u32> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, || 1);
        registry.bind(ConnectionId(1), key("A"), 0).unwrap();
        registry.mark_torn_down(&key("A"), 0);
        assert!(!registry.is_live(&key("A"), 0));
    }

    #[test]
    fn reset_rejected_while_session_is_live() {
        let mut registry: SessionRegistry<MockSession> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, MockSession::default);
        registry.bind(ConnectionId(1), key("A"), 0).unwrap();
        let err = registry.reset(&key("A"), 0).unwrap_err();
        assert!(matches!(err, RegistryError::SessionActive));
    }

    #[test]
    fn reset_dispatches_once_torn_down() {
        let mut registry: SessionRegistry<MockSession> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, MockSession::default);
        registry.mark_torn_down(&key("A"), 0);
        registry.reset(&key("A"), 0).unwrap();
        assert!(registry.find(&key("A"), 0).unwrap().reset_called.get());
    }

    #[test]
    fn disconnect_dispatches_and_tears_down() {
        let mut registry: SessionRegistry<MockSession> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, MockSession::default);
        registry.bind(ConnectionId(1), key("A"), 0).unwrap();
        registry.disconnect(&key("A"), 0).unwrap();
        assert!(registry.find(&key("A"), 0).unwrap().disconnect_called.get());
        assert!(!registry.is_live(&key("A"), 0));
    }

    #[test]
    fn disconnect_on_already_torn_down_session_is_a_noop() {
        let mut registry: SessionRegistry<MockSession> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, MockSession::default);
        registry.mark_torn_down(&key("A"), 0);
        registry.disconnect(&key("A"), 0).unwrap();
        assert!(!registry.find(&key("A"), 0).unwrap().disconnect_called.get());
    }

    #[test]
    fn logout_dispatches_while_live() {
        let mut registry: SessionRegistry<MockSession> = SessionRegistry::new();
        registry.lookup_or_create(key("A"), 0, MockSession::default);
        registry.bind(ConnectionId(1), key("A"), 0).unwrap();
        registry.logout(&key("A"), 0).unwrap();
        assert!(registry.find(&key("A"), 0).unwrap().logout_called.get());
        assert!(registry.is_live(&key("A"), 0));
    }

    #[test]
    fn admin_ops_on_unknown_key_fail() {
        let registry: SessionRegistry<MockSession> = SessionRegistry::new();
        assert!(matches!(registry.reset(&key("Z"), 0), Err(RegistryError::UnknownSession)));
    }
}
