//! Per-connection session.
//!
//! The session is a plain value owned by the connection task. Handlers
//! read [`Session::state`] to decide whether a command is legal and call
//! the transition methods, which refuse anything RFC 3501 does not allow
//! and leave the session untouched when they do.

use std::any::Any;
use std::collections::HashMap;

use tracing::debug;

use super::SessionState;
use super::router::ContinuationRouter;
use crate::store::MailboxStore;
use crate::types::{Mailbox, MailboxStatus, UidValidity};
use crate::{Error, Result};

/// Attribute key counting failed authentication attempts.
pub const AUTH_FAILURES: &str = "auth.failures";

/// String-keyed, typed session attributes.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    /// Stores a value, replacing any previous value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Returns the value under `key` if it has type `T`.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    /// Returns a mutable reference to the value under `key` if it has type `T`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut()
    }

    /// Removes a value, returning it if it had type `T`.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.values
            .remove(key)?
            .downcast()
            .ok()
            .map(|b: Box<T>| *b)
    }

    /// Returns true if a value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// A mailbox held open by the session.
pub struct SelectedMailbox<H> {
    handle: H,
    mailbox: Mailbox,
    read_only: bool,
    exists: u32,
    uid_validity: UidValidity,
}

impl<H> SelectedMailbox<H> {
    /// Wraps a store handle together with the status it was opened with.
    #[must_use]
    pub fn new(handle: H, mailbox: Mailbox, status: &MailboxStatus) -> Self {
        Self {
            handle,
            mailbox,
            read_only: status.read_only,
            exists: status.exists,
            uid_validity: status.uid_validity,
        }
    }

    /// The store handle.
    #[must_use]
    pub const fn handle(&self) -> &H {
        &self.handle
    }

    /// Mailbox name.
    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Whether the mailbox was opened with EXAMINE.
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    /// Message count reported when the mailbox was opened, plus appends
    /// made by this session.
    #[must_use]
    pub const fn exists(&self) -> u32 {
        self.exists
    }

    /// Records that the session added a message to this mailbox.
    pub const fn note_append(&mut self) {
        self.exists += 1;
    }

    /// UIDVALIDITY of the mailbox.
    #[must_use]
    pub const fn uid_validity(&self) -> UidValidity {
        self.uid_validity
    }
}

/// State of one IMAP connection.
pub struct Session<M: MailboxStore> {
    state: SessionState,
    selected: Option<SelectedMailbox<M::Handle>>,
    attributes: Attributes,
    tls_active: bool,
    compression_active: bool,
    continuations: ContinuationRouter,
    user: Option<String>,
}

impl<M: MailboxStore> Default for Session<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MailboxStore> Session<M> {
    /// Creates a session in the not-authenticated state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::NotAuthenticated,
            selected: None,
            attributes: Attributes::default(),
            tls_active: false,
            compression_active: false,
            continuations: ContinuationRouter::new(),
            user: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The authenticated user.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The selected mailbox.
    #[must_use]
    pub const fn selected(&self) -> Option<&SelectedMailbox<M::Handle>> {
        self.selected.as_ref()
    }

    /// The selected mailbox, mutably.
    pub const fn selected_mut(&mut self) -> Option<&mut SelectedMailbox<M::Handle>> {
        self.selected.as_mut()
    }

    /// `NotAuthenticated → Authenticated`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] in any other state.
    pub fn authenticate(&mut self, user: impl Into<String>) -> Result<()> {
        self.expect(SessionState::NotAuthenticated, "authenticate")?;
        self.user = Some(user.into());
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// `Authenticated | Selected → Selected`.
    ///
    /// A previously selected mailbox is released first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless authenticated. The new handle
    /// is released in that case.
    pub fn select(&mut self, store: &M, selected: SelectedMailbox<M::Handle>) -> Result<()> {
        if !self.state.is_authenticated() {
            store.deselect(selected.handle);
            return Err(self.refused("select"));
        }
        if let Some(previous) = self.selected.take() {
            store.deselect(previous.handle);
        }
        debug!(mailbox = %selected.mailbox, read_only = selected.read_only, "mailbox selected");
        self.selected = Some(selected);
        self.state = SessionState::Selected;
        Ok(())
    }

    /// `Selected → Authenticated`, releasing the mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no mailbox is selected.
    pub fn deselect(&mut self, store: &M) -> Result<()> {
        self.expect(SessionState::Selected, "deselect")?;
        if let Some(previous) = self.selected.take() {
            store.deselect(previous.handle);
        }
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Any state `→ LoggedOut`. Releases the mailbox and drops pending
    /// continuation handlers. Calling it again does nothing.
    pub fn logout(&mut self, store: &M) {
        if let Some(previous) = self.selected.take() {
            store.deselect(previous.handle);
        }
        self.continuations.clear();
        self.state = SessionState::LoggedOut;
    }

    /// Returns true if a mailbox is held exactly when the state is Selected.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.selected.is_some() == matches!(self.state, SessionState::Selected)
    }

    /// Whether TLS has been negotiated on this connection.
    #[must_use]
    pub const fn tls_active(&self) -> bool {
        self.tls_active
    }

    /// Whether COMPRESS is in effect.
    #[must_use]
    pub const fn compression_active(&self) -> bool {
        self.compression_active
    }

    /// Records a committed STARTTLS.
    pub const fn mark_tls_active(&mut self) {
        self.tls_active = true;
    }

    /// Records a committed COMPRESS.
    pub const fn mark_compression_active(&mut self) {
        self.compression_active = true;
    }

    /// Continuation handlers of this session.
    pub const fn continuations(&mut self) -> &mut ContinuationRouter {
        &mut self.continuations
    }

    /// Returns true if a continuation handler owns the input.
    #[must_use]
    pub fn in_continuation(&self) -> bool {
        !self.continuations.is_empty()
    }

    /// Session attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Session attributes, mutably.
    pub const fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Counts a failed authentication and returns the new total.
    pub fn record_auth_failure(&mut self) -> u32 {
        if let Some(count) = self.attributes.get_mut::<u32>(AUTH_FAILURES) {
            *count += 1;
            return *count;
        }
        self.attributes.insert(AUTH_FAILURES, 1u32);
        1
    }

    fn expect(&self, state: SessionState, transition: &str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.refused(transition))
        }
    }

    fn refused(&self, transition: &str) -> Error {
        Error::InvalidState(format!("cannot {transition} in {} state", self.state))
    }
}

impl<M: MailboxStore> std::fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("user", &self.user)
            .field("mailbox", &self.selected.as_ref().map(|s| &s.mailbox))
            .field("tls_active", &self.tls_active)
            .field("compression_active", &self.compression_active)
            .field("continuations", &self.continuations)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::protocol::IdleHandler;
    use crate::store::MemoryStore;
    use crate::types::Tag;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_mailbox("INBOX");
        store.create_mailbox("Sent");
        store
    }

    fn open(
        rt: &tokio::runtime::Runtime,
        store: &MemoryStore,
        name: &str,
    ) -> SelectedMailbox<crate::store::MemoryHandle> {
        let mailbox = Mailbox::new(name);
        let selection = rt.block_on(store.select("alice", &mailbox, false)).unwrap();
        SelectedMailbox::new(selection.handle, mailbox, &selection.status)
    }

    #[test]
    fn full_lifecycle() {
        let rt = runtime();
        let store = store();
        let mut session = Session::<MemoryStore>::new();

        assert!(session.deselect(&store).is_err());
        session.authenticate("alice").unwrap();
        assert_eq!(session.user(), Some("alice"));
        assert!(session.authenticate("bob").is_err());

        session.select(&store, open(&rt, &store, "INBOX")).unwrap();
        session.select(&store, open(&rt, &store, "Sent")).unwrap();
        assert_eq!(store.open_handles(), 1);
        assert_eq!(session.selected().unwrap().mailbox().as_str(), "Sent");

        session.deselect(&store).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(store.open_handles(), 0);
        assert!(session.is_consistent());
    }

    #[test]
    fn refused_select_releases_the_new_handle() {
        let rt = runtime();
        let store = store();
        let mut session = Session::<MemoryStore>::new();
        let err = session.select(&store, open(&rt, &store, "INBOX")).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(store.open_handles(), 0);
        assert_eq!(session.state(), SessionState::NotAuthenticated);
    }

    #[test]
    fn logout_is_idempotent_and_clears_continuations() {
        let rt = runtime();
        let store = store();
        let mut session = Session::<MemoryStore>::new();
        session.authenticate("alice").unwrap();
        session.select(&store, open(&rt, &store, "INBOX")).unwrap();
        session
            .continuations()
            .push(Box::new(IdleHandler::new(Tag::new("a").unwrap())));

        session.logout(&store);
        session.logout(&store);
        assert_eq!(session.state(), SessionState::LoggedOut);
        assert!(!session.in_continuation());
        assert_eq!(store.open_handles(), 0);
        assert!(session.authenticate("alice").is_err());
    }

    #[test]
    fn auth_failures_are_counted() {
        let mut session = Session::<MemoryStore>::new();
        assert_eq!(session.record_auth_failure(), 1);
        assert_eq!(session.record_auth_failure(), 2);
        assert_eq!(session.attributes().get::<u32>(AUTH_FAILURES), Some(&2));
    }

    #[test]
    fn attributes_are_typed() {
        let mut attributes = Attributes::default();
        attributes.insert("client.id", String::from("mutt"));
        assert!(attributes.get::<u32>("client.id").is_none());
        assert_eq!(attributes.get::<String>("client.id").unwrap(), "mutt");
        assert_eq!(attributes.remove::<String>("client.id").unwrap(), "mutt");
        assert!(!attributes.contains("client.id"));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Authenticate,
        Select,
        Deselect,
        Logout,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Authenticate),
            Just(Op::Select),
            Just(Op::Deselect),
            Just(Op::Logout),
        ]
    }

    proptest! {
        #[test]
        fn selection_matches_state_under_any_sequence(
            ops in proptest::collection::vec(op(), 0..40),
        ) {
            let rt = runtime();
            let store = store();
            let mut session = Session::<MemoryStore>::new();

            for op in ops {
                let before = session.state();
                let result = match op {
                    Op::Authenticate => session.authenticate("alice"),
                    Op::Select => session.select(&store, open(&rt, &store, "INBOX")),
                    Op::Deselect => session.deselect(&store),
                    Op::Logout => {
                        session.logout(&store);
                        Ok(())
                    }
                };
                if result.is_err() {
                    prop_assert_eq!(session.state(), before);
                }
                if before == SessionState::LoggedOut {
                    prop_assert_eq!(session.state(), SessionState::LoggedOut);
                }
                prop_assert!(session.is_consistent());
                prop_assert_eq!(store.open_handles(), usize::from(session.selected().is_some()));
            }
        }
    }
}
