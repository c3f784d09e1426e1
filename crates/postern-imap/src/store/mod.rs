//! Storage and credential interfaces.
//!
//! The engine owns no mail. Everything it serves comes through
//! [`MailboxStore`], and every login is checked by an [`Authenticator`].
//! [`MemoryStore`] implements both for tests and small embeddings.

mod memory;

use std::future::Future;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::command::{FetchItems, SearchCriteria};
use crate::fetch::ResultBatch;
use crate::types::{Flags, ListEntry, Mailbox, MailboxStatus, Uid, UidValidity};

pub use memory::{MemoryHandle, MemoryStore};

/// Errors reported by a store or authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The mailbox does not exist.
    #[error("mailbox not found: {0}")]
    NotFound(String),

    /// The mailbox cannot be written to.
    #[error("mailbox is read-only: {0}")]
    ReadOnly(String),

    /// A single message could not be loaded.
    #[error("message {seq} unavailable: {reason}")]
    Message {
        /// Sequence number of the message.
        seq: u32,
        /// What went wrong.
        reason: String,
    },

    /// The backend failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of loading one message in a batch.
pub type ItemResult = Result<MessageData, StoreError>;

/// A successfully selected mailbox.
#[derive(Debug)]
pub struct Selection<H> {
    /// Store handle, released with [`MailboxStore::deselect`].
    pub handle: H,
    /// Status reported in the SELECT response.
    pub status: MailboxStatus,
}

/// Message data returned by [`MailboxStore::fetch_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    /// Message sequence number.
    pub seq: u32,
    /// Message UID.
    pub uid: Uid,
    /// Current flags.
    pub flags: Flags,
    /// Internal date.
    pub internal_date: DateTime<FixedOffset>,
    /// RFC 822 size in bytes.
    pub size: u32,
    /// Raw message, present when the requested items need it.
    pub content: Option<Bytes>,
}

/// A message to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendMessage {
    /// Initial flags.
    pub flags: Flags,
    /// Internal date; the store picks one when absent.
    pub date: Option<DateTime<FixedOffset>>,
    /// Raw message.
    pub content: Bytes,
}

/// Result of a successful APPEND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// UIDVALIDITY of the destination mailbox.
    pub uid_validity: UidValidity,
    /// UID assigned to the new message.
    pub uid: Uid,
}

/// Mailbox storage used by the command handlers.
pub trait MailboxStore: Send + Sync {
    /// Opaque reference to a selected mailbox.
    type Handle: Send + Sync;

    /// Opens a mailbox for the session of `user`.
    fn select(
        &self,
        user: &str,
        mailbox: &Mailbox,
        read_only: bool,
    ) -> impl Future<Output = Result<Selection<Self::Handle>, StoreError>> + Send;

    /// Releases a handle returned by `select`.
    fn deselect(&self, handle: Self::Handle);

    /// Loads the messages of one batch.
    ///
    /// An `Err` fails the whole batch. Per-message failures are reported
    /// as `Err` items inside an `Ok` vector.
    fn fetch_batch(
        &self,
        handle: &Self::Handle,
        batch: &ResultBatch,
        items: &FetchItems,
    ) -> impl Future<Output = Result<Vec<ItemResult>, StoreError>> + Send;

    /// Returns matching sequence numbers, or UIDs when `uid` is set.
    fn search(
        &self,
        handle: &Self::Handle,
        criteria: &SearchCriteria,
        uid: bool,
    ) -> impl Future<Output = Result<Vec<u32>, StoreError>> + Send;

    /// Lists mailboxes matching `reference` and `pattern`.
    fn list(
        &self,
        user: &str,
        reference: &str,
        pattern: &str,
    ) -> impl Future<Output = Result<Vec<ListEntry>, StoreError>> + Send;

    /// Appends a message to a mailbox.
    fn append(
        &self,
        user: &str,
        mailbox: &Mailbox,
        message: AppendMessage,
    ) -> impl Future<Output = Result<AppendOutcome, StoreError>> + Send;
}

/// Credential verification.
pub trait Authenticator: Send + Sync {
    /// Returns true if the credentials are valid.
    fn authenticate(
        &self,
        user: &str,
        password: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
