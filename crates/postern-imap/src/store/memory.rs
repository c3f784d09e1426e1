//! In-memory mailbox store.
//!
//! All users share one mailbox namespace with `/` as the hierarchy
//! delimiter. Besides implementing [`MailboxStore`] and
//! [`Authenticator`], the store records every `fetch_batch` call and can
//! be told to fail calls or individual messages, which makes it the
//! backend of the crate's own tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};

use super::{
    AppendMessage, AppendOutcome, Authenticator, ItemResult, MailboxStore, MessageData, Selection,
    StoreError,
};
use crate::command::{FetchItems, SearchCriteria};
use crate::fetch::ResultBatch;
use crate::fetch::message::{field_value, parse_fields, split_message};
use crate::types::{
    Flag, Flags, ListEntry, Mailbox, MailboxAttribute, MailboxStatus, Uid, UidValidity,
    parse_date,
};

/// Hierarchy delimiter.
pub const DELIMITER: char = '/';

#[derive(Debug)]
struct StoredMessage {
    uid: Uid,
    flags: Flags,
    internal_date: DateTime<FixedOffset>,
    content: Bytes,
    broken: bool,
}

impl StoredMessage {
    fn size(&self) -> u32 {
        u32::try_from(self.content.len()).unwrap_or(u32::MAX)
    }
}

#[derive(Debug)]
struct MemoryMailbox {
    uid_validity: UidValidity,
    next_uid: u32,
    messages: Vec<StoredMessage>,
    special_use: Option<MailboxAttribute>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, String>,
    mailboxes: BTreeMap<Mailbox, MemoryMailbox>,
    fetch_calls: Vec<ResultBatch>,
    failing_calls: HashSet<usize>,
    next_uid_validity: u32,
}

/// Handle to a mailbox selected in a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    mailbox: Mailbox,
    read_only: bool,
}

impl MemoryHandle {
    /// The selected mailbox.
    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Whether the mailbox was opened with EXAMINE.
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }
}

/// A [`MailboxStore`] and [`Authenticator`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    open_handles: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a user, replacing any previous password.
    pub fn add_user(&self, user: &str, password: &str) {
        self.lock()
            .users
            .insert(user.to_string(), password.to_string());
    }

    /// Creates a mailbox if it does not exist yet.
    pub fn create_mailbox(&self, name: &str) {
        let mut inner = self.lock();
        inner.next_uid_validity += 1;
        let validity = inner.next_uid_validity;
        inner
            .mailboxes
            .entry(Mailbox::new(name))
            .or_insert_with(|| MemoryMailbox {
                uid_validity: UidValidity::new(validity).unwrap_or(UidValidity::MIN),
                next_uid: 1,
                messages: Vec::new(),
                special_use: None,
            });
    }

    /// Marks a mailbox with a special-use attribute such as `\Sent`.
    pub fn set_special_use(&self, name: &str, attribute: MailboxAttribute) {
        if let Some(mailbox) = self.lock().mailboxes.get_mut(&Mailbox::new(name)) {
            mailbox.special_use = Some(attribute);
        }
    }

    /// Adds a message and returns its UID, or `None` if the mailbox does
    /// not exist.
    pub fn insert_message(
        &self,
        name: &str,
        content: impl Into<Bytes>,
        flags: Flags,
    ) -> Option<Uid> {
        let mut inner = self.lock();
        let mailbox = inner.mailboxes.get_mut(&Mailbox::new(name))?;
        Some(push_message(mailbox, content.into(), flags, None))
    }

    /// Makes the message with the given UID fail to load.
    pub fn break_message(&self, name: &str, uid: Uid) {
        if let Some(mailbox) = self.lock().mailboxes.get_mut(&Mailbox::new(name)) {
            for message in mailbox.messages.iter_mut().filter(|m| m.uid == uid) {
                message.broken = true;
            }
        }
    }

    /// Makes the `index`-th `fetch_batch` call (0-based, counted over the
    /// store's lifetime) fail as a whole.
    pub fn fail_fetch_call(&self, index: usize) {
        self.lock().failing_calls.insert(index);
    }

    /// The batches requested so far, in call order.
    #[must_use]
    pub fn fetch_calls(&self) -> Vec<ResultBatch> {
        self.lock().fetch_calls.clone()
    }

    /// Number of handles selected and not yet released.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Number of messages in a mailbox.
    #[must_use]
    pub fn message_count(&self, name: &str) -> Option<usize> {
        self.lock()
            .mailboxes
            .get(&Mailbox::new(name))
            .map(|m| m.messages.len())
    }
}

fn push_message(
    mailbox: &mut MemoryMailbox,
    content: Bytes,
    flags: Flags,
    date: Option<DateTime<FixedOffset>>,
) -> Uid {
    let uid = Uid::new(mailbox.next_uid).unwrap_or(Uid::MIN);
    mailbox.next_uid += 1;
    mailbox.messages.push(StoredMessage {
        uid,
        flags,
        internal_date: date.unwrap_or_else(|| Utc::now().fixed_offset()),
        content,
        broken: false,
    });
    uid
}

impl MailboxStore for MemoryStore {
    type Handle = MemoryHandle;

    async fn select(
        &self,
        _user: &str,
        mailbox: &Mailbox,
        read_only: bool,
    ) -> Result<Selection<MemoryHandle>, StoreError> {
        let inner = self.lock();
        let stored = inner
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| StoreError::NotFound(mailbox.to_string()))?;

        let count = |f: &dyn Fn(&StoredMessage) -> bool| {
            u32::try_from(stored.messages.iter().filter(|m| f(m)).count()).unwrap_or(u32::MAX)
        };
        let unseen = stored
            .messages
            .iter()
            .position(|m| !m.flags.is_seen())
            .and_then(|i| u32::try_from(i + 1).ok());
        let mut permanent_flags = Flags::from_vec(Flag::system());
        permanent_flags.insert(Flag::Keyword("\\*".to_string()));

        let status = MailboxStatus {
            exists: count(&|_| true),
            recent: count(&|m| m.flags.contains(&Flag::Recent)),
            unseen,
            uid_next: Uid::new(stored.next_uid).unwrap_or(Uid::MIN),
            uid_validity: stored.uid_validity,
            flags: Flags::from_vec(Flag::system()),
            permanent_flags,
            read_only,
        };
        drop(inner);

        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Selection {
            handle: MemoryHandle {
                mailbox: mailbox.clone(),
                read_only,
            },
            status,
        })
    }

    fn deselect(&self, _handle: MemoryHandle) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    async fn fetch_batch(
        &self,
        handle: &MemoryHandle,
        batch: &ResultBatch,
        items: &FetchItems,
    ) -> Result<Vec<ItemResult>, StoreError> {
        let mut inner = self.lock();
        let call = inner.fetch_calls.len();
        inner.fetch_calls.push(batch.clone());
        if inner.failing_calls.contains(&call) {
            return Err(StoreError::Unavailable(format!("fetch call {call} failed")));
        }

        let mailbox = inner
            .mailboxes
            .get(&handle.mailbox)
            .ok_or_else(|| StoreError::NotFound(handle.mailbox.to_string()))?;
        let with_content = items.needs_content();
        let results = batch
            .iter()
            .filter_map(|seq| {
                let message = mailbox.messages.get(usize::try_from(seq).ok()?.checked_sub(1)?)?;
                Some(if message.broken {
                    Err(StoreError::Message {
                        seq,
                        reason: "message data unreadable".to_string(),
                    })
                } else {
                    Ok(MessageData {
                        seq,
                        uid: message.uid,
                        flags: message.flags.clone(),
                        internal_date: message.internal_date,
                        size: message.size(),
                        content: with_content.then(|| message.content.clone()),
                    })
                })
            })
            .collect();
        Ok(results)
    }

    async fn search(
        &self,
        handle: &MemoryHandle,
        criteria: &SearchCriteria,
        uid: bool,
    ) -> Result<Vec<u32>, StoreError> {
        let inner = self.lock();
        let mailbox = inner
            .mailboxes
            .get(&handle.mailbox)
            .ok_or_else(|| StoreError::NotFound(handle.mailbox.to_string()))?;
        let scope = SearchScope {
            exists: u32::try_from(mailbox.messages.len()).unwrap_or(u32::MAX),
            max_uid: mailbox.messages.last().map_or(0, |m| m.uid.get()),
        };
        Ok(mailbox
            .messages
            .iter()
            .zip(1u32..)
            .filter(|(message, seq)| scope.matches(criteria, *seq, message))
            .map(|(message, seq)| if uid { message.uid.get() } else { seq })
            .collect())
    }

    async fn list(
        &self,
        _user: &str,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<ListEntry>, StoreError> {
        let full = format!("{reference}{pattern}");
        let inner = self.lock();
        let names: Vec<&str> = inner.mailboxes.keys().map(Mailbox::as_str).collect();
        Ok(inner
            .mailboxes
            .iter()
            .filter(|(name, _)| wildcard_match(full.as_bytes(), name.as_str().as_bytes()))
            .map(|(name, mailbox)| {
                let prefix = format!("{name}{DELIMITER}");
                let mut attributes = vec![if names.iter().any(|n| n.starts_with(&prefix)) {
                    MailboxAttribute::HasChildren
                } else {
                    MailboxAttribute::HasNoChildren
                }];
                attributes.extend(mailbox.special_use.clone());
                ListEntry {
                    attributes,
                    delimiter: Some(DELIMITER),
                    mailbox: name.clone(),
                }
            })
            .collect())
    }

    async fn append(
        &self,
        _user: &str,
        mailbox: &Mailbox,
        message: AppendMessage,
    ) -> Result<AppendOutcome, StoreError> {
        let mut inner = self.lock();
        let stored = inner
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| StoreError::NotFound(mailbox.to_string()))?;
        let uid = push_message(stored, message.content, message.flags, message.date);
        Ok(AppendOutcome {
            uid_validity: stored.uid_validity,
            uid,
        })
    }
}

impl Authenticator for MemoryStore {
    async fn authenticate(&self, user: &str, password: &str) -> Result<bool, StoreError> {
        Ok(self.lock().users.get(user).is_some_and(|p| p == password))
    }
}

struct SearchScope {
    exists: u32,
    max_uid: u32,
}

impl SearchScope {
    fn matches(&self, criteria: &SearchCriteria, seq: u32, message: &StoredMessage) -> bool {
        let flags = &message.flags;
        match criteria {
            SearchCriteria::All => true,
            SearchCriteria::Answered => flags.contains(&Flag::Answered),
            SearchCriteria::Unanswered => !flags.contains(&Flag::Answered),
            SearchCriteria::Deleted => flags.contains(&Flag::Deleted),
            SearchCriteria::Undeleted => !flags.contains(&Flag::Deleted),
            SearchCriteria::Draft => flags.contains(&Flag::Draft),
            SearchCriteria::Flagged => flags.contains(&Flag::Flagged),
            SearchCriteria::Unflagged => !flags.contains(&Flag::Flagged),
            SearchCriteria::New => flags.contains(&Flag::Recent) && !flags.is_seen(),
            SearchCriteria::Seen => flags.is_seen(),
            SearchCriteria::Unseen => !flags.is_seen(),
            SearchCriteria::SequenceSet(set) => set.contains(seq, self.exists),
            SearchCriteria::UidSet(set) => set.contains(message.uid.get(), self.max_uid),
            SearchCriteria::Subject(text) => header_contains(message, "Subject", text),
            SearchCriteria::From(text) => header_contains(message, "From", text),
            SearchCriteria::To(text) => header_contains(message, "To", text),
            SearchCriteria::Cc(text) => header_contains(message, "Cc", text),
            SearchCriteria::Bcc(text) => header_contains(message, "Bcc", text),
            SearchCriteria::Header(name, text) => header_contains(message, name, text),
            SearchCriteria::Body(text) => {
                contains_ignore_case(split_message(&message.content).1, text)
            }
            SearchCriteria::Text(text) => contains_ignore_case(&message.content, text),
            SearchCriteria::Since(date) => {
                parse_date(date).is_some_and(|d| message.internal_date.date_naive() >= d)
            }
            SearchCriteria::Before(date) => {
                parse_date(date).is_some_and(|d| message.internal_date.date_naive() < d)
            }
            SearchCriteria::On(date) => {
                parse_date(date).is_some_and(|d| message.internal_date.date_naive() == d)
            }
            SearchCriteria::Larger(size) => message.size() > *size,
            SearchCriteria::Smaller(size) => message.size() < *size,
            SearchCriteria::And(all) => all.iter().all(|c| self.matches(c, seq, message)),
            SearchCriteria::Or(a, b) => {
                self.matches(a, seq, message) || self.matches(b, seq, message)
            }
            SearchCriteria::Not(c) => !self.matches(c, seq, message),
        }
    }
}

fn header_contains(message: &StoredMessage, name: &str, text: &str) -> bool {
    let (header, _) = split_message(&message.content);
    parse_fields(header).is_ok_and(|fields| {
        field_value(&fields, name).is_some_and(|v| contains_ignore_case(v.as_bytes(), text))
    })
}

fn contains_ignore_case(haystack: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|w| w.eq_ignore_ascii_case(needle))
}

/// Matches a LIST pattern where `*` matches anything and `%` matches
/// anything but the hierarchy delimiter.
fn wildcard_match(pattern: &[u8], name: &[u8]) -> bool {
    // reachable[j]: the pattern consumed so far matches name[..j]
    let mut reachable = vec![false; name.len() + 1];
    reachable[0] = true;
    for &p in pattern {
        let mut next = vec![false; name.len() + 1];
        match p {
            b'*' | b'%' => {
                let mut open = false;
                for j in 0..=name.len() {
                    open |= reachable[j];
                    next[j] = open;
                    if p == b'%' && name.get(j).is_some_and(|&c| char::from(c) == DELIMITER) {
                        open = false;
                    }
                }
            }
            c => {
                for j in 0..name.len() {
                    next[j + 1] = reachable[j] && name[j] == c;
                }
            }
        }
        reachable = next;
    }
    reachable[name.len()]
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
    use super::*;
    use crate::types::{SequenceSet, parse_date_time};

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_user("alice", "secret");
        store.create_mailbox("INBOX");
        store.create_mailbox("Archive");
        store.create_mailbox("Archive/2024");
        store.insert_message(
            "INBOX",
            "Subject: Lunch plans\r\nFrom: bob@example.com\r\n\r\nPizza?\r\n",
            Flags::from_vec(vec![Flag::Seen]),
        );
        store.insert_message(
            "INBOX",
            "Subject: Invoice\r\nFrom: billing@example.com\r\n\r\nPay up\r\n",
            Flags::new(),
        );
        store
    }

    async fn select(store: &MemoryStore) -> MemoryHandle {
        store
            .select("alice", &Mailbox::inbox(), false)
            .await
            .unwrap()
            .handle
    }

    #[tokio::test]
    async fn authenticate_checks_password() {
        let store = store();
        assert!(store.authenticate("alice", "secret").await.unwrap());
        assert!(!store.authenticate("alice", "wrong").await.unwrap());
        assert!(!store.authenticate("mallory", "secret").await.unwrap());
    }

    #[tokio::test]
    async fn select_reports_status_and_tracks_handles() {
        let store = store();
        let selection = store.select("alice", &Mailbox::new("inbox"), true).await.unwrap();
        assert_eq!(selection.status.exists, 2);
        assert_eq!(selection.status.unseen, Some(2));
        assert_eq!(selection.status.uid_next.get(), 3);
        assert!(selection.status.read_only);
        assert_eq!(store.open_handles(), 1);
        store.deselect(selection.handle);
        assert_eq!(store.open_handles(), 0);

        let missing = store.select("alice", &Mailbox::new("Nope"), false).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
        assert_eq!(store.open_handles(), 0);
    }

    #[tokio::test]
    async fn fetch_batch_records_calls_and_failures() {
        let store = store();
        let handle = select(&store).await;
        store.break_message("INBOX", Uid::new(2).unwrap());
        store.fail_fetch_call(1);

        let items = store
            .fetch_batch(&handle, &ResultBatch::new(1..=5), &FetchItems::Fast)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].as_ref().unwrap().content.is_none());
        assert!(matches!(items[1], Err(StoreError::Message { seq: 2, .. })));

        let failed = store
            .fetch_batch(&handle, &ResultBatch::new(1..=1), &FetchItems::All)
            .await;
        assert!(matches!(failed, Err(StoreError::Unavailable(_))));
        assert_eq!(store.fetch_calls().len(), 2);
    }

    #[tokio::test]
    async fn search_criteria() {
        let store = store();
        let handle = select(&store).await;
        let search = |c: SearchCriteria, uid| {
            let store = &store;
            let handle = &handle;
            async move { store.search(handle, &c, uid).await.unwrap() }
        };

        assert_eq!(search(SearchCriteria::Unseen, false).await, vec![2]);
        assert_eq!(search(SearchCriteria::Subject("lunch".into()), true).await, vec![1]);
        assert_eq!(search(SearchCriteria::Body("PAY".into()), false).await, vec![2]);
        assert_eq!(
            search(
                SearchCriteria::Or(
                    Box::new(SearchCriteria::Seen),
                    Box::new(SearchCriteria::From("billing".into()))
                ),
                false
            )
            .await,
            vec![1, 2]
        );
        assert_eq!(
            search(SearchCriteria::UidSet(SequenceSet::parse("2:*").unwrap()), false).await,
            vec![2]
        );
        assert_eq!(
            search(SearchCriteria::Not(Box::new(SearchCriteria::All)), false).await,
            Vec::<u32>::new()
        );
    }

    #[tokio::test]
    async fn search_by_internal_date() {
        let store = MemoryStore::new();
        store.create_mailbox("INBOX");
        let date = parse_date_time("05-Mar-2024 10:00:00 +0000").unwrap();
        store
            .append("alice", &Mailbox::inbox(), AppendMessage {
                flags: Flags::new(),
                date: Some(date),
                content: Bytes::from_static(b"Subject: x\r\n\r\n"),
            })
            .await
            .unwrap();
        let handle = select(&store).await;
        let on = store
            .search(&handle, &SearchCriteria::On("5-Mar-2024".into()), false)
            .await
            .unwrap();
        assert_eq!(on, vec![1]);
        let before = store
            .search(&handle, &SearchCriteria::Before("5-Mar-2024".into()), false)
            .await
            .unwrap();
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn list_with_wildcards() {
        let store = store();
        let names = |entries: Vec<ListEntry>| {
            entries
                .into_iter()
                .map(|e| e.mailbox.to_string())
                .collect::<Vec<_>>()
        };

        let all = store.list("alice", "", "*").await.unwrap();
        assert_eq!(names(all.clone()), vec!["Archive", "Archive/2024", "INBOX"]);
        assert!(all[0].attributes.contains(&MailboxAttribute::HasChildren));
        assert!(all[1].attributes.contains(&MailboxAttribute::HasNoChildren));

        let top = store.list("alice", "", "%").await.unwrap();
        assert_eq!(names(top), vec!["Archive", "INBOX"]);

        let children = store.list("alice", "Archive/", "%").await.unwrap();
        assert_eq!(names(children), vec!["Archive/2024"]);
    }

    #[tokio::test]
    async fn append_assigns_increasing_uids() {
        let store = store();
        let outcome = store
            .append("alice", &Mailbox::inbox(), AppendMessage {
                flags: Flags::new(),
                date: None,
                content: Bytes::from_static(b"Subject: new\r\n\r\nhi\r\n"),
            })
            .await
            .unwrap();
        assert_eq!(outcome.uid.get(), 3);
        assert_eq!(store.message_count("INBOX"), Some(3));

        let missing = store
            .append("alice", &Mailbox::new("Nope"), AppendMessage {
                flags: Flags::new(),
                date: None,
                content: Bytes::new(),
            })
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn wildcard_rules() {
        assert!(wildcard_match(b"*", b"a/b/c"));
        assert!(wildcard_match(b"a/%", b"a/b"));
        assert!(!wildcard_match(b"a/%", b"a/b/c"));
        assert!(wildcard_match(b"a*c", b"abbbc"));
        assert!(!wildcard_match(b"INBOX", b"INBOX2"));
        assert!(wildcard_match(b"", b""));
    }
}
