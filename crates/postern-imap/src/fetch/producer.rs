//! Batch-at-a-time FETCH streaming.
//!
//! A FETCH over a large mailbox is answered one [`ResultBatch`] at a time.
//! The connection calls [`ChunkedResultProducer::produce_next`], flushes
//! what it wrote, waits for the socket, and repeats while
//! [`ChunkedResultProducer::has_more`] holds. At most one batch of message
//! data is alive at any point.
//!
//! ```text
//!  produce_next ──► fetch_batch(1:100) ──► * 1 FETCH ... * 100 FETCH
//!  flush + write                                 │
//!  produce_next ──► fetch_batch(101:200) ──► ... ▼
//!  ...                                        tag OK FETCH completed
//! ```

use std::iter::Peekable;

use tracing::{debug, warn};

use super::ResultBatch;
use super::batch::Batches;
use super::build::FetchResponseBuilder;
use crate::response::ResponseWriter;
use crate::store::MailboxStore;
use crate::types::{Status, Tag};

/// Streams the responses of one FETCH command.
#[derive(Debug)]
pub struct ChunkedResultProducer {
    tag: Tag,
    batches: Option<Peekable<Batches>>,
    builder: FetchResponseBuilder,
    uid: bool,
    produced: usize,
    skipped: usize,
}

impl ChunkedResultProducer {
    /// Creates a producer answering the command tagged `tag`.
    #[must_use]
    pub fn new(tag: Tag, batches: Batches, builder: FetchResponseBuilder, uid: bool) -> Self {
        Self {
            tag,
            batches: Some(batches.peekable()),
            builder,
            uid,
            produced: 0,
            skipped: 0,
        }
    }

    /// Returns true until the tagged completion has been written.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.batches.is_some()
    }

    /// Number of FETCH responses written so far.
    #[must_use]
    pub const fn produced(&self) -> usize {
        self.produced
    }

    /// Number of messages skipped because they could not be loaded or built.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Fetches and writes the next batch.
    ///
    /// Makes at most one [`MailboxStore::fetch_batch`] call. Writes the
    /// tagged completion after the last batch, or a tagged `NO` if the
    /// store fails, after which [`has_more`](Self::has_more) is false.
    pub async fn produce_next<M, W>(&mut self, store: &M, handle: &M::Handle, sink: &mut W)
    where
        M: MailboxStore,
        W: ResponseWriter + Send + ?Sized,
    {
        let Some(batches) = self.batches.as_mut() else {
            return;
        };
        let Some(batch) = batches.next() else {
            self.complete(sink);
            return;
        };

        debug!(tag = %self.tag, batch = %batch, "fetching batch");
        match store.fetch_batch(handle, &batch, self.builder.items()).await {
            Ok(items) => {
                for item in items {
                    let response = item
                        .map_err(|e| e.to_string())
                        .and_then(|data| self.builder.build(&data).map_err(|e| e.to_string()));
                    match response {
                        Ok(response) => {
                            sink.write_fetch(&response);
                            self.produced += 1;
                        }
                        Err(reason) => {
                            warn!(tag = %self.tag, batch = %batch, %reason, "skipping message");
                            self.skipped += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(tag = %self.tag, batch = %batch, error = %e, "fetch batch failed");
                self.finish(sink, Status::No, &format!("{} failed: {e}", self.command()));
                return;
            }
        }

        if self.batches.as_mut().is_some_and(|b| b.peek().is_none()) {
            self.complete(sink);
        }
    }

    /// Drops the producer without fetching further batches.
    pub fn abandon(self) {
        if self.has_more() {
            debug!(tag = %self.tag, produced = self.produced, "fetch abandoned");
        }
    }

    fn complete<W: ResponseWriter + ?Sized>(&mut self, sink: &mut W) {
        let text = format!("{} completed", self.command());
        self.finish(sink, Status::Ok, &text);
    }

    fn finish<W: ResponseWriter + ?Sized>(&mut self, sink: &mut W, status: Status, text: &str) {
        sink.write_tagged(&self.tag, status, None, text);
        self.batches = None;
        debug!(
            tag = %self.tag,
            produced = self.produced,
            skipped = self.skipped,
            %status,
            "fetch finished"
        );
    }

    const fn command(&self) -> &'static str {
        if self.uid { "UID FETCH" } else { "FETCH" }
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
    use std::num::NonZeroUsize;

    use super::*;
    use crate::command::{FetchAttribute, FetchItems};
    use crate::response::RecordingWriter;
    use crate::store::{MemoryHandle, MemoryStore};
    use crate::types::{Flags, Mailbox, SequenceSet, Uid};

    async fn mailbox(count: u32) -> (MemoryStore, MemoryHandle) {
        let store = MemoryStore::new();
        store.create_mailbox("INBOX");
        for i in 1..=count {
            store.insert_message(
                "INBOX",
                format!("Subject: message {i}\r\nFrom: a@example.com\r\n\r\nbody\r\n"),
                Flags::new(),
            );
        }
        let handle = store
            .select("alice", &Mailbox::inbox(), false)
            .await
            .unwrap()
            .handle;
        (store, handle)
    }

    fn producer(set: &str, exists: u32, batch: usize, items: &FetchItems) -> ChunkedResultProducer {
        let batches = Batches::for_sequence_set(
            &SequenceSet::parse(set).unwrap(),
            exists,
            NonZeroUsize::new(batch).unwrap(),
        );
        ChunkedResultProducer::new(
            Tag::new("f1").unwrap(),
            batches,
            FetchResponseBuilder::new(items, false),
            false,
        )
    }

    fn fetch_lines(out: &RecordingWriter) -> usize {
        out.lines().iter().filter(|l| l.contains(" FETCH (")).count()
    }

    #[tokio::test]
    async fn one_store_call_per_batch() {
        let (store, handle) = mailbox(500).await;
        let mut producer = producer("1:500", 500, 100, &FetchItems::Fast);
        let mut out = RecordingWriter::new();

        let mut rounds = 0;
        while producer.has_more() {
            producer.produce_next(&store, &handle, &mut out).await;
            rounds += 1;
            assert_eq!(store.fetch_calls().len(), rounds);
            // nothing beyond the current batch has been written
            assert_eq!(fetch_lines(&out), rounds * 100);
        }

        assert_eq!(rounds, 5);
        assert_eq!(producer.produced(), 500);
        assert_eq!(out.lines().last().unwrap(), "f1 OK FETCH completed");
        let starts: Vec<u32> = store.fetch_calls().iter().map(ResultBatch::start).collect();
        assert_eq!(starts, vec![1, 101, 201, 301, 401]);
    }

    #[tokio::test]
    async fn failing_items_are_skipped() {
        let (store, handle) = mailbox(5).await;
        store.break_message("INBOX", Uid::new(2).unwrap());
        store.insert_message("INBOX", "garbage without a colon\r\n\r\n", Flags::new());

        let items = FetchItems::Items(vec![FetchAttribute::Envelope]);
        let mut producer = producer("1:*", 6, 4, &items);
        let mut out = RecordingWriter::new();
        while producer.has_more() {
            producer.produce_next(&store, &handle, &mut out).await;
        }

        assert_eq!(producer.produced(), 4);
        assert_eq!(producer.skipped(), 2);
        let lines = out.lines();
        assert!(lines.iter().all(|l| !l.starts_with("* 2 FETCH") && !l.starts_with("* 6 FETCH")));
        assert_eq!(lines.last().unwrap(), "f1 OK FETCH completed");
    }

    #[tokio::test]
    async fn failing_batch_ends_with_no() {
        let (store, handle) = mailbox(10).await;
        store.fail_fetch_call(1);
        let mut producer = producer("1:10", 10, 4, &FetchItems::Fast);
        let mut out = RecordingWriter::new();

        producer.produce_next(&store, &handle, &mut out).await;
        assert!(producer.has_more());
        producer.produce_next(&store, &handle, &mut out).await;
        assert!(!producer.has_more());

        assert_eq!(fetch_lines(&out), 4);
        assert!(out.lines().last().unwrap().starts_with("f1 NO FETCH failed"));
        assert_eq!(store.fetch_calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_set_completes_without_store_calls() {
        let (store, handle) = mailbox(0).await;
        let mut producer = producer("1:*", 0, 10, &FetchItems::Fast);
        let mut out = RecordingWriter::new();
        producer.produce_next(&store, &handle, &mut out).await;
        assert!(!producer.has_more());
        assert!(store.fetch_calls().is_empty());
        assert_eq!(out.lines(), vec!["f1 OK FETCH completed"]);
    }

    #[tokio::test]
    async fn abandoned_producer_fetches_nothing_more() {
        let (store, handle) = mailbox(20).await;
        let mut producer = producer("1:20", 20, 5, &FetchItems::Fast);
        let mut out = RecordingWriter::new();
        producer.produce_next(&store, &handle, &mut out).await;
        producer.abandon();
        assert_eq!(store.fetch_calls().len(), 1);
        assert!(!out.text().contains("f1 OK"));
    }
}
