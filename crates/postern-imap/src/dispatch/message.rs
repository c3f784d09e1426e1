//! FETCH, SEARCH and IDLE.

use tracing::{debug, warn};

use super::{Context, Outcome, bad};
use crate::command::{FetchItems, SearchCriteria};
use crate::fetch::{Batches, ChunkedResultProducer, FetchResponseBuilder};
use crate::protocol::IdleHandler;
use crate::store::{Authenticator, MailboxStore};
use crate::types::{SequenceSet, Status, Tag};

pub(super) async fn fetch<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: Tag,
    set: &SequenceSet,
    items: &FetchItems,
    uid: bool,
) -> Outcome {
    let Some(selected) = cx.session.selected() else {
        return bad(cx.out, &tag, "No mailbox selected");
    };
    let batch_size = cx.config.fetch_batch_size;

    let batches = if uid {
        let criteria = SearchCriteria::UidSet(set.clone());
        match cx.store.search(selected.handle(), &criteria, false).await {
            Ok(numbers) => Batches::for_numbers(numbers, batch_size),
            Err(e) => {
                warn!(error = %e, "UID lookup failed");
                cx.out
                    .write_tagged(&tag, Status::No, None, &format!("UID FETCH failed: {e}"));
                return Outcome::Done;
            }
        }
    } else {
        let exists = selected.exists();
        if set.resolve(exists).last().is_some_and(|r| *r.end() > exists) {
            return bad(cx.out, &tag, "Invalid sequence set");
        }
        Batches::for_sequence_set(set, exists, batch_size)
    };

    debug!(tag = %tag, messages = batches.remaining(), uid, "starting fetch");
    let builder = FetchResponseBuilder::new(items, uid);
    Outcome::Stream(ChunkedResultProducer::new(tag, batches, builder, uid))
}

pub(super) async fn search<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    criteria: &SearchCriteria,
    uid: bool,
) -> Outcome {
    let command = if uid { "UID SEARCH" } else { "SEARCH" };
    let Some(selected) = cx.session.selected() else {
        return bad(cx.out, tag, "No mailbox selected");
    };

    match cx.store.search(selected.handle(), criteria, uid).await {
        Ok(mut numbers) => {
            numbers.sort_unstable();
            let mut line = String::from("SEARCH");
            for n in numbers {
                line.push(' ');
                line.push_str(&n.to_string());
            }
            cx.out.write_untagged(&line);
            cx.out
                .write_tagged(tag, Status::Ok, None, &format!("{command} completed"));
        }
        Err(e) => {
            warn!(error = %e, "search failed");
            cx.out
                .write_tagged(tag, Status::No, None, &format!("{command} failed: {e}"));
        }
    }
    Outcome::Done
}

pub(super) fn idle<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: Tag,
) -> Outcome {
    cx.out.write_continuation("idling");
    cx.session
        .continuations()
        .push(Box::new(IdleHandler::new(tag)));
    Outcome::Done
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
    use super::super::testing::Harness;
    use super::*;
    use crate::types::{Flag, Flags};

    #[tokio::test]
    async fn fetch_streams_in_batches() {
        let mut h = Harness::new();
        h.add_messages(250);
        h.select_inbox().await;

        let outcome = h.run("f FETCH 1:* (FLAGS)\r\n").await;
        assert!(h.out.output.is_empty());
        h.drain(outcome).await;

        let lines = h.lines();
        assert_eq!(lines.len(), 251);
        assert_eq!(lines[0], "* 1 FETCH (FLAGS ())");
        assert_eq!(lines[250], "f OK FETCH completed");
        let calls: Vec<String> = h.store.fetch_calls().iter().map(ToString::to_string).collect();
        assert_eq!(calls, vec!["1:100", "101:200", "201:250"]);
    }

    #[tokio::test]
    async fn out_of_range_sequence_is_bad() {
        let mut h = Harness::new();
        h.add_messages(2);
        h.select_inbox().await;
        let outcome = h.run("f FETCH 1:5 FLAGS\r\n").await;
        assert!(matches!(outcome, Outcome::Done));
        assert_eq!(h.lines(), vec!["f BAD Invalid sequence set"]);
        assert!(h.store.fetch_calls().is_empty());
    }

    #[tokio::test]
    async fn uid_fetch_maps_uids_and_includes_uid() {
        let mut h = Harness::new();
        h.add_messages(5);
        h.select_inbox().await;

        let outcome = h.run("u UID FETCH 2,4:10 FLAGS\r\n").await;
        h.drain(outcome).await;
        assert_eq!(
            h.lines(),
            vec![
                "* 2 FETCH (UID 2 FLAGS ())",
                "* 4 FETCH (UID 4 FLAGS ())",
                "* 5 FETCH (UID 5 FLAGS ())",
                "u OK UID FETCH completed",
            ]
        );
    }

    #[tokio::test]
    async fn search_returns_matching_numbers() {
        let mut h = Harness::new();
        h.add_messages(3);
        h.store
            .insert_message("INBOX", "Subject: hi\r\n\r\nx\r\n", Flags::from_vec(vec![Flag::Seen]));
        h.select_inbox().await;

        h.run("s1 SEARCH UNSEEN\r\n").await;
        h.run("s2 UID SEARCH SEEN\r\n").await;
        h.run("s3 SEARCH SUBJECT nothing-matches\r\n").await;
        assert_eq!(
            h.lines(),
            vec![
                "* SEARCH 1 2 3",
                "s1 OK SEARCH completed",
                "* SEARCH 4",
                "s2 OK UID SEARCH completed",
                "* SEARCH",
                "s3 OK SEARCH completed",
            ]
        );
    }

    #[tokio::test]
    async fn idle_waits_for_done() {
        let mut h = Harness::new();
        h.select_inbox().await;
        h.run("i IDLE\r\n").await;
        assert_eq!(h.lines(), vec!["+ idling"]);
        assert!(h.session.in_continuation());
        h.line("DONE").await;
        assert_eq!(h.lines(), vec!["i OK IDLE terminated"]);
        assert!(!h.session.in_continuation());
    }
}
