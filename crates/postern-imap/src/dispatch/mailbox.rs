//! SELECT, EXAMINE, CLOSE, UNSELECT, LIST and APPEND.

use bytes::Bytes;
use tracing::{debug, warn};

use super::{Context, Outcome, bad};
use crate::protocol::SelectedMailbox;
use crate::response::encode;
use crate::store::{AppendMessage, Authenticator, MailboxStore, StoreError};
use crate::types::{Flags, ListEntry, Mailbox, ResponseCode, Status, Tag, parse_date_time};

pub(super) async fn select<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    mailbox: Mailbox,
    read_only: bool,
) -> Outcome {
    let command = if read_only { "EXAMINE" } else { "SELECT" };

    // A failed SELECT must leave no mailbox selected.
    if cx.session.state().is_selected() && cx.session.deselect(cx.store).is_ok() {
        cx.out.write_status(
            Status::Ok,
            Some(&ResponseCode::Closed),
            "Previous mailbox closed",
        );
    }

    let user = cx.session.user().unwrap_or_default().to_string();
    let selection = match cx.store.select(&user, &mailbox, read_only).await {
        Ok(selection) => selection,
        Err(e) => {
            debug!(%mailbox, error = %e, "select failed");
            let code = matches!(e, StoreError::NotFound(_)).then_some(ResponseCode::Nonexistent);
            cx.out
                .write_tagged(tag, Status::No, code.as_ref(), &format!("{command} failed: {e}"));
            return Outcome::Done;
        }
    };

    let status = selection.status;
    cx.out.write_untagged(&format!("FLAGS {}", status.flags));
    cx.out.write_untagged(&format!("{} EXISTS", status.exists));
    cx.out.write_untagged(&format!("{} RECENT", status.recent));
    if let Some(seq) = status.unseen {
        cx.out.write_status(
            Status::Ok,
            Some(&ResponseCode::Unseen(seq)),
            &format!("Message {seq} is first unseen"),
        );
    }
    cx.out.write_status(
        Status::Ok,
        Some(&ResponseCode::UidValidity(status.uid_validity)),
        "UIDs valid",
    );
    cx.out.write_status(
        Status::Ok,
        Some(&ResponseCode::UidNext(status.uid_next)),
        "Predicted next UID",
    );
    let permanent = if status.read_only {
        Flags::new()
    } else {
        status.permanent_flags.clone()
    };
    cx.out.write_status(
        Status::Ok,
        Some(&ResponseCode::PermanentFlags(permanent)),
        "Limited",
    );

    let access = if status.read_only {
        ResponseCode::ReadOnly
    } else {
        ResponseCode::ReadWrite
    };
    let selected = SelectedMailbox::new(selection.handle, mailbox, &status);
    if let Err(e) = cx.session.select(cx.store, selected) {
        return bad(cx.out, tag, &e.to_string());
    }
    cx.out
        .write_tagged(tag, Status::Ok, Some(&access), &format!("{command} completed"));
    Outcome::Done
}

pub(super) fn close<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    command: &str,
) -> Outcome {
    match cx.session.deselect(cx.store) {
        Ok(()) => {
            cx.out
                .write_tagged(tag, Status::Ok, None, &format!("{command} completed"));
            Outcome::Done
        }
        Err(e) => bad(cx.out, tag, &e.to_string()),
    }
}

pub(super) async fn list<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    reference: &str,
    pattern: &str,
) -> Outcome {
    if pattern.is_empty() {
        cx.out.write_untagged("LIST (\\Noselect) \"/\" \"\"");
        cx.out.write_tagged(tag, Status::Ok, None, "LIST completed");
        return Outcome::Done;
    }

    let user = cx.session.user().unwrap_or_default().to_string();
    match cx.store.list(&user, reference, pattern).await {
        Ok(entries) => {
            for entry in &entries {
                cx.out.write_bytes(&encode_list_entry(entry));
            }
            cx.out.write_tagged(tag, Status::Ok, None, "LIST completed");
        }
        Err(e) => {
            warn!(error = %e, "list failed");
            cx.out
                .write_tagged(tag, Status::No, None, &format!("LIST failed: {e}"));
        }
    }
    Outcome::Done
}

fn encode_list_entry(entry: &ListEntry) -> Vec<u8> {
    let attributes: Vec<&str> = entry.attributes.iter().map(|a| a.as_str()).collect();
    let mut buf = format!("* LIST ({}) ", attributes.join(" ")).into_bytes();
    match entry.delimiter {
        Some(delimiter) => {
            let mut tmp = [0u8; 4];
            encode::write_string(&mut buf, delimiter.encode_utf8(&mut tmp).as_bytes());
        }
        None => buf.extend_from_slice(b"NIL"),
    }
    buf.push(b' ');
    encode::write_astring(&mut buf, entry.mailbox.as_str());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub(super) async fn append<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    mailbox: &Mailbox,
    flags: Flags,
    date: Option<&str>,
    content: Bytes,
) -> Outcome {
    let date = match date.map(parse_date_time) {
        None => None,
        Some(Some(date)) => Some(date),
        Some(None) => return bad(cx.out, tag, "Invalid date-time"),
    };

    let user = cx.session.user().unwrap_or_default().to_string();
    let message = AppendMessage {
        flags,
        date,
        content,
    };
    match cx.store.append(&user, mailbox, message).await {
        Ok(outcome) => {
            if let Some(selected) = cx.session.selected_mut()
                && selected.mailbox() == mailbox
            {
                selected.note_append();
                let exists = selected.exists();
                cx.out.write_untagged(&format!("{exists} EXISTS"));
            }
            let code = ResponseCode::AppendUid {
                uidvalidity: outcome.uid_validity,
                uid: outcome.uid,
            };
            cx.out
                .write_tagged(tag, Status::Ok, Some(&code), "APPEND completed");
        }
        Err(StoreError::NotFound(_)) => {
            cx.out.write_tagged(
                tag,
                Status::No,
                Some(&ResponseCode::TryCreate),
                "Mailbox does not exist",
            );
        }
        Err(e) => {
            warn!(%mailbox, error = %e, "append failed");
            cx.out
                .write_tagged(tag, Status::No, None, &format!("APPEND failed: {e}"));
        }
    }
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
    use crate::protocol::SessionState;
    use crate::types::MailboxAttribute;

    #[tokio::test]
    async fn select_reports_mailbox_status() {
        let mut h = Harness::new();
        h.add_messages(3);
        h.login().await;
        h.run("s1 SELECT INBOX\r\n").await;
        let lines = h.lines();
        assert_eq!(lines[1], "* 3 EXISTS");
        assert_eq!(lines[2], "* 0 RECENT");
        assert_eq!(lines[3], "* OK [UNSEEN 1] Message 1 is first unseen");
        assert!(lines[4].starts_with("* OK [UIDVALIDITY "));
        assert_eq!(lines[5], "* OK [UIDNEXT 4] Predicted next UID");
        assert!(lines[6].starts_with("* OK [PERMANENTFLAGS ("));
        assert_eq!(lines[7], "s1 OK [READ-WRITE] SELECT completed");
        assert_eq!(h.session.state(), SessionState::Selected);
    }

    #[tokio::test]
    async fn examine_is_read_only() {
        let mut h = Harness::new();
        h.login().await;
        h.run("e EXAMINE INBOX\r\n").await;
        let lines = h.lines();
        assert!(lines.contains(&"* OK [PERMANENTFLAGS ()] Limited".to_string()));
        assert_eq!(lines.last().unwrap(), "e OK [READ-ONLY] EXAMINE completed");
        assert!(h.session.selected().unwrap().read_only());
    }

    #[tokio::test]
    async fn reselect_closes_previous_mailbox() {
        let mut h = Harness::new();
        h.select_inbox().await;
        h.run("s2 SELECT Archive\r\n").await;
        let lines = h.lines();
        assert_eq!(lines[0], "* OK [CLOSED] Previous mailbox closed");
        assert_eq!(h.store.open_handles(), 1);
        assert_eq!(h.session.selected().unwrap().mailbox().as_str(), "Archive");
    }

    #[tokio::test]
    async fn failed_select_leaves_authenticated() {
        let mut h = Harness::new();
        h.select_inbox().await;
        h.run("s2 SELECT Missing\r\n").await;
        let lines = h.lines();
        assert_eq!(lines[0], "* OK [CLOSED] Previous mailbox closed");
        assert!(lines[1].starts_with("s2 NO [NONEXISTENT] SELECT failed"));
        assert_eq!(h.session.state(), SessionState::Authenticated);
        assert_eq!(h.store.open_handles(), 0);
    }

    #[tokio::test]
    async fn close_and_unselect() {
        let mut h = Harness::new();
        h.select_inbox().await;
        h.run("c CLOSE\r\n").await;
        assert_eq!(h.session.state(), SessionState::Authenticated);
        h.run("s SELECT INBOX\r\n").await;
        h.out.take();
        h.run("u UNSELECT\r\n").await;
        assert_eq!(h.lines(), vec!["u OK UNSELECT completed"]);
        assert_eq!(h.store.open_handles(), 0);
    }

    #[tokio::test]
    async fn list_with_wildcards() {
        let mut h = Harness::new();
        h.store.create_mailbox("Archive/2024");
        h.store.set_special_use("Archive", MailboxAttribute::Trash);
        h.login().await;

        h.run("l1 LIST \"\" \"\"\r\n").await;
        assert_eq!(
            h.lines(),
            vec!["* LIST (\\Noselect) \"/\" \"\"", "l1 OK LIST completed"]
        );

        h.run("l2 LIST \"\" %\r\n").await;
        let lines = h.lines();
        assert!(lines.contains(&"* LIST (\\HasChildren \\Trash) \"/\" Archive".to_string()));
        assert!(lines.contains(&"* LIST (\\HasNoChildren) \"/\" INBOX".to_string()));
        assert!(!lines.iter().any(|l| l.contains("2024")));
        assert_eq!(lines.last().unwrap(), "l2 OK LIST completed");
    }

    #[tokio::test]
    async fn append_assigns_uid() {
        let mut h = Harness::new();
        h.select_inbox().await;
        h.run("a1 APPEND INBOX (\\Seen) \"17-Jul-1996 02:44:25 -0700\" {8}\r\nHi there\r\n")
            .await;
        let lines = h.lines();
        assert_eq!(lines[0], "* 1 EXISTS");
        assert!(lines[1].starts_with("a1 OK [APPENDUID "));
        assert!(lines[1].ends_with(" 1] APPEND completed"));
        assert_eq!(h.store.message_count("INBOX"), Some(1));
    }

    #[tokio::test]
    async fn append_to_missing_mailbox_says_trycreate() {
        let mut h = Harness::new();
        h.login().await;
        h.run("a1 APPEND Nowhere {2}\r\nhi\r\n").await;
        assert_eq!(h.lines(), vec!["a1 NO [TRYCREATE] Mailbox does not exist"]);
    }

    #[tokio::test]
    async fn append_with_bad_date_is_bad() {
        let mut h = Harness::new();
        h.login().await;
        h.run("a1 APPEND INBOX \"yesterday\" {2}\r\nhi\r\n").await;
        assert_eq!(h.lines(), vec!["a1 BAD Invalid date-time"]);
        assert_eq!(h.store.message_count("INBOX"), Some(0));
    }
}
