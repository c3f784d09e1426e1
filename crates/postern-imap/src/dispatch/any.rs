//! CAPABILITY, NOOP, CHECK and LOGOUT.

use tracing::info;

use super::{Context, Outcome, capabilities};
use crate::store::{Authenticator, MailboxStore};
use crate::types::{Status, Tag, format_capabilities};

pub(super) fn capability<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
) -> Outcome {
    let caps = capabilities(cx.session, cx.config);
    cx.out
        .write_untagged(&format!("CAPABILITY {}", format_capabilities(&caps)));
    cx.out.write_tagged(tag, Status::Ok, None, "CAPABILITY completed");
    Outcome::Done
}

pub(super) fn noop<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    name: &str,
) -> Outcome {
    cx.out
        .write_tagged(tag, Status::Ok, None, &format!("{name} completed"));
    Outcome::Done
}

pub(super) fn logout<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
) -> Outcome {
    cx.out.write_status(Status::Bye, None, "Logging out");
    cx.out.write_tagged(tag, Status::Ok, None, "LOGOUT completed");
    cx.session.logout(cx.store);
    info!(user = cx.session.user().unwrap_or("-"), "logged out");
    Outcome::Close
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

    #[tokio::test]
    async fn capability_then_ok() {
        let mut h = Harness::new();
        h.run("c CAPABILITY\r\n").await;
        let lines = h.lines();
        assert!(lines[0].starts_with("* CAPABILITY IMAP4rev1 LITERAL+ SASL-IR IDLE UNSELECT"));
        assert!(lines[0].contains("AUTH=PLAIN AUTH=LOGIN"));
        assert_eq!(lines[1], "c OK CAPABILITY completed");
    }

    #[tokio::test]
    async fn logout_says_bye_first_and_releases_mailbox() {
        let mut h = Harness::new();
        h.select_inbox().await;
        assert_eq!(h.store.open_handles(), 1);

        let outcome = h.run("z LOGOUT\r\n").await;
        assert!(matches!(outcome, Outcome::Close));
        assert_eq!(h.lines(), vec!["* BYE Logging out", "z OK LOGOUT completed"]);
        assert_eq!(h.session.state(), SessionState::LoggedOut);
        assert_eq!(h.store.open_handles(), 0);
    }

    #[tokio::test]
    async fn check_is_a_noop_in_selected_state() {
        let mut h = Harness::new();
        h.select_inbox().await;
        h.run("k CHECK\r\n").await;
        h.run("n NOOP\r\n").await;
        assert_eq!(h.lines(), vec!["k OK CHECK completed", "n OK NOOP completed"]);
    }
}
