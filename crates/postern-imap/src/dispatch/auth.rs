//! LOGIN and AUTHENTICATE.

use tracing::{info, warn};

use super::{Context, Outcome, bad, capabilities, plaintext_refused};
use crate::protocol::{LoginPasswordHandler, LoginUserHandler, PlainAuthHandler};
use crate::sasl::{self, Mechanism};
use crate::store::{Authenticator, MailboxStore};
use crate::types::{ResponseCode, Status, Tag};

pub(super) async fn login<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    username: String,
    password: &str,
) -> Outcome {
    if plaintext_refused(cx.session, cx.config) {
        return privacy_required(cx, tag);
    }
    verify(cx, tag, username, password, "LOGIN").await
}

pub(super) async fn authenticate<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    mechanism: &str,
    initial_response: Option<&str>,
) -> Outcome {
    if plaintext_refused(cx.session, cx.config) {
        return privacy_required(cx, tag);
    }
    let Some(mechanism) = Mechanism::from_name(mechanism) else {
        cx.out
            .write_tagged(tag, Status::No, None, "Unsupported authentication mechanism");
        return Outcome::Done;
    };

    match (mechanism, initial_response) {
        (Mechanism::Plain, Some(response)) => match sasl::decode_plain(response.as_bytes()) {
            Ok(creds) => verify(cx, tag, creds.user, &creds.password, "AUTHENTICATE").await,
            Err(_) => bad(cx.out, tag, "Invalid SASL response"),
        },
        (Mechanism::Plain, None) => {
            cx.out.write_continuation("");
            cx.session
                .continuations()
                .push(Box::new(PlainAuthHandler::new(tag.clone())));
            Outcome::Done
        }
        (Mechanism::Login, Some(response)) => match sasl::decode_text(response.as_bytes()) {
            Ok(user) => {
                cx.out.write_continuation(sasl::LOGIN_PASSWORD_CHALLENGE);
                cx.session
                    .continuations()
                    .push(Box::new(LoginPasswordHandler::new(tag.clone(), user)));
                Outcome::Done
            }
            Err(_) => bad(cx.out, tag, "Invalid SASL response"),
        },
        (Mechanism::Login, None) => {
            cx.out.write_continuation(sasl::LOGIN_USERNAME_CHALLENGE);
            cx.session
                .continuations()
                .push(Box::new(LoginUserHandler::new(tag.clone())));
            Outcome::Done
        }
    }
}

/// Checks credentials and completes the authenticating command.
pub(super) async fn verify<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    user: String,
    password: &str,
    command: &str,
) -> Outcome {
    match cx.auth.authenticate(&user, password).await {
        Ok(true) => {
            if let Err(e) = cx.session.authenticate(user) {
                warn!(error = %e, "authentication raced a state change");
                return bad(cx.out, tag, "Already authenticated");
            }
            info!(user = cx.session.user().unwrap_or("-"), "authenticated");
            let code = ResponseCode::Capability(capabilities(cx.session, cx.config));
            cx.out
                .write_tagged(tag, Status::Ok, Some(&code), &format!("{command} completed"));
            Outcome::Done
        }
        Ok(false) => {
            let failures = cx.session.record_auth_failure();
            warn!(%user, failures, "authentication failed");
            cx.out.write_tagged(
                tag,
                Status::No,
                Some(&ResponseCode::AuthenticationFailed),
                "Authentication failed",
            );
            if failures >= cx.config.max_auth_failures {
                cx.out
                    .write_status(Status::Bye, None, "Too many authentication failures");
                return Outcome::Close;
            }
            Outcome::Done
        }
        Err(e) => {
            warn!(error = %e, "authenticator unavailable");
            cx.out
                .write_tagged(tag, Status::No, None, "Authentication temporarily unavailable");
            Outcome::Done
        }
    }
}

fn privacy_required<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
) -> Outcome {
    cx.out.write_tagged(
        tag,
        Status::No,
        Some(&ResponseCode::PrivacyRequired),
        "Use STARTTLS first",
    );
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
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::super::testing::Harness;
    use super::*;
    use crate::config::Config;
    use crate::protocol::{AUTH_FAILURES, SessionState};

    #[tokio::test]
    async fn login_success_reports_capabilities() {
        let mut h = Harness::new();
        h.run("a1 LOGIN alice secret\r\n").await;
        let lines = h.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("a1 OK [CAPABILITY IMAP4rev1 "));
        assert!(lines[0].ends_with("] LOGIN completed"));
        assert_eq!(h.session.state(), SessionState::Authenticated);
        assert_eq!(h.session.user(), Some("alice"));
    }

    #[tokio::test]
    async fn repeated_failures_disconnect() {
        let mut h = Harness::with_config(Config::builder().max_auth_failures(2).build());
        let first = h.run("a1 LOGIN alice wrong\r\n").await;
        assert!(matches!(first, Outcome::Done));
        let second = h.run("a2 LOGIN alice wrong\r\n").await;
        assert!(matches!(second, Outcome::Close));
        assert_eq!(
            h.lines(),
            vec![
                "a1 NO [AUTHENTICATIONFAILED] Authentication failed",
                "a2 NO [AUTHENTICATIONFAILED] Authentication failed",
                "* BYE Too many authentication failures",
            ]
        );
        assert_eq!(h.session.attributes().get::<u32>(AUTH_FAILURES), Some(&2));
        assert_eq!(h.session.state(), SessionState::NotAuthenticated);
    }

    #[tokio::test]
    async fn plaintext_auth_can_be_refused() {
        let mut h = Harness::with_config(Config::builder().allow_plaintext_auth(false).build());
        h.run("a1 LOGIN alice secret\r\n").await;
        h.run("a2 AUTHENTICATE PLAIN\r\n").await;
        assert_eq!(
            h.lines(),
            vec![
                "a1 NO [PRIVACYREQUIRED] Use STARTTLS first",
                "a2 NO [PRIVACYREQUIRED] Use STARTTLS first",
            ]
        );
        assert!(!h.session.in_continuation());
    }

    #[tokio::test]
    async fn plain_with_initial_response() {
        let mut h = Harness::new();
        let ir = STANDARD.encode(b"\0alice\0secret");
        h.run(&format!("a1 AUTHENTICATE PLAIN {ir}\r\n")).await;
        assert!(h.lines()[0].starts_with("a1 OK [CAPABILITY"));
        assert!(h.session.state().is_authenticated());
    }

    #[tokio::test]
    async fn plain_challenge_exchange() {
        let mut h = Harness::new();
        h.run("a1 AUTHENTICATE PLAIN\r\n").await;
        assert_eq!(h.lines(), vec!["+ "]);
        assert!(h.session.in_continuation());

        let response = STANDARD.encode(b"\0alice\0secret");
        h.line(&response).await;
        assert!(h.lines()[0].starts_with("a1 OK [CAPABILITY"));
        assert!(!h.session.in_continuation());
        assert_eq!(h.session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn login_mechanism_exchange() {
        let mut h = Harness::new();
        h.run("a1 AUTHENTICATE LOGIN\r\n").await;
        assert_eq!(h.lines(), vec!["+ VXNlcm5hbWU6"]);
        h.line(&STANDARD.encode("alice")).await;
        assert_eq!(h.lines(), vec!["+ UGFzc3dvcmQ6"]);
        h.line(&STANDARD.encode("wrong")).await;
        assert_eq!(
            h.lines(),
            vec!["a1 NO [AUTHENTICATIONFAILED] Authentication failed"]
        );
        assert_eq!(h.session.state(), SessionState::NotAuthenticated);
    }

    #[tokio::test]
    async fn cancelled_exchange_is_bad() {
        let mut h = Harness::new();
        h.run("a1 AUTHENTICATE PLAIN\r\n").await;
        h.out.take();
        h.line("*").await;
        assert_eq!(h.lines(), vec!["a1 BAD AUTHENTICATE cancelled"]);
        assert!(!h.session.in_continuation());
    }

    #[tokio::test]
    async fn unsupported_mechanism_is_no() {
        let mut h = Harness::new();
        h.run("a1 AUTHENTICATE XOAUTH2\r\n").await;
        assert_eq!(h.lines(), vec!["a1 NO Unsupported authentication mechanism"]);
    }
}
