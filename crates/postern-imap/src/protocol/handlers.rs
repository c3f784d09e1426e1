//! Built-in continuation handlers for IDLE and AUTHENTICATE.

use super::router::{LineAction, LineHandler, LineStep};
use crate::response::ResponseWriter;
use crate::sasl;
use crate::types::{Status, Tag};

/// Waits for the `DONE` that ends IDLE.
#[derive(Debug)]
pub struct IdleHandler {
    tag: Tag,
}

impl IdleHandler {
    /// Creates a handler completing the IDLE command tagged `tag`.
    #[must_use]
    pub const fn new(tag: Tag) -> Self {
        Self { tag }
    }
}

impl LineHandler for IdleHandler {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn handle_line(&mut self, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep {
        if line.eq_ignore_ascii_case(b"DONE") {
            out.write_tagged(&self.tag, Status::Ok, None, "IDLE terminated");
        } else {
            out.write_tagged(&self.tag, Status::Bad, None, "Expected DONE");
        }
        LineStep::Finish(None)
    }
}

/// Writes the BAD for a `*` cancellation or an undecodable response.
fn reject(tag: &Tag, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep {
    let text = if line == b"*" {
        "AUTHENTICATE cancelled"
    } else {
        "Invalid SASL response"
    };
    out.write_tagged(tag, Status::Bad, None, text);
    LineStep::Finish(None)
}

/// Reads the single PLAIN response after an empty challenge.
#[derive(Debug)]
pub struct PlainAuthHandler {
    tag: Tag,
}

impl PlainAuthHandler {
    /// Creates a handler for the AUTHENTICATE command tagged `tag`.
    #[must_use]
    pub const fn new(tag: Tag) -> Self {
        Self { tag }
    }
}

impl LineHandler for PlainAuthHandler {
    fn name(&self) -> &'static str {
        "auth-plain"
    }

    fn handle_line(&mut self, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep {
        if line == b"*" {
            return reject(&self.tag, line, out);
        }
        match sasl::decode_plain(line) {
            Ok(creds) => LineStep::Finish(Some(LineAction::Authenticate {
                tag: self.tag.clone(),
                user: creds.user,
                password: creds.password,
            })),
            Err(_) => reject(&self.tag, line, out),
        }
    }
}

/// Reads the LOGIN username, then hands over to [`LoginPasswordHandler`].
#[derive(Debug)]
pub struct LoginUserHandler {
    tag: Tag,
}

impl LoginUserHandler {
    /// Creates a handler for the AUTHENTICATE command tagged `tag`.
    #[must_use]
    pub const fn new(tag: Tag) -> Self {
        Self { tag }
    }
}

impl LineHandler for LoginUserHandler {
    fn name(&self) -> &'static str {
        "auth-login-user"
    }

    fn handle_line(&mut self, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep {
        if line == b"*" {
            return reject(&self.tag, line, out);
        }
        match sasl::decode_text(line) {
            Ok(user) => {
                out.write_continuation(sasl::LOGIN_PASSWORD_CHALLENGE);
                LineStep::Replace(Box::new(LoginPasswordHandler::new(self.tag.clone(), user)))
            }
            Err(_) => reject(&self.tag, line, out),
        }
    }
}

/// Reads the LOGIN password.
pub struct LoginPasswordHandler {
    tag: Tag,
    user: String,
}

impl LoginPasswordHandler {
    /// Creates a handler expecting the password of `user`.
    #[must_use]
    pub const fn new(tag: Tag, user: String) -> Self {
        Self { tag, user }
    }
}

impl std::fmt::Debug for LoginPasswordHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginPasswordHandler")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl LineHandler for LoginPasswordHandler {
    fn name(&self) -> &'static str {
        "auth-login-password"
    }

    fn handle_line(&mut self, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep {
        if line == b"*" {
            return reject(&self.tag, line, out);
        }
        match sasl::decode_text(line) {
            Ok(password) => LineStep::Finish(Some(LineAction::Authenticate {
                tag: self.tag.clone(),
                user: std::mem::take(&mut self.user),
                password,
            })),
            Err(_) => reject(&self.tag, line, out),
        }
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
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::protocol::ContinuationRouter;
    use crate::response::RecordingWriter;

    fn tag() -> Tag {
        Tag::new("A1").unwrap()
    }

    #[test]
    fn idle_done_and_garbage() {
        let mut out = RecordingWriter::new();
        let mut router = ContinuationRouter::new();
        router.push(Box::new(IdleHandler::new(tag())));
        assert!(router.route(b"done", &mut out).unwrap().is_none());
        assert!(router.is_empty());

        router.push(Box::new(IdleHandler::new(tag())));
        router.route(b"A2 NOOP", &mut out).unwrap();
        assert_eq!(out.lines(), vec!["A1 OK IDLE terminated", "A1 BAD Expected DONE"]);
    }

    #[test]
    fn plain_exchange_yields_credentials() {
        let mut out = RecordingWriter::new();
        let mut router = ContinuationRouter::new();
        router.push(Box::new(PlainAuthHandler::new(tag())));
        let line = STANDARD.encode(b"\0alice\0secret");
        let action = router.route(line.as_bytes(), &mut out).unwrap();
        assert_eq!(
            action,
            Some(LineAction::Authenticate {
                tag: tag(),
                user: "alice".into(),
                password: "secret".into(),
            })
        );
        assert!(out.output.is_empty());
    }

    #[test]
    fn login_exchange_replaces_handler() {
        let mut out = RecordingWriter::new();
        let mut router = ContinuationRouter::new();
        router.push(Box::new(LoginUserHandler::new(tag())));

        let user = STANDARD.encode("alice");
        assert!(router.route(user.as_bytes(), &mut out).unwrap().is_none());
        assert_eq!(router.len(), 1);
        assert_eq!(router.current(), Some("auth-login-password"));

        let password = STANDARD.encode("secret");
        let action = router.route(password.as_bytes(), &mut out).unwrap();
        assert!(matches!(
            action,
            Some(LineAction::Authenticate { ref user, ref password, .. })
                if user == "alice" && password == "secret"
        ));
        assert!(router.is_empty());
        assert_eq!(out.lines(), vec!["+ UGFzc3dvcmQ6"]);
    }

    #[test]
    fn star_cancels() {
        let mut out = RecordingWriter::new();
        let mut router = ContinuationRouter::new();
        router.push(Box::new(LoginUserHandler::new(tag())));
        assert!(router.route(b"*", &mut out).unwrap().is_none());
        assert!(router.is_empty());
        assert_eq!(out.lines(), vec!["A1 BAD AUTHENTICATE cancelled"]);
    }

    #[test]
    fn undecodable_response_is_bad() {
        let mut out = RecordingWriter::new();
        let mut router = ContinuationRouter::new();
        router.push(Box::new(PlainAuthHandler::new(tag())));
        router.route(b"@@@", &mut out).unwrap();
        assert_eq!(out.lines(), vec!["A1 BAD Invalid SASL response"]);
    }
}
