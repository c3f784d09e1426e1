//! Continuation line routing.
//!
//! Some commands take over the input stream for a while: AUTHENTICATE
//! reads SASL responses, IDLE waits for `DONE`. While such an exchange is
//! in progress, every input line goes to the handler on top of a LIFO
//! stack instead of the command decoder.
//!
//! ```text
//!  line ──► [ top handler ] ──► Continue      (stay on top)
//!           [    ...      ]     Push(h)       (h above current)
//!           [ bottom      ]     Replace(h)    (h instead of current)
//!                               Finish(action) (pop, run action)
//! ```

use crate::response::ResponseWriter;
use crate::types::Tag;
use crate::{Error, Result};

/// What a line handler wants done after seeing a line.
pub enum LineStep {
    /// Keep the current handler on top.
    Continue,
    /// Keep the current handler and stack a new one above it.
    Push(Box<dyn LineHandler>),
    /// Swap the current handler for a new one.
    Replace(Box<dyn LineHandler>),
    /// Pop the current handler, optionally deferring work to the
    /// dispatcher.
    Finish(Option<LineAction>),
}

impl std::fmt::Debug for LineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Push(h) => f.debug_tuple("Push").field(&h.name()).finish(),
            Self::Replace(h) => f.debug_tuple("Replace").field(&h.name()).finish(),
            Self::Finish(action) => f.debug_tuple("Finish").field(action).finish(),
        }
    }
}

/// Work a finished handler hands back because it needs async access to
/// the store or authenticator.
#[derive(Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Verify credentials collected by a SASL exchange.
    Authenticate {
        /// Tag of the AUTHENTICATE command.
        tag: Tag,
        /// Authentication identity.
        user: String,
        /// Password.
        password: String,
    },
}

impl std::fmt::Debug for LineAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authenticate { tag, user, .. } => f
                .debug_struct("Authenticate")
                .field("tag", tag)
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// A handler that owns the input stream while it is on top of the stack.
pub trait LineHandler: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Handles one input line, CRLF excluded.
    fn handle_line(&mut self, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep;
}

/// LIFO stack of [`LineHandler`]s.
#[derive(Default)]
pub struct ContinuationRouter {
    stack: Vec<Box<dyn LineHandler>>,
}

impl ContinuationRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a handler above the existing ones.
    pub fn push(&mut self, handler: Box<dyn LineHandler>) {
        self.stack.push(handler);
    }

    /// Removes the top handler.
    ///
    /// # Errors
    ///
    /// Popping an empty stack is a bug in the caller. It returns
    /// [`Error::InvalidState`] and asserts in debug builds.
    pub fn pop(&mut self) -> Result<Box<dyn LineHandler>> {
        let handler = self.stack.pop();
        debug_assert!(handler.is_some(), "pop on an empty continuation stack");
        handler.ok_or_else(|| Error::InvalidState("continuation stack is empty".into()))
    }

    /// Returns true if no handler is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Number of installed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Name of the top handler.
    #[must_use]
    pub fn current(&self) -> Option<&'static str> {
        self.stack.last().map(|h| h.name())
    }

    /// Drops every handler.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Offers a line to the top handler and applies its answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the stack is empty.
    pub fn route(
        &mut self,
        line: &[u8],
        out: &mut dyn ResponseWriter,
    ) -> Result<Option<LineAction>> {
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| Error::InvalidState("no continuation handler installed".into()))?;
        match top.handle_line(line, out) {
            LineStep::Continue => Ok(None),
            LineStep::Push(handler) => {
                self.stack.push(handler);
                Ok(None)
            }
            LineStep::Replace(handler) => {
                *top = handler;
                Ok(None)
            }
            LineStep::Finish(action) => {
                self.stack.pop();
                Ok(action)
            }
        }
    }
}

impl std::fmt::Debug for ContinuationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stack.iter().map(|h| h.name()))
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
    use super::*;
    use crate::response::RecordingWriter;

    /// Echoes lines; `push`, `swap` and `end` drive the stack.
    struct Scripted(&'static str);

    impl LineHandler for Scripted {
        fn name(&self) -> &'static str {
            self.0
        }

        fn handle_line(&mut self, line: &[u8], out: &mut dyn ResponseWriter) -> LineStep {
            out.write_continuation(&format!("{} got {}", self.0, String::from_utf8_lossy(line)));
            match line {
                b"push" => LineStep::Push(Box::new(Scripted("inner"))),
                b"swap" => LineStep::Replace(Box::new(Scripted("swapped"))),
                b"end" => LineStep::Finish(None),
                _ => LineStep::Continue,
            }
        }
    }

    #[test]
    fn top_handler_receives_lines() {
        let mut router = ContinuationRouter::new();
        let mut out = RecordingWriter::new();
        router.push(Box::new(Scripted("outer")));

        router.route(b"hello", &mut out).unwrap();
        router.route(b"push", &mut out).unwrap();
        assert_eq!(router.len(), 2);
        router.route(b"x", &mut out).unwrap();
        router.route(b"swap", &mut out).unwrap();
        assert_eq!(router.current(), Some("swapped"));
        router.route(b"end", &mut out).unwrap();
        assert_eq!(router.current(), Some("outer"));
        router.route(b"end", &mut out).unwrap();
        assert!(router.is_empty());

        assert_eq!(
            out.lines(),
            vec![
                "+ outer got hello",
                "+ outer got push",
                "+ inner got x",
                "+ inner got swap",
                "+ swapped got end",
                "+ outer got end",
            ]
        );
    }

    #[test]
    fn routing_without_handler_is_an_error() {
        let mut router = ContinuationRouter::new();
        let err = router.route(b"DONE", &mut RecordingWriter::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "empty continuation stack"))]
    fn pop_on_empty_stack() {
        let mut router = ContinuationRouter::new();
        assert!(router.pop().is_err());
    }

    #[test]
    fn clear_drops_everything() {
        let mut router = ContinuationRouter::new();
        router.push(Box::new(Scripted("a")));
        router.push(Box::new(Scripted("b")));
        assert_eq!(format!("{router:?}"), "[\"a\", \"b\"]");
        router.clear();
        assert!(router.is_empty());
        assert!(router.current().is_none());
    }
}
