//! Command dispatch.
//!
//! [`CommandDispatcher::dispatch`] routes a decoded [`Command`] to its
//! handler after checking that the session state allows it. Handlers
//! write every response through the context's [`ResponseWriter`] and tell
//! the connection what to do next with an [`Outcome`].
//!
//! | Allowed in | Commands |
//! |---|---|
//! | any state | CAPABILITY, NOOP, LOGOUT |
//! | not authenticated | STARTTLS, LOGIN, AUTHENTICATE |
//! | authenticated | SELECT, EXAMINE, LIST, APPEND, IDLE, COMPRESS |
//! | selected | CHECK, CLOSE, UNSELECT, FETCH, SEARCH |

mod any;
mod auth;
mod mailbox;
mod message;
mod upgrade;

use tracing::debug;

use crate::command::{Command, CommandBody};
use crate::config::Config;
use crate::fetch::ChunkedResultProducer;
use crate::protocol::{LineAction, Session, SessionState};
use crate::response::ResponseWriter;
use crate::sasl;
use crate::store::{Authenticator, MailboxStore};
use crate::transport::StagedUpgrade;
use crate::types::{Capability, Status, Tag};

/// Everything a handler may touch.
pub struct Context<'a, M: MailboxStore, A: Authenticator> {
    /// Session of the connection.
    pub session: &'a mut Session<M>,
    /// Mailbox storage.
    pub store: &'a M,
    /// Credential verification.
    pub auth: &'a A,
    /// Server configuration.
    pub config: &'a Config,
    /// Response sink.
    pub out: &'a mut (dyn ResponseWriter + Send),
}

/// What the connection does after a command.
#[derive(Debug)]
pub enum Outcome {
    /// The command is complete.
    Done,
    /// The tagged OK is buffered; install this upgrade before reading on.
    Upgrade(StagedUpgrade),
    /// Drive this producer until it has written the tagged completion.
    Stream(ChunkedResultProducer),
    /// Flush and close the connection.
    Close,
}

/// States in which a command is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Any,
    NotAuthenticated,
    Authenticated,
    Selected,
}

impl Requirement {
    const fn of(body: &CommandBody) -> Self {
        match body {
            CommandBody::Capability
            | CommandBody::Noop
            | CommandBody::Logout
            | CommandBody::Unknown { .. } => Self::Any,
            CommandBody::StartTls
            | CommandBody::Login { .. }
            | CommandBody::Authenticate { .. } => Self::NotAuthenticated,
            CommandBody::Select { .. }
            | CommandBody::Examine { .. }
            | CommandBody::List { .. }
            | CommandBody::Append { .. }
            | CommandBody::Idle
            | CommandBody::Compress { .. } => Self::Authenticated,
            CommandBody::Check
            | CommandBody::Close
            | CommandBody::Unselect
            | CommandBody::Fetch { .. }
            | CommandBody::Search { .. } => Self::Selected,
        }
    }

    const fn allows(self, state: SessionState) -> bool {
        match self {
            Self::Any => !matches!(state, SessionState::LoggedOut),
            Self::NotAuthenticated => matches!(state, SessionState::NotAuthenticated),
            Self::Authenticated => state.is_authenticated(),
            Self::Selected => state.is_selected(),
        }
    }
}

/// Routes commands and deferred line actions to their handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Handles one command.
    pub async fn dispatch<M, A>(cx: &mut Context<'_, M, A>, command: Command) -> Outcome
    where
        M: MailboxStore,
        A: Authenticator,
    {
        let Command { tag, body } = command;
        let state = cx.session.state();
        debug!(tag = %tag, command = body.name(), %state, "dispatching");

        if !Requirement::of(&body).allows(state) {
            cx.out.write_tagged(
                &tag,
                Status::Bad,
                None,
                &format!("Command not valid in {state} state"),
            );
            return Outcome::Done;
        }

        match body {
            CommandBody::Capability => any::capability(cx, &tag),
            CommandBody::Noop => any::noop(cx, &tag, "NOOP"),
            CommandBody::Check => any::noop(cx, &tag, "CHECK"),
            CommandBody::Logout => any::logout(cx, &tag),
            CommandBody::StartTls => upgrade::starttls(cx, &tag),
            CommandBody::Compress { mechanism } => upgrade::compress(cx, &tag, &mechanism),
            CommandBody::Login { username, password } => {
                auth::login(cx, &tag, username, &password).await
            }
            CommandBody::Authenticate {
                mechanism,
                initial_response,
            } => auth::authenticate(cx, &tag, &mechanism, initial_response.as_deref()).await,
            CommandBody::Select { mailbox } => mailbox::select(cx, &tag, mailbox, false).await,
            CommandBody::Examine { mailbox } => mailbox::select(cx, &tag, mailbox, true).await,
            CommandBody::Close => mailbox::close(cx, &tag, "CLOSE"),
            CommandBody::Unselect => mailbox::close(cx, &tag, "UNSELECT"),
            CommandBody::List { reference, pattern } => {
                mailbox::list(cx, &tag, &reference, &pattern).await
            }
            CommandBody::Append {
                mailbox,
                flags,
                date,
                message,
            } => mailbox::append(cx, &tag, &mailbox, flags, date.as_deref(), message).await,
            CommandBody::Fetch {
                sequence_set,
                items,
                uid,
            } => message::fetch(cx, tag, &sequence_set, &items, uid).await,
            CommandBody::Search { criteria, uid } => {
                message::search(cx, &tag, &criteria, uid).await
            }
            CommandBody::Idle => message::idle(cx, tag),
            CommandBody::Unknown { name } => {
                debug!(tag = %tag, command = %name, "unknown command");
                cx.out.write_tagged(&tag, Status::Bad, None, "Unknown command");
                Outcome::Done
            }
        }
    }

    /// Completes the work a finished continuation handler deferred.
    pub async fn route_line<M, A>(cx: &mut Context<'_, M, A>, action: LineAction) -> Outcome
    where
        M: MailboxStore,
        A: Authenticator,
    {
        match action {
            LineAction::Authenticate {
                tag,
                user,
                password,
            } => auth::verify(cx, &tag, user, &password, "AUTHENTICATE").await,
        }
    }
}

/// Capabilities advertised to a session in its current state.
#[must_use]
pub fn capabilities<M: MailboxStore>(session: &Session<M>, config: &Config) -> Vec<Capability> {
    let mut caps = vec![
        Capability::Imap4Rev1,
        Capability::LiteralPlus,
        Capability::SaslIr,
        Capability::Idle,
        Capability::Unselect,
    ];
    if config.tls_available() && !session.tls_active() {
        caps.push(Capability::StartTls);
    }
    if plaintext_refused(session, config) {
        caps.push(Capability::LoginDisabled);
    }
    caps.extend(
        sasl::MECHANISMS
            .iter()
            .map(|m| Capability::Auth(m.as_str().to_string())),
    );
    if config.compression && !session.compression_active() {
        caps.push(Capability::Compress("DEFLATE".to_string()));
    }
    caps
}

/// Returns true if credentials must not be accepted on this transport.
const fn plaintext_refused<M: MailboxStore>(session: &Session<M>, config: &Config) -> bool {
    !config.allow_plaintext_auth && !session.tls_active()
}

fn bad(out: &mut (dyn ResponseWriter + Send), tag: &Tag, text: &str) -> Outcome {
    out.write_tagged(tag, Status::Bad, None, text);
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
pub(crate) mod testing {
    use super::*;
    use crate::parser::parse_command;
    use crate::response::RecordingWriter;
    use crate::store::MemoryStore;
    use crate::types::Flags;

    /// A session, store and recorder wired together for handler tests.
    pub struct Harness {
        pub session: Session<MemoryStore>,
        pub store: MemoryStore,
        pub config: Config,
        pub out: RecordingWriter,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(Config::new())
        }

        pub fn with_config(config: Config) -> Self {
            let store = MemoryStore::new();
            store.add_user("alice", "secret");
            store.create_mailbox("INBOX");
            store.create_mailbox("Archive");
            Self {
                session: Session::new(),
                store,
                config,
                out: RecordingWriter::new(),
            }
        }

        pub fn add_messages(&self, count: usize) {
            for i in 0..count {
                let content = format!(
                    "From: Bob <bob@example.com>\r\nSubject: message {i}\r\n\r\nBody {i}\r\n"
                );
                self.store.insert_message("INBOX", content, Flags::new());
            }
        }

        /// Parses and dispatches one command line.
        pub async fn run(&mut self, line: &str) -> Outcome {
            let command = parse_command(line.as_bytes()).unwrap();
            let mut cx = Context {
                session: &mut self.session,
                store: &self.store,
                auth: &self.store,
                config: &self.config,
                out: &mut self.out,
            };
            CommandDispatcher::dispatch(&mut cx, command).await
        }

        /// Routes a line to the continuation stack and runs any deferred action.
        pub async fn line(&mut self, line: &str) -> Outcome {
            let action = self
                .session
                .continuations()
                .route(line.as_bytes(), &mut self.out)
                .unwrap();
            match action {
                Some(action) => {
                    let mut cx = Context {
                        session: &mut self.session,
                        store: &self.store,
                        auth: &self.store,
                        config: &self.config,
                        out: &mut self.out,
                    };
                    CommandDispatcher::route_line(&mut cx, action).await
                }
                None => Outcome::Done,
            }
        }

        /// Drives a streaming outcome to completion.
        pub async fn drain(&mut self, outcome: Outcome) {
            if let Outcome::Stream(mut producer) = outcome {
                let handle = self.session.selected().unwrap().handle();
                while producer.has_more() {
                    producer.produce_next(&self.store, handle, &mut self.out).await;
                }
            }
        }

        pub async fn login(&mut self) {
            self.run("l LOGIN alice secret\r\n").await;
            self.out.take();
        }

        pub async fn select_inbox(&mut self) {
            self.login().await;
            self.run("s SELECT INBOX\r\n").await;
            self.out.take();
        }

        pub fn lines(&mut self) -> Vec<String> {
            let lines = self.out.lines();
            self.out.take();
            lines
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
    use super::testing::Harness;
    use super::*;

    #[tokio::test]
    async fn wrong_state_is_bad_and_changes_nothing() {
        let mut h = Harness::new();
        h.run("a1 SELECT INBOX\r\n").await;
        h.run("a2 FETCH 1 FLAGS\r\n").await;
        assert_eq!(
            h.lines(),
            vec![
                "a1 BAD Command not valid in not authenticated state",
                "a2 BAD Command not valid in not authenticated state",
            ]
        );
        assert_eq!(h.session.state(), SessionState::NotAuthenticated);

        h.login().await;
        h.run("a3 LOGIN alice secret\r\n").await;
        assert_eq!(h.lines(), vec!["a3 BAD Command not valid in authenticated state"]);
    }

    #[tokio::test]
    async fn unknown_command_is_bad() {
        let mut h = Harness::new();
        h.run("a1 XYZZY\r\n").await;
        assert_eq!(h.lines(), vec!["a1 BAD Unknown command"]);
    }

    #[tokio::test]
    async fn capability_list_follows_session() {
        let mut h = Harness::with_config(Config::builder().allow_plaintext_auth(false).build());
        let caps = capabilities(&h.session, &h.config);
        assert!(caps.contains(&Capability::LoginDisabled));
        assert!(!caps.contains(&Capability::StartTls));
        assert!(caps.contains(&Capability::Compress("DEFLATE".into())));

        h.session.mark_tls_active();
        h.session.mark_compression_active();
        let caps = capabilities(&h.session, &h.config);
        assert!(!caps.contains(&Capability::LoginDisabled));
        assert!(!caps.contains(&Capability::Compress("DEFLATE".into())));
        assert!(caps.contains(&Capability::Auth("PLAIN".into())));
    }
}
