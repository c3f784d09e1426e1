//! Per-connection protocol loop.
//!
//! A [`Connection`] owns the socket, the transport pipeline, the decoder and
//! the session. It processes one command to completion before decoding the
//! next one, including every batch of a FETCH.
//!
//! ```text
//! socket ─► Pipeline::receive ─► inbuf ─► decoder ─► dispatcher
//!   ▲                                                   │
//!   └──────────── Pipeline::take_outbound ◄── responses ┘
//! ```

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::Config;
use crate::dispatch::{CommandDispatcher, Context, Outcome, capabilities};
use crate::fetch::ChunkedResultProducer;
use crate::parser::{DecodeError, Decoded, DecoderLimits, IncrementalDecoder};
use crate::protocol::{LineAction, Session};
use crate::response::ResponseWriter;
use crate::store::{Authenticator, MailboxStore};
use crate::transport::{Pipeline, PipelineUpgrade, StagedUpgrade, TransportPipeline, UpgradeKind};
use crate::types::{ResponseCode, Status};
use crate::{Error, Result};

/// Size of a single socket read.
const READ_BUFFER_SIZE: usize = 8192;

/// Whether the loop keeps going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Next unit of client input.
enum Input {
    Command(Command),
    Line(Vec<u8>),
    Incomplete,
}

/// One client connection.
pub struct Connection<S, M: MailboxStore, A> {
    stream: S,
    pipeline: Pipeline,
    decoder: IncrementalDecoder,
    session: Session<M>,
    inbuf: BytesMut,
    store: Arc<M>,
    auth: Arc<A>,
    config: Arc<Config>,
}

impl<S, M, A> Connection<S, M, A>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    M: MailboxStore,
    A: Authenticator,
{
    /// Wraps an accepted stream.
    pub fn new(stream: S, store: Arc<M>, auth: Arc<A>, config: Arc<Config>) -> Self {
        Self {
            stream,
            pipeline: Pipeline::new(),
            decoder: IncrementalDecoder::new(DecoderLimits::from(config.as_ref())),
            session: Session::new(),
            inbuf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            store,
            auth,
            config,
        }
    }

    /// Runs the connection until the client leaves or a fatal error occurs.
    ///
    /// The session is logged out and the transport closed on every exit
    /// path.
    ///
    /// # Errors
    ///
    /// Returns transport errors and failed upgrades.
    pub async fn run(mut self) -> Result<()> {
        info!("connection opened");
        let result = self.serve().await;
        if let Err(e) = &result {
            error!(error = %e, "connection failed");
        }
        self.teardown().await;
        info!(state = %self.session.state(), "connection closed");
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let caps = capabilities(&self.session, &self.config);
        self.pipeline.write_status(
            Status::Ok,
            Some(&ResponseCode::Capability(caps)),
            &self.config.greeting,
        );

        loop {
            let input = self.next_input();
            while let Some(transmit) = self.decoder.poll_transmit() {
                self.pipeline.write_bytes(transmit.as_ref());
            }

            let flow = match input {
                Ok(Input::Command(command)) => {
                    let outcome = self.dispatch(command).await;
                    self.apply(outcome).await?
                }
                Ok(Input::Line(line)) => self.route(&line).await?,
                Ok(Input::Incomplete) => {
                    self.send().await?;
                    self.fill().await?
                }
                Err(e) => self.decode_failed(e),
            };
            if flow == Flow::Close {
                return Ok(());
            }
        }
    }

    fn next_input(&mut self) -> std::result::Result<Input, DecodeError> {
        if self.session.in_continuation() {
            return Ok(match self.decoder.decode_line(&self.inbuf)? {
                Decoded::Complete { value, consumed } => {
                    self.inbuf.advance(consumed);
                    Input::Line(value)
                }
                Decoded::Incomplete(_) => Input::Incomplete,
            });
        }
        Ok(match self.decoder.decode(&self.inbuf)? {
            Decoded::Complete { value, consumed } => {
                self.inbuf.advance(consumed);
                Input::Command(value)
            }
            Decoded::Incomplete(_) => Input::Incomplete,
        })
    }

    async fn dispatch(&mut self, command: Command) -> Outcome {
        let mut cx = Context {
            session: &mut self.session,
            store: self.store.as_ref(),
            auth: self.auth.as_ref(),
            config: &self.config,
            out: &mut self.pipeline,
        };
        CommandDispatcher::dispatch(&mut cx, command).await
    }

    async fn route(&mut self, line: &[u8]) -> Result<Flow> {
        let action = self
            .session
            .continuations()
            .route(line, &mut self.pipeline)?;
        match action {
            Some(action) => {
                let outcome = self.finish_line(action).await;
                self.apply(outcome).await
            }
            None => Ok(Flow::Continue),
        }
    }

    async fn finish_line(&mut self, action: LineAction) -> Outcome {
        let mut cx = Context {
            session: &mut self.session,
            store: self.store.as_ref(),
            auth: self.auth.as_ref(),
            config: &self.config,
            out: &mut self.pipeline,
        };
        CommandDispatcher::route_line(&mut cx, action).await
    }

    async fn apply(&mut self, outcome: Outcome) -> Result<Flow> {
        match outcome {
            Outcome::Done => Ok(Flow::Continue),
            Outcome::Close => Ok(Flow::Close),
            Outcome::Upgrade(staged) => {
                self.upgrade(staged).await?;
                Ok(Flow::Continue)
            }
            Outcome::Stream(producer) => {
                self.stream_results(producer).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn upgrade(&mut self, staged: StagedUpgrade) -> Result<()> {
        let kind = staged.kind();
        let mut upgrade = PipelineUpgrade::begin(&mut self.pipeline);
        let sealed = upgrade.seal()?;
        self.stream.write_all(&sealed).await?;
        self.stream.flush().await?;

        let unread = self.inbuf.split();
        self.inbuf = upgrade.commit(staged, &unread)?;
        self.decoder.reset();
        match kind {
            UpgradeKind::Tls => self.session.mark_tls_active(),
            UpgradeKind::Compression => self.session.mark_compression_active(),
        }
        info!(upgrade = kind.as_str(), "transport upgraded");
        Ok(())
    }

    async fn stream_results(&mut self, mut producer: ChunkedResultProducer) -> Result<()> {
        let Some(selected) = self.session.selected() else {
            warn!("fetch stream without a selected mailbox");
            producer.abandon();
            return Ok(());
        };
        let handle = selected.handle();
        while producer.has_more() {
            producer
                .produce_next(self.store.as_ref(), handle, &mut self.pipeline)
                .await;
            if let Err(e) = write_out(&mut self.stream, &mut self.pipeline).await {
                producer.abandon();
                return Err(e);
            }
        }
        Ok(())
    }

    fn decode_failed(&mut self, e: DecodeError) -> Flow {
        warn!(error = %e, "rejected client input");
        if e.is_fatal() {
            let text = fatal_text(&e);
            match e.tag() {
                Some(tag) => self.pipeline.write_tagged(tag, Status::Bad, None, text),
                None => self.pipeline.write_status(Status::Bye, None, text),
            }
            return Flow::Close;
        }

        let text = match &e {
            DecodeError::LiteralRejected { .. } => "Literal too large".to_string(),
            other => other.to_string(),
        };
        match e.tag() {
            Some(tag) => self.pipeline.write_tagged(tag, Status::Bad, None, &text),
            None => self.pipeline.write_status(Status::Bad, None, &text),
        }
        let skip = e.consumed().unwrap_or(0).min(self.inbuf.len());
        self.inbuf.advance(skip);
        self.decoder.reset();
        Flow::Continue
    }

    async fn send(&mut self) -> Result<()> {
        write_out(&mut self.stream, &mut self.pipeline).await
    }

    async fn fill(&mut self) -> Result<Flow> {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let read = tokio::time::timeout(self.config.idle_timeout, self.stream.read_buf(&mut buf));
        match read.await {
            Err(_) => {
                info!(timeout = ?self.config.idle_timeout, "idle timeout");
                self.pipeline
                    .write_status(Status::Bye, None, "Autologout; idle for too long");
                Ok(Flow::Close)
            }
            Ok(Ok(0)) => {
                debug!("peer closed the connection");
                Ok(Flow::Close)
            }
            Ok(Ok(_)) => {
                let plaintext = self.pipeline.receive(&buf)?;
                self.inbuf.extend_from_slice(&plaintext);
                Ok(Flow::Continue)
            }
            Ok(Err(e)) => Err(Error::Io(e)),
        }
    }

    async fn teardown(&mut self) {
        self.session.logout(self.store.as_ref());
        if let Err(e) = self.pipeline.close() {
            debug!(error = %e, "transport close failed");
        }
        let pending = self.pipeline.take_outbound();
        if !pending.is_empty()
            && let Err(e) = self.stream.write_all(&pending).await
        {
            debug!(error = %e, "final write failed");
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "socket shutdown failed");
        }
    }
}

impl<S, M: MailboxStore, A> std::fmt::Debug for Connection<S, M, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pipeline", &self.pipeline)
            .field("session", &self.session)
            .field("inbuf", &self.inbuf.len())
            .finish_non_exhaustive()
    }
}

const fn fatal_text(e: &DecodeError) -> &'static str {
    match e {
        DecodeError::LineTooLong { .. } => "Command line too long",
        _ => "Literal too large",
    }
}

/// Encodes buffered responses and writes them to the socket.
async fn write_out<S: AsyncWrite + Unpin>(stream: &mut S, pipeline: &mut Pipeline) -> Result<()> {
    pipeline.flush()?;
    let wire = pipeline.take_outbound();
    if wire.is_empty() {
        return Ok(());
    }
    stream.write_all(&wire).await?;
    stream.flush().await?;
    Ok(())
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
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::store::MemoryStore;

    const GREETING: &[u8] = b"* OK [CAPABILITY IMAP4rev1 LITERAL+ SASL-IR IDLE UNSELECT \
        AUTH=PLAIN AUTH=LOGIN COMPRESS=DEFLATE] Postern IMAP4rev1 ready\r\n";

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.add_user("alice", "secret");
        store.create_mailbox("INBOX");
        Arc::new(store)
    }

    fn connection<S>(stream: S, config: Config) -> Connection<S, MemoryStore, MemoryStore>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let store = store();
        Connection::new(stream, Arc::clone(&store), store, Arc::new(config))
    }

    #[tokio::test]
    async fn greets_and_logs_out() {
        let mock = Builder::new()
            .write(GREETING)
            .read(b"a1 NOOP\r\n")
            .write(b"a1 OK NOOP completed\r\n")
            .read(b"a2 LOGOUT\r\n")
            .write(b"* BYE Logging out\r\na2 OK LOGOUT completed\r\n")
            .build();
        connection(mock, Config::new()).run().await.unwrap();
    }

    #[tokio::test]
    async fn pipelined_commands_answer_in_order() {
        let mock = Builder::new()
            .write(GREETING)
            .read(b"a1 NOOP\r\na2 XYZZY\r\na3 LOGOUT\r\n")
            .write(b"a1 OK NOOP completed\r\na2 BAD Unknown command\r\n")
            .write(b"* BYE Logging out\r\na3 OK LOGOUT completed\r\n")
            .build();
        connection(mock, Config::new()).run().await.unwrap();
    }

    #[tokio::test]
    async fn synchronizing_literal_gets_continuation() {
        let mock = Builder::new()
            .write(GREETING)
            .read(b"a1 LOGIN alice {6}\r\n")
            .write(b"+ Ready for literal data\r\n")
            .read(b"secret\r\n")
            .write(
                b"a1 OK [CAPABILITY IMAP4rev1 LITERAL+ SASL-IR IDLE UNSELECT \
                  AUTH=PLAIN AUTH=LOGIN COMPRESS=DEFLATE] LOGIN completed\r\n",
            )
            .build();
        connection(mock, Config::new()).run().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_literal_is_refused_and_skipped() {
        let config = Config::builder().max_literal_size(4).build();
        let mock = Builder::new()
            .write(GREETING)
            .read(b"a1 LOGIN alice {600}\r\na2 NOOP\r\n")
            .write(b"a1 BAD Literal too large\r\na2 OK NOOP completed\r\n")
            .build();
        connection(mock, config).run().await.unwrap();
    }

    #[tokio::test]
    async fn overlong_line_ends_the_connection() {
        let config = Config::builder().max_line_length(16).build();
        let mock = Builder::new()
            .write(GREETING)
            .read(b"a1 NOOP NOOP NOOP NOOP NOOP\r\na2 NOOP\r\n")
            .write(b"a1 BAD Command line too long\r\n")
            .build();
        connection(mock, config).run().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_client_is_logged_out() {
        let config = Config::builder()
            .idle_timeout(Duration::from_secs(60))
            .build();
        let mock = Builder::new()
            .write(GREETING)
            .wait(Duration::from_secs(120))
            .write(b"* BYE Autologout; idle for too long\r\n")
            .build();
        connection(mock, config).run().await.unwrap();
    }
}
