//! Shared helpers for the integration tests.
//!
//! A server [`Connection`] runs in a task on one half of an in-memory
//! duplex pipe; the test drives the other half with [`TestClient`].

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

use postern_imap::transport::{Codec, DeflateCodec};
use postern_imap::{Config, Connection, Flags, MemoryStore};

/// How long a test waits for the server before failing.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes server logs to the test output. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store with user `bob` and the mailboxes INBOX and Archive.
pub fn store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.add_user("bob", "secret");
    store.create_mailbox("INBOX");
    store.create_mailbox("Archive");
    Arc::new(store)
}

/// Appends `count` small messages to INBOX.
pub fn add_messages(store: &MemoryStore, count: usize) {
    for i in 1..=count {
        let content = format!(
            "From: Alice <alice@example.com>\r\nTo: bob@example.com\r\n\
             Subject: note {i}\r\nDate: Mon, 7 Feb 1994 21:52:25 -0800\r\n\r\nBody of note {i}\r\n"
        );
        store.insert_message("INBOX", content, Flags::new());
    }
}

/// Starts a connection task and returns the client end of its pipe.
pub fn spawn_server(
    store: Arc<MemoryStore>,
    config: Config,
) -> (DuplexStream, JoinHandle<postern_imap::Result<()>>) {
    init_tracing();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let connection = Connection::new(server, Arc::clone(&store), store, Arc::new(config));
    (client, tokio::spawn(connection.run()))
}

/// Line-oriented IMAP client for tests.
pub struct TestClient<S> {
    stream: S,
    inbuf: BytesMut,
    deflate: Option<DeflateCodec>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            inbuf: BytesMut::new(),
            deflate: None,
        }
    }

    /// Compresses everything sent and inflates everything received from now on.
    pub fn enable_compression(&mut self) {
        assert!(self.inbuf.is_empty(), "uncompressed bytes still buffered");
        self.deflate = Some(DeflateCodec::new());
    }

    pub async fn send(&mut self, data: &str) {
        match self.deflate.as_mut() {
            Some(codec) => {
                let mut wire = BytesMut::new();
                codec.encode(data.as_bytes(), &mut wire).unwrap();
                self.stream.write_all(&wire).await.unwrap();
            }
            None => self.stream.write_all(data.as_bytes()).await.unwrap(),
        }
        self.stream.flush().await.unwrap();
    }

    /// Reads one line, CRLF excluded.
    pub async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.inbuf.windows(2).position(|w| w == b"\r\n") {
                let line = String::from_utf8_lossy(&self.inbuf[..pos]).into_owned();
                self.inbuf.advance(pos + 2);
                return line;
            }
            let mut chunk = BytesMut::with_capacity(8192);
            let n = tokio::time::timeout(RESPONSE_TIMEOUT, self.stream.read_buf(&mut chunk))
                .await
                .expect("timed out waiting for the server")
                .unwrap();
            assert!(n > 0, "server closed the connection");
            match self.deflate.as_mut() {
                Some(codec) => codec.decode(&chunk, &mut self.inbuf).unwrap(),
                None => self.inbuf.extend_from_slice(&chunk),
            }
        }
    }

    /// Reads lines up to and including the one tagged `tag`.
    pub async fn read_until(&mut self, tag: &str) -> Vec<String> {
        let prefix = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let done = line.starts_with(&prefix);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    /// Sends a command and returns its responses.
    pub async fn command(&mut self, tag: &str, command: &str) -> Vec<String> {
        self.send(&format!("{tag} {command}\r\n")).await;
        self.read_until(tag).await
    }

    /// Reads until the server closes the connection.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = self.inbuf.split().to_vec();
        tokio::time::timeout(RESPONSE_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        rest
    }

    /// Returns the stream and any bytes read past the last line.
    pub fn into_inner(self) -> (S, BytesMut) {
        (self.stream, self.inbuf)
    }
}

/// A stream that copies every byte it reads into a shared buffer.
pub struct Recorder<S> {
    inner: S,
    seen: Arc<Mutex<Vec<u8>>>,
}

impl<S> Recorder<S> {
    pub fn new(inner: S) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Self {
            inner,
            seen: Arc::clone(&seen),
        };
        (recorder, seen)
    }
}

/// Snapshot of the bytes a [`Recorder`] has seen.
pub fn seen(seen: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
    seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

impl<S: AsyncRead + Unpin> AsyncRead for Recorder<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(fresh);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Recorder<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
