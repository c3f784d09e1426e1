//! TCP accept loop.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span};

use super::Connection;
use crate::Result;
use crate::config::Config;
use crate::store::{Authenticator, MailboxStore};

/// Pause after a failed accept, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and runs each one in its own task.
pub struct Server<M, A> {
    store: Arc<M>,
    auth: Arc<A>,
    config: Arc<Config>,
}

impl<M, A> Server<M, A>
where
    M: MailboxStore + 'static,
    A: Authenticator + 'static,
{
    /// Creates a server over shared storage and credentials.
    pub fn new(store: Arc<M>, auth: Arc<A>, config: Config) -> Self {
        Self {
            store,
            auth,
            config: Arc::new(config),
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serves clients until the listener becomes unusable.
    ///
    /// Errors from individual connections, and transient accept failures
    /// such as an aborted handshake or descriptor exhaustion, are logged and
    /// do not stop the loop.
    ///
    /// # Errors
    ///
    /// Returns the error that made the listener unusable.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "accepting IMAP connections");
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) if listener_is_broken(&e) => {
                    error!(error = %e, "listener failed");
                    return Err(e.into());
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = socket.set_nodelay(true) {
                error!(%peer, error = %e, "cannot disable Nagle");
            }
            let connection = Connection::new(
                socket,
                Arc::clone(&self.store),
                Arc::clone(&self.auth),
                Arc::clone(&self.config),
            );
            tokio::spawn(
                async move {
                    // Failures are already logged inside the span.
                    let _ = connection.run().await;
                }
                .instrument(info_span!("imap", %peer)),
            );
        }
    }
}

impl<M, A> std::fmt::Debug for Server<M, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether an accept error means the listening socket itself is unusable.
///
/// Everything else (aborted or reset handshakes, `EMFILE`, `ENOBUFS`) is
/// specific to one pending connection or to momentary resource pressure.
fn listener_is_broken(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    )
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

    #[test]
    fn test_per_connection_accept_errors_are_transient() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
            io::ErrorKind::WouldBlock,
            io::ErrorKind::TimedOut,
        ] {
            assert!(!listener_is_broken(&io::Error::from(kind)), "{kind:?}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_is_transient() {
        // EMFILE and ENFILE on Linux and the BSDs
        assert!(!listener_is_broken(&io::Error::from_raw_os_error(24)));
        assert!(!listener_is_broken(&io::Error::from_raw_os_error(23)));
    }

    #[test]
    fn test_invalid_listener_is_fatal() {
        assert!(listener_is_broken(&io::Error::from(io::ErrorKind::InvalidInput)));
        assert!(listener_is_broken(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_serve_accepts_after_a_client_hangs_up() {
        let store = Arc::new(crate::MemoryStore::new());
        let server = Server::new(Arc::clone(&store), store, Config::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move { server.serve(listener).await });

        drop(tokio::net::TcpStream::connect(addr).await.unwrap());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut stream, &mut greeting)
            .await
            .unwrap();
        assert_eq!(&greeting, b"* OK");
        assert!(!task.is_finished());
        task.abort();
    }
}
