//! Server-side TLS stage on top of a rustls [`ServerConnection`].

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::BytesMut;
use rustls::{ServerConfig, ServerConnection};

use super::Codec;
use crate::Result;

/// Name of the TLS stage.
pub const TLS_STAGE: &str = "tls";

/// TLS record layer.
pub struct TlsCodec {
    conn: ServerConnection,
}

impl TlsCodec {
    /// Creates a TLS server session.
    ///
    /// # Errors
    ///
    /// Returns an error if rustls rejects the configuration.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self> {
        Ok(Self {
            conn: ServerConnection::new(config)?,
        })
    }

    /// Returns true until the handshake has completed.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn write_records(&mut self, out: &mut BytesMut) -> Result<()> {
        let mut records = Vec::new();
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut records)? == 0 {
                break;
            }
        }
        out.extend_from_slice(&records);
        Ok(())
    }
}

impl Codec for TlsCodec {
    fn name(&self) -> &'static str {
        TLS_STAGE
    }

    fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut rest = input;
        let mut buf = [0u8; 8192];
        while !rest.is_empty() {
            if self.conn.read_tls(&mut rest)? == 0 {
                break;
            }
            self.conn.process_new_packets()?;

            loop {
                match self.conn.reader().read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        if !input.is_empty() {
            self.conn.writer().write_all(input)?;
        }
        self.write_records(out)
    }

    fn poll_outbound(&mut self, out: &mut BytesMut) -> Result<()> {
        self.write_records(out)
    }

    fn close(&mut self, out: &mut BytesMut) -> Result<()> {
        self.conn.send_close_notify();
        self.write_records(out)
    }
}

impl std::fmt::Debug for TlsCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCodec")
            .field("handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}
