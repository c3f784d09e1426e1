//! Transport codec chain.
//!
//! A connection starts as plaintext. STARTTLS inserts a [`TlsCodec`] on
//! the wire side, COMPRESS inserts a [`DeflateCodec`] inside it. Both go
//! through [`PipelineUpgrade`] so the switch happens exactly between the
//! tagged OK and the client's next byte.

mod codec;
mod compress;
mod pipeline;
mod tls;
mod upgrade;

pub use codec::Codec;
pub use compress::{DEFLATE_STAGE, DeflateCodec};
pub use pipeline::{Pipeline, Position, TransportPipeline};
pub use tls::{TLS_STAGE, TlsCodec};
pub use upgrade::{PendingUpgrade, PipelineUpgrade, StagedUpgrade, UpgradeKind};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex, PoisonError};

    use bytes::BytesMut;

    use super::Codec;
    use crate::Result;

    fn rotate(input: &[u8], out: &mut BytesMut) {
        out.extend(input.iter().map(|&b| match b {
            b'a'..=b'z' => (b - b'a' + 13) % 26 + b'a',
            b'A'..=b'Z' => (b - b'A' + 13) % 26 + b'A',
            other => other,
        }));
    }

    /// Rotates letters by 13 in both directions.
    pub struct Rot13(pub &'static str);

    impl Codec for Rot13 {
        fn name(&self) -> &'static str {
            self.0
        }

        fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
            rotate(input, out);
            Ok(())
        }

        fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
            rotate(input, out);
            Ok(())
        }
    }

    /// Passes bytes through and records what it encoded.
    pub struct Observer {
        name: &'static str,
        seen: Seen,
    }

    #[derive(Clone, Default)]
    pub struct Seen(Arc<Mutex<Vec<u8>>>);

    impl Seen {
        pub fn encoded(&self) -> Vec<u8> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    impl Observer {
        pub fn new(name: &'static str) -> (Self, Seen) {
            let seen = Seen::default();
            (
                Self {
                    name,
                    seen: seen.clone(),
                },
                seen,
            )
        }
    }

    impl Codec for Observer {
        fn name(&self) -> &'static str {
            self.name
        }

        fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
            out.extend_from_slice(input);
            Ok(())
        }

        fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
            self.seen
                .0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(input);
            out.extend_from_slice(input);
            Ok(())
        }
    }
}
