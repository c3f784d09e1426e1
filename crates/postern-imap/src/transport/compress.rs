//! COMPRESS=DEFLATE stage (RFC 4978).
//!
//! Both directions are raw deflate streams without a zlib header. Every
//! encoded chunk ends with a sync flush so the client can decode each
//! response as soon as it arrives.

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::Codec;
use crate::{Error, Result};

/// Name of the DEFLATE stage.
pub const DEFLATE_STAGE: &str = "deflate";

const CHUNK: usize = 8192;

/// Raw deflate in both directions.
pub struct DeflateCodec {
    deflate: Compress,
    inflate: Decompress,
}

impl DeflateCodec {
    /// Creates a stage with the default compression level.
    #[must_use]
    pub fn new() -> Self {
        Self {
            deflate: Compress::new(Compression::default(), false),
            inflate: Decompress::new(false),
        }
    }
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self::new()
    }
}

// Counter deltas are bounded by the slice lengths passed in.
#[allow(clippy::cast_possible_truncation)]
const fn delta(after: u64, before: u64) -> usize {
    (after - before) as usize
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        DEFLATE_STAGE
    }

    fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut rest = input;
        let mut buf = [0u8; CHUNK];
        loop {
            let (in_before, out_before) = (self.inflate.total_in(), self.inflate.total_out());
            let status = self
                .inflate
                .decompress(rest, &mut buf, FlushDecompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let consumed = delta(self.inflate.total_in(), in_before);
            let produced = delta(self.inflate.total_out(), out_before);
            out.extend_from_slice(&buf[..produced]);
            rest = &rest[consumed..];

            if status == Status::StreamEnd
                || (consumed == 0 && produced == 0)
                || (rest.is_empty() && produced < CHUNK)
            {
                return Ok(());
            }
        }
    }

    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        let mut rest = input;
        let mut buf = [0u8; CHUNK];
        loop {
            let (in_before, out_before) = (self.deflate.total_in(), self.deflate.total_out());
            self.deflate
                .compress(rest, &mut buf, FlushCompress::Sync)
                .map_err(|e| Error::Compression(e.to_string()))?;
            let consumed = delta(self.deflate.total_in(), in_before);
            let produced = delta(self.deflate.total_out(), out_before);
            out.extend_from_slice(&buf[..produced]);
            rest = &rest[consumed..];

            if (rest.is_empty() && produced < CHUNK) || (consumed == 0 && produced == 0) {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for DeflateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateCodec")
            .field("total_in", &self.inflate.total_in())
            .field("total_out", &self.deflate.total_out())
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

    #[test]
    fn each_chunk_is_decodable_on_arrival() {
        let mut server = DeflateCodec::new();
        let mut client = DeflateCodec::new();

        for line in ["* OK first\r\n", "a1 OK second\r\n"] {
            let mut wire = BytesMut::new();
            server.encode(line.as_bytes(), &mut wire).unwrap();
            assert!(wire.ends_with(&[0x00, 0x00, 0xff, 0xff]));

            let mut plain = BytesMut::new();
            client.decode(&wire, &mut plain).unwrap();
            assert_eq!(&plain[..], line.as_bytes());
        }
    }

    #[test]
    fn large_payload_survives_chunking() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut server = DeflateCodec::new();
        let mut client = DeflateCodec::new();

        let mut wire = BytesMut::new();
        server.encode(&payload, &mut wire).unwrap();
        let mut plain = BytesMut::new();
        for piece in wire.chunks(1000) {
            client.decode(piece, &mut plain).unwrap();
        }
        assert_eq!(plain.len(), payload.len());
        assert_eq!(&plain[..], &payload[..]);
    }

    #[test]
    fn garbage_is_an_error() {
        let mut codec = DeflateCodec::new();
        let err = codec.decode(&[0xff; 32], &mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, Error::Compression(_)));
    }

    #[test]
    fn empty_encode_emits_nothing() {
        let mut codec = DeflateCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(b"", &mut wire).unwrap();
        assert!(wire.is_empty());
    }
}
