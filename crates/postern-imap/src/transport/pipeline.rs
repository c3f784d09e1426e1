//! Ordered chain of codec stages between the socket and the decoder.
//!
//! ```text
//!   socket ──► [0] ──► [1] ──► ... ──► [n-1] ──► decoder      (receive)
//!   socket ◄── [0] ◄── [1] ◄── ... ◄── [n-1] ◄── responses    (flush)
//! ```
//!
//! Index 0 is closest to the wire. Bytes a stage produces by itself are
//! encoded only by the stages below it.

use bytes::BytesMut;
use tracing::debug;

use super::Codec;
use crate::response::ResponseWriter;
use crate::{Error, Result};

/// Where a new stage goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Closest to the wire.
    Wire,
    /// Immediately after the named stage on the inbound path.
    After(&'static str),
}

/// Operations an upgrade needs from the transport.
pub trait TransportPipeline {
    /// Inserts a stage and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upgrade`] if the position cannot be resolved or a
    /// stage with the same name exists.
    fn insert_codec(&mut self, position: Position, codec: Box<dyn Codec>) -> Result<usize>;

    /// Holds inbound wire bytes undecoded until [`resume_reads`](Self::resume_reads).
    fn pause_reads(&mut self);

    /// Stops holding and decodes the held bytes through the current chain.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage rejects the held bytes.
    fn resume_reads(&mut self) -> Result<BytesMut>;

    /// Closes every stage, innermost first.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage cannot produce its closing bytes.
    fn close(&mut self) -> Result<()>;

    /// Response bytes written but not yet encoded.
    fn buffered_output(&self) -> &[u8];

    /// Encodes the buffered response bytes through the current chain.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage cannot encode.
    fn encode_output(&mut self) -> Result<()>;

    /// Takes the encoded bytes waiting for the socket.
    fn take_outbound(&mut self) -> BytesMut;

    /// Decodes `data` starting at stage `index` instead of the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage rejects the bytes.
    fn feed_stage(&mut self, index: usize, data: &[u8]) -> Result<BytesMut>;

    /// Number of stages.
    fn stage_count(&self) -> usize;
}

/// The transport chain of one connection.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Codec>>,
    app_out: BytesMut,
    wire_out: BytesMut,
    held: BytesMut,
    paused: bool,
}

impl Pipeline {
    /// Creates an empty, plaintext pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes wire bytes into application bytes.
    ///
    /// While reads are paused the bytes are held and nothing is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a stage rejects the input.
    pub fn receive(&mut self, wire: &[u8]) -> Result<BytesMut> {
        if self.paused {
            self.held.extend_from_slice(wire);
            return Ok(BytesMut::new());
        }
        self.run_inbound(0, wire)
    }

    /// Buffers application bytes for the next flush.
    pub fn write(&mut self, data: &[u8]) {
        self.app_out.extend_from_slice(data);
    }

    /// Returns true if a stage with this name is installed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name() == name)
    }

    /// Stage names, wire side first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns true while inbound bytes are being held.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns true if encoded bytes are waiting for the socket.
    #[must_use]
    pub fn has_outbound(&self) -> bool {
        !self.wire_out.is_empty()
    }

    fn run_inbound(&mut self, start: usize, input: &[u8]) -> Result<BytesMut> {
        let mut data = BytesMut::from(input);
        for index in start..self.stages.len() {
            let mut decoded = BytesMut::new();
            self.stages[index].decode(&data, &mut decoded)?;
            self.drain_stage(index)?;
            data = decoded;
        }
        Ok(data)
    }

    fn drain_stage(&mut self, index: usize) -> Result<()> {
        let mut produced = BytesMut::new();
        self.stages[index].poll_outbound(&mut produced)?;
        if !produced.is_empty() {
            let wire = self.encode_below(index, produced)?;
            self.wire_out.extend_from_slice(&wire);
        }
        Ok(())
    }

    fn encode_below(&mut self, index: usize, mut data: BytesMut) -> Result<BytesMut> {
        for stage in self.stages[..index].iter_mut().rev() {
            let mut encoded = BytesMut::new();
            stage.encode(&data, &mut encoded)?;
            data = encoded;
        }
        Ok(data)
    }
}

impl TransportPipeline for Pipeline {
    fn insert_codec(&mut self, position: Position, codec: Box<dyn Codec>) -> Result<usize> {
        if self.contains(codec.name()) {
            return Err(Error::Upgrade(format!("stage {} already installed", codec.name())));
        }
        let index = match position {
            Position::Wire => 0,
            Position::After(name) => {
                self.stages
                    .iter()
                    .position(|s| s.name() == name)
                    .ok_or_else(|| Error::Upgrade(format!("no stage named {name}")))?
                    + 1
            }
        };
        debug!(stage = codec.name(), index, "codec installed");
        self.stages.insert(index, codec);
        Ok(index)
    }

    fn pause_reads(&mut self) {
        self.paused = true;
    }

    fn resume_reads(&mut self) -> Result<BytesMut> {
        self.paused = false;
        let held = self.held.split();
        if held.is_empty() {
            return Ok(held);
        }
        self.run_inbound(0, &held)
    }

    fn close(&mut self) -> Result<()> {
        self.encode_output()?;
        for index in (0..self.stages.len()).rev() {
            let mut closing = BytesMut::new();
            self.stages[index].close(&mut closing)?;
            if !closing.is_empty() {
                let wire = self.encode_below(index, closing)?;
                self.wire_out.extend_from_slice(&wire);
            }
        }
        Ok(())
    }

    fn buffered_output(&self) -> &[u8] {
        &self.app_out
    }

    fn encode_output(&mut self) -> Result<()> {
        if self.app_out.is_empty() {
            return Ok(());
        }
        let data = self.app_out.split();
        let len = self.stages.len();
        let wire = self.encode_below(len, data)?;
        self.wire_out.extend_from_slice(&wire);
        Ok(())
    }

    fn take_outbound(&mut self) -> BytesMut {
        self.wire_out.split()
    }

    fn feed_stage(&mut self, index: usize, data: &[u8]) -> Result<BytesMut> {
        self.run_inbound(index, data)
    }

    fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl ResponseWriter for Pipeline {
    fn write_bytes(&mut self, data: &[u8]) {
        self.write(data);
    }

    fn flush(&mut self) -> Result<()> {
        self.encode_output()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("app_out", &self.app_out.len())
            .field("wire_out", &self.wire_out.len())
            .field("held", &self.held.len())
            .field("paused", &self.paused)
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
    use crate::transport::testing::Rot13;

    #[test]
    fn plaintext_pipeline_passes_bytes_through() {
        let mut pipeline = Pipeline::new();
        assert_eq!(&pipeline.receive(b"a1 NOOP\r\n").unwrap()[..], b"a1 NOOP\r\n");
        pipeline.write_untagged("OK");
        assert!(!pipeline.has_outbound());
        pipeline.flush().unwrap();
        assert_eq!(&pipeline.take_outbound()[..], b"* OK\r\n");
    }

    #[test]
    fn stages_apply_in_order() {
        let mut pipeline = Pipeline::new();
        pipeline.insert_codec(Position::Wire, Box::new(Rot13("outer"))).unwrap();
        pipeline
            .insert_codec(Position::After("outer"), Box::new(Rot13("inner")))
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["outer", "inner"]);

        // Two rotations cancel out.
        assert_eq!(&pipeline.receive(b"abc").unwrap()[..], b"abc");

        let err = pipeline
            .insert_codec(Position::After("missing"), Box::new(Rot13("x")))
            .unwrap_err();
        assert!(matches!(err, Error::Upgrade(_)));
        let err = pipeline
            .insert_codec(Position::Wire, Box::new(Rot13("outer")))
            .unwrap_err();
        assert!(matches!(err, Error::Upgrade(_)));
    }

    #[test]
    fn paused_reads_are_held_until_resume() {
        let mut pipeline = Pipeline::new();
        pipeline.pause_reads();
        assert!(pipeline.receive(b"nopq").unwrap().is_empty());
        pipeline.insert_codec(Position::Wire, Box::new(Rot13("rot"))).unwrap();
        assert_eq!(&pipeline.resume_reads().unwrap()[..], b"abcd");
        assert!(!pipeline.is_paused());
    }

    #[test]
    fn feed_stage_skips_outer_stages() {
        let mut pipeline = Pipeline::new();
        pipeline.insert_codec(Position::Wire, Box::new(Rot13("a"))).unwrap();
        pipeline.insert_codec(Position::After("a"), Box::new(Rot13("b"))).unwrap();
        assert_eq!(&pipeline.feed_stage(1, b"nop").unwrap()[..], b"abc");
    }
}
