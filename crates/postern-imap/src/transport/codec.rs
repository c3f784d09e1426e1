//! The codec stage interface.

use bytes::BytesMut;

use crate::Result;

/// One stage of the transport chain.
///
/// A stage turns bytes from the stage below it (towards the wire) into
/// bytes for the stage above it, and back. Stages are sans-I/O: they only
/// move bytes between buffers.
pub trait Codec: Send {
    /// Stage name, unique within a pipeline.
    fn name(&self) -> &'static str;

    /// Decodes inbound bytes, appending the result to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is corrupt.
    fn decode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()>;

    /// Encodes outbound bytes, appending the result to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage cannot encode.
    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()>;

    /// Moves bytes the stage produced on its own, such as handshake
    /// records, into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage cannot produce them.
    fn poll_outbound(&mut self, _out: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    /// Produces the stage's closing bytes, if it has any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage cannot produce them.
    fn close(&mut self, _out: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}
