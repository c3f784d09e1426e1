//! FETCH result streaming.
//!
//! The requested sequence set is resolved and split into [`ResultBatch`]es
//! lazily by [`Batches`]. [`ChunkedResultProducer`] asks the store for one
//! batch at a time and turns each message into a [`FetchResponse`] with a
//! [`FetchResponseBuilder`].

mod batch;
mod build;
mod envelope;
pub mod message;
mod producer;

pub use batch::{Batches, ResultBatch};
pub use build::{BuildError, FetchResponse, FetchResponseBuilder, FetchValue};
pub use envelope::{Address, Envelope, EnvelopeError};
pub use producer::ChunkedResultProducer;
