//! In-band transport upgrades: STARTTLS and COMPRESS.
//!
//! The tagged OK that accepts an upgrade is encoded by the old chain, and
//! the first byte the client sends afterwards is decoded by the new one.
//! [`PipelineUpgrade`] enforces that ordering:
//!
//! 1. [`begin`](PipelineUpgrade::begin) pauses reads.
//! 2. [`seal`](PipelineUpgrade::seal) encodes the buffered responses
//!    through the current chain and returns the wire bytes to send.
//! 3. [`commit`](PipelineUpgrade::commit) installs the new stage, moves
//!    already-decoded but unread bytes into it and resumes reads.
//!
//! Dropping an upgrade without committing resumes reads on the old chain.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::{info, warn};

use super::compress::DeflateCodec;
use super::pipeline::{Position, TransportPipeline};
use super::tls::{TLS_STAGE, TlsCodec};
use super::Codec;
use crate::{Error, Result};

/// Kind of transport upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeKind {
    /// STARTTLS.
    Tls,
    /// COMPRESS=DEFLATE.
    Compression,
}

impl UpgradeKind {
    /// Name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tls => "tls",
            Self::Compression => "deflate",
        }
    }
}

/// An upgrade accepted by a command handler, before its codec exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpgrade {
    /// What to install.
    pub kind: UpgradeKind,
    /// `None` for the wire side, otherwise the stage to insert after.
    pub insertion_point: Option<&'static str>,
}

impl PendingUpgrade {
    /// STARTTLS on a plaintext chain.
    #[must_use]
    pub const fn starttls() -> Self {
        Self {
            kind: UpgradeKind::Tls,
            insertion_point: None,
        }
    }

    /// COMPRESS, placed inside TLS when TLS is active.
    #[must_use]
    pub const fn compress(tls_active: bool) -> Self {
        Self {
            kind: UpgradeKind::Compression,
            insertion_point: if tls_active { Some(TLS_STAGE) } else { None },
        }
    }

    /// Resolves the position and builds the codec.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS is requested without a configuration or
    /// rustls refuses to create a session.
    pub fn stage(self, tls: Option<&Arc<rustls::ServerConfig>>) -> Result<StagedUpgrade> {
        let codec: Box<dyn Codec> = match self.kind {
            UpgradeKind::Tls => {
                let config = tls.ok_or_else(|| Error::Upgrade("TLS is not configured".into()))?;
                Box::new(TlsCodec::new(Arc::clone(config))?)
            }
            UpgradeKind::Compression => Box::new(DeflateCodec::new()),
        };
        let position = self.insertion_point.map_or(Position::Wire, Position::After);
        Ok(StagedUpgrade {
            kind: self.kind,
            position,
            codec,
        })
    }
}

/// An upgrade whose codec is built and ready to install.
pub struct StagedUpgrade {
    kind: UpgradeKind,
    position: Position,
    codec: Box<dyn Codec>,
}

impl StagedUpgrade {
    /// Kind of upgrade.
    #[must_use]
    pub const fn kind(&self) -> UpgradeKind {
        self.kind
    }

    /// Where the codec will be inserted.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }
}

impl std::fmt::Debug for StagedUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedUpgrade")
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("codec", &self.codec.name())
            .finish()
    }
}

/// A transport upgrade in progress.
pub struct PipelineUpgrade<'a, P: TransportPipeline + ?Sized> {
    pipeline: &'a mut P,
    sealed: bool,
    resumed: bool,
}

impl<'a, P: TransportPipeline + ?Sized> PipelineUpgrade<'a, P> {
    /// Starts an upgrade by pausing reads.
    pub fn begin(pipeline: &'a mut P) -> Self {
        pipeline.pause_reads();
        Self {
            pipeline,
            sealed: false,
            resumed: false,
        }
    }

    /// Encodes the buffered responses through the current chain and
    /// returns the wire bytes. They must reach the socket before
    /// [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upgrade`] if the buffered output does not end on
    /// a complete line, or an encoding error from a stage.
    pub fn seal(&mut self) -> Result<BytesMut> {
        if !self.pipeline.buffered_output().ends_with(b"\r\n") {
            return Err(Error::Upgrade(
                "buffered output does not end with CRLF".into(),
            ));
        }
        self.pipeline.encode_output()?;
        self.sealed = true;
        Ok(self.pipeline.take_outbound())
    }

    /// Installs the staged codec and resumes reads.
    ///
    /// `unread` holds application bytes decoded by the old chain that the
    /// decoder has not consumed. They were sent after the upgrade command,
    /// so they are fed into the new stage. Returns the application bytes
    /// now available to the decoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upgrade`] if called before [`seal`](Self::seal),
    /// if the stage cannot be inserted, or if unread bytes exist and the
    /// new stage is not innermost.
    pub fn commit(mut self, staged: StagedUpgrade, unread: &[u8]) -> Result<BytesMut> {
        if !self.sealed {
            return Err(Error::Upgrade("commit before seal".into()));
        }
        let kind = staged.kind;
        let index = self.pipeline.insert_codec(staged.position, staged.codec)?;

        let mut app = BytesMut::new();
        if !unread.is_empty() {
            if index + 1 != self.pipeline.stage_count() {
                return Err(Error::Upgrade(format!(
                    "{} unread bytes cannot reach a non-innermost {} stage",
                    unread.len(),
                    kind.as_str()
                )));
            }
            app = self.pipeline.feed_stage(index, unread)?;
        }

        self.resumed = true;
        app.extend_from_slice(&self.pipeline.resume_reads()?);
        info!(upgrade = kind.as_str(), index, "transport upgraded");
        Ok(app)
    }
}

impl<P: TransportPipeline + ?Sized> Drop for PipelineUpgrade<'_, P> {
    fn drop(&mut self) {
        if self.resumed {
            return;
        }
        match self.pipeline.resume_reads() {
            Ok(dropped) if !dropped.is_empty() => {
                warn!(bytes = dropped.len(), "upgrade abandoned, discarding held input");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "upgrade abandoned"),
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
    use super::*;
    use crate::response::ResponseWriter;
    use crate::transport::Pipeline;
    use crate::transport::testing::{Observer, Rot13};
    use crate::types::{Status, Tag};

    fn staged(codec: Box<dyn Codec>, position: Position) -> StagedUpgrade {
        StagedUpgrade {
            kind: UpgradeKind::Compression,
            position,
            codec,
        }
    }

    #[test]
    fn tagged_ok_is_encoded_by_the_old_chain() {
        let mut pipeline = Pipeline::new();
        let (observer, seen) = Observer::new("new");
        let tag = Tag::new("a1").unwrap();

        pipeline.write_tagged(&tag, Status::Ok, None, "Begin compression");
        let mut upgrade = PipelineUpgrade::begin(&mut pipeline);
        let sealed = upgrade.seal().unwrap();
        assert_eq!(&sealed[..], b"a1 OK Begin compression\r\n");
        upgrade.commit(staged(Box::new(observer), Position::Wire), b"").unwrap();

        assert!(seen.encoded().is_empty());
        pipeline.write_untagged("after");
        pipeline.flush().unwrap();
        assert_eq!(seen.encoded(), b"* after\r\n");
    }

    #[test]
    fn first_inbound_bytes_after_commit_use_the_new_chain() {
        let mut pipeline = Pipeline::new();
        pipeline.write_tagged(&Tag::new("a1").unwrap(), Status::Ok, None, "go");

        let mut upgrade = PipelineUpgrade::begin(&mut pipeline);
        upgrade.seal().unwrap();
        let app = upgrade
            .commit(staged(Box::new(Rot13("rot")), Position::Wire), b"nopq")
            .unwrap();
        assert_eq!(&app[..], b"abcd");
        assert_eq!(&pipeline.receive(b"nopq").unwrap()[..], b"abcd");
    }

    #[test]
    fn bytes_arriving_while_paused_use_the_new_chain() {
        let mut pipeline = Pipeline::new();
        pipeline.write_tagged(&Tag::new("a1").unwrap(), Status::Ok, None, "go");

        let mut upgrade = PipelineUpgrade::begin(&mut pipeline);
        upgrade.seal().unwrap();
        assert!(upgrade.pipeline.receive(b"nop").unwrap().is_empty());
        let app = upgrade
            .commit(staged(Box::new(Rot13("rot")), Position::Wire), b"")
            .unwrap();
        assert_eq!(&app[..], b"abc");
    }

    #[test]
    fn partial_output_cannot_be_sealed() {
        let mut pipeline = Pipeline::new();
        pipeline.write_bytes(b"a1 OK half");
        let mut upgrade = PipelineUpgrade::begin(&mut pipeline);
        assert!(matches!(upgrade.seal().unwrap_err(), Error::Upgrade(_)));
        drop(upgrade);
        assert!(!pipeline.is_paused());
        assert_eq!(pipeline.stage_count(), 0);
    }

    #[test]
    fn commit_requires_seal() {
        let mut pipeline = Pipeline::new();
        let upgrade = PipelineUpgrade::begin(&mut pipeline);
        let err = upgrade
            .commit(staged(Box::new(Rot13("rot")), Position::Wire), b"")
            .unwrap_err();
        assert!(matches!(err, Error::Upgrade(_)));
        assert_eq!(pipeline.stage_count(), 0);
    }

    #[test]
    fn unread_bytes_need_an_innermost_stage() {
        let mut pipeline = Pipeline::new();
        pipeline.insert_codec(Position::Wire, Box::new(Rot13("inner"))).unwrap();
        pipeline.write_bytes(b"a1 OK\r\n");

        let mut upgrade = PipelineUpgrade::begin(&mut pipeline);
        upgrade.seal().unwrap();
        let err = upgrade
            .commit(staged(Box::new(Rot13("outer")), Position::Wire), b"x")
            .unwrap_err();
        assert!(matches!(err, Error::Upgrade(_)));
    }

    #[test]
    fn compression_goes_inside_tls() {
        assert_eq!(PendingUpgrade::compress(false).insertion_point, None);
        assert_eq!(PendingUpgrade::compress(true).insertion_point, Some("tls"));
        let staged = PendingUpgrade::compress(true).stage(None).unwrap();
        assert_eq!(staged.position(), Position::After("tls"));
    }

    #[test]
    fn starttls_without_config_fails_to_stage() {
        let err = PendingUpgrade::starttls().stage(None).unwrap_err();
        assert!(matches!(err, Error::Upgrade(_)));
    }
}
