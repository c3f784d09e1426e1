//! STARTTLS and COMPRESS.
//!
//! The codec is built before the tagged OK is written, so a failure can
//! still be answered with NO on the unchanged transport.

use tracing::warn;

use super::{Context, Outcome, bad};
use crate::store::{Authenticator, MailboxStore};
use crate::transport::PendingUpgrade;
use crate::types::{ResponseCode, Status, Tag};

pub(super) fn starttls<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
) -> Outcome {
    let refusal = if cx.session.tls_active() {
        Some("TLS already active")
    } else if cx.session.compression_active() {
        Some("STARTTLS not allowed after COMPRESS")
    } else if !cx.config.tls_available() {
        Some("TLS not available")
    } else {
        None
    };
    if let Some(text) = refusal {
        cx.out.write_tagged(tag, Status::No, None, text);
        return Outcome::Done;
    }

    match PendingUpgrade::starttls().stage(cx.config.tls.as_ref()) {
        Ok(staged) => {
            cx.out
                .write_tagged(tag, Status::Ok, None, "Begin TLS negotiation now");
            Outcome::Upgrade(staged)
        }
        Err(e) => {
            warn!(error = %e, "cannot start TLS");
            cx.out.write_tagged(tag, Status::No, None, "TLS not available");
            Outcome::Done
        }
    }
}

pub(super) fn compress<M: MailboxStore, A: Authenticator>(
    cx: &mut Context<'_, M, A>,
    tag: &Tag,
    mechanism: &str,
) -> Outcome {
    if !mechanism.eq_ignore_ascii_case("DEFLATE") {
        return bad(cx.out, tag, "Unknown compression mechanism");
    }
    if cx.session.compression_active() {
        cx.out.write_tagged(
            tag,
            Status::No,
            Some(&ResponseCode::CompressionActive),
            "DEFLATE already active",
        );
        return Outcome::Done;
    }
    if !cx.config.compression {
        cx.out
            .write_tagged(tag, Status::No, None, "Compression not available");
        return Outcome::Done;
    }

    match PendingUpgrade::compress(cx.session.tls_active()).stage(cx.config.tls.as_ref()) {
        Ok(staged) => {
            cx.out.write_tagged(tag, Status::Ok, None, "DEFLATE active");
            Outcome::Upgrade(staged)
        }
        Err(e) => {
            warn!(error = %e, "cannot start compression");
            cx.out
                .write_tagged(tag, Status::No, None, "Compression not available");
            Outcome::Done
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
    use super::super::testing::Harness;
    use super::*;
    use crate::config::Config;
    use crate::transport::{Position, UpgradeKind};

    #[tokio::test]
    async fn starttls_without_tls_config_is_no() {
        let mut h = Harness::new();
        let outcome = h.run("t STARTTLS\r\n").await;
        assert!(matches!(outcome, Outcome::Done));
        assert_eq!(h.lines(), vec!["t NO TLS not available"]);
    }

    #[tokio::test]
    async fn starttls_after_tls_is_no() {
        let mut h = Harness::new();
        h.session.mark_tls_active();
        h.run("t STARTTLS\r\n").await;
        assert_eq!(h.lines(), vec!["t NO TLS already active"]);
    }

    #[tokio::test]
    async fn compress_stages_deflate() {
        let mut h = Harness::new();
        h.login().await;
        let outcome = h.run("z COMPRESS DEFLATE\r\n").await;
        let Outcome::Upgrade(staged) = outcome else {
            panic!("expected an upgrade");
        };
        assert_eq!(staged.kind(), UpgradeKind::Compression);
        assert_eq!(staged.position(), Position::Wire);
        assert_eq!(h.lines(), vec!["z OK DEFLATE active"]);
    }

    #[tokio::test]
    async fn compress_inside_tls() {
        let mut h = Harness::new();
        h.session.mark_tls_active();
        h.login().await;
        let Outcome::Upgrade(staged) = h.run("z COMPRESS DEFLATE\r\n").await else {
            panic!("expected an upgrade");
        };
        assert_eq!(staged.position(), Position::After("tls"));
    }

    #[tokio::test]
    async fn compress_refusals() {
        let mut h = Harness::with_config(Config::builder().compression(false).build());
        h.login().await;
        h.run("z1 COMPRESS LZ4\r\n").await;
        h.run("z2 COMPRESS DEFLATE\r\n").await;
        h.session.mark_compression_active();
        h.run("z3 COMPRESS DEFLATE\r\n").await;
        assert_eq!(
            h.lines(),
            vec![
                "z1 BAD Unknown compression mechanism",
                "z2 NO Compression not available",
                "z3 NO [COMPRESSIONACTIVE] DEFLATE already active",
            ]
        );
    }
}
