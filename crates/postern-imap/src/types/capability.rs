//! Server capabilities and response status.

/// Status of a tagged or untagged status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting (pre-authenticated).
    PreAuth,
    /// Server is closing connection.
    Bye,
}

impl Status {
    /// Returns true if this is a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }

    /// Returns the wire keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::PreAuth => "PREAUTH",
            Self::Bye => "BYE",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1` (RFC 3501)
    Imap4Rev1,
    /// IDLE command support (RFC 2177)
    Idle,
    /// UIDPLUS extension (RFC 4315)
    UidPlus,
    /// UNSELECT command (RFC 3691)
    Unselect,
    /// LITERAL+ extension (RFC 7888)
    LiteralPlus,
    /// SASL initial response (RFC 4959)
    SaslIr,
    /// STARTTLS support
    StartTls,
    /// LOGIN disabled
    LoginDisabled,
    /// AUTH mechanism
    Auth(String),
    /// COMPRESS mechanism (RFC 4978)
    Compress(String),
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap4Rev1 => write!(f, "IMAP4rev1"),
            Self::Idle => write!(f, "IDLE"),
            Self::UidPlus => write!(f, "UIDPLUS"),
            Self::Unselect => write!(f, "UNSELECT"),
            Self::LiteralPlus => write!(f, "LITERAL+"),
            Self::SaslIr => write!(f, "SASL-IR"),
            Self::StartTls => write!(f, "STARTTLS"),
            Self::LoginDisabled => write!(f, "LOGINDISABLED"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Compress(mech) => write!(f, "COMPRESS={mech}"),
        }
    }
}

/// Formats capabilities as the space-separated list used on the wire.
#[must_use]
pub fn format_capabilities(caps: &[Capability]) -> String {
    caps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
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
    fn status_keywords() {
        assert_eq!(Status::Ok.to_string(), "OK");
        assert_eq!(Status::Bye.to_string(), "BYE");
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::Bad.is_ok());
    }

    #[test]
    fn capability_display() {
        assert_eq!(Capability::Imap4Rev1.to_string(), "IMAP4rev1");
        assert_eq!(Capability::Auth("PLAIN".into()).to_string(), "AUTH=PLAIN");
        assert_eq!(
            Capability::Compress("DEFLATE".into()).to_string(),
            "COMPRESS=DEFLATE"
        );
    }

    #[test]
    fn capability_list() {
        let caps = [Capability::Imap4Rev1, Capability::LiteralPlus, Capability::Idle];
        assert_eq!(format_capabilities(&caps), "IMAP4rev1 LITERAL+ IDLE");
    }
}
