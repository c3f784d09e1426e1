//! Response codes.

use super::{Capability, Flags, Uid, UidValidity, format_capabilities};

/// Bracketed response code attached to a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: Human-readable message that MUST be shown to user.
    Alert,
    /// CAPABILITY response.
    Capability(Vec<Capability>),
    /// PARSE: Error parsing message.
    Parse,
    /// PERMANENTFLAGS: Flags that can be changed permanently.
    PermanentFlags(Flags),
    /// READ-ONLY: Mailbox selected as read-only.
    ReadOnly,
    /// READ-WRITE: Mailbox selected as read-write.
    ReadWrite,
    /// TRYCREATE: Mailbox doesn't exist, but can be created.
    TryCreate,
    /// UIDNEXT: Next UID to be assigned.
    UidNext(Uid),
    /// UIDVALIDITY: Unique identifier validity value.
    UidValidity(UidValidity),
    /// UNSEEN: First unseen message sequence number.
    Unseen(u32),
    /// APPENDUID: UID assigned to appended message.
    AppendUid {
        /// UIDVALIDITY of the mailbox.
        uidvalidity: UidValidity,
        /// UID of the appended message.
        uid: Uid,
    },
    /// AUTHENTICATIONFAILED (RFC 5530).
    AuthenticationFailed,
    /// PRIVACYREQUIRED (RFC 5530): operation needs an encrypted transport.
    PrivacyRequired,
    /// NONEXISTENT (RFC 5530).
    Nonexistent,
    /// CLIENTBUG (RFC 5530).
    ClientBug,
    /// COMPRESSIONACTIVE (RFC 4978).
    CompressionActive,
    /// CLOSED (RFC 7162): the previous mailbox was deselected.
    Closed,
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alert => f.write_str("ALERT"),
            Self::Capability(caps) => write!(f, "CAPABILITY {}", format_capabilities(caps)),
            Self::Parse => f.write_str("PARSE"),
            Self::PermanentFlags(flags) => write!(f, "PERMANENTFLAGS {flags}"),
            Self::ReadOnly => f.write_str("READ-ONLY"),
            Self::ReadWrite => f.write_str("READ-WRITE"),
            Self::TryCreate => f.write_str("TRYCREATE"),
            Self::UidNext(uid) => write!(f, "UIDNEXT {uid}"),
            Self::UidValidity(v) => write!(f, "UIDVALIDITY {v}"),
            Self::Unseen(seq) => write!(f, "UNSEEN {seq}"),
            Self::AppendUid { uidvalidity, uid } => write!(f, "APPENDUID {uidvalidity} {uid}"),
            Self::AuthenticationFailed => f.write_str("AUTHENTICATIONFAILED"),
            Self::PrivacyRequired => f.write_str("PRIVACYREQUIRED"),
            Self::Nonexistent => f.write_str("NONEXISTENT"),
            Self::ClientBug => f.write_str("CLIENTBUG"),
            Self::CompressionActive => f.write_str("COMPRESSIONACTIVE"),
            Self::Closed => f.write_str("CLOSED"),
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
    use crate::types::Flag;

    #[test]
    fn simple_codes() {
        assert_eq!(ResponseCode::ReadWrite.to_string(), "READ-WRITE");
        assert_eq!(ResponseCode::TryCreate.to_string(), "TRYCREATE");
        assert_eq!(
            ResponseCode::CompressionActive.to_string(),
            "COMPRESSIONACTIVE"
        );
    }

    #[test]
    fn codes_with_arguments() {
        let uv = UidValidity::new(123456).unwrap();
        assert_eq!(ResponseCode::UidValidity(uv).to_string(), "UIDVALIDITY 123456");
        assert_eq!(
            ResponseCode::UidNext(Uid::new(42).unwrap()).to_string(),
            "UIDNEXT 42"
        );
        assert_eq!(
            ResponseCode::AppendUid {
                uidvalidity: uv,
                uid: Uid::new(7).unwrap()
            }
            .to_string(),
            "APPENDUID 123456 7"
        );
    }

    #[test]
    fn permanent_flags_list() {
        let flags = Flags::from_vec(vec![Flag::Seen, Flag::Deleted]);
        assert_eq!(
            ResponseCode::PermanentFlags(flags).to_string(),
            "PERMANENTFLAGS (\\Seen \\Deleted)"
        );
    }

    #[test]
    fn capability_code() {
        let code = ResponseCode::Capability(vec![Capability::Imap4Rev1, Capability::Idle]);
        assert_eq!(code.to_string(), "CAPABILITY IMAP4rev1 IDLE");
    }
}
