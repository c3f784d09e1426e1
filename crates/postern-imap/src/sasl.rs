//! Server side of the SASL mechanisms offered by AUTHENTICATE.
//!
//! Implements:
//! - PLAIN (RFC 4616): `[authzid] NUL authcid NUL passwd`, base64 encoded
//! - LOGIN: username and password sent as two separate base64 responses

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Mechanisms the server advertises, in `AUTH=` order.
pub const MECHANISMS: [Mechanism; 2] = [Mechanism::Plain, Mechanism::Login];

/// Challenge sent for the LOGIN username (`Username:`).
pub const LOGIN_USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";

/// Challenge sent for the LOGIN password (`Password:`).
pub const LOGIN_PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// A supported SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// RFC 4616 PLAIN.
    Plain,
    /// The LOGIN mechanism.
    Login,
}

impl Mechanism {
    /// Looks up a mechanism by name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if name.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Mechanism name as advertised.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Errors decoding a client SASL response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaslError {
    /// The response is not valid base64.
    #[error("invalid base64 in SASL response")]
    Base64,

    /// The decoded response is not UTF-8.
    #[error("SASL response is not UTF-8")]
    Utf8,

    /// The PLAIN message does not have three NUL-separated parts.
    #[error("malformed PLAIN message")]
    MalformedPlain,

    /// The authorization identity differs from the authentication identity.
    #[error("proxy authorization is not supported")]
    Authorization,
}

/// Credentials recovered from a PLAIN response.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    /// Authentication identity.
    pub user: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for PlainCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainCredentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Decodes one base64 client response. A lone `=` is the empty response.
///
/// # Errors
///
/// Returns [`SaslError::Base64`] if the input is not valid base64.
pub fn decode_response(response: &[u8]) -> Result<Vec<u8>, SaslError> {
    if response == b"=" {
        return Ok(Vec::new());
    }
    STANDARD.decode(response).map_err(|_| SaslError::Base64)
}

/// Decodes a base64 response holding UTF-8 text, as LOGIN sends.
///
/// # Errors
///
/// Returns an error if the input is not base64 or not UTF-8.
pub fn decode_text(response: &[u8]) -> Result<String, SaslError> {
    String::from_utf8(decode_response(response)?).map_err(|_| SaslError::Utf8)
}

/// Decodes a PLAIN response.
///
/// # Errors
///
/// Returns an error if the message is malformed or requests an
/// authorization identity other than the user itself.
pub fn decode_plain(response: &[u8]) -> Result<PlainCredentials, SaslError> {
    let message = decode_response(response)?;
    let mut parts = message.split(|&b| b == 0);
    let (Some(authzid), Some(authcid), Some(passwd), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(SaslError::MalformedPlain);
    };
    if authcid.is_empty() {
        return Err(SaslError::MalformedPlain);
    }
    if !authzid.is_empty() && authzid != authcid {
        return Err(SaslError::Authorization);
    }
    let text = |b: &[u8]| String::from_utf8(b.to_vec()).map_err(|_| SaslError::Utf8);
    Ok(PlainCredentials {
        user: text(authcid)?,
        password: text(passwd)?,
    })
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

    fn encode(raw: &[u8]) -> Vec<u8> {
        STANDARD.encode(raw).into_bytes()
    }

    #[test]
    fn test_plain() {
        let creds = decode_plain(&encode(b"\0user@example.com\0password123")).unwrap();
        assert_eq!(creds.user, "user@example.com");
        assert_eq!(creds.password, "password123");
    }

    #[test]
    fn test_plain_with_matching_authzid() {
        let creds = decode_plain(&encode(b"tim\0tim\0tanstaaftanstaaf")).unwrap();
        assert_eq!(creds.user, "tim");
    }

    #[test]
    fn test_plain_rejections() {
        assert_eq!(
            decode_plain(&encode(b"admin\0tim\0pw")).unwrap_err(),
            SaslError::Authorization
        );
        assert_eq!(
            decode_plain(&encode(b"only-one-part")).unwrap_err(),
            SaslError::MalformedPlain
        );
        assert_eq!(
            decode_plain(&encode(b"\0a\0b\0c")).unwrap_err(),
            SaslError::MalformedPlain
        );
        assert_eq!(decode_plain(b"not base64!").unwrap_err(), SaslError::Base64);
    }

    #[test]
    fn test_login_challenges_decode() {
        assert_eq!(decode_text(LOGIN_USERNAME_CHALLENGE.as_bytes()).unwrap(), "Username:");
        assert_eq!(decode_text(LOGIN_PASSWORD_CHALLENGE.as_bytes()).unwrap(), "Password:");
    }

    #[test]
    fn test_empty_response() {
        assert!(decode_response(b"=").unwrap().is_empty());
    }

    #[test]
    fn test_mechanism_lookup() {
        assert_eq!(Mechanism::from_name("plain"), Some(Mechanism::Plain));
        assert_eq!(Mechanism::from_name("XOAUTH2"), None);
        assert_eq!(MECHANISMS.map(Mechanism::as_str), ["PLAIN", "LOGIN"]);
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = PlainCredentials {
            user: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
