//! Server configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single command line outside literals.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default bound on a single literal.
pub const DEFAULT_MAX_LITERAL_SIZE: usize = 64 * 1024 * 1024;

/// Default number of messages loaded per FETCH batch.
pub const DEFAULT_FETCH_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// Default inactivity period before the autologout BYE (RFC 3501 minimum).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// IMAP server configuration shared by every connection.
#[derive(Clone)]
pub struct Config {
    /// Text sent after `* OK [CAPABILITY ...]` in the greeting.
    pub greeting: String,
    /// Maximum length of a command line, excluding literal data.
    pub max_line_length: usize,
    /// Maximum size of a single literal.
    pub max_literal_size: usize,
    /// Number of messages fetched from the store per batch.
    pub fetch_batch_size: NonZeroUsize,
    /// Time without client input before the connection is closed.
    pub idle_timeout: Duration,
    /// TLS settings used for STARTTLS. `None` disables STARTTLS.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// Whether COMPRESS=DEFLATE is offered.
    pub compression: bool,
    /// Whether LOGIN and AUTHENTICATE are allowed before TLS.
    pub allow_plaintext_auth: bool,
    /// Failed authentication attempts tolerated before disconnecting.
    pub max_auth_failures: u32,
}

impl Config {
    /// Creates a configuration with default limits and no TLS.
    #[must_use]
    pub fn new() -> Self {
        ConfigBuilder::new().build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Returns true if STARTTLS can be offered.
    #[must_use]
    pub const fn tls_available(&self) -> bool {
        self.tls.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("greeting", &self.greeting)
            .field("max_line_length", &self.max_line_length)
            .field("max_literal_size", &self.max_literal_size)
            .field("fetch_batch_size", &self.fetch_batch_size)
            .field("idle_timeout", &self.idle_timeout)
            .field("tls", &self.tls.is_some())
            .field("compression", &self.compression)
            .field("allow_plaintext_auth", &self.allow_plaintext_auth)
            .field("max_auth_failures", &self.max_auth_failures)
            .finish()
    }
}

/// Builder for server configuration.
#[derive(Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config {
                greeting: "Postern IMAP4rev1 ready".to_string(),
                max_line_length: DEFAULT_MAX_LINE_LENGTH,
                max_literal_size: DEFAULT_MAX_LITERAL_SIZE,
                fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                tls: None,
                compression: true,
                allow_plaintext_auth: true,
                max_auth_failures: 3,
            },
        }
    }

    /// Sets the greeting text.
    #[must_use]
    pub fn greeting(mut self, greeting: impl Into<String>) -> Self {
        self.config.greeting = greeting.into();
        self
    }

    /// Sets the maximum command line length.
    #[must_use]
    pub const fn max_line_length(mut self, length: usize) -> Self {
        self.config.max_line_length = length;
        self
    }

    /// Sets the maximum literal size.
    #[must_use]
    pub const fn max_literal_size(mut self, size: usize) -> Self {
        self.config.max_literal_size = size;
        self
    }

    /// Sets the FETCH batch size.
    #[must_use]
    pub const fn fetch_batch_size(mut self, size: NonZeroUsize) -> Self {
        self.config.fetch_batch_size = size;
        self
    }

    /// Sets the inactivity timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Enables STARTTLS with the given rustls server configuration.
    #[must_use]
    pub fn tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Enables or disables COMPRESS=DEFLATE.
    #[must_use]
    pub const fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    /// Allows or refuses authentication over an unencrypted transport.
    #[must_use]
    pub const fn allow_plaintext_auth(mut self, allow: bool) -> Self {
        self.config.allow_plaintext_auth = allow;
        self
    }

    /// Sets the number of failed authentication attempts before disconnecting.
    #[must_use]
    pub const fn max_auth_failures(mut self, attempts: u32) -> Self {
        self.config.max_auth_failures = attempts;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
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
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.max_line_length, 65536);
        assert_eq!(config.fetch_batch_size.get(), 100);
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
        assert!(!config.tls_available());
        assert!(config.compression);
        assert_eq!(config.max_auth_failures, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .greeting("hello")
            .max_line_length(1024)
            .max_literal_size(2048)
            .fetch_batch_size(NonZeroUsize::new(7).unwrap())
            .idle_timeout(Duration::from_secs(5))
            .compression(false)
            .allow_plaintext_auth(false)
            .max_auth_failures(1)
            .build();

        assert_eq!(config.greeting, "hello");
        assert_eq!(config.max_line_length, 1024);
        assert_eq!(config.max_literal_size, 2048);
        assert_eq!(config.fetch_batch_size.get(), 7);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert!(!config.compression);
        assert!(!config.allow_plaintext_auth);
        assert_eq!(config.max_auth_failures, 1);
    }

    #[test]
    fn test_debug_hides_tls_material() {
        let debug = format!("{:?}", Config::new());
        assert!(debug.contains("tls: false"));
    }
}
