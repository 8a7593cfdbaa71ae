//! Session configuration
//!
//! Provides [`SessionConfig`] and its builder.

use std::sync::Arc;
use std::time::Duration;

use conduit_platform::{ConduitError, ConduitResult};

use super::channel::ChannelOptions;
use super::crypto::Algorithms;
use super::hostkey::HostKeyVerifier;
use super::transport::RekeyPolicy;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound for each key exchange.
pub const DEFAULT_KEX_TIMEOUT: Duration = Duration::from_secs(60);
/// Default bound for the best-effort DISCONNECT write.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default number of pre-version lines tolerated from the server.
pub const DEFAULT_MAX_BANNER_LINES: usize = 64;

/// Configuration for one [`Session`](super::session::Session).
#[derive(Clone)]
pub struct SessionConfig {
    /// Software part of our version string (`SSH-2.0-<software_version>`)
    pub software_version: String,

    /// Bound for opening the byte stream
    pub connect_timeout: Duration,

    /// Bound for each key exchange, initial or re-key
    pub kex_timeout: Duration,

    /// Bound for the best-effort DISCONNECT write at teardown
    pub disconnect_timeout: Duration,

    /// When to re-key
    pub rekey_policy: RekeyPolicy,

    /// Window and packet sizes for channels we open or accept
    pub channel_defaults: ChannelOptions,

    /// Interval for SSH_MSG_IGNORE keepalives. `None` disables them.
    pub keepalive_interval: Option<Duration>,

    /// Pre-version lines the server may send before its identification
    pub max_banner_lines: usize,

    /// Algorithms offered, in preference order
    pub algorithms: Algorithms,

    /// Decides whether the server's host key is trusted
    pub host_key_verifier: Arc<dyn HostKeyVerifier>,
}

impl SessionConfig {
    /// Create builder for session configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Validate configuration
    pub fn validate(&self) -> ConduitResult<()> {
        if self.software_version.is_empty() {
            return Err(ConduitError::Config(
                "software_version cannot be empty".into(),
            ));
        }
        if self
            .software_version
            .chars()
            .any(|c| c.is_whitespace() || c == '-' || !c.is_ascii_graphic())
        {
            return Err(ConduitError::Config(format!(
                "software_version contains invalid characters: {:?}",
                self.software_version
            )));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("kex_timeout", self.kex_timeout),
            ("disconnect_timeout", self.disconnect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConduitError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.keepalive_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConduitError::Config(
                "keepalive_interval must be non-zero".into(),
            ));
        }
        if self.rekey_policy.bytes_limit == 0 || self.rekey_policy.time_limit.is_zero() {
            return Err(ConduitError::Config(
                "rekey limits must be non-zero".into(),
            ));
        }
        self.channel_defaults.validate()?;
        self.algorithms.validate()?;
        Ok(())
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("software_version", &self.software_version)
            .field("connect_timeout", &self.connect_timeout)
            .field("kex_timeout", &self.kex_timeout)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .field("rekey_policy", &self.rekey_policy)
            .field("channel_defaults", &self.channel_defaults)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("max_banner_lines", &self.max_banner_lines)
            .field("algorithms", &self.algorithms)
            .field("host_key_verifier", &"<verifier>")
            .finish()
    }
}

/// Builder for SessionConfig
#[derive(Default)]
pub struct SessionConfigBuilder {
    software_version: Option<String>,
    connect_timeout: Option<Duration>,
    kex_timeout: Option<Duration>,
    disconnect_timeout: Option<Duration>,
    rekey_policy: Option<RekeyPolicy>,
    channel_defaults: Option<ChannelOptions>,
    keepalive_interval: Option<Duration>,
    max_banner_lines: Option<usize>,
    algorithms: Option<Algorithms>,
    host_key_verifier: Option<Arc<dyn HostKeyVerifier>>,
}

impl SessionConfigBuilder {
    /// Create new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the software part of the version string
    pub fn with_software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = Some(version.into());
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set key exchange timeout
    pub fn with_kex_timeout(mut self, timeout: Duration) -> Self {
        self.kex_timeout = Some(timeout);
        self
    }

    /// Set disconnect timeout
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = Some(timeout);
        self
    }

    /// Set re-key policy
    pub fn with_rekey_policy(mut self, policy: RekeyPolicy) -> Self {
        self.rekey_policy = Some(policy);
        self
    }

    /// Set default channel options
    pub fn with_channel_defaults(mut self, options: ChannelOptions) -> Self {
        self.channel_defaults = Some(options);
        self
    }

    /// Enable keepalives
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Set the pre-version banner line limit
    pub fn with_max_banner_lines(mut self, lines: usize) -> Self {
        self.max_banner_lines = Some(lines);
        self
    }

    /// Set algorithm table
    pub fn with_algorithms(mut self, algorithms: Algorithms) -> Self {
        self.algorithms = Some(algorithms);
        self
    }

    /// Set host key verifier (required)
    pub fn with_host_key_verifier<V>(mut self, verifier: V) -> Self
    where
        V: HostKeyVerifier + 'static,
    {
        self.host_key_verifier = Some(Arc::new(verifier));
        self
    }

    /// Build SessionConfig with validation
    pub fn build(self) -> ConduitResult<SessionConfig> {
        let config = SessionConfig {
            software_version: self
                .software_version
                .unwrap_or_else(|| format!("Conduit_{}", conduit_platform::VERSION)),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            kex_timeout: self.kex_timeout.unwrap_or(DEFAULT_KEX_TIMEOUT),
            disconnect_timeout: self
                .disconnect_timeout
                .unwrap_or(DEFAULT_DISCONNECT_TIMEOUT),
            rekey_policy: self.rekey_policy.unwrap_or_default(),
            channel_defaults: self.channel_defaults.unwrap_or_default(),
            keepalive_interval: self.keepalive_interval,
            max_banner_lines: self.max_banner_lines.unwrap_or(DEFAULT_MAX_BANNER_LINES),
            algorithms: self.algorithms.unwrap_or_default(),
            host_key_verifier: self.host_key_verifier.ok_or_else(|| {
                ConduitError::Config("host_key_verifier is required".into())
            })?,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::hostkey::{AcceptAnyHostKey, HostKeyInfo};

    #[test]
    fn test_defaults() {
        let config = SessionConfig::builder()
            .with_host_key_verifier(AcceptAnyHostKey)
            .build()
            .unwrap();

        assert_eq!(
            config.software_version,
            format!("Conduit_{}", conduit_platform::VERSION)
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.kex_timeout, Duration::from_secs(60));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(2));
        assert_eq!(config.rekey_policy.bytes_limit, 1 << 30);
        assert_eq!(config.rekey_policy.time_limit, Duration::from_secs(3600));
        assert_eq!(config.channel_defaults.initial_window, 2 * 1024 * 1024);
        assert_eq!(config.channel_defaults.max_packet, 32 * 1024);
        assert_eq!(config.keepalive_interval, None);
        assert_eq!(config.max_banner_lines, 64);
    }

    #[test]
    fn test_verifier_required() {
        let err = SessionConfig::builder().build().unwrap_err();
        assert!(matches!(err, ConduitError::Config(msg) if msg.contains("host_key_verifier")));
    }

    #[test]
    fn test_closure_verifier() {
        let config = SessionConfig::builder()
            .with_host_key_verifier(|key: &HostKeyInfo| key.algorithm == "ssh-ed25519")
            .build()
            .unwrap();
        assert!(format!("{:?}", config).contains("<verifier>"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = || SessionConfig::builder().with_host_key_verifier(AcceptAnyHostKey);

        assert!(base().with_software_version("").build().is_err());
        assert!(base().with_software_version("has space").build().is_err());
        assert!(base().with_software_version("dash-ed").build().is_err());
        assert!(base().with_kex_timeout(Duration::ZERO).build().is_err());
        assert!(base().with_keepalive(Duration::ZERO).build().is_err());
        assert!(base()
            .with_rekey_policy(RekeyPolicy {
                bytes_limit: 0,
                time_limit: Duration::from_secs(1),
            })
            .build()
            .is_err());
        assert!(base()
            .with_channel_defaults(ChannelOptions::new(1024, 0))
            .build()
            .is_err());
        assert!(base()
            .with_algorithms(Algorithms::default().with_ciphers(&[]))
            .build()
            .is_err());
    }
}
