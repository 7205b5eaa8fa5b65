//! Engine configuration.
//!
//! Every engine is built from its own [`EngineConfig`]; nothing is shared
//! between instances. With the `serde` feature the records can be loaded
//! from any serde format, missing fields taking their defaults.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default plain-text port.
pub const DEFAULT_PORT: u16 = 6667;
/// Default TLS port.
pub const DEFAULT_TLS_PORT: u16 = 6697;

/// Bound on establishing TCP (and TLS) before giving up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Silence after which the server is considered gone.
pub const PING_TIMEOUT: Duration = Duration::from_secs(300);
/// Bound on each SASL round trip.
pub const SASL_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on a correlated WHOIS/WHOWAS request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Messages sent back to back before throttling engages.
pub const THROTTLE_THRESHOLD: u32 = 3;
/// Minimum interval between throttled sends.
pub const THROTTLE_DELAY: Duration = Duration::from_secs(2);

/// Reconnect attempts before giving up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 3;
/// Delay before each reconnect attempt, in seconds; the last entry repeats.
pub const RECONNECT_DELAYS: [u64; 6] = [5, 5, 10, 30, 120, 600];

/// Capabilities requested by default, without any special handling.
pub const DEFAULT_CAPABILITIES: [&str; 4] = ["cap-notify", "message-tags", "multi-prefix", "server-time"];

/// Top-level configuration of one engine.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub nickname: String,
    /// Tried in order when the nickname is refused during registration.
    pub fallback_nicknames: Vec<String>,
    /// Defaults to the nickname.
    pub username: Option<String>,
    /// Defaults to the nickname.
    pub realname: Option<String>,
    /// Server password sent with `PASS`.
    pub password: Option<String>,
    pub sasl: Option<SaslConfig>,
    /// Joined once registration completes.
    pub channels: Vec<String>,
    /// Extra capabilities requested as-is.
    pub capabilities: Vec<String>,
    /// Label of the primary text encoding.
    pub encoding: String,
    pub throttle: ThrottleConfig,
    pub reconnect: ReconnectConfig,
    pub connect_timeout: Duration,
    pub ping_timeout: Duration,
    pub sasl_timeout: Duration,
    pub request_timeout: Duration,
}

impl EngineConfig {
    /// Configuration for a plain-text connection to `host`.
    pub fn new(host: impl Into<String>, nickname: impl Into<String>) -> Self {
        EngineConfig {
            server: ServerConfig::plain(host),
            nickname: nickname.into(),
            ..EngineConfig::default()
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nickname)
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("server", &self.server)
            .field("nickname", &self.nickname)
            .field("fallback_nicknames", &self.fallback_nicknames)
            .field("username", &self.username)
            .field("realname", &self.realname)
            .field("password", &redacted(&self.password))
            .field("sasl", &self.sasl)
            .field("channels", &self.channels)
            .field("capabilities", &self.capabilities)
            .field("encoding", &self.encoding)
            .field("throttle", &self.throttle)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .field("sasl_timeout", &self.sasl_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            server: ServerConfig::default(),
            nickname: String::new(),
            fallback_nicknames: Vec::new(),
            username: None,
            realname: None,
            password: None,
            sasl: None,
            channels: Vec::new(),
            capabilities: Vec::new(),
            encoding: "utf-8".to_owned(),
            throttle: ThrottleConfig::default(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: CONNECT_TIMEOUT,
            ping_timeout: PING_TIMEOUT,
            sasl_timeout: SASL_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Where to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// TLS settings; `None` for plain text.
    pub tls: Option<TlsOptions>,
    /// Local address to bind before connecting.
    pub source_address: Option<IpAddr>,
}

impl ServerConfig {
    pub fn plain(host: impl Into<String>) -> Self {
        ServerConfig {
            host: host.into(),
            ..ServerConfig::default()
        }
    }

    /// TLS on the default TLS port with certificate verification.
    pub fn tls(host: impl Into<String>) -> Self {
        ServerConfig {
            host: host.into(),
            port: DEFAULT_TLS_PORT,
            tls: Some(TlsOptions::default()),
            source_address: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: String::new(),
            port: DEFAULT_PORT,
            tls: None,
            source_address: None,
        }
    }
}

/// TLS settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TlsOptions {
    /// Verify the server certificate chain and hostname.
    pub verify: bool,
    /// PEM certificate chain presented to the server.
    pub client_cert: Option<PathBuf>,
    /// PEM private key; read from `client_cert` when absent.
    pub client_key: Option<PathBuf>,
    /// Extra PEM trust anchors, added to the platform store.
    pub ca_files: Vec<PathBuf>,
    /// PEM certificate revocation lists.
    pub crl_files: Vec<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            verify: true,
            client_cert: None,
            client_key: None,
            ca_files: Vec::new(),
            crl_files: Vec::new(),
        }
    }
}

/// SASL credentials.
#[derive(Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SaslConfig {
    /// Mechanism to insist on; chosen automatically when `None`.
    pub mechanism: Option<String>,
    /// Authorization identity.
    pub identity: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SaslConfig {
    /// Username and password authentication.
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        SaslConfig {
            username: Some(username.into()),
            password: Some(password.into()),
            ..SaslConfig::default()
        }
    }

    /// Client certificate authentication.
    pub fn external() -> Self {
        SaslConfig {
            mechanism: Some("EXTERNAL".to_owned()),
            ..SaslConfig::default()
        }
    }

    /// Whether these credentials can drive any mechanism.
    pub fn is_usable(&self) -> bool {
        let external = self
            .mechanism
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("EXTERNAL"));
        external || (self.username.is_some() && self.password.is_some())
    }
}

impl fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

/// Outbound flood control.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub threshold: u32,
    pub delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            enabled: true,
            threshold: THROTTLE_THRESHOLD,
            delay: THROTTLE_DELAY,
        }
    }
}

/// Automatic reconnection after unexpected disconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub delays: Vec<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            enabled: true,
            max_attempts: Some(RECONNECT_MAX_ATTEMPTS),
            delays: RECONNECT_DELAYS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}
