//! SASL mechanisms and `AUTHENTICATE` payload framing.
//!
//! Payloads travel base64-encoded in lines of at most [`SASL_CHUNK_SIZE`]
//! characters. A line of exactly that size means more follows; a lone `+`
//! is an empty payload and `*` aborts the exchange.
//!
//! # Mechanisms
//!
//! - **PLAIN** (RFC 4616)
//! - **EXTERNAL**, relying on the TLS client certificate
//! - **SCRAM-SHA-256** (RFC 7677), with the `scram` feature
//!
//! ```
//! use slirc_engine::sasl::{authenticate_lines, Mechanism, Plain};
//!
//! let mut plain = Plain::new(None, "user", "secret");
//! let response = plain.respond(b"").unwrap();
//! assert_eq!(response, b"\0user\0secret");
//! assert_eq!(authenticate_lines(&response), ["AHVzZXIAc2VjcmV0"]);
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::config::SaslConfig;
use crate::error::SaslError;

#[cfg(feature = "scram")]
mod scram;

#[cfg(feature = "scram")]
pub use self::scram::{ScramClient, ScramError};

/// Maximum length of one `AUTHENTICATE` payload line.
pub const SASL_CHUNK_SIZE: usize = 400;

/// Empty payload marker.
pub const EMPTY_PAYLOAD: &str = "+";

/// Abort marker.
pub const ABORT: &str = "*";

/// Known mechanism names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SaslMechanism {
    Plain,
    External,
    ScramSha256,
    Unknown(String),
}

impl SaslMechanism {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Self::Plain,
            "EXTERNAL" => Self::External,
            "SCRAM-SHA-256" => Self::ScramSha256,
            _ => Self::Unknown(name.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::Unknown(s) => s,
        }
    }

    /// Whether this build can drive the mechanism.
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Plain | Self::External => true,
            Self::ScramSha256 => cfg!(feature = "scram"),
            Self::Unknown(_) => false,
        }
    }
}

impl fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a comma separated mechanism list, as carried by the `sasl`
/// capability value and by `RPL_SASLMECHS` (908).
pub fn parse_mechanisms(list: &str) -> Vec<SaslMechanism> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SaslMechanism::parse)
        .collect()
}

/// Pick the mechanism to authenticate with.
///
/// An explicitly configured mechanism is used as-is but must appear in the
/// server list when one is known. Otherwise the strongest password
/// mechanism the server offers is chosen, assuming PLAIN when the server
/// did not say.
pub fn select_mechanism(
    config: &SaslConfig,
    offered: Option<&[SaslMechanism]>,
) -> Result<SaslMechanism, SaslError> {
    if let Some(name) = &config.mechanism {
        let wanted = SaslMechanism::parse(name);
        if offered.is_some_and(|list| !list.contains(&wanted)) {
            return Err(SaslError::NoMechanism(describe(offered)));
        }
        if !wanted.is_supported() {
            return Err(SaslError::Unsupported(wanted.as_str().to_owned()));
        }
        return Ok(wanted);
    }

    let default = [SaslMechanism::Plain];
    let offered_list = offered.unwrap_or(&default);
    if offered_list == [SaslMechanism::External] {
        return Ok(SaslMechanism::External);
    }
    [SaslMechanism::ScramSha256, SaslMechanism::Plain]
        .into_iter()
        .find(|m| m.is_supported() && offered_list.contains(m))
        .ok_or_else(|| SaslError::NoMechanism(describe(offered)))
}

fn describe(offered: Option<&[SaslMechanism]>) -> String {
    match offered {
        Some(list) => list
            .iter()
            .map(SaslMechanism::as_str)
            .collect::<Vec<_>>()
            .join(","),
        None => "unknown".to_owned(),
    }
}

/// One side of a SASL exchange.
pub trait Mechanism: Send {
    fn name(&self) -> &'static str;

    /// Compute the response to a complete, decoded challenge.
    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError>;
}

/// Build the client for `mechanism` from configured credentials.
pub fn client_for(
    mechanism: &SaslMechanism,
    config: &SaslConfig,
) -> Result<Box<dyn Mechanism>, SaslError> {
    let identity = config.identity.clone();
    match mechanism {
        SaslMechanism::External => Ok(Box::new(External::new(identity))),
        SaslMechanism::Plain => {
            let (username, password) = credentials(config, "PLAIN")?;
            Ok(Box::new(Plain::new(identity, username, password)))
        }
        #[cfg(feature = "scram")]
        SaslMechanism::ScramSha256 => {
            let (username, password) = credentials(config, "SCRAM-SHA-256")?;
            Ok(Box::new(ScramClient::new(identity, username, password)?))
        }
        other => Err(SaslError::Unsupported(other.as_str().to_owned())),
    }
}

fn credentials<'a>(
    config: &'a SaslConfig,
    mechanism: &'static str,
) -> Result<(&'a str, &'a str), SaslError> {
    match (config.username.as_deref(), config.password.as_deref()) {
        (Some(username), Some(password)) => Ok((username, password)),
        _ => Err(SaslError::MissingCredentials(mechanism)),
    }
}

/// PLAIN: `authzid NUL authcid NUL password` in a single response.
#[derive(Clone)]
pub struct Plain {
    payload: Vec<u8>,
    sent: bool,
}

impl Plain {
    pub fn new(identity: Option<String>, username: &str, password: &str) -> Self {
        let mut payload = identity.unwrap_or_default().into_bytes();
        payload.push(0);
        payload.extend_from_slice(username.as_bytes());
        payload.push(0);
        payload.extend_from_slice(password.as_bytes());
        Plain {
            payload,
            sent: false,
        }
    }
}

impl fmt::Debug for Plain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plain").field("sent", &self.sent).finish_non_exhaustive()
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.sent || !challenge.is_empty() {
            return Err(SaslError::UnexpectedChallenge("PLAIN"));
        }
        self.sent = true;
        Ok(self.payload.clone())
    }
}

/// EXTERNAL: optionally names the authorization identity.
#[derive(Clone, Debug)]
pub struct External {
    identity: Option<String>,
}

impl External {
    pub fn new(identity: Option<String>) -> Self {
        External { identity }
    }
}

impl Mechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn respond(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        Ok(self.identity.clone().unwrap_or_default().into_bytes())
    }
}

/// Decode one `AUTHENTICATE` fragment. `+` decodes to nothing.
pub fn decode_fragment(fragment: &str) -> Result<Vec<u8>, SaslError> {
    if fragment == EMPTY_PAYLOAD {
        return Ok(Vec::new());
    }
    BASE64
        .decode(fragment)
        .map_err(|_| SaslError::InvalidBase64)
}

/// Whether a received fragment ends the payload.
pub fn is_final_fragment(fragment: &str) -> bool {
    fragment.len() % SASL_CHUNK_SIZE != 0
}

/// Encode a response into `AUTHENTICATE` parameters.
///
/// When the encoded payload is empty or an exact multiple of the chunk size,
/// a trailing `+` marks the end.
pub fn authenticate_lines(payload: &[u8]) -> Vec<String> {
    let encoded = BASE64.encode(payload);
    let mut lines = Vec::with_capacity(encoded.len() / SASL_CHUNK_SIZE + 1);
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(SASL_CHUNK_SIZE));
        lines.push(chunk.to_owned());
        rest = tail;
    }
    if encoded.len() % SASL_CHUNK_SIZE == 0 {
        lines.push(EMPTY_PAYLOAD.to_owned());
    }
    lines
}
