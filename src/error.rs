//! Error types for the IRC client engine.
//!
//! Parsing never fails (see [`crate::message::ParsedLine`]); the errors here
//! describe outbound protocol violations, mode parsing problems and SASL
//! failures. Transport and engine errors live next to the code that raises
//! them.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// A protocol violation raised while building or interpreting a message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Command is neither alphabetic nor numeric.
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    /// A parameter that has to be sent as trailing is not the last one.
    #[error("parameter {index} must be trailing but is followed by more parameters: {param:?}")]
    MisplacedTrailing {
        /// Position of the offending parameter.
        index: usize,
        /// The offending parameter.
        param: String,
    },

    /// CR, LF or NUL in an outbound message.
    #[error("illegal control character: {0:?}")]
    IllegalControlChar(char),

    /// Serialized line exceeds the length ceiling.
    #[error("message too long: {len} bytes (limit {limit})")]
    MessageTooLong {
        /// Length of the serialized line, including the terminator.
        len: usize,
        /// Applicable limit.
        limit: usize,
    },

    /// Tag key that cannot be represented on the wire.
    #[error("invalid tag key: {0:?}")]
    InvalidTagKey(String),

    /// Source that is empty, contains a space or starts with a colon.
    #[error("invalid source: {0:?}")]
    InvalidSource(String),

    /// Mode change string could not be applied.
    #[error("invalid mode string: {string}")]
    InvalidModeString {
        /// The offending change tokens, joined by spaces.
        string: String,
        /// The underlying mode error.
        #[source]
        cause: ModeParseError,
    },
}

/// Errors encountered when applying mode change tokens.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModeParseError {
    /// A mode needing a parameter ran out of tokens.
    #[error("mode {sign}{mode} requires a parameter")]
    MissingParameter {
        /// `+` or `-`.
        sign: char,
        /// The mode character.
        mode: char,
    },
}

/// SASL mechanism and framing failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SaslError {
    /// None of the offered mechanisms can be used.
    #[error("no usable SASL mechanism (server offers: {0})")]
    NoMechanism(String),

    /// Mechanism name not implemented by this crate.
    #[error("unsupported SASL mechanism: {0}")]
    Unsupported(String),

    /// Challenge payload is not valid base64.
    #[error("invalid base64 in SASL challenge")]
    InvalidBase64,

    /// Mechanism received a challenge it did not expect.
    #[error("unexpected SASL challenge for {0}")]
    UnexpectedChallenge(&'static str),

    /// Credentials required by the mechanism are missing.
    #[error("missing SASL credentials for {0}")]
    MissingCredentials(&'static str),

    /// SCRAM exchange failed.
    #[cfg(feature = "scram")]
    #[error("SCRAM failure: {0}")]
    Scram(#[from] crate::sasl::ScramError),
}
