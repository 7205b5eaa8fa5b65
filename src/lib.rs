//! # slirc-engine
//!
//! A client-side IRC protocol engine.
//!
//! ## Features
//!
//! - Wire codec with IRCv3 message tags, lenient parsing and strict construction
//! - Mode tables driven by `RPL_ISUPPORT`, with per-server case mapping
//! - Capability negotiation (`CAP LS 302`) with pluggable hooks
//! - SASL `PLAIN`, `EXTERNAL` and, with the `scram` feature, `SCRAM-SHA-256`
//! - WHOIS / WHOWAS correlation with shared pending replies
//! - Throttled TCP/TLS transport, ping timeouts and reconnection backoff
//! - A single-task engine per connection, and a pool to run several
//!
//! Only the codec, mode and configuration layers are available without the
//! default `tokio` feature.

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Quick Start
//!
//! ### Parsing and constructing messages
//!
//! ```rust
//! use slirc_engine::{Message, ParsedLine};
//!
//! let parsed = ParsedLine::parse_str("@time=2023-01-01T12:00:00Z :nick!user@host PRIVMSG #chan :Hello!");
//! assert!(parsed.valid);
//! assert_eq!(parsed.message.source_nickname(), Some("nick"));
//! assert_eq!(parsed.message.trailing(), Some("Hello!"));
//!
//! let line = Message::new("PRIVMSG", ["#chan", "hi there"]).construct(false).unwrap();
//! assert_eq!(line, "PRIVMSG #chan :hi there\r\n");
//! ```
//!
//! ### Running a client
//!
//! See [`engine`] for a complete example.

pub mod casemap;
pub mod config;
pub mod error;
pub mod isupport;
pub mod message;
pub mod mode;
pub mod reconnect;
pub mod sasl;

#[cfg(feature = "tokio")]
pub mod auth;
#[cfg(feature = "tokio")]
pub mod caps;
#[cfg(feature = "tokio")]
pub mod correlate;
#[cfg(feature = "tokio")]
pub mod engine;
#[cfg(feature = "tokio")]
pub mod pool;
#[cfg(feature = "tokio")]
pub mod timer;
#[cfg(feature = "tokio")]
pub mod transport;

pub use self::casemap::{irc_to_lower, CaseMapping};
pub use self::config::EngineConfig;
pub use self::error::{ProtocolError, Result};
pub use self::isupport::{Isupport, ServerInfo};
pub use self::message::{Command, Message, ParsedLine};
pub use self::mode::{BehaviorTable, ModeBehavior, ModeMap, ModeValue};
pub use self::reconnect::ReconnectPolicy;
pub use self::sasl::SaslMechanism;

#[cfg(feature = "tokio")]
pub use self::caps::{CapabilityHook, CapabilityRegistry};
#[cfg(feature = "tokio")]
pub use self::correlate::{PendingReply, QueryKind, RequestError, UserInfo};
#[cfg(feature = "tokio")]
pub use self::engine::{Engine, EngineBuilder, EngineError, EngineHandle, Event, Session};
#[cfg(feature = "tokio")]
pub use self::pool::ClientPool;
#[cfg(feature = "tokio")]
pub use self::transport::{ConnectError, Connection};
