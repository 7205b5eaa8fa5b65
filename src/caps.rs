//! IRCv3 capability negotiation.
//!
//! Negotiation runs `NotStarted -> Listing -> Requesting -> Negotiating ->
//! Ended`. Each capability the engine understands has a [`CapabilityHook`]
//! in the [`CapabilityRegistry`]; the hook decides whether to request the
//! capability and reacts to it being enabled or disabled.
//!
//! A hook that needs more round trips after its capability is acknowledged
//! (SASL) answers [`HookStatus::Negotiating`] and later calls
//! [`negotiated`]. `CAP END` goes out once, when nothing is requested and
//! nothing is still negotiating.
//!
//! # Reference
//! - <https://ircv3.net/specs/extensions/capability-negotiation>

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::{EngineConfig, DEFAULT_CAPABILITIES};
use crate::engine::{Event, Session};
use crate::error::Result;
use crate::message::Message;

/// Capability-token sigil: the capability is being disabled.
pub const DISABLED_PREFIX: char = '-';
/// Capability-token sigil: the client must acknowledge.
pub const ACK_REQUIRED_PREFIX: char = '~';
/// Capability-token sigil: the capability cannot be disabled.
pub const STICKY_PREFIX: char = '=';

/// Whether a listed capability should be requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Availability {
    Unsupported,
    Supported,
    /// Request as `name=value`.
    SupportedWith(String),
}

/// Outcome of enabling a capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookStatus {
    /// Nothing more to do.
    Negotiated,
    /// Finishes later through [`negotiated`].
    Negotiating,
    /// Could not be set up; the engine asks the server to disable it.
    Failed,
}

/// Behaviour attached to one capability name.
pub trait CapabilityHook: Send + Sync {
    /// The server listed the capability, with its `=value` if any.
    fn available(&self, _session: &mut Session, _value: Option<&str>) -> Availability {
        Availability::Supported
    }

    /// The server acknowledged the capability.
    fn enabled(&self, _session: &mut Session) -> HookStatus {
        HookStatus::Negotiated
    }

    /// The capability was disabled or removed by the server.
    fn disabled(&self, _session: &mut Session) {}
}

/// Requests a capability and needs nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainCapability;

impl CapabilityHook for PlainCapability {}

struct Registered {
    priority: i32,
    hook: Arc<dyn CapabilityHook>,
}

/// Capability name to hook table. Higher priority names are requested first.
#[derive(Default)]
pub struct CapabilityRegistry {
    hooks: BTreeMap<String, Registered>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain hooks for the default capabilities and the configured extras.
    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        for name in DEFAULT_CAPABILITIES
            .iter()
            .copied()
            .chain(config.capabilities.iter().map(String::as_str))
        {
            registry.register(name, 0, Arc::new(PlainCapability));
        }
        registry
    }

    /// Install `hook` for `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, priority: i32, hook: Arc<dyn CapabilityHook>) {
        self.hooks
            .insert(name.to_ascii_lowercase(), Registered { priority, hook });
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CapabilityHook>> {
        self.hooks.get(name).map(|r| &r.hook)
    }

    pub fn priority(&self, name: &str) -> i32 {
        self.hooks.get(name).map_or(0, |r| r.priority)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(name, r)| (name, r.priority)))
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationPhase {
    NotStarted,
    Listing,
    Requesting,
    Negotiating,
    Ended,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapStatus {
    Disabled,
    /// Enabled, with the value the server attached.
    Enabled(Option<String>),
}

/// Per-connection negotiation state.
#[derive(Clone, Debug)]
pub struct CapabilityState {
    phase: NegotiationPhase,
    capabilities: BTreeMap<String, CapStatus>,
    requested: BTreeSet<String>,
    negotiating: BTreeSet<String>,
    /// Tokens of a multi-line listing not yet terminated.
    listing: Vec<String>,
    end_sent: bool,
}

impl Default for CapabilityState {
    fn default() -> Self {
        CapabilityState {
            phase: NegotiationPhase::NotStarted,
            capabilities: BTreeMap::new(),
            requested: BTreeSet::new(),
            negotiating: BTreeSet::new(),
            listing: Vec::new(),
            end_sent: false,
        }
    }
}

impl CapabilityState {
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(self.capabilities.get(name), Some(CapStatus::Enabled(_)))
    }

    /// Value of an enabled capability.
    pub fn value(&self, name: &str) -> Option<&str> {
        match self.capabilities.get(name) {
            Some(CapStatus::Enabled(value)) => value.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self, name: &str) -> Option<&CapStatus> {
        self.capabilities.get(name)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.capabilities
            .iter()
            .filter(|(_, status)| matches!(status, CapStatus::Enabled(_)))
            .map(|(name, _)| name.as_str())
    }

    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    pub fn negotiating(&self) -> &BTreeSet<String> {
        &self.negotiating
    }

    pub fn end_sent(&self) -> bool {
        self.end_sent
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_settled(&self) -> bool {
        self.requested.is_empty() && self.negotiating.is_empty()
    }
}

/// One capability token split into sigils, name and value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapToken<'a> {
    pub disable: bool,
    pub ack_required: bool,
    pub sticky: bool,
    /// Lower-cased.
    pub name: String,
    pub value: Option<&'a str>,
}

impl<'a> CapToken<'a> {
    pub fn parse(token: &'a str) -> Self {
        let sigils = &token[..token.len() - token.trim_start_matches(['-', '~', '=']).len()];
        let rest = &token[sigils.len()..];
        let (name, value) = match rest.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (rest, None),
        };
        CapToken {
            disable: sigils.contains(DISABLED_PREFIX),
            ack_required: sigils.contains(ACK_REQUIRED_PREFIX),
            sticky: sigils.contains(STICKY_PREFIX),
            name: name.to_ascii_lowercase(),
            value,
        }
    }
}

/// Begin negotiation on a fresh connection.
pub fn start(session: &mut Session) -> Result<()> {
    session.caps.reset();
    session.caps.phase = NegotiationPhase::Listing;
    session.send(Message::new("CAP", ["LS", "302"]))
}

/// `CAP` from the server.
pub fn handle_cap(session: &mut Session, msg: &Message) -> Result<()> {
    let Some(subcommand) = msg.param(1) else {
        warn!("CAP without subcommand: {}", msg);
        return Ok(());
    };
    let subcommand = subcommand.to_ascii_uppercase();
    match subcommand.as_str() {
        "LS" | "LIST" | "NEW" => {
            let (more, list) = match (msg.param(2), msg.param(3)) {
                (Some("*"), Some(list)) => (true, list),
                (Some(list), _) => (false, list),
                (None, _) => (false, ""),
            };
            session
                .caps
                .listing
                .extend(list.split_whitespace().map(str::to_owned));
            if more {
                return Ok(());
            }
            let tokens = std::mem::take(&mut session.caps.listing);
            if subcommand == "LIST" {
                replace_enabled(session, &tokens);
                Ok(())
            } else {
                offer(session, &tokens)
            }
        }
        "ACK" => acknowledge(session, tokens(msg)),
        "NAK" => reject(session, tokens(msg)),
        "DEL" => remove(session, tokens(msg)),
        other => {
            warn!("unknown CAP subcommand from server: {}", other);
            Ok(())
        }
    }
}

fn tokens(msg: &Message) -> impl Iterator<Item = &str> {
    msg.param(2).unwrap_or_default().split_whitespace()
}

fn offer(session: &mut Session, tokens: &[String]) -> Result<()> {
    let hooks = Arc::clone(&session.hooks);
    let mut request: Vec<(String, String)> = Vec::new();

    for token in tokens {
        let token = CapToken::parse(token);
        if session.caps.capabilities.contains_key(&token.name) {
            continue;
        }
        session
            .caps
            .capabilities
            .insert(token.name.clone(), CapStatus::Disabled);

        let availability = match hooks.get(&token.name) {
            Some(hook) => hook.available(session, token.value),
            None => Availability::Unsupported,
        };
        match availability {
            Availability::Unsupported => debug!(capability = %token.name, "not requesting"),
            Availability::Supported => request.push((token.name.clone(), token.name)),
            Availability::SupportedWith(value) => {
                let entry = format!("{}={}", token.name, value);
                request.push((token.name, entry));
            }
        }
    }

    if request.is_empty() {
        return check_end(session);
    }
    request.sort_by_key(|(name, _)| Reverse(hooks.priority(name)));
    session.caps.phase = NegotiationPhase::Requesting;
    session
        .caps
        .requested
        .extend(request.iter().map(|(name, _)| name.clone()));
    let list = request
        .into_iter()
        .map(|(_, entry)| entry)
        .collect::<Vec<_>>()
        .join(" ");
    session.send(Message::new("CAP", ["REQ", list.as_str()]))
}

fn replace_enabled(session: &mut Session, tokens: &[String]) {
    for status in session.caps.capabilities.values_mut() {
        *status = CapStatus::Disabled;
    }
    for token in tokens {
        let token = CapToken::parse(token);
        session.caps.capabilities.insert(
            token.name,
            CapStatus::Enabled(token.value.map(str::to_owned)),
        );
    }
}

fn acknowledge<'a>(session: &mut Session, tokens: impl Iterator<Item = &'a str>) -> Result<()> {
    let hooks = Arc::clone(&session.hooks);

    for raw in tokens {
        let token = CapToken::parse(raw);
        let name = token.name;
        session.caps.requested.remove(&name);

        let hook = hooks.get(&name);
        if token.disable {
            session.caps.capabilities.insert(name.clone(), CapStatus::Disabled);
        } else if token.sticky {
            error!(capability = %name, "could not disable sticky capability");
            continue;
        } else {
            session.caps.capabilities.insert(
                name.clone(),
                CapStatus::Enabled(token.value.map(str::to_owned)),
            );
        }

        if token.ack_required {
            session.send(Message::new("CAP", ["ACK", name.as_str()]))?;
        }

        let status = match hook {
            Some(hook) if token.disable => {
                hook.disabled(session);
                HookStatus::Negotiated
            }
            Some(hook) => hook.enabled(session),
            None => HookStatus::Negotiated,
        };
        match status {
            HookStatus::Negotiated => {}
            HookStatus::Negotiating => {
                session.caps.phase = NegotiationPhase::Negotiating;
                session.caps.negotiating.insert(name);
            }
            HookStatus::Failed => {
                warn!(capability = %name, "capability setup failed, asking to disable it");
                let disable = format!("{}{}", DISABLED_PREFIX, name);
                session.send(Message::new("CAP", ["REQ", disable.as_str()]))?;
                session.caps.requested.insert(name);
            }
        }
    }

    check_end(session)
}

fn reject<'a>(session: &mut Session, tokens: impl Iterator<Item = &'a str>) -> Result<()> {
    for raw in tokens {
        let token = CapToken::parse(raw);
        session.caps.requested.remove(&token.name);
        session.caps.capabilities.insert(token.name, CapStatus::Disabled);
    }
    check_end(session)
}

fn remove<'a>(session: &mut Session, tokens: impl Iterator<Item = &'a str>) -> Result<()> {
    let hooks = Arc::clone(&session.hooks);
    for raw in tokens {
        let name = CapToken::parse(raw).name;
        if session.caps.is_enabled(&name) {
            if let Some(hook) = hooks.get(&name) {
                hook.disabled(session);
            }
        }
        session.caps.requested.remove(&name);
        session.caps.negotiating.remove(&name);
        // Forgotten entirely so a later NEW offers it again.
        session.caps.capabilities.remove(&name);
    }
    check_end(session)
}

/// A multi-round capability finished.
pub fn negotiated(session: &mut Session, name: &str) -> Result<()> {
    session.caps.negotiating.remove(name);
    check_end(session)
}

/// `410 ERR_INVALIDCAPCMD`: give up on negotiation.
pub fn handle_invalid_cap(session: &mut Session, msg: &Message) -> Result<()> {
    error!(
        "server rejected CAP subcommand {}, aborting capability negotiation",
        msg.param(1).unwrap_or("?")
    );
    session.caps.requested.clear();
    session.caps.negotiating.clear();
    check_end(session)
}

/// Whether a `421`/`451` is the server not knowing `CAP` at all.
pub fn is_cap_unsupported(msg: &Message) -> bool {
    [msg.param(0), msg.param(1)]
        .into_iter()
        .flatten()
        .any(|p| p.eq_ignore_ascii_case("CAP"))
}

fn check_end(session: &mut Session) -> Result<()> {
    if session.caps.end_sent || !session.caps.is_settled() {
        return Ok(());
    }
    session.caps.end_sent = true;
    session.caps.phase = NegotiationPhase::Ended;
    session.send(Message::new("CAP", ["END"]))?;
    let enabled = session.caps.enabled().map(str::to_owned).collect();
    session.emit(Event::CapabilitiesNegotiated { enabled });
    Ok(())
}
