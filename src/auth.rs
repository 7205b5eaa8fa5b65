//! SASL authentication during capability negotiation.
//!
//! The `sasl` capability hook starts an exchange when the server
//! acknowledges the capability and reports [`HookStatus::Negotiating`], which
//! keeps `CAP END` back until the exchange finishes. Success and failure
//! both mark the capability negotiated: a failed login leaves the
//! connection unauthenticated, it does not stop registration.
//!
//! Every round trip is bounded by the SASL timer. The timer is cancelled
//! when a challenge arrives and re-armed after every response; a timer
//! firing after the exchange ended is ignored.

use tracing::{debug, error, info, warn};

use crate::caps::{self, Availability, CapabilityHook, HookStatus};
use crate::engine::{Event, Session};
use crate::error::Result;
use crate::message::Message;
use crate::sasl::{
    authenticate_lines, client_for, decode_fragment, is_final_fragment, parse_mechanisms,
    select_mechanism, Mechanism, SaslMechanism, ABORT, EMPTY_PAYLOAD,
};
use crate::timer::TimerKind;

/// Capability name.
pub const SASL_CAPABILITY: &str = "sasl";

pub const RPL_LOGGEDIN: u16 = 900;
pub const RPL_LOGGEDOUT: u16 = 901;
pub const ERR_NICKLOCKED: u16 = 902;
pub const RPL_SASLSUCCESS: u16 = 903;
pub const ERR_SASLFAIL: u16 = 904;
pub const ERR_SASLTOOLONG: u16 = 905;
pub const ERR_SASLABORTED: u16 = 906;
pub const ERR_SASLALREADY: u16 = 907;
pub const RPL_SASLMECHS: u16 = 908;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Succeeded,
    Failed,
}

/// State of the SASL exchange on one connection.
#[derive(Default)]
pub struct AuthSession {
    /// Mechanisms the server offered, when it said.
    offered: Option<Vec<SaslMechanism>>,
    mechanism: Option<SaslMechanism>,
    client: Option<Box<dyn Mechanism>>,
    /// Decoded challenge fragments received so far.
    challenge: Vec<u8>,
    active: bool,
    account: Option<String>,
    outcome: Option<AuthOutcome>,
}

impl AuthSession {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mechanism(&self) -> Option<&SaslMechanism> {
        self.mechanism.as_ref()
    }

    pub fn offered(&self) -> Option<&[SaslMechanism]> {
        self.offered.as_deref()
    }

    /// Account name reported by `RPL_LOGGEDIN`.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn outcome(&self) -> Option<AuthOutcome> {
        self.outcome
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("mechanism", &self.mechanism)
            .field("active", &self.active)
            .field("account", &self.account)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// Hook for the `sasl` capability.
#[derive(Clone, Copy, Debug, Default)]
pub struct SaslHook;

impl CapabilityHook for SaslHook {
    fn available(&self, session: &mut Session, value: Option<&str>) -> Availability {
        session.auth.offered = value.map(parse_mechanisms);
        match &session.config().sasl {
            Some(config) if config.is_usable() => Availability::Supported,
            _ => Availability::Unsupported,
        }
    }

    fn enabled(&self, session: &mut Session) -> HookStatus {
        let Some(config) = session.config().sasl.clone() else {
            return HookStatus::Failed;
        };
        let chosen = select_mechanism(&config, session.auth.offered.as_deref())
            .and_then(|mechanism| client_for(&mechanism, &config).map(|client| (mechanism, client)));
        let (mechanism, client) = match chosen {
            Ok(chosen) => chosen,
            Err(e) => {
                warn!("not authenticating: {}", e);
                return HookStatus::Failed;
            }
        };
        match begin(session, mechanism, client) {
            Ok(()) => HookStatus::Negotiating,
            Err(e) => {
                error!("failed to start SASL: {}", e);
                HookStatus::Failed
            }
        }
    }

    fn disabled(&self, session: &mut Session) {
        session.timers.cancel(&TimerKind::Sasl);
        session.auth.client = None;
        if std::mem::take(&mut session.auth.active) {
            warn!("sasl removed during an exchange, continuing unauthenticated");
            if let Err(e) = caps::negotiated(session, SASL_CAPABILITY) {
                error!("failed to finish capability negotiation: {}", e);
            }
        }
    }
}

fn begin(session: &mut Session, mechanism: SaslMechanism, client: Box<dyn Mechanism>) -> Result<()> {
    debug!(mechanism = %mechanism, "starting SASL");
    session.send(Message::new("AUTHENTICATE", [mechanism.as_str()]))?;
    let auth = &mut session.auth;
    auth.mechanism = Some(mechanism);
    auth.client = Some(client);
    auth.challenge.clear();
    auth.active = true;
    auth.outcome = None;
    let timeout = session.config().sasl_timeout;
    session.timers.arm(TimerKind::Sasl, timeout);
    Ok(())
}

/// `AUTHENTICATE` from the server: one challenge fragment.
pub fn handle_authenticate(session: &mut Session, msg: &Message) -> Result<()> {
    if !session.auth.active {
        debug!("AUTHENTICATE outside of an exchange, ignoring");
        return Ok(());
    }
    session.timers.cancel(&TimerKind::Sasl);

    let fragment = msg.params.join(" ");
    if fragment != EMPTY_PAYLOAD {
        match decode_fragment(&fragment) {
            Ok(bytes) => session.auth.challenge.extend(bytes),
            Err(e) => return abort(session, &e.to_string()),
        }
    }

    if is_final_fragment(&fragment) {
        respond(session)
    } else {
        let timeout = session.config().sasl_timeout;
        session.timers.arm(TimerKind::Sasl, timeout);
        Ok(())
    }
}

fn respond(session: &mut Session) -> Result<()> {
    let challenge = std::mem::take(&mut session.auth.challenge);
    let response = match session.auth.client.as_mut() {
        Some(client) => client.respond(&challenge),
        None => Ok(Vec::new()),
    };
    let payload = match response {
        Ok(payload) => payload,
        Err(e) => return abort(session, &format!("challenge processing failed: {}", e)),
    };
    for line in authenticate_lines(&payload) {
        session.send(Message::new("AUTHENTICATE", [line]))?;
    }
    let timeout = session.config().sasl_timeout;
    session.timers.arm(TimerKind::Sasl, timeout);
    Ok(())
}

/// The SASL timer fired.
pub fn handle_timeout(session: &mut Session) -> Result<()> {
    if !session.auth.active {
        return Ok(());
    }
    abort(session, "timed out")
}

/// SASL numerics (900-908).
pub fn handle_numeric(session: &mut Session, msg: &Message) -> Result<()> {
    let Some(code) = msg.command.numeric() else {
        return Ok(());
    };
    match code {
        RPL_LOGGEDIN => {
            session.auth.account = msg.param(2).map(str::to_owned);
            info!(account = ?session.auth.account, "logged in");
            Ok(())
        }
        RPL_LOGGEDOUT => {
            session.auth.account = None;
            Ok(())
        }
        RPL_SASLSUCCESS => {
            if !session.auth.active {
                return Ok(());
            }
            finish(session, AuthOutcome::Succeeded)
        }
        ERR_NICKLOCKED | ERR_SASLFAIL | ERR_SASLTOOLONG => {
            if !session.auth.active {
                return Ok(());
            }
            let reason = msg.trailing().unwrap_or("authentication failed").to_owned();
            abort(session, &reason)
        }
        RPL_SASLMECHS => {
            session.auth.offered = msg.param(1).map(parse_mechanisms);
            Ok(())
        }
        ERR_SASLABORTED | ERR_SASLALREADY => Ok(()),
        _ => Ok(()),
    }
}

fn abort(session: &mut Session, reason: &str) -> Result<()> {
    error!("SASL authentication aborted: {}", reason);
    session.timers.cancel(&TimerKind::Sasl);
    session.send(Message::new("AUTHENTICATE", [ABORT]))?;
    finish(session, AuthOutcome::Failed)?;
    session.emit(Event::AuthenticationFailed {
        reason: reason.to_owned(),
    });
    Ok(())
}

fn finish(session: &mut Session, outcome: AuthOutcome) -> Result<()> {
    session.timers.cancel(&TimerKind::Sasl);
    let auth = &mut session.auth;
    auth.active = false;
    auth.client = None;
    auth.challenge.clear();
    auth.outcome = Some(outcome);
    if outcome == AuthOutcome::Succeeded {
        let account = auth.account.clone();
        session.emit(Event::Authenticated { account });
    }
    caps::negotiated(session, SASL_CAPABILITY)
}
