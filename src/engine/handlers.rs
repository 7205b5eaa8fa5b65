//! Built-in handlers: registration, keepalive, own nickname and modes, and
//! routing into the capability, SASL and correlation state machines.

use tracing::{debug, info, warn};

use super::dispatch::HandlerRegistry;
use super::session::Disconnect;
use super::{Event, Session};
use crate::auth::{self, RPL_LOGGEDIN, RPL_SASLMECHS};
use crate::caps;
use crate::config::EngineConfig;
use crate::correlate::{self, REPLY_NUMERICS};
use crate::error::Result;
use crate::isupport::{Isupport, RPL_ISUPPORT};
use crate::message::Message;
use crate::mode::{self, ModeMap};

pub const RPL_WELCOME: u16 = 1;
pub const RPL_YOURHOST: u16 = 2;
pub const RPL_CREATED: u16 = 3;
pub const RPL_MYINFO: u16 = 4;
pub const RPL_UMODEIS: u16 = 221;
pub const RPL_MOTDSTART: u16 = 375;
pub const ERR_INVALIDCAPCMD: u16 = 410;
pub const ERR_UNKNOWNCOMMAND: u16 = 421;
pub const ERR_NOMOTD: u16 = 422;
pub const ERR_ERRONEUSNICKNAME: u16 = 432;
pub const ERR_NICKNAMEINUSE: u16 = 433;
pub const ERR_NOTREGISTERED: u16 = 451;

/// Any of these means the server accepted our registration.
pub const REGISTRATION_NUMERICS: [u16; 6] = [
    RPL_WELCOME,
    RPL_YOURHOST,
    RPL_CREATED,
    RPL_MYINFO,
    RPL_MOTDSTART,
    ERR_NOMOTD,
];

/// Numerics with nothing for the engine to do.
const IGNORED_NUMERICS: [u16; 20] = [
    250, 251, 252, 253, 254, 255, 265, 266, // LUSERS
    315, 324, 329, 332, 333, 353, 366, // WHO, channel info, NAMES
    372, 376, // MOTD
    436, 462, // nick collision, already registered
    396, // displayed host
];

/// Commands left to subscribers, which see every message.
const FORWARDED_COMMANDS: [&str; 15] = [
    "PRIVMSG", "NOTICE", "TAGMSG", "JOIN", "PART", "KICK", "QUIT", "TOPIC", "INVITE", "KILL",
    "AWAY", "ACCOUNT", "CHGHOST", "SETNAME", "BATCH",
];

/// Install the built-in handlers at priority 0.
pub fn install(registry: &mut HandlerRegistry) {
    registry.on("PING", 0, on_ping);
    registry.on("ERROR", 0, on_error);
    registry.on("NICK", 0, on_nick);
    registry.on("MODE", 0, on_mode);
    registry.on(RPL_UMODEIS, 0, on_user_modes);
    registry.on(RPL_ISUPPORT, 0, on_isupport);
    for code in REGISTRATION_NUMERICS {
        registry.on(code, 0, on_registered);
    }
    for code in [ERR_ERRONEUSNICKNAME, ERR_NICKNAMEINUSE] {
        registry.on(code, 0, on_nick_refused);
    }

    registry.on("CAP", 0, |session, msg| Ok(caps::handle_cap(session, msg)?));
    registry.on(ERR_INVALIDCAPCMD, 0, |session, msg| {
        Ok(caps::handle_invalid_cap(session, msg)?)
    });
    for code in [ERR_UNKNOWNCOMMAND, ERR_NOTREGISTERED] {
        registry.on(code, 0, on_unknown_command);
    }

    registry.on("AUTHENTICATE", 0, |session, msg| {
        Ok(auth::handle_authenticate(session, msg)?)
    });
    for code in RPL_LOGGEDIN..=RPL_SASLMECHS {
        registry.on(code, 0, |session, msg| Ok(auth::handle_numeric(session, msg)?));
    }

    for code in REPLY_NUMERICS {
        registry.on(code, 0, |session, msg| Ok(correlate::handle_reply(session, msg)?));
    }

    for code in IGNORED_NUMERICS {
        registry.ignore(code);
    }
    for command in FORWARDED_COMMANDS {
        registry.ignore(command);
    }
}

/// Open registration on a fresh connection.
///
/// Pacing is off until the server welcomes us; `CAP LS` goes first so the
/// server holds registration until negotiation ends.
pub(crate) fn register(session: &mut Session) -> Result<()> {
    let config = session.config_handle();
    session.set_throttle(false);
    caps::start(session)?;
    if let Some(password) = &config.password {
        session.send(Message::new("PASS", [password.as_str()]))?;
    }
    session.send(Message::new("NICK", [config.nickname.as_str()]))?;
    session.send(Message::new(
        "USER",
        [config.username(), "0", "*", config.realname()],
    ))
}

/// Nickname for the `attempt`-th retry: the fallbacks in order, then the
/// primary nickname padded with one underscore per further attempt.
pub fn fallback_nickname(config: &EngineConfig, attempt: usize) -> String {
    match attempt
        .checked_sub(1)
        .and_then(|i| config.fallback_nicknames.get(i))
    {
        Some(nick) => nick.clone(),
        None => {
            let padding = attempt.saturating_sub(config.fallback_nicknames.len());
            format!("{}{}", config.nickname, "_".repeat(padding))
        }
    }
}

fn on_ping(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    session.send(Message::new("PONG", msg.params.iter().map(String::as_str)))?;
    Ok(())
}

fn on_error(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    let reason = msg.params.join(" ");
    warn!("server error: {}", reason);
    session.disconnect(Disconnect::Unexpected(format!("server error: {}", reason)));
    Ok(())
}

fn on_nick(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    let (Some(old), Some(new)) = (msg.source_nickname(), msg.param(0)) else {
        return Ok(());
    };
    if session.is_me(old) {
        info!(old, new, "nickname changed");
        session.set_nickname(new);
    }
    Ok(())
}

fn on_registered(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    if session.is_registered() {
        return Ok(());
    }
    session.set_registered();
    if let Some(nick) = msg.param(0) {
        session.set_nickname(nick);
    }
    session.set_throttle(true);
    session.reconnect.reset();

    let config = session.config_handle();
    for channel in &config.channels {
        session.send(Message::new("JOIN", [channel.as_str()]))?;
    }
    let nickname = session.nickname().to_owned();
    info!(%nickname, "registered");
    session.emit(Event::Registered { nickname });
    Ok(())
}

fn on_nick_refused(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    if session.is_registered() {
        debug!("nickname refused: {}", msg);
        return Ok(());
    }
    let attempt = session.next_nick_attempt();
    let nick = fallback_nickname(session.config(), attempt);
    warn!(
        refused = msg.param(1).unwrap_or_default(),
        next = %nick,
        "nickname refused, trying another"
    );
    session.set_nickname(&nick);
    session.send(Message::new("NICK", [nick]))?;
    Ok(())
}

fn on_isupport(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    if let Some(isupport) = Isupport::from_message(msg) {
        session.server.update(&isupport);
    }
    Ok(())
}

/// `221 RPL_UMODEIS`: the complete set of our modes.
fn on_user_modes(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    apply_user_modes(session, msg, &ModeMap::new())
}

fn on_mode(session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    match msg.param(0) {
        Some(target) if session.is_me(target) => {
            let current = session.user_modes().clone();
            apply_user_modes(session, msg, &current)
        }
        _ => Ok(()),
    }
}

fn apply_user_modes(session: &mut Session, msg: &Message, current: &ModeMap) -> anyhow::Result<()> {
    let tokens: Vec<&str> = msg.params.iter().skip(1).map(String::as_str).collect();
    let modes = mode::apply(&tokens, current, session.user_mode_table())?;
    session.set_user_modes(modes);
    Ok(())
}

/// `421`/`451`. A server without `CAP` support answers `CAP LS` this way and
/// registers us without negotiation.
fn on_unknown_command(_session: &mut Session, msg: &Message) -> anyhow::Result<()> {
    if caps::is_cap_unsupported(msg) {
        debug!("server does not support capability negotiation");
    } else {
        warn!("server rejected command: {}", msg);
    }
    Ok(())
}
