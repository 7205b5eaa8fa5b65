//! WHOIS / WHOWAS request correlation.
//!
//! The server answers one query with a stream of numerics of unknown
//! length. The correlator keeps one accumulator per outstanding
//! `(kind, target)`, folds partial replies into it and resolves a shared
//! result slot when the terminating numeric arrives. Asking again for a
//! target already in flight returns the same [`PendingReply`] without
//! touching the wire.
//!
//! A "no such nick" reply resolves to `Ok(None)`: not finding anyone is an
//! answer, not an error.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::{FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::casemap::CaseMapping;
use crate::engine::Session;
use crate::error::Result;
use crate::message::{Message, FORBIDDEN_CHARACTERS};
use crate::timer::TimerKind;

pub const RPL_AWAY: u16 = 301;
pub const RPL_WHOISREGNICK: u16 = 307;
pub const RPL_WHOISUSER: u16 = 311;
pub const RPL_WHOISSERVER: u16 = 312;
pub const RPL_WHOISOPERATOR: u16 = 313;
pub const RPL_WHOWASUSER: u16 = 314;
pub const RPL_WHOISIDLE: u16 = 317;
pub const RPL_ENDOFWHOIS: u16 = 318;
pub const RPL_WHOISCHANNELS: u16 = 319;
pub const RPL_WHOISACCOUNT: u16 = 330;
pub const RPL_WHOISHOST: u16 = 378;
pub const RPL_ENDOFWHOWAS: u16 = 369;
pub const RPL_WHOISSECURE: u16 = 671;
pub const ERR_NOSUCHNICK: u16 = 401;
pub const ERR_NOSUCHSERVER: u16 = 402;
pub const ERR_WASNOSUCHNICK: u16 = 406;

/// Numerics the correlator consumes.
pub const REPLY_NUMERICS: [u16; 16] = [
    RPL_AWAY,
    RPL_WHOISREGNICK,
    RPL_WHOISUSER,
    RPL_WHOISSERVER,
    RPL_WHOISOPERATOR,
    RPL_WHOWASUSER,
    RPL_WHOISIDLE,
    RPL_ENDOFWHOIS,
    RPL_WHOISCHANNELS,
    RPL_WHOISACCOUNT,
    RPL_WHOISHOST,
    RPL_ENDOFWHOWAS,
    RPL_WHOISSECURE,
    ERR_NOSUCHNICK,
    ERR_NOSUCHSERVER,
    ERR_WASNOSUCHNICK,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueryKind {
    Whois,
    Whowas,
}

impl QueryKind {
    pub fn command(self) -> &'static str {
        match self {
            QueryKind::Whois => "WHOIS",
            QueryKind::Whowas => "WHOWAS",
        }
    }
}

/// Everything learned about a user from one query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserInfo {
    pub nickname: String,
    pub username: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub server: Option<String>,
    pub server_info: Option<String>,
    pub oper: bool,
    /// Seconds idle.
    pub idle: Option<u64>,
    pub away: bool,
    pub away_message: Option<String>,
    pub channels: Vec<String>,
    /// Services account the user is identified to.
    pub account: Option<String>,
    /// Identified to services (`307`, or an account from `330`).
    pub identified: bool,
    /// Host the user actually connects from (`378`).
    pub real_hostname: Option<String>,
    pub real_ip_address: Option<String>,
    /// Connected over TLS.
    pub secure: bool,
}

impl UserInfo {
    fn new(nickname: &str) -> Self {
        UserInfo {
            nickname: nickname.to_owned(),
            ..UserInfo::default()
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    #[error("request timed out")]
    TimedOut,
    #[error("connection closed before the reply arrived")]
    Closed,
}

/// Outcome of a query.
pub type Reply = std::result::Result<Option<UserInfo>, RequestError>;

/// Handle to a query result. Clones resolve together.
#[derive(Clone)]
pub struct PendingReply {
    inner: Shared<oneshot::Receiver<Reply>>,
}

impl PendingReply {
    fn channel() -> (oneshot::Sender<Reply>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, PendingReply { inner: rx.shared() })
    }

    fn ready(reply: Reply) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(reply);
        pending
    }

    /// A reply that already failed.
    pub(crate) fn failed(error: RequestError) -> Self {
        Self::ready(Err(error))
    }

    /// Whether both handles belong to the same query.
    pub fn same_request(&self, other: &PendingReply) -> bool {
        Shared::ptr_eq(&self.inner, &other.inner)
    }

    /// The result, if already resolved.
    pub fn peek(&self) -> Option<Reply> {
        self.clone().now_or_never()
    }
}

impl Future for PendingReply {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Reply> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RequestError::Closed)))
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").finish_non_exhaustive()
    }
}

struct Pending {
    info: UserInfo,
    sender: oneshot::Sender<Reply>,
    reply: PendingReply,
}

/// Outcome of [`RequestCorrelator::register`].
#[derive(Debug)]
pub enum Registration {
    /// A new query; the caller sends it.
    New(PendingReply),
    /// Joined a query already in flight.
    Existing(PendingReply),
    /// The target can never match; resolved to `None`.
    Rejected(PendingReply),
}

impl Registration {
    pub fn into_reply(self) -> PendingReply {
        match self {
            Registration::New(reply)
            | Registration::Existing(reply)
            | Registration::Rejected(reply) => reply,
        }
    }
}

/// Outstanding queries keyed by kind and case-folded target.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: HashMap<(QueryKind, String), Pending>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_pending(&self, kind: QueryKind, target: &str, casemap: CaseMapping) -> bool {
        self.pending.contains_key(&(kind, casemap.fold(target)))
    }

    /// Record interest in `(kind, target)`.
    pub fn register(&mut self, kind: QueryKind, target: &str, casemap: CaseMapping) -> Registration {
        if !is_valid_target(target) {
            debug!(nick = target, "not querying an invalid target");
            return Registration::Rejected(PendingReply::ready(Ok(None)));
        }
        let key = (kind, casemap.fold(target));
        if let Some(pending) = self.pending.get(&key) {
            return Registration::Existing(pending.reply.clone());
        }
        let (sender, reply) = PendingReply::channel();
        self.pending.insert(
            key,
            Pending {
                info: UserInfo::new(target),
                sender,
                reply: reply.clone(),
            },
        );
        Registration::New(reply)
    }

    /// Fold a partial reply into the accumulator, if one is pending.
    pub fn update(
        &mut self,
        kind: QueryKind,
        target: &str,
        casemap: CaseMapping,
        apply: impl FnOnce(&mut UserInfo),
    ) -> bool {
        match self.pending.get_mut(&(kind, casemap.fold(target))) {
            Some(pending) => {
                apply(&mut pending.info);
                true
            }
            None => false,
        }
    }

    /// Resolve with the accumulated record, or with `None` when `found` is
    /// false. Returns whether anything was pending.
    pub fn complete(&mut self, kind: QueryKind, target: &str, casemap: CaseMapping, found: bool) -> bool {
        let key = (kind, casemap.fold(target));
        match self.pending.remove(&key) {
            Some(pending) => {
                let result = found.then_some(pending.info);
                let _ = pending.sender.send(Ok(result));
                true
            }
            None => false,
        }
    }

    /// Fail one query. Keys are already folded.
    pub(crate) fn fail_key(&mut self, kind: QueryKind, key: &str, error: RequestError) -> bool {
        match self.pending.remove(&(kind, key.to_owned())) {
            Some(pending) => {
                let _ = pending.sender.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding query.
    pub fn fail_all(&mut self, error: RequestError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.sender.send(Err(error.clone()));
        }
    }
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.pending.keys()).finish()
    }
}

/// Whether `target` can be sent as a single WHOIS/WHOWAS argument.
pub fn is_valid_target(target: &str) -> bool {
    !target.is_empty()
        && !target.starts_with(':')
        && !target
            .chars()
            .any(|c| c.is_whitespace() || c == ',' || FORBIDDEN_CHARACTERS.contains(&c))
}

/// Start (or join) a query and arm its timeout.
pub fn request(session: &mut Session, kind: QueryKind, target: &str) -> Result<PendingReply> {
    let casemap = session.server.casemapping;
    match session.requests.register(kind, target, casemap) {
        Registration::New(reply) => {
            if let Err(e) = session.send(Message::new(kind.command(), [target])) {
                session.requests.fail_key(kind, &casemap.fold(target), RequestError::Closed);
                return Err(e);
            }
            let timeout = session.config().request_timeout;
            session
                .timers
                .arm(TimerKind::Request(kind, casemap.fold(target)), timeout);
            Ok(reply)
        }
        other => Ok(other.into_reply()),
    }
}

/// A request timer fired.
pub fn handle_timeout(session: &mut Session, kind: QueryKind, key: &str) {
    if session.requests.fail_key(kind, key, RequestError::TimedOut) {
        warn!(query = kind.command(), nick = key, "request timed out");
    }
}

/// Fail everything outstanding when the connection goes away.
pub fn close(session: &mut Session) {
    session.requests.fail_all(RequestError::Closed);
}

/// WHOIS/WHOWAS numerics.
pub fn handle_reply(session: &mut Session, msg: &Message) -> Result<()> {
    let (Some(code), Some(nick)) = (msg.command.numeric(), msg.param(1)) else {
        return Ok(());
    };
    let casemap = session.server.casemapping;
    let requests = &mut session.requests;
    let param = |i: usize| msg.param(i).map(str::to_owned);

    let finished = match code {
        RPL_AWAY => {
            requests.update(QueryKind::Whois, nick, casemap, |info| {
                info.away = true;
                info.away_message = param(2);
            });
            None
        }
        RPL_WHOISUSER | RPL_WHOWASUSER => {
            let kind = if code == RPL_WHOISUSER {
                QueryKind::Whois
            } else {
                QueryKind::Whowas
            };
            requests.update(kind, nick, casemap, |info| {
                info.username = param(2);
                info.hostname = param(3);
                info.realname = param(5);
            });
            None
        }
        RPL_WHOISSERVER => {
            for kind in [QueryKind::Whois, QueryKind::Whowas] {
                requests.update(kind, nick, casemap, |info| {
                    info.server = param(2);
                    info.server_info = param(3);
                });
            }
            None
        }
        RPL_WHOISOPERATOR => {
            requests.update(QueryKind::Whois, nick, casemap, |info| info.oper = true);
            None
        }
        RPL_WHOISIDLE => {
            let idle = msg.param(2).and_then(|s| s.parse().ok());
            requests.update(QueryKind::Whois, nick, casemap, |info| info.idle = idle);
            None
        }
        RPL_WHOISCHANNELS => {
            let channels = msg.param(2).unwrap_or_default();
            requests.update(QueryKind::Whois, nick, casemap, |info| {
                info.channels
                    .extend(channels.split_whitespace().map(str::to_owned));
            });
            None
        }
        RPL_WHOISREGNICK => {
            requests.update(QueryKind::Whois, nick, casemap, |info| info.identified = true);
            None
        }
        RPL_WHOISACCOUNT => {
            requests.update(QueryKind::Whois, nick, casemap, |info| {
                info.account = param(2);
                info.identified = true;
            });
            None
        }
        RPL_WHOISHOST => {
            // "is connecting from *@host 192.0.2.1": the last two words.
            let mut words = msg.param(2).unwrap_or_default().split_whitespace().rev();
            let ip = words.next().map(str::to_owned);
            let host = words
                .next()
                .map(|h| h.rsplit_once('@').map_or(h, |(_, host)| host).to_owned());
            requests.update(QueryKind::Whois, nick, casemap, |info| {
                info.real_ip_address = ip;
                info.real_hostname = host;
            });
            None
        }
        RPL_WHOISSECURE => {
            requests.update(QueryKind::Whois, nick, casemap, |info| info.secure = true);
            None
        }
        RPL_ENDOFWHOIS => Some((QueryKind::Whois, true)),
        RPL_ENDOFWHOWAS => Some((QueryKind::Whowas, true)),
        ERR_NOSUCHNICK | ERR_NOSUCHSERVER => Some((QueryKind::Whois, false)),
        ERR_WASNOSUCHNICK => Some((QueryKind::Whowas, false)),
        _ => None,
    };

    if let Some((kind, found)) = finished {
        if session.requests.complete(kind, nick, casemap, found) {
            session
                .timers
                .cancel(&TimerKind::Request(kind, casemap.fold(nick)));
        }
    }
    Ok(())
}
