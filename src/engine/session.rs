//! Per-engine protocol state.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::Event;
use crate::auth::AuthSession;
use crate::caps::{CapabilityRegistry, CapabilityState};
use crate::config::EngineConfig;
use crate::correlate::RequestCorrelator;
use crate::error::{ProtocolError, Result};
use crate::isupport::ServerInfo;
use crate::message::{Message, FORBIDDEN_CHARACTERS};
use crate::mode::{BehaviorTable, ModeMap};
use crate::reconnect::ReconnectPolicy;
use crate::timer::Timers;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Why a connection is being torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Asked for through the handle; never reconnects.
    Expected,
    /// Transport failure, server `ERROR` or ping timeout.
    Unexpected(String),
}

/// Everything the handlers of one engine read and mutate.
///
/// A session outlives its connections. [`Session::reset_connection`] drops
/// the state tied to a socket; configuration, hooks, the reconnect policy and
/// event subscribers carry over to the next connection.
pub struct Session {
    config: Arc<EngineConfig>,
    events: broadcast::Sender<Event>,
    outbox: Vec<String>,
    pub(crate) caps: CapabilityState,
    pub(crate) hooks: Arc<CapabilityRegistry>,
    pub(crate) auth: AuthSession,
    pub(crate) requests: RequestCorrelator,
    pub(crate) timers: Timers,
    pub(crate) reconnect: ReconnectPolicy,
    pub server: ServerInfo,
    nickname: String,
    nick_attempts: usize,
    registered: bool,
    user_modes: ModeMap,
    user_mode_table: BehaviorTable,
    throttle: Option<bool>,
    disconnect: Option<Disconnect>,
}

impl Session {
    pub fn new(config: Arc<EngineConfig>, hooks: Arc<CapabilityRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_events(config, hooks, events)
    }

    pub(crate) fn with_events(
        config: Arc<EngineConfig>,
        hooks: Arc<CapabilityRegistry>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Session {
            nickname: config.nickname.clone(),
            reconnect: ReconnectPolicy::new(&config.reconnect),
            config,
            events,
            outbox: Vec::new(),
            caps: CapabilityState::default(),
            hooks,
            auth: AuthSession::default(),
            requests: RequestCorrelator::new(),
            timers: Timers::new(),
            server: ServerInfo::default(),
            nick_attempts: 0,
            registered: false,
            user_modes: ModeMap::new(),
            user_mode_table: BehaviorTable::user_defaults(),
            throttle: None,
            disconnect: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn config_handle(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Publish to subscribers. Nobody listening is fine.
    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Validate and queue a message.
    pub fn send(&mut self, msg: Message) -> Result<()> {
        let line = msg.construct(false)?;
        self.outbox.push(line);
        Ok(())
    }

    /// Queue a pre-formatted line without grammar or length checks.
    ///
    /// Embedded CR, LF or NUL are still refused: they would split the line.
    pub fn send_raw(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(c) = line.chars().find(|c| FORBIDDEN_CHARACTERS.contains(c)) {
            return Err(ProtocolError::IllegalControlChar(c));
        }
        self.outbox.push(format!("{}\r\n", line));
        Ok(())
    }

    /// Lines queued since the last call, terminators included.
    pub fn take_outbox(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    pub fn capabilities(&self) -> &CapabilityState {
        &self.caps
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    /// Nickname in use, or being attempted before registration.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub(crate) fn set_nickname(&mut self, nickname: &str) {
        self.nickname = nickname.to_owned();
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub(crate) fn set_registered(&mut self) {
        self.registered = true;
    }

    /// Count one refused nickname and return the new attempt number.
    pub(crate) fn next_nick_attempt(&mut self) -> usize {
        self.nick_attempts += 1;
        self.nick_attempts
    }

    /// Our own user modes.
    pub fn user_modes(&self) -> &ModeMap {
        &self.user_modes
    }

    pub(crate) fn user_mode_table(&self) -> &BehaviorTable {
        &self.user_mode_table
    }

    pub(crate) fn set_user_modes(&mut self, modes: ModeMap) {
        self.user_modes = modes;
    }

    /// Whether `nick` is us under the server case mapping.
    pub fn is_me(&self, nick: &str) -> bool {
        self.server.casemapping.equals(nick, &self.nickname)
    }

    /// Ask the transport to turn send pacing on or off.
    pub(crate) fn set_throttle(&mut self, enabled: bool) {
        self.throttle = Some(enabled);
    }

    pub(crate) fn take_throttle(&mut self) -> Option<bool> {
        self.throttle.take()
    }

    /// Ask the engine to drop the connection. The first request wins.
    pub(crate) fn disconnect(&mut self, reason: Disconnect) {
        if self.disconnect.is_none() {
            self.disconnect = Some(reason);
        }
    }

    pub(crate) fn take_disconnect(&mut self) -> Option<Disconnect> {
        self.disconnect.take()
    }

    /// Forget everything tied to the previous socket.
    pub(crate) fn reset_connection(&mut self) {
        self.outbox.clear();
        self.caps.reset();
        self.auth.reset();
        self.timers.clear();
        self.server = ServerInfo::default();
        self.nickname = self.config.nickname.clone();
        self.nick_attempts = 0;
        self.registered = false;
        self.user_modes.clear();
        self.throttle = None;
        self.disconnect = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("nickname", &self.nickname)
            .field("registered", &self.registered)
            .field("caps", &self.caps)
            .field("auth", &self.auth)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}
