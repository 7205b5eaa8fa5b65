//! The protocol engine.
//!
//! An [`Engine`] owns one connection at a time together with the
//! [`Session`] state, and drives everything from a single task: inbound
//! lines, the outbound queue and its throttle, session timers, and requests
//! from [`EngineHandle`]s. Handlers never block; they mutate the session and
//! queue lines, which the loop moves to the socket.
//!
//! ```no_run
//! use slirc_engine::config::EngineConfig;
//! use slirc_engine::engine::{EngineBuilder, Event};
//! use slirc_engine::message::Message;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = EngineConfig::new("irc.libera.chat", "slirc-bot");
//! config.channels.push("#slirc".to_owned());
//!
//! let (mut engine, handle) = EngineBuilder::new(config).build();
//! let mut events = handle.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let Event::Registered { .. } = event {
//!             let _ = handle.send(Message::new("PRIVMSG", ["#slirc", "hello"]));
//!         }
//!     }
//! });
//! engine.run().await?;
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

mod dispatch;
mod handlers;
mod session;

pub use self::dispatch::{Handler, HandlerFn, HandlerRegistry};
pub use self::handlers::{fallback_nickname, install as install_default_handlers};
pub use self::session::{Disconnect, Session, EVENT_CAPACITY};

use crate::auth::{self, SaslHook, SASL_CAPABILITY};
use crate::caps::{CapabilityHook, CapabilityRegistry};
use crate::config::EngineConfig;
use crate::correlate::{self, PendingReply, QueryKind, RequestError};
use crate::error::ProtocolError;
use crate::message::{Command, Decoder, Message, ParsedLine, FORBIDDEN_CHARACTERS};
use crate::sasl::{SaslMechanism, ABORT, EMPTY_PAYLOAD};
use crate::timer::TimerKind;
use crate::transport::{ConnectError, Connection, WriteSide};

/// Priority of the built-in `sasl` hook; requested ahead of plain capabilities.
pub const SASL_PRIORITY: i32 = 10;

/// Bound on flushing `QUIT` before closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// What subscribers see.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// Transport is up; registration starts.
    Connected { endpoint: String },
    /// Every received message, before its handlers run.
    Message(Arc<Message>),
    CapabilitiesNegotiated { enabled: Vec<String> },
    Authenticated { account: Option<String> },
    AuthenticationFailed { reason: String },
    /// The server accepted registration under `nickname`.
    Registered { nickname: String },
    Disconnected { reason: Disconnect },
    /// About to wait `delay` before reconnect attempt `attempt`.
    Reconnecting { attempt: u32, delay: Duration },
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("gave up reconnecting after {attempts} attempts")]
    GaveUp { attempts: u32 },

    /// The engine was dropped or is not running.
    #[error("engine is not running")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

enum Request {
    Line(String),
    Query {
        kind: QueryKind,
        target: String,
        reply: oneshot::Sender<Result<PendingReply, ProtocolError>>,
    },
    Quit(Option<String>),
}

/// Cloneable entry point into a running engine.
///
/// Everything goes through the engine's own task, so calls are safe from
/// any task or thread.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<Event>,
    running: watch::Receiver<bool>,
}

impl EngineHandle {
    /// Validate and queue a message.
    pub fn send(&self, msg: Message) -> Result<(), EngineError> {
        let line = msg.construct(false)?;
        self.submit(Request::Line(line))
    }

    /// Queue a pre-formatted line, skipping grammar and length checks.
    pub fn send_raw(&self, line: impl Into<String>) -> Result<(), EngineError> {
        let line = line.into();
        let body = line.trim_end_matches(['\r', '\n']);
        if let Some(c) = body.chars().find(|c| FORBIDDEN_CHARACTERS.contains(c)) {
            return Err(ProtocolError::IllegalControlChar(c).into());
        }
        self.submit(Request::Line(line))
    }

    /// Query a user. Concurrent queries for the same nickname share one reply.
    pub async fn whois(&self, nick: &str) -> Result<PendingReply, EngineError> {
        self.query(QueryKind::Whois, nick).await
    }

    /// Query a user that has left.
    pub async fn whowas(&self, nick: &str) -> Result<PendingReply, EngineError> {
        self.query(QueryKind::Whowas, nick).await
    }

    /// Fails with [`EngineError::Closed`] unless [`Engine::run`] is in progress.
    async fn query(&self, kind: QueryKind, target: &str) -> Result<PendingReply, EngineError> {
        let (reply, pending) = oneshot::channel();
        let mut running = self.running.clone();
        self.submit(Request::Query {
            kind,
            target: target.to_owned(),
            reply,
        })?;
        tokio::select! {
            biased;
            reply = pending => Ok(reply.map_err(|_| EngineError::Closed)??),
            _ = running.wait_for(|running| !*running) => Err(EngineError::Closed),
        }
    }

    /// Send `QUIT` and disconnect without reconnecting.
    pub fn quit(&self, reason: Option<&str>) -> Result<(), EngineError> {
        self.submit(Request::Quit(reason.map(str::to_owned)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn submit(&self, request: Request) -> Result<(), EngineError> {
        self.requests.send(request).map_err(|_| EngineError::Closed)
    }
}

/// Assembles an engine from a configuration, capability hooks and raw
/// handlers.
pub struct EngineBuilder {
    config: EngineConfig,
    hooks: CapabilityRegistry,
    handlers: HandlerRegistry,
    event_capacity: usize,
}

impl EngineBuilder {
    /// Default capabilities, SASL and the built-in handlers.
    pub fn new(config: EngineConfig) -> Self {
        let mut hooks = CapabilityRegistry::with_defaults(&config);
        hooks.register(SASL_CAPABILITY, SASL_PRIORITY, Arc::new(SaslHook));
        let mut handlers = HandlerRegistry::new();
        handlers::install(&mut handlers);
        EngineBuilder {
            config,
            hooks,
            handlers,
            event_capacity: EVENT_CAPACITY,
        }
    }

    /// Request `name` and attach `hook` to it.
    #[must_use]
    pub fn capability(mut self, name: &str, priority: i32, hook: Arc<dyn CapabilityHook>) -> Self {
        self.hooks.register(name, priority, hook);
        self
    }

    /// Add a raw handler. Built-in handlers run at priority 0.
    #[must_use]
    pub fn handler<C, F>(mut self, command: C, priority: i32, handler: F) -> Self
    where
        C: Into<Command>,
        F: Fn(&mut Session, &Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.on(command, priority, handler);
        self
    }

    /// Mark a command as known so it skips the unknown-command sink.
    #[must_use]
    pub fn ignore(mut self, command: impl Into<Command>) -> Self {
        self.handlers.ignore(command);
        self
    }

    /// Events buffered per subscriber.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> (Engine, EngineHandle) {
        let decoder = Decoder::for_label(&self.config.encoding).unwrap_or_else(|| {
            warn!(encoding = %self.config.encoding, "unknown encoding, using UTF-8");
            Decoder::default()
        });
        let (events, _) = broadcast::channel(self.event_capacity);
        let (requests, inbox) = mpsc::unbounded_channel();
        let (running, running_rx) = watch::channel(false);
        let handle = EngineHandle {
            requests,
            events,
            running: running_rx,
        };
        let session = Session::with_events(
            Arc::new(self.config),
            Arc::new(self.hooks),
            handle.events.clone(),
        );
        let engine = Engine {
            session,
            handlers: self.handlers,
            decoder,
            inbox,
            running,
            handle: handle.clone(),
        };
        (engine, handle)
    }
}

/// One client connection, reconnected as configured.
pub struct Engine {
    session: Session,
    handlers: HandlerRegistry,
    decoder: Decoder,
    inbox: mpsc::UnboundedReceiver<Request>,
    running: watch::Sender<bool>,
    handle: EngineHandle,
}

impl Engine {
    /// Engine with the default hooks and handlers.
    pub fn new(config: EngineConfig) -> (Engine, EngineHandle) {
        EngineBuilder::new(config).build()
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Connect and run until the connection ends for good.
    ///
    /// Returns `Ok` after a requested quit. A failed initial connect, a
    /// fatal TLS error or running out of reconnect attempts is an error. The
    /// engine can be run again afterwards.
    #[instrument(skip(self), fields(server = %self.session.config().server.host))]
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.running.send_replace(true);
        let outcome = self.run_connections().await;
        self.running.send_replace(false);
        self.turn_away_pending();
        outcome
    }

    async fn run_connections(&mut self) -> Result<(), EngineError> {
        self.session.reconnect.reset();
        let mut connection = self.connect().await?;
        loop {
            match self.drive(connection).await {
                Disconnect::Expected => return Ok(()),
                Disconnect::Unexpected(reason) => error!("connection lost: {}", reason),
            }
            connection = match self.reconnect().await? {
                Some(connection) => connection,
                None => return Ok(()),
            };
        }
    }

    async fn connect(&mut self) -> Result<Connection, EngineError> {
        let config = self.session.config_handle();
        let server = &config.server;
        info!(host = %server.host, port = server.port, tls = server.tls.is_some(), "connecting");
        Ok(Connection::connect(server, config.connect_timeout, &config.throttle).await?)
    }

    /// Wait out the policy and dial again. `None` when quit during a wait.
    async fn reconnect(&mut self) -> Result<Option<Connection>, EngineError> {
        loop {
            let attempt = self.session.reconnect.attempts() + 1;
            let Some(delay) = self.session.reconnect.next_delay() else {
                let attempts = self.session.reconnect.attempts();
                error!(attempts, "giving up reconnecting");
                return Err(EngineError::GaveUp { attempts });
            };
            error!(attempt, "unexpected disconnect, reconnecting in {} s", delay.as_secs());
            self.session.emit(Event::Reconnecting { attempt, delay });
            if !self.wait(delay).await {
                return Ok(None);
            }
            match self.connect().await {
                Ok(connection) => return Ok(Some(connection)),
                Err(EngineError::Connect(e)) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!(attempt, "reconnect failed: {}", e),
            }
        }
    }

    /// Answer whatever the handles queued after the last connection ended.
    fn turn_away_pending(&mut self) {
        while let Ok(request) = self.inbox.try_recv() {
            match request {
                Request::Query { reply, .. } => {
                    let _ = reply.send(Ok(PendingReply::failed(RequestError::Closed)));
                }
                Request::Line(line) => warn!("not running, dropping: {}", line.trim_end()),
                Request::Quit(_) => {}
            }
        }
    }

    /// Sleep while disconnected, turning away requests. False on quit.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                Some(request) = self.inbox.recv() => match request {
                    Request::Quit(_) => return false,
                    Request::Query { reply, .. } => {
                        let _ = reply.send(Ok(PendingReply::failed(RequestError::Closed)));
                    }
                    Request::Line(line) => warn!("not connected, dropping: {}", line.trim_end()),
                },
            }
        }
    }

    /// Run one connection to its end.
    async fn drive(&mut self, mut connection: Connection) -> Disconnect {
        let endpoint = connection.endpoint().to_owned();
        info!(%endpoint, "connected");
        self.session.reset_connection();
        self.session.emit(Event::Connected { endpoint });
        let ping_timeout = self.session.config().ping_timeout;
        self.session.timers.arm(TimerKind::Ping, ping_timeout);

        let reason = match handlers::register(&mut self.session) {
            Ok(()) => self.pump(&mut connection).await,
            Err(e) => Disconnect::Unexpected(format!("registration failed: {}", e)),
        };

        self.session.timers.clear();
        correlate::close(&mut self.session);
        if reason == Disconnect::Expected {
            self.flush(&mut connection.writer);
            if timeout(CLOSE_TIMEOUT, connection.close()).await.is_err() {
                debug!("timed out flushing before close");
            }
            info!("disconnected");
        }
        self.session.emit(Event::Disconnected {
            reason: reason.clone(),
        });
        reason
    }

    async fn pump(&mut self, connection: &mut Connection) -> Disconnect {
        loop {
            self.flush(&mut connection.writer);
            if let Some(reason) = self.session.take_disconnect() {
                return reason;
            }
            let wants_write = connection.writer.wants_write();
            let held_until = connection.writer.throttle_deadline();

            tokio::select! {
                read = connection.reader.read_some() => match read {
                    Ok(0) => return Disconnect::Unexpected("connection closed by server".to_owned()),
                    Ok(_) => {
                        let ping_timeout = self.session.config().ping_timeout;
                        self.session.timers.arm(TimerKind::Ping, ping_timeout);
                        while let Some(line) = connection.reader.next_line() {
                            self.receive(&line);
                        }
                    }
                    Err(e) => return Disconnect::Unexpected(format!("read failed: {}", e)),
                },
                written = connection.writer.drain(), if wants_write => {
                    if let Err(e) = written {
                        return Disconnect::Unexpected(format!("write failed: {}", e));
                    }
                }
                _ = sleep_until(held_until.unwrap_or_else(Instant::now)), if held_until.is_some() => {
                    connection.writer.release_throttle();
                }
                fired = self.session.timers.expired() => self.on_timer(fired),
                Some(request) = self.inbox.recv() => self.on_request(request),
            }
        }
    }

    fn receive(&mut self, line: &Bytes) {
        let parsed = ParsedLine::parse_with(&self.decoder, line);
        if parsed.raw.trim().is_empty() {
            return;
        }
        debug!("<< {}", parsed.raw);
        if !parsed.valid {
            warn!("malformed message from server: {}", parsed.raw);
        }
        let msg = Arc::new(parsed.message);
        self.session.emit(Event::Message(Arc::clone(&msg)));
        self.handlers.dispatch(&mut self.session, &msg);
    }

    /// Move queued lines and throttle changes to the transport.
    fn flush(&mut self, writer: &mut WriteSide) {
        if let Some(enabled) = self.session.take_throttle() {
            writer.set_throttle(enabled);
        }
        for line in self.session.take_outbox() {
            debug!(">> {}", redact(line.trim_end()));
            writer.enqueue(Bytes::from(self.decoder.encode(&line).into_owned()));
        }
    }

    fn on_timer(&mut self, fired: TimerKind) {
        match fired {
            TimerKind::Sasl => {
                if let Err(e) = auth::handle_timeout(&mut self.session) {
                    error!("failed to abort SASL: {}", e);
                }
            }
            TimerKind::Ping => {
                let silence = self.session.config().ping_timeout;
                self.session.disconnect(Disconnect::Unexpected(format!(
                    "no data from server for {} s",
                    silence.as_secs()
                )));
            }
            TimerKind::Request(kind, key) => correlate::handle_timeout(&mut self.session, kind, &key),
        }
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Line(line) => {
                if let Err(e) = self.session.send_raw(&line) {
                    warn!("refusing to send line: {}", e);
                }
            }
            Request::Query { kind, target, reply } => {
                let _ = reply.send(correlate::request(&mut self.session, kind, &target));
            }
            Request::Quit(reason) => {
                if let Err(e) = self.session.send(Message::new("QUIT", reason)) {
                    warn!("failed to send QUIT: {}", e);
                }
                self.session.disconnect(Disconnect::Expected);
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Keep secrets out of the logs.
fn redact(line: &str) -> Cow<'_, str> {
    let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
    let secret = if command.eq_ignore_ascii_case("PASS") {
        true
    } else if command.eq_ignore_ascii_case("AUTHENTICATE") {
        argument != EMPTY_PAYLOAD && argument != ABORT && !SaslMechanism::parse(argument).is_supported()
    } else {
        false
    };
    if secret {
        format!("{} <redacted>", command).into()
    } else {
        line.into()
    }
}
