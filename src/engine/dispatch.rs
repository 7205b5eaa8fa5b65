//! Table-driven message dispatch.
//!
//! Handlers are registered per command with a priority; higher priorities
//! run first and equal priorities run in registration order. A command with
//! no entry goes to the unknown-command sink, which logs it. [`Handler::Ignore`]
//! marks a command as known but uninteresting.
//!
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers and later messages are still dispatched. A panic can
//! leave the session partway through that handler's update.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, warn};

use super::Session;
use crate::message::{Command, Message};

/// Signature of a raw message handler.
pub type HandlerFn = dyn Fn(&mut Session, &Message) -> anyhow::Result<()> + Send + Sync;

#[derive(Clone)]
pub enum Handler {
    Run(Arc<HandlerFn>),
    Ignore,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Run(_) => f.write_str("Run(..)"),
            Handler::Ignore => f.write_str("Ignore"),
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    priority: i32,
    handler: Handler,
}

/// Command to handlers map.
#[derive(Clone, Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Command, Vec<Entry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` for every `command` message.
    pub fn on<C, F>(&mut self, command: C, priority: i32, handler: F)
    where
        C: Into<Command>,
        F: Fn(&mut Session, &Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(command.into(), priority, Handler::Run(Arc::new(handler)));
    }

    /// Accept `command` without doing anything.
    pub fn ignore(&mut self, command: impl Into<Command>) {
        self.insert(command.into(), i32::MIN, Handler::Ignore);
    }

    fn insert(&mut self, command: Command, priority: i32, handler: Handler) {
        let entries = self.handlers.entry(command).or_default();
        entries.push(Entry { priority, handler });
        entries.sort_by_key(|entry| Reverse(entry.priority));
    }

    pub fn handles(&self, command: &Command) -> bool {
        self.handlers.contains_key(command)
    }

    /// Run every handler for `msg`. A failing handler is logged and the rest
    /// still run. Returns how many handlers ran.
    pub fn dispatch(&self, session: &mut Session, msg: &Message) -> usize {
        let Some(entries) = self.handlers.get(&msg.command) else {
            warn!(command = %msg.command, "unhandled message: {}", msg);
            return 0;
        };
        let mut ran = 0;
        for entry in entries {
            let Handler::Run(handler) = &entry.handler else {
                continue;
            };
            ran += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(session, msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(command = %msg.command, "handler failed: {:#}", e),
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("non-string payload");
                    error!(command = %msg.command, "handler panicked: {}", reason);
                }
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::caps::CapabilityRegistry;
    use crate::config::EngineConfig;
    use crate::message::ParsedLine;

    fn session() -> Session {
        let config = Arc::new(EngineConfig::new("irc.example.net", "bot"));
        Session::new(config, Arc::new(CapabilityRegistry::new()))
    }

    fn msg(line: &str) -> Message {
        ParsedLine::parse_str(line).message
    }

    #[test]
    fn test_priority_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for (priority, name) in [(0, "low"), (10, "high"), (0, "low-second")] {
            let order = Arc::clone(&order);
            registry.on("PRIVMSG", priority, move |_, _| {
                order.lock().unwrap().push(name);
                Ok(())
            });
        }

        let ran = registry.dispatch(&mut session(), &msg(":a PRIVMSG #c :hi"));
        assert_eq!(ran, 3);
        assert_eq!(*order.lock().unwrap(), ["high", "low", "low-second"]);
    }

    #[test]
    fn test_failure_is_isolated() {
        let mut registry = HandlerRegistry::new();
        registry.on("PING", 1, |_, _| anyhow::bail!("boom"));
        registry.on("PING", 0, |session, msg| {
            session.send(Message::new("PONG", msg.params.clone()))?;
            Ok(())
        });

        let mut session = session();
        assert_eq!(registry.dispatch(&mut session, &msg("PING :x")), 2);
        assert_eq!(session.take_outbox(), ["PONG x\r\n"]);
    }

    #[test]
    fn test_panic_is_isolated() {
        let mut registry = HandlerRegistry::new();
        registry.on("PING", 1, |_, _| panic!("handler bug"));
        registry.on("PING", 0, |session, msg| {
            session.send(Message::new("PONG", msg.params.clone()))?;
            Ok(())
        });

        let mut session = session();
        assert_eq!(registry.dispatch(&mut session, &msg("PING :x")), 2);
        assert_eq!(registry.dispatch(&mut session, &msg("PING :y")), 2);
        assert_eq!(session.take_outbox(), ["PONG x\r\n", "PONG y\r\n"]);
    }

    #[test]
    fn test_unknown_and_ignored() {
        let mut registry = HandlerRegistry::new();
        registry.ignore(372u16);
        let mut session = session();
        assert_eq!(registry.dispatch(&mut session, &msg(":irc 372 bot :- motd")), 0);
        assert_eq!(registry.dispatch(&mut session, &msg("FOO bar")), 0);
        assert!(registry.handles(&Command::Numeric(372)));
        assert!(!registry.handles(&Command::new("foo")));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = HandlerRegistry::new();
        registry.on("privmsg", 0, |_, _| Ok(()));
        assert_eq!(registry.dispatch(&mut session(), &msg(":a PRIVMSG #c :x")), 1);
    }
}
