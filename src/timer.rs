//! Cancellable timers owned by one session.
//!
//! Each [`TimerKind`] has at most one pending deadline. Arming a kind that is
//! already pending moves its deadline; cancelling a kind that is not pending
//! does nothing. All timers of a connection are dropped together with
//! [`Timers::clear`] when it goes away.

use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;

use tokio_util::time::{delay_queue, DelayQueue};

use crate::correlate::QueryKind;

/// What a timer guards.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// One SASL round trip.
    Sasl,
    /// Silence from the server.
    Ping,
    /// A correlated request, keyed like the correlator keys it.
    Request(QueryKind, String),
}

#[derive(Default)]
pub struct Timers {
    queue: DelayQueue<TimerKind>,
    keys: HashMap<TimerKind, delay_queue::Key>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `kind` after `after`, replacing any pending deadline for it.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        match self.keys.get(&kind) {
            Some(key) => self.queue.reset(key, after),
            None => {
                let key = self.queue.insert(kind.clone(), after);
                self.keys.insert(kind, key);
            }
        }
    }

    /// Returns whether a deadline was pending.
    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        match self.keys.remove(kind) {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.keys.contains_key(kind)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wait for the next timer to fire.
    ///
    /// Never resolves while nothing is armed. Cancel safe.
    pub async fn expired(&mut self) -> TimerKind {
        loop {
            if self.keys.is_empty() {
                std::future::pending::<()>().await;
            }
            let fired = poll_fn(|cx| self.queue.poll_expired(cx)).await;
            if let Some(expired) = fired {
                let kind = expired.into_inner();
                self.keys.remove(&kind);
                return kind;
            }
        }
    }
}
