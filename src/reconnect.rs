//! Reconnection backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Decides whether and when to reconnect after an unexpected disconnect.
///
/// The n-th consecutive attempt waits `delays[n]`; past the end of the
/// schedule the last delay repeats. The counter resets when registration
/// succeeds. An expected disconnect never consults the policy.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    enabled: bool,
    max_attempts: Option<u32>,
    delays: Vec<Duration>,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        ReconnectPolicy {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            delays: config.delays.clone(),
            attempts: 0,
        }
    }

    /// Attempts made since the last successful registration.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, counting it, or `None` to give up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            return None;
        }
        let index = (self.attempts as usize).min(self.delays.len().saturating_sub(1));
        let delay = self.delays.get(index).copied().unwrap_or_default();
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(delays: &[u64], max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy::new(&ReconnectConfig {
            enabled: true,
            max_attempts,
            delays: delays.iter().map(|s| Duration::from_secs(*s)).collect(),
        })
    }

    #[test]
    fn test_last_delay_repeats() {
        let mut policy = policy(&[0, 5, 10], None);
        let delays: Vec<_> = (0..5).filter_map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            [0, 5, 10, 10, 10].map(Duration::from_secs)
        );
    }

    #[test]
    fn test_gives_up_at_cap() {
        let mut policy = policy(&[1], Some(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_disabled() {
        let mut policy = ReconnectPolicy::new(&ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn test_empty_schedule_reconnects_immediately() {
        let mut policy = policy(&[], None);
        assert_eq!(policy.next_delay(), Some(Duration::ZERO));
    }
}
