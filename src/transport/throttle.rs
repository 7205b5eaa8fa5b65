//! Outbound flood control.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ThrottleConfig;

/// Send pacing for one connection.
///
/// Up to `threshold` messages may go out back to back, each within `delay`
/// of the previous one. The next send is held until `delay` has passed since
/// the last one, after which the allowance starts over.
#[derive(Clone, Debug)]
pub struct Throttle {
    enabled: bool,
    threshold: u32,
    delay: Duration,
    unthrottled: u32,
    last_send: Option<Instant>,
    throttling: bool,
}

impl Throttle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Throttle {
            enabled: config.enabled,
            threshold: config.threshold,
            delay: config.delay,
            unthrottled: 0,
            last_send: None,
            throttling: false,
        }
    }

    /// Turn pacing on or off. Turning it off releases a pending hold.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.throttling = false;
        }
    }

    pub fn is_throttling(&self) -> bool {
        self.throttling
    }

    /// When the current hold ends.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.throttling {
            return None;
        }
        self.last_send.map(|last| last + self.delay)
    }

    /// Ask to start sending a message at `now`.
    ///
    /// Returns `None` when the message may go out, or the instant at which to
    /// try again. Engages throttling once the allowance is used up.
    pub fn poll(&mut self, now: Instant) -> Option<Instant> {
        if !self.enabled {
            return None;
        }
        let last = self.last_send?;
        let window_end = last + self.delay;
        if now >= window_end {
            self.throttling = false;
            self.unthrottled = 0;
            return None;
        }
        if self.throttling || self.unthrottled >= self.threshold {
            self.throttling = true;
            return Some(window_end);
        }
        None
    }

    /// Record a completed send.
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last_send {
            if now >= last + self.delay {
                self.unthrottled = 0;
            }
        }
        self.unthrottled = self.unthrottled.saturating_add(1);
        self.last_send = Some(now);
    }

    /// Called when the hold deadline passes.
    pub fn release(&mut self, now: Instant) {
        if self.deadline().is_some_and(|deadline| now >= deadline) {
            self.throttling = false;
            self.unthrottled = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> Throttle {
        Throttle::new(&ThrottleConfig::default())
    }

    #[test]
    fn test_threshold_then_hold() {
        let mut throttle = throttle();
        let start = Instant::now();

        for _ in 0..3 {
            assert_eq!(throttle.poll(start), None);
            throttle.record(start);
        }
        let deadline = start + Duration::from_secs(2);
        assert_eq!(throttle.poll(start), Some(deadline));
        assert!(throttle.is_throttling());
        assert_eq!(throttle.deadline(), Some(deadline));

        // Still held just before the window closes.
        assert_eq!(throttle.poll(start + Duration::from_millis(1999)), Some(deadline));
        assert_eq!(throttle.poll(deadline), None);
        assert!(!throttle.is_throttling());
    }

    #[test]
    fn test_spaced_sends_never_hold() {
        let mut throttle = throttle();
        let mut now = Instant::now();
        for _ in 0..10 {
            assert_eq!(throttle.poll(now), None);
            throttle.record(now);
            now += Duration::from_secs(2);
        }
    }

    #[test]
    fn test_release() {
        let mut throttle = throttle();
        let start = Instant::now();
        for _ in 0..3 {
            throttle.record(start);
        }
        assert!(throttle.poll(start).is_some());

        throttle.release(start + Duration::from_secs(1));
        assert!(throttle.is_throttling());
        throttle.release(start + Duration::from_secs(2));
        assert!(!throttle.is_throttling());
    }

    #[test]
    fn test_disabled_never_holds() {
        let mut throttle = throttle();
        throttle.set_enabled(false);
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(throttle.poll(now), None);
            throttle.record(now);
        }
    }
}
