//! Peer weighting for request routing.
//!
//! A peer's weight combines how fast it has delivered data with how long it
//! has been since we last asked it for anything, so load spreads across fast
//! peers. Any error or timeout divides the result, which pushes misbehaving
//! peers to the back of the queue long before they are replaced.

use std::collections::VecDeque;
use tokio::time::Instant;

/// Number of speed samples kept.
pub const SPEED_RECORD_COUNT: usize = 3;

/// Number of request timestamps kept.
pub const REQUEST_TIME_RECORD_COUNT: usize = 3;

/// Speed assumed for a fresh peer, in bytes per second.
pub const INITIAL_SPEED: f64 = 100.0 * 1024.0 * 1024.0;

/// Comparable score of one peer.
#[derive(Debug, Clone)]
pub struct PeerWeight {
    /// Recent transfer speeds in bytes per second.
    speeds: VecDeque<f64>,
    /// Recent request issue times.
    request_times: VecDeque<Instant>,
    error_count: u32,
    timeout_count: u32,
}

impl Default for PeerWeight {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerWeight {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            speeds: std::iter::repeat(INITIAL_SPEED)
                .take(SPEED_RECORD_COUNT)
                .collect(),
            request_times: std::iter::repeat(now)
                .take(REQUEST_TIME_RECORD_COUNT)
                .collect(),
            error_count: 0,
            timeout_count: 0,
        }
    }

    /// Record a transfer speed sample (bytes per second).
    pub fn append_speed(&mut self, value: f64) {
        if self.speeds.len() >= SPEED_RECORD_COUNT {
            self.speeds.pop_front();
        }
        self.speeds.push_back(value);
    }

    /// Record that a request was just issued.
    pub fn append_request_time(&mut self) {
        if self.request_times.len() >= REQUEST_TIME_RECORD_COUNT {
            self.request_times.pop_front();
        }
        self.request_times.push_back(Instant::now());
    }

    /// Increment the error counter, returning the new value.
    pub fn increment_errors(&mut self) -> u32 {
        self.error_count = self.error_count.saturating_add(1);
        self.error_count
    }

    /// Increment the timeout counter, returning the new value.
    pub fn increment_timeouts(&mut self) -> u32 {
        self.timeout_count = self.timeout_count.saturating_add(1);
        self.timeout_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }

    pub fn average_speed(&self) -> f64 {
        if self.speeds.is_empty() {
            return 0.0;
        }
        self.speeds.iter().sum::<f64>() / self.speeds.len() as f64
    }

    /// Average milliseconds elapsed since the recorded requests.
    pub fn average_idle_ms(&self) -> f64 {
        if self.request_times.is_empty() {
            return 0.0;
        }
        let now = Instant::now();
        let total: f64 = self
            .request_times
            .iter()
            .map(|t| now.saturating_duration_since(*t).as_millis() as f64)
            .sum();
        total / self.request_times.len() as f64
    }

    /// Scalar weight; higher is better.
    pub fn weight(&self) -> f64 {
        let base = self.average_speed() + self.average_idle_ms();
        base / (self.error_count as f64 + 1.0) / (self.timeout_count as f64 + 1.0)
    }
}

impl PartialEq for PeerWeight {
    fn eq(&self, other: &Self) -> bool {
        self.weight() == other.weight()
    }
}

impl PartialOrd for PeerWeight {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.weight().partial_cmp(&other.weight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_weight_is_initial_speed() {
        let w = PeerWeight::new();
        assert_eq!(w.weight(), INITIAL_SPEED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_ring_buffer() {
        let mut w = PeerWeight::new();
        for _ in 0..SPEED_RECORD_COUNT {
            w.append_speed(300.0);
        }
        assert_eq!(w.average_speed(), 300.0);
        w.append_speed(600.0);
        assert_eq!(w.average_speed(), 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_raises_weight() {
        let mut w = PeerWeight::new();
        let before = w.weight();
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(w.average_idle_ms(), 900.0);
        assert!(w.weight() > before);

        // Recent requests pull the average back down.
        w.append_request_time();
        assert_eq!(w.average_idle_ms(), 600.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_timeout_divisors() {
        let mut clean = PeerWeight::new();
        let mut bad = PeerWeight::new();
        for w in [&mut clean, &mut bad] {
            for _ in 0..SPEED_RECORD_COUNT {
                w.append_speed(1200.0);
            }
        }
        assert_eq!(bad.increment_errors(), 1);
        assert_eq!(bad.weight(), 600.0);
        assert_eq!(bad.increment_timeouts(), 1);
        assert_eq!(bad.weight(), 300.0);
        assert!(clean > bad);
    }
}
