//! Outstanding request bookkeeping.
//!
//! A [`RequestInfo`] tracks one requested header height or block hash across
//! every peer it was sent to. Each attempt is a [`FlightInfo`]; a peer holds
//! at most one flight per request.

use neo_network::{FailureHistory, PeerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// One attempt to satisfy a request on one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightInfo {
    pub peer: PeerId,
    pub height: u32,
    pub start_time: Instant,
}

impl FlightInfo {
    pub fn new(peer: PeerId, height: u32) -> Self {
        Self {
            peer,
            height,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the flight has been outstanding for at least `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.elapsed() >= timeout
    }
}

/// Aggregate state of one request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub height: u32,
    flights: HashMap<PeerId, FlightInfo>,
    failed_nodes: HashMap<PeerId, u32>,
    failed_total: u32,
    last_used_node: Option<PeerId>,
}

impl RequestInfo {
    pub fn new(height: u32) -> Self {
        Self {
            height,
            flights: HashMap::new(),
            failed_nodes: HashMap::new(),
            failed_total: 0,
            last_used_node: None,
        }
    }

    /// Record a new attempt. An older flight on the same peer is replaced.
    pub fn add_new_flight(&mut self, flight: FlightInfo) {
        self.last_used_node = Some(flight.peer);
        self.flights.insert(flight.peer, flight);
    }

    /// The latest attempt, which drives the timeout.
    pub fn most_recent_flight(&self) -> Option<&FlightInfo> {
        self.last_used_node
            .and_then(|peer| self.flights.get(&peer))
            .or_else(|| self.flights.values().max_by_key(|flight| flight.start_time))
    }

    pub fn flight(&self, peer: PeerId) -> Option<&FlightInfo> {
        self.flights.get(&peer)
    }

    pub fn remove_flight(&mut self, peer: PeerId) -> Option<FlightInfo> {
        self.flights.remove(&peer)
    }

    pub fn flight_count(&self) -> usize {
        self.flights.len()
    }

    pub fn mark_failed_node(&mut self, peer: PeerId) {
        *self.failed_nodes.entry(peer).or_insert(0) += 1;
        self.failed_total += 1;
    }

    pub fn has_failed(&self, peer: PeerId) -> bool {
        self.failed_nodes.contains_key(&peer)
    }

    pub fn failed_nodes(&self) -> &HashMap<PeerId, u32> {
        &self.failed_nodes
    }

    pub fn failed_total(&self) -> u32 {
        self.failed_total
    }

    pub fn last_used_node(&self) -> Option<PeerId> {
        self.last_used_node
    }
}

impl FailureHistory for RequestInfo {
    fn failure_count(&self, peer: PeerId) -> u32 {
        self.failed_nodes.get(&peer).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_flight_per_peer() {
        let mut request = RequestInfo::new(10);
        request.add_new_flight(FlightInfo::new(PeerId(1), 10));
        tokio::time::advance(Duration::from_millis(10)).await;
        request.add_new_flight(FlightInfo::new(PeerId(1), 10));
        assert_eq!(request.flight_count(), 1);

        tokio::time::advance(Duration::from_millis(10)).await;
        request.add_new_flight(FlightInfo::new(PeerId(2), 10));
        assert_eq!(request.flight_count(), 2);
        assert_eq!(request.most_recent_flight().map(|f| f.peer), Some(PeerId(2)));
        assert_eq!(request.last_used_node(), Some(PeerId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flight_timeout() {
        let flight = FlightInfo::new(PeerId(3), 5);
        assert!(!flight.is_timed_out(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(flight.is_timed_out(Duration::from_secs(5)));
    }

    #[test]
    fn test_failure_history() {
        let mut request = RequestInfo::new(1);
        request.mark_failed_node(PeerId(4));
        request.mark_failed_node(PeerId(4));
        assert!(request.has_failed(PeerId(4)));
        assert!(!request.has_failed(PeerId(5)));
        assert_eq!(request.failure_count(PeerId(4)), 2);
        assert_eq!(request.failure_count(PeerId(5)), 0);
        assert_eq!(request.failed_total(), 2);
    }
}
