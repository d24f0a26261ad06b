//! Connection liveness.
//!
//! A probe goes out once nothing has arrived for the heartbeat interval. Each
//! probe must be answered by a `HeartbeatResponse` carrying the same
//! correlation id within the heartbeat timeout, otherwise the connection is
//! considered dead. The server may probe us too; those requests are echoed.

use evstore_protocol::{Command, Package};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of handling an inbound heartbeat package.
#[derive(Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Write this response.
    Reply(Package),
    /// One of our probes was answered.
    ProbeAnswered,
    /// A response to a probe that is no longer pending.
    Ignored,
}

/// Result of a timer tick.
#[derive(Debug, PartialEq, Eq)]
pub enum HeartbeatPoll {
    Idle,
    /// Write this probe.
    Probe(Package),
    /// A probe went unanswered. Reported once per monitor.
    TimedOut,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_activity: Instant,
    probes: HashMap<Uuid, Instant>,
    timed_out: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_activity: now,
            probes: HashMap::new(),
            timed_out: false,
        }
    }

    /// Resets the idle clock. Called for every inbound package.
    pub fn record_inbound(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Handles a `HeartbeatRequest` or `HeartbeatResponse`.
    pub fn handle(&mut self, package: &Package) -> HeartbeatAction {
        match package.command {
            Command::HeartbeatRequest => HeartbeatAction::Reply(Package::new(
                Command::HeartbeatResponse,
                package.correlation_id,
            )),
            Command::HeartbeatResponse if self.probes.remove(&package.correlation_id).is_some() => {
                HeartbeatAction::ProbeAnswered
            }
            _ => HeartbeatAction::Ignored,
        }
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatPoll {
        if self.timed_out {
            return HeartbeatPoll::Idle;
        }

        if self.probes.values().any(|deadline| *deadline <= now) {
            self.timed_out = true;
            self.probes.clear();
            return HeartbeatPoll::TimedOut;
        }

        if now.saturating_duration_since(self.last_activity) >= self.interval {
            let correlation_id = Uuid::new_v4();
            self.probes.insert(correlation_id, now + self.timeout);
            self.last_activity = now;
            return HeartbeatPoll::Probe(Package::new(Command::HeartbeatRequest, correlation_id));
        }

        HeartbeatPoll::Idle
    }

    /// Returns when `poll` next has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.timed_out {
            return None;
        }
        let idle_deadline = self.last_activity + self.interval;
        Some(
            self.probes
                .values()
                .copied()
                .fold(idle_deadline, Instant::min),
        )
    }

    pub fn pending_probes(&self) -> usize {
        self.probes.len()
    }

    /// Forgets every pending probe. Called when the connection goes away.
    pub fn cancel_all(&mut self) {
        self.probes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);
    const TIMEOUT: Duration = Duration::from_millis(1500);

    fn probe_id(poll: HeartbeatPoll) -> Uuid {
        match poll {
            HeartbeatPoll::Probe(package) => {
                assert_eq!(package.command, Command::HeartbeatRequest);
                package.correlation_id
            }
            other => panic!("expected probe, got {:?}", other),
        }
    }

    #[test]
    fn test_no_probe_before_interval() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);
        assert_eq!(monitor.poll(start + Duration::from_millis(499)), HeartbeatPoll::Idle);
        assert_eq!(monitor.next_deadline(), Some(start + INTERVAL));
    }

    #[test]
    fn test_inbound_traffic_defers_probe() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);
        monitor.record_inbound(start + Duration::from_millis(400));
        assert_eq!(monitor.poll(start + Duration::from_millis(600)), HeartbeatPoll::Idle);
    }

    #[test]
    fn test_answered_probe_keeps_connection() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);

        let id = probe_id(monitor.poll(start + INTERVAL));
        assert_eq!(monitor.pending_probes(), 1);

        let response = Package::new(Command::HeartbeatResponse, id);
        assert_eq!(monitor.handle(&response), HeartbeatAction::ProbeAnswered);
        assert_eq!(monitor.pending_probes(), 0);

        // past the old probe's deadline: no timeout, just the next probe
        monitor.record_inbound(start + INTERVAL + Duration::from_millis(10));
        let next = probe_id(monitor.poll(start + INTERVAL + TIMEOUT + Duration::from_millis(1)));
        assert_ne!(next, id);
    }

    #[test]
    fn test_unanswered_probe_times_out_once() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);
        probe_id(monitor.poll(start + INTERVAL));

        // other traffic does not satisfy the probe
        monitor.record_inbound(start + INTERVAL + Duration::from_millis(100));
        assert_eq!(monitor.poll(start + INTERVAL + TIMEOUT), HeartbeatPoll::TimedOut);
        assert_eq!(monitor.poll(start + INTERVAL * 10), HeartbeatPoll::Idle);
        assert_eq!(monitor.next_deadline(), None);
    }

    #[test]
    fn test_mismatched_response_is_ignored() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);
        probe_id(monitor.poll(start + INTERVAL));

        let stray = Package::new(Command::HeartbeatResponse, Uuid::new_v4());
        assert_eq!(monitor.handle(&stray), HeartbeatAction::Ignored);
        assert_eq!(monitor.pending_probes(), 1);
    }

    #[test]
    fn test_request_is_echoed() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);
        let id = Uuid::new_v4();

        let action = monitor.handle(&Package::new(Command::HeartbeatRequest, id));
        assert_eq!(
            action,
            HeartbeatAction::Reply(Package::new(Command::HeartbeatResponse, id))
        );
    }

    #[test]
    fn test_cancel_all() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, TIMEOUT, start);
        probe_id(monitor.poll(start + INTERVAL));
        monitor.cancel_all();
        assert_eq!(monitor.pending_probes(), 0);
        assert_ne!(monitor.poll(start + INTERVAL + TIMEOUT), HeartbeatPoll::TimedOut);
    }

    #[test]
    fn test_next_deadline_tracks_probe() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(INTERVAL, Duration::from_millis(100), start);
        probe_id(monitor.poll(start + INTERVAL));
        assert_eq!(
            monitor.next_deadline(),
            Some(start + INTERVAL + Duration::from_millis(100))
        );
    }
}
