//! In-flight operation tracking.
//!
//! Operations live in one of two places: the active table, keyed by the
//! correlation id of their last send, or the waiting queue while no
//! connection can take them. An item is removed from both before its result
//! is delivered, so each caller is resolved exactly once.

use crate::connection::ConnectionId;
use crate::endpoint::NodeEndpoints;
use crate::error::ClientError;
use crate::operation::{Decision, OperationOutput, OperationRequest};
use evstore_protocol::{Credentials, Package, ProtocolError, MAX_FRAME_SIZE};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

pub type OperationSender = oneshot::Sender<Result<OperationOutput, ClientError>>;
pub type OperationReceiver = oneshot::Receiver<Result<OperationOutput, ClientError>>;

/// A submitted operation and its result sink.
#[derive(Debug)]
pub struct OperationItem {
    correlation_id: Uuid,
    request: OperationRequest,
    credentials: Option<Credentials>,
    sink: Option<OperationSender>,
    retry_count: u32,
    created: Instant,
    last_updated: Instant,
    connection_id: Option<ConnectionId>,
}

impl OperationItem {
    pub fn new(
        request: OperationRequest,
        credentials: Option<Credentials>,
    ) -> (Self, OperationReceiver) {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let item = Self {
            correlation_id: Uuid::new_v4(),
            request,
            credentials,
            sink: Some(tx),
            retry_count: 0,
            created: now,
            last_updated: now,
            connection_id: None,
        };
        (item, rx)
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns whether the caller stopped waiting for the result.
    pub fn is_cancelled(&self) -> bool {
        self.sink.as_ref().map_or(true, |sink| sink.is_closed())
    }

    fn package(&self) -> Result<Package, ClientError> {
        let package = self
            .request
            .build_package(self.correlation_id)?
            .with_credentials(self.credentials.clone());
        let size = package.frame_len();
        if size > MAX_FRAME_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: size as u64,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        Ok(package)
    }

    /// Delivers the result. Consumes the item.
    pub(crate) fn complete(mut self, result: Result<OperationOutput, ClientError>) {
        if let Some(sink) = self.sink.take() {
            if sink.send(result).is_err() {
                debug!(
                    "{} {} resolved after its caller went away",
                    self.request.kind().name,
                    self.correlation_id
                );
            }
        }
    }
}

/// What the connection manager must do after a response was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The operation was resolved.
    Completed,
    /// Write this package on the current connection.
    Resend(Package),
    /// Reconnect to this node; the operation waits for the new connection.
    Reconnect(NodeEndpoints),
    /// The response made no sense. The operation has failed; the connection
    /// should be closed.
    ProtocolViolation(String),
}

#[derive(Debug, Clone)]
pub struct OperationEngineConfig {
    pub max_retries: u32,
    pub timeout: Duration,
    pub fail_on_no_server_response: bool,
    pub rotate_correlation_on_retry: bool,
}

#[derive(Debug)]
pub struct OperationEngine {
    config: OperationEngineConfig,
    active: HashMap<Uuid, OperationItem>,
    waiting: VecDeque<OperationItem>,
}

impl OperationEngine {
    pub fn new(config: OperationEngineConfig) -> Self {
        Self {
            config,
            active: HashMap::new(),
            waiting: VecDeque::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn contains(&self, correlation_id: &Uuid) -> bool {
        self.active.contains_key(correlation_id)
    }

    /// Parks an operation until a connection is available.
    pub fn enqueue(&mut self, item: OperationItem) {
        self.waiting.push_back(item);
    }

    /// Activates an operation on a connection. Returns the package to write,
    /// or `None` if the operation failed before it could be sent.
    pub fn schedule(
        &mut self,
        mut item: OperationItem,
        connection_id: ConnectionId,
        now: Instant,
    ) -> Option<Package> {
        if item.is_cancelled() {
            debug!("dropping cancelled {} {}", item.request.kind().name, item.correlation_id);
            return None;
        }
        match item.package() {
            Ok(package) => {
                item.connection_id = Some(connection_id);
                item.last_updated = now;
                self.active.insert(item.correlation_id, item);
                Some(package)
            }
            Err(e) => {
                warn!("cannot send {}: {}", item.request.kind().name, e);
                item.complete(Err(e));
                None
            }
        }
    }

    /// Activates every waiting operation on a new connection, oldest first.
    pub fn start_waiting(&mut self, connection_id: ConnectionId, now: Instant) -> Vec<Package> {
        let waiting: Vec<OperationItem> = self.waiting.drain(..).collect();
        waiting
            .into_iter()
            .filter_map(|item| self.schedule(item, connection_id, now))
            .collect()
    }

    /// Handles a response whose correlation id is in the active table.
    pub fn handle(
        &mut self,
        package: &Package,
        connection_id: ConnectionId,
        now: Instant,
    ) -> Option<InboundOutcome> {
        let item = self.active.get(&package.correlation_id)?;
        if item.connection_id != Some(connection_id) {
            return None;
        }

        match item.request.inspect(package) {
            Decision::EndOperation(result) => {
                let item = self.active.remove(&package.correlation_id)?;
                item.complete(result);
                Some(InboundOutcome::Completed)
            }
            Decision::Retry(reason) => {
                let item = self.active.remove(&package.correlation_id)?;
                debug!(
                    "retrying {} {}: {}",
                    item.request.kind().name,
                    item.correlation_id,
                    reason
                );
                Some(self.retry(item, connection_id, now))
            }
            Decision::Reconnect(endpoints) => {
                let mut item = self.active.remove(&package.correlation_id)?;
                item.retry_count += 1;
                if item.retry_count > self.config.max_retries {
                    let attempts = item.retry_count;
                    item.complete(Err(ClientError::RetriesExhausted { attempts }));
                    return Some(InboundOutcome::Completed);
                }
                debug!(
                    "{} {} redirected to {}",
                    item.request.kind().name,
                    item.correlation_id,
                    endpoints
                );
                item.correlation_id = Uuid::new_v4();
                item.connection_id = None;
                self.waiting.push_front(item);
                Some(InboundOutcome::Reconnect(endpoints))
            }
            Decision::NotHandled(description) => {
                let item = self.active.remove(&package.correlation_id)?;
                warn!(
                    "{} {}: {}",
                    item.request.kind().name,
                    item.correlation_id,
                    description
                );
                item.complete(Err(ClientError::ProtocolViolation(description.clone())));
                Some(InboundOutcome::ProtocolViolation(description))
            }
        }
    }

    fn retry(
        &mut self,
        mut item: OperationItem,
        connection_id: ConnectionId,
        now: Instant,
    ) -> InboundOutcome {
        item.retry_count += 1;
        if item.retry_count > self.config.max_retries {
            warn!(
                "{} {} failed after {} attempts",
                item.request.kind().name,
                item.correlation_id,
                item.retry_count
            );
            let attempts = item.retry_count;
            item.complete(Err(ClientError::RetriesExhausted { attempts }));
            return InboundOutcome::Completed;
        }
        if self.config.rotate_correlation_on_retry {
            item.correlation_id = Uuid::new_v4();
        }
        match self.schedule(item, connection_id, now) {
            Some(package) => InboundOutcome::Resend(package),
            None => InboundOutcome::Completed,
        }
    }

    /// Scans the active table. Cancelled operations are dropped; operations
    /// without a response for the configured timeout are retried or failed.
    /// Returns the packages to resend.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<Package> {
        self.waiting.retain(|item| !item.is_cancelled());

        let mut expired: Vec<Uuid> = Vec::new();
        self.active.retain(|id, item| {
            if item.is_cancelled() {
                debug!("dropping cancelled {} {}", item.request.kind().name, id);
                return false;
            }
            if now.saturating_duration_since(item.last_updated) >= self.config.timeout {
                expired.push(*id);
            }
            true
        });

        let mut resend = Vec::new();
        for id in expired {
            let Some(item) = self.active.remove(&id) else {
                continue;
            };
            if self.config.fail_on_no_server_response {
                warn!("{} {} timed out", item.request.kind().name, id);
                item.complete(Err(ClientError::OperationTimedOut));
                continue;
            }
            let Some(connection_id) = item.connection_id else {
                continue;
            };
            debug!("{} {} timed out, retrying", item.request.kind().name, id);
            if let InboundOutcome::Resend(package) = self.retry(item, connection_id, now) {
                resend.push(package);
            }
        }
        resend
    }

    /// Moves every active operation back to the waiting queue after its
    /// connection closed. Each gets a fresh correlation id.
    pub fn requeue_all(&mut self) {
        let mut items: Vec<OperationItem> = self.active.drain().map(|(_, item)| item).collect();
        items.extend(self.waiting.drain(..));
        items.sort_by_key(|item| item.created);

        for mut item in items {
            item.correlation_id = Uuid::new_v4();
            item.connection_id = None;
            self.waiting.push_back(item);
        }
    }

    /// Fails every known operation.
    pub fn fail_all(&mut self, error: impl Fn() -> ClientError) {
        for (_, item) in self.active.drain() {
            item.complete(Err(error()));
        }
        for item in self.waiting.drain(..) {
            item.complete(Err(error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventData, ExpectedVersion};
    use evstore_protocol::message::{NotHandled, NotHandledReason, WriteEventsCompleted};
    use evstore_protocol::{Command, OperationResult};
    use serde::Serialize;
    use tokio::sync::oneshot::error::TryRecvError;

    const CONN: ConnectionId = ConnectionId::new(1);
    const TIMEOUT: Duration = Duration::from_secs(7);

    fn engine(max_retries: u32) -> OperationEngine {
        OperationEngine::new(OperationEngineConfig {
            max_retries,
            timeout: TIMEOUT,
            fail_on_no_server_response: false,
            rotate_correlation_on_retry: true,
        })
    }

    fn append() -> (OperationItem, OperationReceiver) {
        OperationItem::new(
            OperationRequest::AppendToStream {
                stream: "orders-1".to_string(),
                expected_version: ExpectedVersion::Exact(5),
                events: vec![EventData::binary("Placed", b"x".to_vec())],
                require_master: true,
            },
            None,
        )
    }

    fn reply<T: Serialize>(id: Uuid, command: Command, body: &T) -> Package {
        Package::from_json(command, id, body).unwrap()
    }

    fn completed(id: Uuid, result: OperationResult) -> Package {
        reply(
            id,
            Command::WriteEventsCompleted,
            &WriteEventsCompleted {
                result,
                message: None,
                first_event_number: 1,
                last_event_number: 3,
                prepare_position: Some(1),
                commit_position: Some(1),
                current_version: Some(2),
            },
        )
    }

    #[test]
    fn test_success_resolves_once() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (item, mut rx) = append();

        let sent = engine.schedule(item, CONN, now).unwrap();
        assert_eq!(sent.command, Command::WriteEvents);
        assert!(engine.contains(&sent.correlation_id));

        let response = completed(sent.correlation_id, OperationResult::Success);
        assert_eq!(
            engine.handle(&response, CONN, now),
            Some(InboundOutcome::Completed)
        );
        assert_eq!(engine.active_count(), 0);

        match rx.try_recv().unwrap() {
            Ok(OperationOutput::Write(result)) => assert_eq!(result.next_expected_version, 3),
            other => panic!("unexpected result: {:?}", other),
        }

        // a duplicate response finds nothing
        assert_eq!(engine.handle(&response, CONN, now), None);
    }

    #[test]
    fn test_wrong_expected_version_is_delivered() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (item, mut rx) = append();
        let sent = engine.schedule(item, CONN, now).unwrap();

        engine.handle(
            &completed(sent.correlation_id, OperationResult::WrongExpectedVersion),
            CONN,
            now,
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::WrongExpectedVersion {
                expected: 5,
                current: Some(2),
                ..
            })
        ));
    }

    #[test]
    fn test_retry_exhaustion() {
        let max_retries = 3;
        let mut engine = engine(max_retries);
        let now = Instant::now();
        let (item, mut rx) = append();
        let mut sent = engine.schedule(item, CONN, now).unwrap();
        let mut seen = vec![sent.correlation_id];

        for _ in 0..max_retries {
            let outcome = engine
                .handle(&completed(sent.correlation_id, OperationResult::PrepareTimeout), CONN, now)
                .unwrap();
            sent = match outcome {
                InboundOutcome::Resend(package) => package,
                other => panic!("expected resend, got {:?}", other),
            };
            assert!(!seen.contains(&sent.correlation_id));
            seen.push(sent.correlation_id);
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }

        let outcome = engine
            .handle(&completed(sent.correlation_id, OperationResult::PrepareTimeout), CONN, now)
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Completed);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::RetriesExhausted { attempts: 4 })
        ));
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_retry_keeps_correlation_when_configured() {
        let mut engine = OperationEngine::new(OperationEngineConfig {
            max_retries: 10,
            timeout: TIMEOUT,
            fail_on_no_server_response: false,
            rotate_correlation_on_retry: false,
        });
        let now = Instant::now();
        let (item, _rx) = append();
        let sent = engine.schedule(item, CONN, now).unwrap();

        match engine.handle(&completed(sent.correlation_id, OperationResult::CommitTimeout), CONN, now) {
            Some(InboundOutcome::Resend(package)) => {
                assert_eq!(package.correlation_id, sent.correlation_id)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_redirect_moves_to_waiting() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (item, mut rx) = append();
        let sent = engine.schedule(item, CONN, now).unwrap();

        let redirect = reply(
            sent.correlation_id,
            Command::NotHandled,
            &NotHandled {
                reason: NotHandledReason::NotMaster,
                additional_info: Some(evstore_protocol::message::MasterInfo {
                    external_tcp_address: "10.0.0.2".to_string(),
                    external_tcp_port: 1113,
                    external_secure_tcp_address: None,
                    external_secure_tcp_port: None,
                }),
            },
        );
        match engine.handle(&redirect, CONN, now) {
            Some(InboundOutcome::Reconnect(endpoints)) => {
                assert_eq!(endpoints.tcp.port(), 1113)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.waiting_count(), 1);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let resent = engine.start_waiting(ConnectionId::new(2), now);
        assert_eq!(resent.len(), 1);
        assert_ne!(resent[0].correlation_id, sent.correlation_id);
    }

    #[test]
    fn test_unexpected_response_fails_operation() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (item, mut rx) = append();
        let sent = engine.schedule(item, CONN, now).unwrap();

        let wrong = Package::new(Command::ReadEventCompleted, sent.correlation_id);
        assert!(matches!(
            engine.handle(&wrong, CONN, now),
            Some(InboundOutcome::ProtocolViolation(_))
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_response_from_stale_connection_is_ignored() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (item, _rx) = append();
        let sent = engine.schedule(item, CONN, now).unwrap();

        let response = completed(sent.correlation_id, OperationResult::Success);
        assert_eq!(engine.handle(&response, ConnectionId::new(7), now), None);
        assert_eq!(engine.active_count(), 1);
    }

    #[test]
    fn test_timeout_retries() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (item, mut rx) = append();
        let sent = engine.schedule(item, CONN, now).unwrap();

        assert!(engine.check_timeouts(now + TIMEOUT - Duration::from_millis(1)).is_empty());

        let resent = engine.check_timeouts(now + TIMEOUT);
        assert_eq!(resent.len(), 1);
        assert_ne!(resent[0].correlation_id, sent.correlation_id);
        assert!(engine.contains(&resent[0].correlation_id));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_timeout_fails_when_configured() {
        let mut engine = OperationEngine::new(OperationEngineConfig {
            max_retries: 10,
            timeout: TIMEOUT,
            fail_on_no_server_response: true,
            rotate_correlation_on_retry: true,
        });
        let now = Instant::now();
        let (item, mut rx) = append();
        engine.schedule(item, CONN, now).unwrap();

        assert!(engine.check_timeouts(now + TIMEOUT).is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::OperationTimedOut)
        ));
    }

    #[test]
    fn test_cancelled_operations_are_dropped() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (active, active_rx) = append();
        let (waiting, waiting_rx) = append();
        engine.schedule(active, CONN, now).unwrap();
        engine.enqueue(waiting);

        drop(active_rx);
        drop(waiting_rx);
        assert!(engine.check_timeouts(now).is_empty());
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.waiting_count(), 0);
    }

    #[test]
    fn test_requeue_preserves_order_and_rotates_ids() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (first, _rx1) = append();
        let (second, _rx2) = append();
        let first_sent = engine.schedule(first, CONN, now).unwrap();
        let second_sent = engine.schedule(second, CONN, now).unwrap();

        engine.requeue_all();
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.waiting_count(), 2);

        let resent = engine.start_waiting(ConnectionId::new(2), now);
        assert_eq!(resent.len(), 2);
        for package in &resent {
            assert_ne!(package.correlation_id, first_sent.correlation_id);
            assert_ne!(package.correlation_id, second_sent.correlation_id);
        }

        // the old ids no longer match anything
        let late = completed(first_sent.correlation_id, OperationResult::Success);
        assert_eq!(engine.handle(&late, CONN, now), None);
    }

    #[test]
    fn test_fail_all() {
        let mut engine = engine(10);
        let now = Instant::now();
        let (active, mut active_rx) = append();
        let (waiting, mut waiting_rx) = append();
        engine.schedule(active, CONN, now).unwrap();
        engine.enqueue(waiting);

        engine.fail_all(|| ClientError::ConnectionClosed);
        assert!(matches!(active_rx.try_recv().unwrap(), Err(ClientError::ConnectionClosed)));
        assert!(matches!(waiting_rx.try_recv().unwrap(), Err(ClientError::ConnectionClosed)));
        assert_eq!(engine.active_count() + engine.waiting_count(), 0);
    }
}
