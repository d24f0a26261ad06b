//! Connection manager.
//!
//! A single task owns every piece of connection state: the socket, the
//! heartbeat monitor, the authentication gate and the operation and
//! subscription tables. Callers talk to it through [`Connection`]; socket
//! tasks report through events tagged with their [`ConnectionId`]. Events
//! from a connection that is no longer current are ignored.

use crate::auth::{AuthenticationGate, AuthenticationStatus, GateOpened};
use crate::endpoint::{discoverer_for, EndpointDiscoverer, NodeEndpoints};
use crate::error::ClientError;
use crate::event_handlers::EventHandlers;
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor, HeartbeatPoll};
use crate::operation::OperationRequest;
use crate::operation_engine::{
    InboundOutcome, OperationEngine, OperationEngineConfig, OperationItem, OperationReceiver,
};
use crate::router::{self, Route};
use crate::settings::Settings;
use crate::subscription::{DropReason, SubscriptionId, SubscriptionListener, SubscriptionTarget};
use crate::subscription_engine::{
    ConfirmationReceiver, SubscriptionEngine, SubscriptionItem, SubscriptionOutcome,
};
use crate::transport::{self, BoxedStream, TransportEvent, TransportEventKind};
use bytes::BytesMut;
use evstore_protocol::{Command, Credentials, Encoder, Package};
use std::fmt;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Identifies one physical connection of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Connecting,
    Connected,
    /// Between connections, or terminal once the client gave up or was closed.
    Closed,
}

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ServerClosed,
    Io(String),
    ConnectFailed(String),
    HeartbeatTimeout,
    /// The inbound byte stream could not be framed.
    Framing(String),
    ProtocolViolation(String),
    /// The server named another node as master.
    Redirect(NodeEndpoints),
    Shutdown,
}

impl CloseReason {
    /// Returns whether a reconnect may follow.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CloseReason::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ServerClosed => write!(f, "closed by server"),
            CloseReason::Io(e) => write!(f, "I/O error: {}", e),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            CloseReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            CloseReason::Framing(e) => write!(f, "framing error: {}", e),
            CloseReason::ProtocolViolation(e) => write!(f, "protocol violation: {}", e),
            CloseReason::Redirect(node) => write!(f, "redirected to {}", node),
            CloseReason::Shutdown => write!(f, "shut down"),
        }
    }
}

/// Requests from handles to the connection task.
pub(crate) enum Message {
    Operation(OperationItem),
    Subscribe(SubscriptionItem),
    Unsubscribe(SubscriptionId),
    Close(oneshot::Sender<()>),
}

/// Handle to the connection task. Cheap to clone.
///
/// The task stops when [`Connection::close`] is called or every handle has
/// been dropped.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Validates the settings and starts the connection task. Must be called
    /// from within a tokio runtime.
    pub fn start(settings: Settings, handlers: EventHandlers) -> Result<Self, ClientError> {
        settings.validate()?;
        let discoverer = discoverer_for(&settings)?;
        Ok(Self::start_with_discoverer(settings, discoverer, handlers))
    }

    /// Starts the connection task with a custom node discoverer.
    pub fn start_with_discoverer(
        settings: Settings,
        discoverer: Box<dyn EndpointDiscoverer>,
        handlers: EventHandlers,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Init);

        let manager = ConnectionManager::new(settings, discoverer, handlers, events_tx, state_tx);
        tokio::spawn(manager.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Waits until the connection reaches `target`. Returns false if the
    /// connection task stopped first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|current| *current == target).await.is_ok();
        reached
    }

    /// Submits an operation. The receiver resolves exactly once.
    pub fn submit(
        &self,
        request: OperationRequest,
        credentials: Option<Credentials>,
    ) -> OperationReceiver {
        let (item, rx) = OperationItem::new(request, credentials);
        if let Err(mpsc::error::SendError(Message::Operation(item))) =
            self.commands.send(Message::Operation(item))
        {
            item.complete(Err(ClientError::ConnectionClosed));
        }
        rx
    }

    /// Starts a subscription. The receiver resolves once the server confirms
    /// or refuses it.
    pub fn subscribe(
        &self,
        target: SubscriptionTarget,
        resolve_link_tos: bool,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> (SubscriptionId, ConfirmationReceiver) {
        let (item, rx) = SubscriptionItem::new(target, resolve_link_tos, listener, credentials);
        let id = item.id();
        if let Err(mpsc::error::SendError(Message::Subscribe(item))) =
            self.commands.send(Message::Subscribe(item))
        {
            item.drop_with(
                DropReason::ConnectionClosed,
                Some(ClientError::ConnectionClosed),
            );
        }
        (id, rx)
    }

    pub(crate) fn commands(&self) -> mpsc::UnboundedSender<Message> {
        self.commands.clone()
    }

    /// Closes the connection. Pending operations fail with
    /// `ConnectionClosed` and subscriptions are dropped.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Message::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish()
    }
}

struct ActiveConnection {
    id: ConnectionId,
    endpoints: NodeEndpoints,
    outbound: mpsc::UnboundedSender<BytesMut>,
    reader: JoinHandle<()>,
    heartbeat: HeartbeatMonitor,
    gate: AuthenticationGate,
}

impl ActiveConnection {
    /// Writes a package to the socket, bypassing the gate.
    fn write(&self, package: &Package) {
        match Encoder::encode_package(package) {
            Ok(frame) => {
                trace!(
                    "{} sending {} {}",
                    self.id,
                    package.command,
                    package.correlation_id
                );
                let _ = self.outbound.send(frame);
            }
            Err(e) => warn!("{} cannot encode {}: {}", self.id, package.command, e),
        }
    }

    /// Sends a package once authentication has finished.
    fn send(&mut self, package: Package) {
        if let Some(package) = self.gate.submit(package) {
            self.write(&package);
        }
    }

    fn release(&self, opened: GateOpened, handlers: &EventHandlers) {
        match opened.status {
            AuthenticationStatus::Success => info!("{} authenticated", self.id),
            AuthenticationStatus::Failed => warn!("{} authentication failed", self.id),
            AuthenticationStatus::Timeout => warn!("{} authentication timed out", self.id),
            AuthenticationStatus::Ignored => {}
        }
        for package in &opened.released {
            self.write(package);
        }
        handlers.emit_authentication_completed(opened.status);
    }

    /// Stops the socket tasks. The writer exits once `outbound` is dropped.
    fn shutdown(mut self) {
        self.heartbeat.cancel_all();
        self.reader.abort();
    }
}

enum Phase {
    Idle,
    Connecting {
        id: ConnectionId,
        endpoints: NodeEndpoints,
        task: JoinHandle<()>,
    },
    Connected(ActiveConnection),
}

#[derive(Debug, Clone, Copy)]
struct PendingReconnect {
    at: Instant,
    /// Node named by a redirect, bypassing discovery.
    target: Option<NodeEndpoints>,
}

struct ConnectionManager {
    settings: Settings,
    discoverer: Box<dyn EndpointDiscoverer>,
    handlers: EventHandlers,
    operations: OperationEngine,
    subscriptions: SubscriptionEngine,
    phase: Phase,
    next_connection_id: u64,
    reconnections: u32,
    pending_reconnect: Option<PendingReconnect>,
    failed_endpoints: Option<NodeEndpoints>,
    next_timeout_check: Instant,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    terminal: bool,
    stopped: bool,
}

impl ConnectionManager {
    fn new(
        settings: Settings,
        discoverer: Box<dyn EndpointDiscoverer>,
        handlers: EventHandlers,
        events: mpsc::UnboundedSender<TransportEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        let operations = OperationEngine::new(OperationEngineConfig {
            max_retries: settings.max_operation_retries,
            timeout: settings.operation_timeout(),
            fail_on_no_server_response: settings.fail_on_no_server_response,
            rotate_correlation_on_retry: settings.rotate_correlation_on_retry,
        });
        let subscriptions = SubscriptionEngine::new(
            settings.subscription_recovery,
            settings.max_operation_retries,
        );
        let next_timeout_check = Instant::now() + settings.operation_timeout_check_interval();

        Self {
            settings,
            discoverer,
            handlers,
            operations,
            subscriptions,
            phase: Phase::Idle,
            next_connection_id: 1,
            reconnections: 0,
            pending_reconnect: None,
            failed_endpoints: None,
            next_timeout_check,
            events,
            state,
            terminal: false,
            stopped: false,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Message>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        self.connect(None);

        while !self.stopped {
            let deadline = self.next_deadline();
            tokio::select! {
                message = commands.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        debug!("all client handles dropped");
                        self.shutdown();
                    }
                },
                Some(event) = events.recv() => self.handle_transport(event),
                _ = tokio::time::sleep_until(deadline.into()) => self.on_tick(Instant::now()),
            }
        }

        debug!("connection task stopped");
    }

    fn handle_message(&mut self, message: Message) {
        let now = Instant::now();
        match message {
            Message::Operation(item) => {
                if self.terminal {
                    item.complete(Err(ClientError::ConnectionClosed));
                    return;
                }
                match &mut self.phase {
                    Phase::Connected(conn) => {
                        if let Some(package) = self.operations.schedule(item, conn.id, now) {
                            conn.send(package);
                        }
                    }
                    _ => self.operations.enqueue(item),
                }
            }
            Message::Subscribe(item) => {
                if self.terminal {
                    item.drop_with(
                        DropReason::ConnectionClosed,
                        Some(ClientError::ConnectionClosed),
                    );
                    return;
                }
                match &mut self.phase {
                    Phase::Connected(conn) => {
                        if let Some(package) = self.subscriptions.schedule(item, conn.id) {
                            conn.send(package);
                        }
                    }
                    _ => self.subscriptions.enqueue(item),
                }
            }
            Message::Unsubscribe(id) => {
                let package = self.subscriptions.unsubscribe(id);
                if let (Some(package), Phase::Connected(conn)) = (package, &mut self.phase) {
                    conn.send(package);
                }
            }
            Message::Close(done) => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn current_connection(&self) -> Option<ConnectionId> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Connecting { id, .. } => Some(*id),
            Phase::Connected(conn) => Some(conn.id),
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let TransportEvent {
            connection_id,
            kind,
        } = event;
        if self.current_connection() != Some(connection_id) {
            trace!("ignoring event from stale {}", connection_id);
            return;
        }

        match kind {
            TransportEventKind::Established(stream) => self.on_established(connection_id, stream),
            TransportEventKind::ConnectFailed(error) => {
                warn!("{} failed to connect: {}", connection_id, error);
                self.close_connection(CloseReason::ConnectFailed(error.to_string()));
            }
            TransportEventKind::Inbound(package) => self.on_package(package),
            TransportEventKind::Closed(reason) => self.close_connection(reason),
        }
    }

    fn connect(&mut self, target: Option<NodeEndpoints>) {
        let endpoints = match target {
            Some(endpoints) => endpoints,
            None => match self.discoverer.discover(self.failed_endpoints.as_ref()) {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    warn!("node discovery failed: {}", e);
                    self.after_close(CloseReason::ConnectFailed(e.to_string()), None);
                    return;
                }
            },
        };

        let id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id += 1;
        if id.get() > 1 {
            self.handlers.emit_reconnect(&endpoints);
        }
        debug!("{} connecting to {}", id, endpoints);

        let settings = self.settings.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let kind = match transport::open(&endpoints, &settings).await {
                Ok(stream) => TransportEventKind::Established(stream),
                Err(e) => TransportEventKind::ConnectFailed(e),
            };
            let _ = events.send(TransportEvent {
                connection_id: id,
                kind,
            });
        });

        self.phase = Phase::Connecting {
            id,
            endpoints,
            task,
        };
        self.set_state(ConnectionState::Connecting);
    }

    fn on_established(&mut self, id: ConnectionId, stream: BoxedStream) {
        let endpoints = match &self.phase {
            Phase::Connecting { endpoints, .. } => *endpoints,
            _ => return,
        };
        let now = Instant::now();

        let (read_half, write_half) = tokio::io::split(stream);
        let reader = transport::spawn_reader(id, read_half, self.events.clone());
        let outbound = transport::spawn_writer(id, write_half, self.events.clone());
        let heartbeat = HeartbeatMonitor::new(
            self.settings.heartbeat_interval(),
            self.settings.heartbeat_timeout(),
            now,
        );
        let (gate, authenticate) = AuthenticationGate::start(
            self.settings.credentials.as_ref(),
            self.settings.operation_timeout(),
            now,
        );

        let mut conn = ActiveConnection {
            id,
            endpoints,
            outbound,
            reader,
            heartbeat,
            gate,
        };
        info!("{} connected to {}", id, endpoints);

        match authenticate {
            Some(package) => {
                debug!("{} authenticating", id);
                conn.write(&package);
            }
            None => self
                .handlers
                .emit_authentication_completed(AuthenticationStatus::Ignored),
        }

        for package in self.operations.start_waiting(id, now) {
            conn.send(package);
        }
        for package in self.subscriptions.start_waiting(id) {
            conn.send(package);
        }

        self.reconnections = 0;
        self.failed_endpoints = None;
        self.phase = Phase::Connected(conn);
        self.set_state(ConnectionState::Connected);
        self.handlers.emit_connected(&endpoints);
    }

    fn on_package(&mut self, package: Package) {
        let now = Instant::now();
        let Phase::Connected(conn) = &mut self.phase else {
            return;
        };
        conn.heartbeat.record_inbound(now);
        trace!(
            "{} received {} {}",
            conn.id,
            package.command,
            package.correlation_id
        );

        let route = router::route(
            &package,
            conn.gate.pending_correlation(),
            &self.operations,
            &self.subscriptions,
        );
        let follow_up = match route {
            Route::Heartbeat => {
                if let HeartbeatAction::Reply(reply) = conn.heartbeat.handle(&package) {
                    conn.write(&reply);
                }
                None
            }
            Route::Authentication => {
                if let Some(opened) = conn.gate.handle(&package) {
                    conn.release(opened, &self.handlers);
                }
                None
            }
            Route::Operation => match self.operations.handle(&package, conn.id, now) {
                Some(InboundOutcome::Resend(retry)) => {
                    conn.send(retry);
                    None
                }
                Some(InboundOutcome::Reconnect(node)) => Some(CloseReason::Redirect(node)),
                Some(InboundOutcome::ProtocolViolation(detail)) => {
                    Some(CloseReason::ProtocolViolation(detail))
                }
                Some(InboundOutcome::Completed) | None => None,
            },
            Route::Subscription => match self.subscriptions.handle(&package, conn.id) {
                Some(SubscriptionOutcome::Send(next)) => {
                    conn.send(next);
                    None
                }
                Some(SubscriptionOutcome::Reconnect(node)) => Some(CloseReason::Redirect(node)),
                Some(SubscriptionOutcome::ProtocolViolation(detail)) => {
                    Some(CloseReason::ProtocolViolation(detail))
                }
                Some(SubscriptionOutcome::Handled) | None => None,
            },
            Route::Unmatched => {
                if package.command == Command::BadRequest {
                    warn!(
                        "{} bad request {}: {}",
                        conn.id,
                        package.correlation_id,
                        package.body_text()
                    );
                    self.handlers.emit_bad_request(&package);
                } else {
                    debug!(
                        "{} discarding {} {}: no owner",
                        conn.id, package.command, package.correlation_id
                    );
                }
                None
            }
        };

        if let Some(reason) = follow_up {
            self.close_connection(reason);
        }
    }

    fn on_tick(&mut self, now: Instant) {
        let timeout_check_due = now >= self.next_timeout_check;
        if timeout_check_due {
            self.next_timeout_check = now + self.settings.operation_timeout_check_interval();
        }

        if let Phase::Connected(conn) = &mut self.phase {
            match conn.heartbeat.poll(now) {
                HeartbeatPoll::Probe(probe) => conn.write(&probe),
                HeartbeatPoll::TimedOut => {
                    warn!("{} heartbeat timed out", conn.id);
                    self.close_connection(CloseReason::HeartbeatTimeout);
                    return self.poll_reconnect(now);
                }
                HeartbeatPoll::Idle => {}
            }
            if let Some(opened) = conn.gate.poll(now) {
                conn.release(opened, &self.handlers);
            }
            if timeout_check_due {
                for package in self.operations.check_timeouts(now) {
                    conn.send(package);
                }
            }
        } else if timeout_check_due {
            // nothing is in flight, this only purges cancelled operations
            self.operations.check_timeouts(now);
        }

        self.poll_reconnect(now);
    }

    fn poll_reconnect(&mut self, now: Instant) {
        if let Some(pending) = self.pending_reconnect {
            if now >= pending.at {
                self.pending_reconnect = None;
                self.connect(pending.target);
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.next_timeout_check;
        if let Phase::Connected(conn) = &self.phase {
            for candidate in [conn.heartbeat.next_deadline(), conn.gate.deadline()]
                .into_iter()
                .flatten()
            {
                deadline = deadline.min(candidate);
            }
        }
        if let Some(pending) = &self.pending_reconnect {
            deadline = deadline.min(pending.at);
        }
        deadline
    }

    fn close_connection(&mut self, reason: CloseReason) {
        let endpoints = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connected(conn) => {
                let endpoints = conn.endpoints;
                conn.shutdown();
                endpoints
            }
            Phase::Connecting {
                endpoints, task, ..
            } => {
                task.abort();
                endpoints
            }
            Phase::Idle => return,
        };

        info!("connection to {} closed: {}", endpoints, reason);
        self.set_state(ConnectionState::Closed);
        self.handlers.emit_disconnected(&reason);
        self.after_close(reason, Some(endpoints));
    }

    /// Decides between reconnecting and giving up.
    fn after_close(&mut self, reason: CloseReason, endpoints: Option<NodeEndpoints>) {
        let redirect = match &reason {
            CloseReason::Redirect(node) => Some(*node),
            _ => None,
        };
        let will_reconnect = !self.stopped
            && reason.is_transient()
            && (redirect.is_some() || self.can_reconnect());

        if will_reconnect {
            self.operations.requeue_all();
        } else {
            self.operations.fail_all(|| ClientError::ConnectionClosed);
        }
        self.subscriptions.on_connection_closed(will_reconnect);

        if !will_reconnect {
            warn!(
                "giving up after {} reconnection attempts",
                self.reconnections
            );
            self.terminal = true;
            self.set_state(ConnectionState::Closed);
            self.handlers.emit_closed();
            return;
        }

        let now = Instant::now();
        self.pending_reconnect = Some(match redirect {
            Some(node) => {
                self.failed_endpoints = None;
                PendingReconnect {
                    at: now,
                    target: Some(node),
                }
            }
            None => {
                self.reconnections += 1;
                self.failed_endpoints = endpoints;
                PendingReconnect {
                    at: now + self.settings.reconnection_delay(),
                    target: None,
                }
            }
        });
    }

    fn can_reconnect(&self) -> bool {
        self.settings
            .max_reconnections
            .map_or(true, |max| self.reconnections < max)
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        let was_terminal = self.terminal;
        self.stopped = true;
        self.terminal = true;
        self.pending_reconnect = None;

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connected(conn) => {
                info!("closing connection to {}", conn.endpoints);
                conn.shutdown();
                self.handlers.emit_disconnected(&CloseReason::Shutdown);
            }
            Phase::Connecting { task, .. } => task.abort(),
            Phase::Idle => {}
        }

        self.operations.fail_all(|| ClientError::ConnectionClosed);
        self.subscriptions.drop_all();
        self.set_state(ConnectionState::Closed);
        if !was_terminal {
            self.handlers.emit_closed();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_close_reason_transience() {
        assert!(CloseReason::ServerClosed.is_transient());
        assert!(CloseReason::HeartbeatTimeout.is_transient());
        assert!(CloseReason::ProtocolViolation("x".into()).is_transient());
        assert!(!CloseReason::Shutdown.is_transient());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert!(ConnectionId::new(1) < ConnectionId::new(2));
    }

    #[tokio::test]
    async fn test_terminal_after_max_reconnections() {
        // nothing listens on port 1 of localhost
        let settings = Settings::new("127.0.0.1:1".parse().unwrap())
            .with_max_reconnections(Some(1))
            .with_reconnection_delay(Duration::from_millis(10));
        let connection = Connection::start(settings, EventHandlers::new()).unwrap();

        let rx = connection.submit(
            OperationRequest::ReadEvent {
                stream: "s".to_string(),
                event_number: 0,
                resolve_link_tos: false,
                require_master: true,
            },
            None,
        );
        let result = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(connection.state(), ConnectionState::Closed);

        // later submissions fail immediately
        let rx = connection.submit(
            OperationRequest::ReadEvent {
                stream: "s".to_string(),
                event_number: 0,
                resolve_link_tos: false,
                require_master: true,
            },
            None,
        );
        assert!(matches!(rx.await.unwrap(), Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_fails_pending_operations() {
        let settings = Settings::new("127.0.0.1:1".parse().unwrap())
            .with_max_reconnections(None)
            .with_reconnection_delay(Duration::from_secs(60));
        let connection = Connection::start(settings, EventHandlers::new()).unwrap();

        let rx = connection.submit(
            OperationRequest::ReadEvent {
                stream: "s".to_string(),
                event_number: 0,
                resolve_link_tos: false,
                require_master: true,
            },
            None,
        );
        connection.close().await;

        assert!(matches!(rx.await.unwrap(), Err(ClientError::ConnectionClosed)));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }
}
