//! Live subscription tracking.
//!
//! A subscription is `Unconfirmed` until the server sends
//! `SubscriptionConfirmation`, then `Confirmed` until it is dropped. Once an
//! entry leaves the tables its listener has seen `on_dropped` and nothing
//! else is delivered to it.

use crate::connection::ConnectionId;
use crate::endpoint::NodeEndpoints;
use crate::error::ClientError;
use crate::settings::SubscriptionRecovery;
use crate::subscription::{
    DropReason, SubscriptionConfirmed, SubscriptionId, SubscriptionListener, SubscriptionTarget,
};
use crate::types::ResolvedEvent;
use evstore_protocol::message::{
    NotHandled, NotHandledReason, StreamEventAppeared, SubscribeToStream, SubscriptionConfirmation,
    SubscriptionDropReason, SubscriptionDropped, UnsubscribeFromStream,
};
use evstore_protocol::{Command, Credentials, Package};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

pub type ConfirmationSender = oneshot::Sender<Result<SubscriptionConfirmed, ClientError>>;
pub type ConfirmationReceiver = oneshot::Receiver<Result<SubscriptionConfirmed, ClientError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unconfirmed,
    Confirmed,
    Dropped,
}

/// A subscription and its listener.
pub struct SubscriptionItem {
    id: SubscriptionId,
    correlation_id: Uuid,
    target: SubscriptionTarget,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    listener: Box<dyn SubscriptionListener>,
    state: SubscriptionState,
    unsubscribe_requested: bool,
    confirmation: Option<ConfirmationSender>,
    connection_id: Option<ConnectionId>,
    retry_count: u32,
}

impl SubscriptionItem {
    pub fn new(
        target: SubscriptionTarget,
        resolve_link_tos: bool,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> (Self, ConfirmationReceiver) {
        let (tx, rx) = oneshot::channel();
        let item = Self {
            id: SubscriptionId::next(),
            correlation_id: Uuid::new_v4(),
            target,
            resolve_link_tos,
            credentials,
            listener,
            state: SubscriptionState::Unconfirmed,
            unsubscribe_requested: false,
            confirmation: Some(tx),
            connection_id: None,
            retry_count: 0,
        };
        (item, rx)
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn package(&self) -> Result<Package, ClientError> {
        let body = SubscribeToStream {
            event_stream_id: self.target.stream_id().to_string(),
            resolve_link_tos: self.resolve_link_tos,
        };
        Ok(
            Package::from_json(Command::SubscribeToStream, self.correlation_id, &body)?
                .with_credentials(self.credentials.clone()),
        )
    }

    fn unsubscribe_package(&self) -> Result<Package, ClientError> {
        Ok(Package::from_json(
            Command::UnsubscribeFromStream,
            self.correlation_id,
            &UnsubscribeFromStream {},
        )?
        .with_credentials(self.credentials.clone()))
    }

    fn confirm(&mut self, confirmation: SubscriptionConfirmed) {
        self.state = SubscriptionState::Confirmed;
        self.listener.on_confirmed(&confirmation);
        if let Some(tx) = self.confirmation.take() {
            let _ = tx.send(Ok(confirmation));
        }
    }

    /// Ends the subscription. Consumes the item.
    pub(crate) fn drop_with(mut self, reason: DropReason, error: Option<ClientError>) {
        debug!("subscription {} to {} dropped: {}", self.id, self.target, reason);
        if let Some(tx) = self.confirmation.take() {
            let _ = tx.send(Err(confirmation_error(&self.target, reason)));
        }
        self.listener.on_dropped(reason, error);
    }
}

fn confirmation_error(target: &SubscriptionTarget, reason: DropReason) -> ClientError {
    match reason {
        DropReason::AccessDenied => {
            ClientError::AccessDenied(format!("subscription to {} denied", target))
        }
        DropReason::NotFound => ClientError::ServerError(format!("{} not found", target)),
        DropReason::ServerError => {
            ClientError::ServerError(format!("subscription to {} rejected", target))
        }
        DropReason::Unsubscribed | DropReason::ConnectionClosed => ClientError::ConnectionClosed,
    }
}

/// What the connection manager must do after a subscription package.
#[derive(Debug, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    Handled,
    /// Write this package on the current connection.
    Send(Package),
    /// Reconnect to this node; the subscription waits for the new connection.
    Reconnect(NodeEndpoints),
    /// The subscription was dropped; the connection should be closed.
    ProtocolViolation(String),
}

pub struct SubscriptionEngine {
    recovery: SubscriptionRecovery,
    max_retries: u32,
    active: HashMap<Uuid, SubscriptionItem>,
    waiting: VecDeque<SubscriptionItem>,
}

impl SubscriptionEngine {
    /// `max_retries` bounds the `NotHandled` resends and redirects of one
    /// subscription.
    pub fn new(recovery: SubscriptionRecovery, max_retries: u32) -> Self {
        Self {
            recovery,
            max_retries,
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

    pub fn state(&self, id: SubscriptionId) -> SubscriptionState {
        self.active
            .values()
            .chain(self.waiting.iter())
            .find(|item| item.id == id)
            .map_or(SubscriptionState::Dropped, |item| item.state)
    }

    /// Parks a subscription until a connection is available.
    pub fn enqueue(&mut self, item: SubscriptionItem) {
        self.waiting.push_back(item);
    }

    /// Activates a subscription on a connection. Returns the subscribe
    /// request to write.
    pub fn schedule(
        &mut self,
        mut item: SubscriptionItem,
        connection_id: ConnectionId,
    ) -> Option<Package> {
        match item.package() {
            Ok(package) => {
                item.connection_id = Some(connection_id);
                self.active.insert(item.correlation_id, item);
                Some(package)
            }
            Err(e) => {
                warn!("cannot subscribe to {}: {}", item.target, e);
                item.drop_with(DropReason::ServerError, Some(e));
                None
            }
        }
    }

    /// Activates every waiting subscription on a new connection.
    pub fn start_waiting(&mut self, connection_id: ConnectionId) -> Vec<Package> {
        let waiting: Vec<SubscriptionItem> = self.waiting.drain(..).collect();
        waiting
            .into_iter()
            .filter_map(|item| self.schedule(item, connection_id))
            .collect()
    }

    /// Handles a package whose correlation id is in the active table.
    pub fn handle(
        &mut self,
        package: &Package,
        connection_id: ConnectionId,
    ) -> Option<SubscriptionOutcome> {
        let id = package.correlation_id;
        match self.active.get(&id) {
            Some(item) if item.connection_id == Some(connection_id) => {}
            _ => return None,
        }
        let mut item = self.active.remove(&id)?;

        let outcome = match package.command {
            Command::SubscriptionConfirmation => {
                let body: SubscriptionConfirmation = match package.body_json() {
                    Ok(body) => body,
                    Err(e) => {
                        return Some(violation(item, format!("malformed confirmation: {}", e)))
                    }
                };
                if item.state == SubscriptionState::Confirmed {
                    debug!("duplicate confirmation for subscription {}", item.id);
                    self.active.insert(id, item);
                    return Some(SubscriptionOutcome::Handled);
                }
                item.confirm(SubscriptionConfirmed {
                    last_commit_position: body.last_commit_position,
                    last_event_number: body.last_event_number,
                });
                if item.unsubscribe_requested {
                    return Some(unsubscribe(item));
                }
                self.active.insert(id, item);
                SubscriptionOutcome::Handled
            }
            Command::StreamEventAppeared => {
                if item.state != SubscriptionState::Confirmed {
                    warn!("event for unconfirmed subscription {} discarded", item.id);
                    self.active.insert(id, item);
                    return Some(SubscriptionOutcome::Handled);
                }
                let body: StreamEventAppeared = match package.body_json() {
                    Ok(body) => body,
                    Err(e) => return Some(violation(item, format!("malformed event: {}", e))),
                };
                item.listener.on_event(ResolvedEvent::from(body.event));
                self.active.insert(id, item);
                SubscriptionOutcome::Handled
            }
            Command::SubscriptionDropped => {
                let reason = if package.body.is_empty() {
                    SubscriptionDropReason::Unsubscribed
                } else {
                    match package.body_json::<SubscriptionDropped>() {
                        Ok(body) => body.reason,
                        Err(e) => {
                            return Some(violation(item, format!("malformed drop: {}", e)))
                        }
                    }
                };
                let (reason, error) = match reason {
                    SubscriptionDropReason::Unsubscribed => (DropReason::Unsubscribed, None),
                    SubscriptionDropReason::AccessDenied => (
                        DropReason::AccessDenied,
                        Some(ClientError::AccessDenied(format!(
                            "subscription to {} denied",
                            item.target
                        ))),
                    ),
                    SubscriptionDropReason::NotFound => (DropReason::NotFound, None),
                };
                item.drop_with(reason, error);
                SubscriptionOutcome::Handled
            }
            Command::NotAuthenticated => {
                let error = ClientError::NotAuthenticated(package.body_text());
                item.drop_with(DropReason::AccessDenied, Some(error));
                SubscriptionOutcome::Handled
            }
            Command::BadRequest => {
                let error = ClientError::BadRequest(package.body_text());
                item.drop_with(DropReason::ServerError, Some(error));
                SubscriptionOutcome::Handled
            }
            Command::NotHandled => {
                let body: NotHandled = match package.body_json() {
                    Ok(body) => body,
                    Err(e) => {
                        return Some(violation(item, format!("malformed NotHandled: {}", e)))
                    }
                };
                item.retry_count += 1;
                if item.retry_count > self.max_retries {
                    warn!(
                        "subscription {} to {} gave up after {} attempts",
                        item.id, item.target, item.retry_count
                    );
                    let attempts = item.retry_count;
                    item.drop_with(
                        DropReason::ServerError,
                        Some(ClientError::RetriesExhausted { attempts }),
                    );
                    return Some(SubscriptionOutcome::Handled);
                }
                item.correlation_id = Uuid::new_v4();
                item.state = SubscriptionState::Unconfirmed;
                match (body.reason, body.additional_info) {
                    (NotHandledReason::NotMaster, Some(info)) => {
                        match NodeEndpoints::from_master_info(&info) {
                            Ok(endpoints) => {
                                item.connection_id = None;
                                self.waiting.push_front(item);
                                SubscriptionOutcome::Reconnect(endpoints)
                            }
                            Err(e) => return Some(violation(item, e.to_string())),
                        }
                    }
                    (reason, _) => {
                        debug!("resubscribing {} after {:?}", item.id, reason);
                        match self.schedule(item, connection_id) {
                            Some(package) => SubscriptionOutcome::Send(package),
                            None => SubscriptionOutcome::Handled,
                        }
                    }
                }
            }
            other => violation(item, format!("unexpected command {} for subscription", other)),
        };
        Some(outcome)
    }

    /// Requests an unsubscribe. Returns the package to write, if one is due
    /// now. An unconfirmed subscription is unsubscribed once confirmed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Package> {
        let active = self
            .active
            .iter()
            .find(|(_, item)| item.id == id)
            .map(|(correlation_id, _)| *correlation_id);

        if let Some(correlation_id) = active {
            let item = self.active.get_mut(&correlation_id)?;
            if item.state != SubscriptionState::Confirmed {
                item.unsubscribe_requested = true;
                return None;
            }
            let item = self.active.remove(&correlation_id)?;
            return match unsubscribe(item) {
                SubscriptionOutcome::Send(package) => Some(package),
                _ => None,
            };
        }

        if let Some(pos) = self.waiting.iter().position(|item| item.id == id) {
            if let Some(item) = self.waiting.remove(pos) {
                item.drop_with(DropReason::Unsubscribed, None);
            }
        }
        None
    }

    /// Applies the recovery policy after the connection closed.
    pub fn on_connection_closed(&mut self, will_reconnect: bool) {
        let items: Vec<SubscriptionItem> = self.active.drain().map(|(_, item)| item).collect();

        if will_reconnect && self.recovery == SubscriptionRecovery::Resubscribe {
            for mut item in items {
                if item.unsubscribe_requested {
                    item.drop_with(DropReason::Unsubscribed, None);
                    continue;
                }
                item.correlation_id = Uuid::new_v4();
                item.state = SubscriptionState::Unconfirmed;
                item.connection_id = None;
                self.waiting.push_back(item);
            }
            return;
        }

        for item in items {
            item.drop_with(DropReason::ConnectionClosed, Some(ClientError::ConnectionClosed));
        }
        if !will_reconnect {
            self.drop_all();
        }
    }

    /// Drops every subscription with `ConnectionClosed`.
    pub fn drop_all(&mut self) {
        for (_, item) in self.active.drain() {
            item.drop_with(DropReason::ConnectionClosed, Some(ClientError::ConnectionClosed));
        }
        for item in self.waiting.drain(..) {
            item.drop_with(DropReason::ConnectionClosed, Some(ClientError::ConnectionClosed));
        }
    }
}

fn unsubscribe(item: SubscriptionItem) -> SubscriptionOutcome {
    let package = item.unsubscribe_package();
    item.drop_with(DropReason::Unsubscribed, None);
    match package {
        Ok(package) => SubscriptionOutcome::Send(package),
        Err(e) => {
            warn!("cannot encode unsubscribe: {}", e);
            SubscriptionOutcome::Handled
        }
    }
}

fn violation(item: SubscriptionItem, description: String) -> SubscriptionOutcome {
    warn!("subscription {}: {}", item.id, description);
    item.drop_with(
        DropReason::ServerError,
        Some(ClientError::ProtocolViolation(description.clone())),
    );
    SubscriptionOutcome::ProtocolViolation(description)
}
