//! Subscription listeners and handles.

use crate::connection::Message;
use crate::error::ClientError;
use crate::types::ResolvedEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a subscription across resubscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    Stream(String),
    /// Every stream.
    All,
}

impl SubscriptionTarget {
    /// Stream id as sent on the wire; empty for all streams.
    pub fn stream_id(&self) -> &str {
        match self {
            SubscriptionTarget::Stream(stream) => stream,
            SubscriptionTarget::All => "",
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Stream(stream) => write!(f, "stream '{}'", stream),
            SubscriptionTarget::All => write!(f, "$all"),
        }
    }
}

/// Server confirmation of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionConfirmed {
    pub last_commit_position: i64,
    /// Last event number of the stream; `None` for `$all`.
    pub last_event_number: Option<i64>,
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unsubscribed,
    AccessDenied,
    NotFound,
    ConnectionClosed,
    /// The server rejected or garbled the subscription.
    ServerError,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Unsubscribed => write!(f, "unsubscribed"),
            DropReason::AccessDenied => write!(f, "access denied"),
            DropReason::NotFound => write!(f, "not found"),
            DropReason::ConnectionClosed => write!(f, "connection closed"),
            DropReason::ServerError => write!(f, "server error"),
        }
    }
}

/// Receives subscription notifications.
///
/// Callbacks run on the connection task and must not block. `on_dropped` is
/// called exactly once and nothing follows it.
pub trait SubscriptionListener: Send + 'static {
    fn on_confirmed(&mut self, _confirmation: &SubscriptionConfirmed) {}

    fn on_event(&mut self, event: ResolvedEvent);

    fn on_dropped(&mut self, reason: DropReason, error: Option<ClientError>);
}

/// Notification forwarded by [`ChannelListener`].
#[derive(Debug)]
pub enum SubscriptionEvent {
    Confirmed(SubscriptionConfirmed),
    Event(ResolvedEvent),
    Dropped {
        reason: DropReason,
        error: Option<ClientError>,
    },
}

/// Listener that forwards every notification into a channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SubscriptionListener for ChannelListener {
    fn on_confirmed(&mut self, confirmation: &SubscriptionConfirmed) {
        let _ = self.tx.send(SubscriptionEvent::Confirmed(*confirmation));
    }

    fn on_event(&mut self, event: ResolvedEvent) {
        let _ = self.tx.send(SubscriptionEvent::Event(event));
    }

    fn on_dropped(&mut self, reason: DropReason, error: Option<ClientError>) {
        let _ = self.tx.send(SubscriptionEvent::Dropped { reason, error });
    }
}

/// Handle to a confirmed subscription.
pub struct Subscription {
    id: SubscriptionId,
    target: SubscriptionTarget,
    confirmation: SubscriptionConfirmed,
    commands: mpsc::UnboundedSender<Message>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        target: SubscriptionTarget,
        confirmation: SubscriptionConfirmed,
        commands: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            target,
            confirmation,
            commands,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    pub fn last_commit_position(&self) -> i64 {
        self.confirmation.last_commit_position
    }

    pub fn last_event_number(&self) -> Option<i64> {
        self.confirmation.last_event_number
    }

    /// Asks the server to stop the subscription. The listener's `on_dropped`
    /// fires with `Unsubscribed` once the request has been sent.
    pub fn unsubscribe(&self) {
        let _ = self.commands.send(Message::Unsubscribe(self.id));
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("confirmation", &self.confirmation)
            .finish()
    }
}
