//! Connection lifecycle event handlers.
//!
//! Callbacks run on the connection task, so they must return quickly.
//!
//! # Example
//!
//! ```rust,no_run
//! use evstore_client::{EventHandlers, EventStoreClient, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = EventHandlers::new()
//!     .on_connected(|node| println!("connected to {}", node))
//!     .on_disconnected(|reason| println!("disconnected: {}", reason));
//!
//! let client = EventStoreClient::with_handlers(Settings::default(), handlers)?;
//! # Ok(())
//! # }
//! ```

use crate::auth::AuthenticationStatus;
use crate::connection::CloseReason;
use crate::endpoint::NodeEndpoints;
use evstore_protocol::Package;
use std::fmt;
use std::sync::Arc;

pub type OnConnectedCallback = Arc<dyn Fn(&NodeEndpoints) + Send + Sync>;
pub type OnDisconnectedCallback = Arc<dyn Fn(&CloseReason) + Send + Sync>;
pub type OnAuthenticationCallback = Arc<dyn Fn(AuthenticationStatus) + Send + Sync>;
pub type OnBadRequestCallback = Arc<dyn Fn(&Package) + Send + Sync>;
pub type OnReconnectCallback = Arc<dyn Fn(&NodeEndpoints) + Send + Sync>;
pub type OnClosedCallback = Arc<dyn Fn() + Send + Sync>;

/// Connection lifecycle callbacks. All are optional.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connected: Option<OnConnectedCallback>,
    pub(crate) on_disconnected: Option<OnDisconnectedCallback>,
    pub(crate) on_authentication_completed: Option<OnAuthenticationCallback>,
    pub(crate) on_bad_request: Option<OnBadRequestCallback>,
    pub(crate) on_reconnect: Option<OnReconnectCallback>,
    pub(crate) on_closed: Option<OnClosedCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field(
                "on_authentication_completed",
                &self.on_authentication_completed.is_some(),
            )
            .field("on_bad_request", &self.on_bad_request.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once a connection is established.
    pub fn on_connected(mut self, f: impl Fn(&NodeEndpoints) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Called whenever a connection closes, whether or not a reconnect follows.
    pub fn on_disconnected(mut self, f: impl Fn(&CloseReason) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Called when the authentication handshake of a connection ends.
    pub fn on_authentication_completed(
        mut self,
        f: impl Fn(AuthenticationStatus) + Send + Sync + 'static,
    ) -> Self {
        self.on_authentication_completed = Some(Arc::new(f));
        self
    }

    /// Called for a `BadRequest` that belongs to no operation or subscription.
    pub fn on_bad_request(mut self, f: impl Fn(&Package) + Send + Sync + 'static) -> Self {
        self.on_bad_request = Some(Arc::new(f));
        self
    }

    /// Called before each reconnect attempt with the node being dialed.
    pub fn on_reconnect(mut self, f: impl Fn(&NodeEndpoints) + Send + Sync + 'static) -> Self {
        self.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Called once when the client gives up or is closed.
    pub fn on_closed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_closed = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connected(&self, endpoints: &NodeEndpoints) {
        if let Some(cb) = &self.on_connected {
            cb(endpoints);
        }
    }

    pub(crate) fn emit_disconnected(&self, reason: &CloseReason) {
        if let Some(cb) = &self.on_disconnected {
            cb(reason);
        }
    }

    pub(crate) fn emit_authentication_completed(&self, status: AuthenticationStatus) {
        if let Some(cb) = &self.on_authentication_completed {
            cb(status);
        }
    }

    pub(crate) fn emit_bad_request(&self, package: &Package) {
        if let Some(cb) = &self.on_bad_request {
            cb(package);
        }
    }

    pub(crate) fn emit_reconnect(&self, endpoints: &NodeEndpoints) {
        if let Some(cb) = &self.on_reconnect {
            cb(endpoints);
        }
    }

    pub(crate) fn emit_closed(&self) {
        if let Some(cb) = &self.on_closed {
            cb();
        }
    }
}
