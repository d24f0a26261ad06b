//! # evstore-client
//!
//! Client library for evstore.
//!
//! This crate provides:
//! - One persistent connection multiplexing every request and subscription
//! - Heartbeats, an authentication handshake and automatic reconnection
//! - Retries and master redirects with exactly-once result delivery
//! - Live subscriptions to a stream or to the global log
//! - Optional TLS support
//!
//! ```rust,no_run
//! use evstore_client::{EventData, EventStoreClient, ExpectedVersion, Settings};
//!
//! # async fn example() -> Result<(), evstore_client::ClientError> {
//! let client = EventStoreClient::new(Settings::load()?)?;
//! let event = EventData::json("OrderPlaced", &serde_json::json!({ "id": 7 }))?;
//! let result = client
//!     .append_to_stream("order-7", ExpectedVersion::NoStream, vec![event], None)
//!     .await?;
//! println!("next expected version: {}", result.next_expected_version);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event_handlers;
pub mod heartbeat;
pub mod operation;
pub mod operation_engine;
pub mod router;
pub mod settings;
pub mod subscription;
pub mod subscription_engine;
pub mod tls;
pub mod transaction;
mod transport;
pub mod types;

pub use auth::AuthenticationStatus;
pub use client::EventStoreClient;
pub use connection::{CloseReason, Connection, ConnectionId, ConnectionState};
pub use endpoint::{
    EndpointDiscoverer, NodeEndpoints, RotatingEndpointDiscoverer, StaticEndpointDiscoverer,
};
pub use error::ClientError;
pub use event_handlers::EventHandlers;
pub use evstore_protocol::Credentials;
pub use settings::{ConfigError, Settings, SubscriptionRecovery, TlsSettings};
pub use subscription::{
    ChannelListener, DropReason, Subscription, SubscriptionConfirmed, SubscriptionEvent,
    SubscriptionId, SubscriptionListener, SubscriptionTarget,
};
pub use transaction::Transaction;
pub use types::{
    AllEventsSlice, DeleteResult, EventData, EventReadResult, EventReadStatus, ExpectedVersion,
    Position, ReadDirection, RecordedEvent, ResolvedEvent, SliceReadStatus, StreamEventsSlice,
    WriteResult, MAX_READ_SIZE,
};
