//! High-level client API.

use crate::connection::{Connection, ConnectionState};
use crate::endpoint::EndpointDiscoverer;
use crate::error::ClientError;
use crate::event_handlers::EventHandlers;
use crate::operation::{metastream_of, OperationOutput, OperationRequest, METADATA_EVENT_TYPE};
use crate::settings::Settings;
use crate::subscription::{Subscription, SubscriptionListener, SubscriptionTarget};
use crate::transaction::Transaction;
use crate::types::{
    AllEventsSlice, DeleteResult, EventData, EventReadResult, ExpectedVersion, Position,
    ReadDirection, StreamEventsSlice, WriteResult, MAX_READ_SIZE,
};
use evstore_protocol::Credentials;
use serde::Serialize;
use std::sync::Arc;

/// High-level client for evstore.
///
/// Every method builds one request and hands it to the connection task,
/// which multiplexes it over a single socket. Clones share the connection.
#[derive(Debug, Clone)]
pub struct EventStoreClient {
    conn: Connection,
    settings: Arc<Settings>,
}

impl EventStoreClient {
    /// Starts a client. The connection is opened in the background; requests
    /// issued before it is up are queued.
    pub fn new(settings: Settings) -> Result<Self, ClientError> {
        Self::with_handlers(settings, EventHandlers::default())
    }

    /// Starts a client with lifecycle callbacks.
    pub fn with_handlers(settings: Settings, handlers: EventHandlers) -> Result<Self, ClientError> {
        let conn = Connection::start(settings.clone(), handlers)?;
        Ok(Self {
            conn,
            settings: Arc::new(settings),
        })
    }

    /// Starts a client that finds nodes through a custom discoverer.
    pub fn with_discoverer(
        settings: Settings,
        discoverer: Box<dyn EndpointDiscoverer>,
        handlers: EventHandlers,
    ) -> Result<Self, ClientError> {
        settings.validate()?;
        let conn = Connection::start_with_discoverer(settings.clone(), discoverer, handlers);
        Ok(Self {
            conn,
            settings: Arc::new(settings),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the underlying connection handle.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection. Pending operations fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.conn.close().await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    pub(crate) async fn execute(
        &self,
        request: OperationRequest,
        credentials: Option<Credentials>,
    ) -> Result<OperationOutput, ClientError> {
        let rx = self.conn.submit(request, credentials);
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    fn credentials_or_default(&self, credentials: Option<Credentials>) -> Option<Credentials> {
        credentials.or_else(|| self.settings.credentials.clone())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Appends events to a stream.
    pub async fn append_to_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        events: Vec<EventData>,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, ClientError> {
        let request = OperationRequest::AppendToStream {
            stream: stream.to_string(),
            expected_version,
            events,
            require_master: self.settings.require_master,
        };
        match self
            .execute(request, self.credentials_or_default(credentials))
            .await?
        {
            OperationOutput::Write(result) => Ok(result),
            other => Err(unexpected("append", other)),
        }
    }

    /// Deletes a stream. A hard delete makes the stream name unusable.
    pub async fn delete_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        hard_delete: bool,
        credentials: Option<Credentials>,
    ) -> Result<DeleteResult, ClientError> {
        let request = OperationRequest::DeleteStream {
            stream: stream.to_string(),
            expected_version,
            hard_delete,
            require_master: self.settings.require_master,
        };
        match self
            .execute(request, self.credentials_or_default(credentials))
            .await?
        {
            OperationOutput::Delete(result) => Ok(result),
            other => Err(unexpected("delete", other)),
        }
    }

    /// Writes the metadata of a stream as a `$metadata` event on its
    /// metastream.
    pub async fn set_stream_metadata<T: Serialize>(
        &self,
        stream: &str,
        expected_metastream_version: ExpectedVersion,
        metadata: &T,
        credentials: Option<Credentials>,
    ) -> Result<WriteResult, ClientError> {
        if stream.is_empty() {
            return Err(ClientError::InvalidRequest(
                "stream name must not be empty".to_string(),
            ));
        }
        let request = OperationRequest::SetStreamMetadata {
            stream: stream.to_string(),
            expected_metastream_version,
            metadata: EventData::json(METADATA_EVENT_TYPE, metadata)?,
            require_master: self.settings.require_master,
        };
        tracing::debug!("writing metadata of {} to {}", stream, metastream_of(stream));
        match self
            .execute(request, self.credentials_or_default(credentials))
            .await?
        {
            OperationOutput::Write(result) => Ok(result),
            other => Err(unexpected("set metadata", other)),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Starts a transaction on a stream.
    pub async fn start_transaction(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        credentials: Option<Credentials>,
    ) -> Result<Transaction, ClientError> {
        let credentials = self.credentials_or_default(credentials);
        let request = OperationRequest::StartTransaction {
            stream: stream.to_string(),
            expected_version,
            require_master: self.settings.require_master,
        };
        match self.execute(request, credentials.clone()).await? {
            OperationOutput::TransactionStarted(transaction_id) => Ok(Transaction::new(
                self.clone(),
                transaction_id,
                Some(stream.to_string()),
                Some(expected_version),
                credentials,
            )),
            other => Err(unexpected("start transaction", other)),
        }
    }

    /// Rebuilds a handle for a transaction started elsewhere.
    pub fn continue_transaction(
        &self,
        transaction_id: i64,
        credentials: Option<Credentials>,
    ) -> Transaction {
        Transaction::new(
            self.clone(),
            transaction_id,
            None,
            None,
            self.credentials_or_default(credentials),
        )
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads one event. A missing event or stream is reported in the status.
    pub async fn read_event(
        &self,
        stream: &str,
        event_number: i64,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<EventReadResult, ClientError> {
        if event_number < -1 {
            return Err(ClientError::InvalidRequest(format!(
                "event number {} is out of range",
                event_number
            )));
        }
        let request = OperationRequest::ReadEvent {
            stream: stream.to_string(),
            event_number,
            resolve_link_tos,
            require_master: self.settings.require_master,
        };
        match self
            .execute(request, self.credentials_or_default(credentials))
            .await?
        {
            OperationOutput::Event(result) => Ok(result),
            other => Err(unexpected("read event", other)),
        }
    }

    /// Reads up to `count` events of a stream, starting at `start`.
    pub async fn read_stream_events_forward(
        &self,
        stream: &str,
        start: i64,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        if start < 0 {
            return Err(ClientError::InvalidRequest(format!(
                "start {} must not be negative",
                start
            )));
        }
        self.read_stream(ReadDirection::Forward, stream, start, count, resolve_link_tos, credentials)
            .await
    }

    /// Reads up to `count` events of a stream backwards from `start`.
    /// `-1` starts at the last event.
    pub async fn read_stream_events_backward(
        &self,
        stream: &str,
        start: i64,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        self.read_stream(ReadDirection::Backward, stream, start, count, resolve_link_tos, credentials)
            .await
    }

    async fn read_stream(
        &self,
        direction: ReadDirection,
        stream: &str,
        start: i64,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamEventsSlice, ClientError> {
        check_count(count)?;
        let request = OperationRequest::ReadStreamEvents {
            direction,
            stream: stream.to_string(),
            start,
            max_count: count,
            resolve_link_tos,
            require_master: self.settings.require_master,
        };
        match self
            .execute(request, self.credentials_or_default(credentials))
            .await?
        {
            OperationOutput::StreamSlice(slice) => Ok(slice),
            other => Err(unexpected("read stream", other)),
        }
    }

    /// Reads up to `count` events of the global log from `position`.
    pub async fn read_all_events_forward(
        &self,
        position: Position,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, ClientError> {
        self.read_all(ReadDirection::Forward, position, count, resolve_link_tos, credentials)
            .await
    }

    /// Reads up to `count` events of the global log backwards from `position`.
    pub async fn read_all_events_backward(
        &self,
        position: Position,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, ClientError> {
        self.read_all(ReadDirection::Backward, position, count, resolve_link_tos, credentials)
            .await
    }

    async fn read_all(
        &self,
        direction: ReadDirection,
        position: Position,
        count: i32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<AllEventsSlice, ClientError> {
        check_count(count)?;
        let request = OperationRequest::ReadAllEvents {
            direction,
            position,
            max_count: count,
            resolve_link_tos,
            require_master: self.settings.require_master,
        };
        match self
            .execute(request, self.credentials_or_default(credentials))
            .await?
        {
            OperationOutput::AllSlice(slice) => Ok(slice),
            other => Err(unexpected("read all", other)),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribes to new events of one stream. Resolves once the server
    /// confirms the subscription.
    pub async fn subscribe_to_stream(
        &self,
        stream: &str,
        resolve_link_tos: bool,
        listener: impl SubscriptionListener,
        credentials: Option<Credentials>,
    ) -> Result<Subscription, ClientError> {
        if stream.is_empty() {
            return Err(ClientError::InvalidRequest(
                "stream name must not be empty".to_string(),
            ));
        }
        self.subscribe(
            SubscriptionTarget::Stream(stream.to_string()),
            resolve_link_tos,
            Box::new(listener),
            credentials,
        )
        .await
    }

    /// Subscribes to every new event in the global log.
    pub async fn subscribe_to_all(
        &self,
        resolve_link_tos: bool,
        listener: impl SubscriptionListener,
        credentials: Option<Credentials>,
    ) -> Result<Subscription, ClientError> {
        self.subscribe(
            SubscriptionTarget::All,
            resolve_link_tos,
            Box::new(listener),
            credentials,
        )
        .await
    }

    async fn subscribe(
        &self,
        target: SubscriptionTarget,
        resolve_link_tos: bool,
        listener: Box<dyn SubscriptionListener>,
        credentials: Option<Credentials>,
    ) -> Result<Subscription, ClientError> {
        let (id, rx) = self.conn.subscribe(
            target.clone(),
            resolve_link_tos,
            listener,
            self.credentials_or_default(credentials),
        );
        let confirmation = rx.await.map_err(|_| ClientError::ConnectionClosed)??;
        Ok(Subscription::new(
            id,
            target,
            confirmation,
            self.conn.commands(),
        ))
    }
}

fn check_count(count: i32) -> Result<(), ClientError> {
    if count <= 0 || count > MAX_READ_SIZE {
        return Err(ClientError::InvalidRequest(format!(
            "count must be between 1 and {}, got {}",
            MAX_READ_SIZE, count
        )));
    }
    Ok(())
}

fn unexpected(operation: &str, output: OperationOutput) -> ClientError {
    ClientError::ProtocolViolation(format!("unexpected {} result {:?}", operation, output))
}
