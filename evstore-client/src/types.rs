//! Public value types exchanged with callers.

use crate::error::ClientError;
use chrono::{DateTime, Utc};
use evstore_protocol::message::{
    self, EventRecord, NewEvent, ResolvedIndexedEvent, CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON,
};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Largest slice a single read may request.
pub const MAX_READ_SIZE: i32 = 4096;

/// Optimistic concurrency check applied to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// Skip the check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event number must equal this value.
    Exact(i64),
}

impl ExpectedVersion {
    /// Returns the wire value.
    pub fn value(self) -> i64 {
        match self {
            ExpectedVersion::Any => -2,
            ExpectedVersion::NoStream => -1,
            ExpectedVersion::Exact(v) => v,
        }
    }
}

impl From<i64> for ExpectedVersion {
    fn from(value: i64) -> Self {
        match value {
            -2 => ExpectedVersion::Any,
            -1 => ExpectedVersion::NoStream,
            v => ExpectedVersion::Exact(v),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Event to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl EventData {
    /// Creates an event whose data is the JSON encoding of `data`.
    pub fn json<T: Serialize>(event_type: impl Into<String>, data: &T) -> Result<Self, ClientError> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            is_json: true,
            data: serde_json::to_vec(data)?,
            metadata: Vec::new(),
        })
    }

    /// Creates an event with opaque binary data.
    pub fn binary(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            is_json: false,
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub(crate) fn to_new_event(&self) -> NewEvent {
        let content_type = if self.is_json {
            CONTENT_TYPE_JSON
        } else {
            CONTENT_TYPE_BINARY
        };
        NewEvent {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            data_content_type: content_type,
            metadata_content_type: content_type,
            data: self.data.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Position in the global log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub commit: i64,
    pub prepare: i64,
}

impl Position {
    pub const START: Position = Position {
        commit: 0,
        prepare: 0,
    };
    pub const END: Position = Position {
        commit: -1,
        prepare: -1,
    };

    pub fn new(commit: i64, prepare: i64) -> Self {
        Self { commit, prepare }
    }

    pub(crate) fn from_optional(commit: Option<i64>, prepare: Option<i64>) -> Self {
        Self {
            commit: commit.unwrap_or(-1),
            prepare: prepare.unwrap_or(-1),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.commit, self.prepare)
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Expected version to use for the next write to the same stream.
    pub next_expected_version: i64,
    pub log_position: Position,
}

/// Result of a successful delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub log_position: Position,
}

/// An event as stored by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub stream_id: String,
    pub event_number: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub created: Option<DateTime<Utc>>,
}

impl From<EventRecord> for RecordedEvent {
    fn from(record: EventRecord) -> Self {
        Self {
            stream_id: record.event_stream_id,
            event_number: record.event_number,
            event_id: record.event_id,
            event_type: record.event_type,
            is_json: record.data_content_type == CONTENT_TYPE_JSON,
            data: record.data,
            metadata: record.metadata,
            created: record.created,
        }
    }
}

/// An event, possibly reached through a link event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub event: Option<RecordedEvent>,
    pub link: Option<RecordedEvent>,
    /// Global position; present for reads from `$all` and subscriptions.
    pub position: Option<Position>,
}

impl ResolvedEvent {
    /// Returns the event as it was read: the link if there is one.
    pub fn original_event(&self) -> Option<&RecordedEvent> {
        self.link.as_ref().or(self.event.as_ref())
    }

    pub fn is_resolved(&self) -> bool {
        self.link.is_some() && self.event.is_some()
    }

    pub fn original_stream_id(&self) -> Option<&str> {
        self.original_event().map(|e| e.stream_id.as_str())
    }

    pub fn original_event_number(&self) -> Option<i64> {
        self.original_event().map(|e| e.event_number)
    }
}

impl From<ResolvedIndexedEvent> for ResolvedEvent {
    fn from(resolved: ResolvedIndexedEvent) -> Self {
        Self {
            event: resolved.event.map(Into::into),
            link: resolved.link.map(Into::into),
            position: None,
        }
    }
}

impl From<message::ResolvedEvent> for ResolvedEvent {
    fn from(resolved: message::ResolvedEvent) -> Self {
        Self {
            event: resolved.event.map(Into::into),
            link: resolved.link.map(Into::into),
            position: Some(Position::new(
                resolved.commit_position,
                resolved.prepare_position,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceReadStatus {
    Success,
    StreamNotFound,
    StreamDeleted,
}

/// A page of events read from one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventsSlice {
    pub status: SliceReadStatus,
    pub stream: String,
    pub from_event_number: i64,
    pub read_direction: ReadDirection,
    pub events: Vec<ResolvedEvent>,
    pub next_event_number: i64,
    pub last_event_number: i64,
    pub is_end_of_stream: bool,
}

/// A page of events read from the global log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllEventsSlice {
    pub read_direction: ReadDirection,
    pub from_position: Position,
    pub next_position: Position,
    pub events: Vec<ResolvedEvent>,
}

impl AllEventsSlice {
    pub fn is_end_of_stream(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReadStatus {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
}

/// Result of reading a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReadResult {
    pub status: EventReadStatus,
    pub stream: String,
    pub event_number: i64,
    pub event: Option<ResolvedEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stream: &str, number: i64) -> EventRecord {
        EventRecord {
            event_stream_id: stream.to_string(),
            event_number: number,
            event_id: Uuid::new_v4(),
            event_type: "Created".to_string(),
            data_content_type: CONTENT_TYPE_JSON,
            metadata_content_type: CONTENT_TYPE_BINARY,
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            created: None,
        }
    }

    #[test]
    fn test_expected_version_values() {
        assert_eq!(ExpectedVersion::Any.value(), -2);
        assert_eq!(ExpectedVersion::NoStream.value(), -1);
        assert_eq!(ExpectedVersion::Exact(5).value(), 5);
        assert_eq!(ExpectedVersion::from(-1), ExpectedVersion::NoStream);
        assert_eq!(ExpectedVersion::from(0), ExpectedVersion::Exact(0));
    }

    #[test]
    fn test_event_data_json() {
        #[derive(Serialize)]
        struct Opened {
            id: u32,
        }

        let event = EventData::json("Opened", &Opened { id: 7 }).unwrap();
        assert!(event.is_json);
        assert_eq!(event.data, br#"{"id":7}"#);

        let wire = event.to_new_event();
        assert_eq!(wire.data_content_type, CONTENT_TYPE_JSON);
        assert_eq!(wire.event_id, event.event_id);
    }

    #[test]
    fn test_event_data_binary() {
        let event = EventData::binary("Blob", vec![1, 2, 3]).with_metadata(b"m".to_vec());
        let wire = event.to_new_event();
        assert_eq!(wire.data_content_type, CONTENT_TYPE_BINARY);
        assert_eq!(wire.metadata, b"m");
    }

    #[test]
    fn test_resolved_event_prefers_link() {
        let resolved: ResolvedEvent = ResolvedIndexedEvent {
            event: Some(record("orders-1", 3)),
            link: Some(record("$ce-orders", 12)),
        }
        .into();

        assert!(resolved.is_resolved());
        assert_eq!(resolved.original_stream_id(), Some("$ce-orders"));
        assert_eq!(resolved.original_event_number(), Some(12));
        assert!(resolved.position.is_none());
    }

    #[test]
    fn test_resolved_event_from_all() {
        let resolved: ResolvedEvent = message::ResolvedEvent {
            event: Some(record("orders-1", 0)),
            link: None,
            commit_position: 100,
            prepare_position: 90,
        }
        .into();

        assert_eq!(resolved.position, Some(Position::new(100, 90)));
        assert_eq!(resolved.original_stream_id(), Some("orders-1"));
        assert!(resolved.event.unwrap().is_json);
    }

    #[test]
    fn test_position_ordering() {
        assert!(Position::new(10, 5) < Position::new(11, 0));
        assert!(Position::START < Position::new(1, 1));
        assert_eq!(Position::new(3, 2).to_string(), "3/2");
    }
}
