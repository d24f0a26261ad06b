//! JSON message bodies, one per command.
//!
//! Heartbeat, ping and authentication packages carry empty bodies.
//! `BadRequest` and `NotAuthenticated` carry a UTF-8 reason as raw text.

use crate::error::OperationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type marker for opaque binary data.
pub const CONTENT_TYPE_BINARY: i32 = 0;

/// Content type marker for JSON data.
pub const CONTENT_TYPE_JSON: i32 = 1;

// ============================================================================
// Events
// ============================================================================

/// Event submitted for writing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub data_content_type: i32,
    pub metadata_content_type: i32,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub metadata: Vec<u8>,
}

/// Event as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_stream_id: String,
    pub event_number: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub data_content_type: i32,
    pub metadata_content_type: i32,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub metadata: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// Event read from a single stream, with its link when resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIndexedEvent {
    #[serde(default)]
    pub event: Option<EventRecord>,
    #[serde(default)]
    pub link: Option<EventRecord>,
}

/// Event read from the global log, with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    #[serde(default)]
    pub event: Option<EventRecord>,
    #[serde(default)]
    pub link: Option<EventRecord>,
    pub commit_position: i64,
    pub prepare_position: i64,
}

// ============================================================================
// Writes
// ============================================================================

/// Body of `WriteEvents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteEvents {
    pub event_stream_id: String,
    pub expected_version: i64,
    pub events: Vec<NewEvent>,
    pub require_master: bool,
}

/// Body of `WriteEventsCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteEventsCompleted {
    pub result: OperationResult,
    #[serde(default)]
    pub message: Option<String>,
    pub first_event_number: i64,
    pub last_event_number: i64,
    #[serde(default)]
    pub prepare_position: Option<i64>,
    #[serde(default)]
    pub commit_position: Option<i64>,
    #[serde(default)]
    pub current_version: Option<i64>,
}

/// Body of `DeleteStream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteStream {
    pub event_stream_id: String,
    pub expected_version: i64,
    pub require_master: bool,
    #[serde(default)]
    pub hard_delete: bool,
}

/// Body of `DeleteStreamCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteStreamCompleted {
    pub result: OperationResult,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub prepare_position: Option<i64>,
    #[serde(default)]
    pub commit_position: Option<i64>,
}

/// Body of `TransactionStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStart {
    pub event_stream_id: String,
    pub expected_version: i64,
    pub require_master: bool,
}

/// Body of `TransactionStartCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStartCompleted {
    pub transaction_id: i64,
    pub result: OperationResult,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `TransactionWrite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionWrite {
    pub transaction_id: i64,
    pub events: Vec<NewEvent>,
    pub require_master: bool,
}

/// Body of `TransactionWriteCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionWriteCompleted {
    pub transaction_id: i64,
    pub result: OperationResult,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `TransactionCommit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCommit {
    pub transaction_id: i64,
    pub require_master: bool,
}

/// Body of `TransactionCommitCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCommitCompleted {
    pub transaction_id: i64,
    pub result: OperationResult,
    #[serde(default)]
    pub message: Option<String>,
    pub first_event_number: i64,
    pub last_event_number: i64,
    #[serde(default)]
    pub prepare_position: Option<i64>,
    #[serde(default)]
    pub commit_position: Option<i64>,
}

// ============================================================================
// Reads
// ============================================================================

/// Body of `ReadEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadEvent {
    pub event_stream_id: String,
    pub event_number: i64,
    pub resolve_link_tos: bool,
    pub require_master: bool,
}

/// Outcome of a single-event read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadEventResult {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
    Error,
    AccessDenied,
}

/// Body of `ReadEventCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadEventCompleted {
    pub result: ReadEventResult,
    #[serde(default)]
    pub event: Option<ResolvedIndexedEvent>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `ReadStreamEventsForward` and `ReadStreamEventsBackward`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStreamEvents {
    pub event_stream_id: String,
    pub from_event_number: i64,
    pub max_count: i32,
    pub resolve_link_tos: bool,
    pub require_master: bool,
}

/// Outcome of a stream slice read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStreamResult {
    Success,
    NoStream,
    StreamDeleted,
    NotModified,
    Error,
    AccessDenied,
}

/// Body of `ReadStreamEventsForwardCompleted` and `ReadStreamEventsBackwardCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStreamEventsCompleted {
    #[serde(default)]
    pub events: Vec<ResolvedIndexedEvent>,
    pub result: ReadStreamResult,
    pub next_event_number: i64,
    pub last_event_number: i64,
    pub is_end_of_stream: bool,
    pub last_commit_position: i64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `ReadAllEventsForward` and `ReadAllEventsBackward`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAllEvents {
    pub commit_position: i64,
    pub prepare_position: i64,
    pub max_count: i32,
    pub resolve_link_tos: bool,
    pub require_master: bool,
}

/// Outcome of a global log slice read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadAllResult {
    Success,
    NotModified,
    Error,
    AccessDenied,
}

/// Body of `ReadAllEventsForwardCompleted` and `ReadAllEventsBackwardCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadAllEventsCompleted {
    pub commit_position: i64,
    pub prepare_position: i64,
    #[serde(default)]
    pub events: Vec<ResolvedEvent>,
    pub next_commit_position: i64,
    pub next_prepare_position: i64,
    pub result: ReadAllResult,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Body of `SubscribeToStream`. An empty stream id subscribes to the global log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeToStream {
    pub event_stream_id: String,
    pub resolve_link_tos: bool,
}

/// Body of `SubscriptionConfirmation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfirmation {
    pub last_commit_position: i64,
    #[serde(default)]
    pub last_event_number: Option<i64>,
}

/// Body of `StreamEventAppeared`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEventAppeared {
    pub event: ResolvedEvent,
}

/// Body of `UnsubscribeFromStream`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsubscribeFromStream {}

/// Reason the server gives when it ends a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionDropReason {
    #[default]
    Unsubscribed,
    AccessDenied,
    NotFound,
}

/// Body of `SubscriptionDropped`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionDropped {
    #[serde(default)]
    pub reason: SubscriptionDropReason,
}

// ============================================================================
// Control
// ============================================================================

/// Why a node declined to handle a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotHandledReason {
    NotReady,
    TooBusy,
    NotMaster,
}

/// Endpoints of the current write leader, sent with `NotMaster`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub external_tcp_address: String,
    pub external_tcp_port: u16,
    #[serde(default)]
    pub external_secure_tcp_address: Option<String>,
    #[serde(default)]
    pub external_secure_tcp_port: Option<u16>,
}

/// Body of `NotHandled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotHandled {
    pub reason: NotHandledReason,
    #[serde(default)]
    pub additional_info: Option<MasterInfo>,
}
