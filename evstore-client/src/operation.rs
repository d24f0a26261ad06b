//! Request/response operations.
//!
//! Every operation kind is one variant of [`OperationRequest`]. A kind knows
//! its request and response commands, how to build its request body, and how
//! to turn a response into a [`Decision`].

use crate::endpoint::NodeEndpoints;
use crate::error::ClientError;
use crate::types::{
    AllEventsSlice, DeleteResult, EventData, EventReadResult, EventReadStatus, ExpectedVersion,
    Position, ReadDirection, ResolvedEvent, SliceReadStatus, StreamEventsSlice, WriteResult,
};
use bytes::Bytes;
use evstore_protocol::message::{
    DeleteStream, DeleteStreamCompleted, NewEvent, NotHandled, NotHandledReason, ReadAllEvents,
    ReadAllEventsCompleted, ReadAllResult, ReadEvent, ReadEventCompleted, ReadEventResult,
    ReadStreamEvents, ReadStreamEventsCompleted, ReadStreamResult, TransactionCommit,
    TransactionCommitCompleted, TransactionStart, TransactionStartCompleted, TransactionWrite,
    TransactionWriteCompleted, WriteEvents, WriteEventsCompleted,
};
use evstore_protocol::{Command, OperationResult, Package};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Static description of an operation kind.
#[derive(Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub name: &'static str,
    pub request: Command,
    pub response: Command,
}

const APPEND_TO_STREAM: OperationKind = OperationKind {
    name: "AppendToStream",
    request: Command::WriteEvents,
    response: Command::WriteEventsCompleted,
};
const SET_STREAM_METADATA: OperationKind = OperationKind {
    name: "SetStreamMetadata",
    request: Command::WriteEvents,
    response: Command::WriteEventsCompleted,
};
const DELETE_STREAM: OperationKind = OperationKind {
    name: "DeleteStream",
    request: Command::DeleteStream,
    response: Command::DeleteStreamCompleted,
};
const READ_EVENT: OperationKind = OperationKind {
    name: "ReadEvent",
    request: Command::ReadEvent,
    response: Command::ReadEventCompleted,
};
const READ_STREAM_FORWARD: OperationKind = OperationKind {
    name: "ReadStreamEventsForward",
    request: Command::ReadStreamEventsForward,
    response: Command::ReadStreamEventsForwardCompleted,
};
const READ_STREAM_BACKWARD: OperationKind = OperationKind {
    name: "ReadStreamEventsBackward",
    request: Command::ReadStreamEventsBackward,
    response: Command::ReadStreamEventsBackwardCompleted,
};
const READ_ALL_FORWARD: OperationKind = OperationKind {
    name: "ReadAllEventsForward",
    request: Command::ReadAllEventsForward,
    response: Command::ReadAllEventsForwardCompleted,
};
const READ_ALL_BACKWARD: OperationKind = OperationKind {
    name: "ReadAllEventsBackward",
    request: Command::ReadAllEventsBackward,
    response: Command::ReadAllEventsBackwardCompleted,
};
const START_TRANSACTION: OperationKind = OperationKind {
    name: "StartTransaction",
    request: Command::TransactionStart,
    response: Command::TransactionStartCompleted,
};
const TRANSACTIONAL_WRITE: OperationKind = OperationKind {
    name: "TransactionalWrite",
    request: Command::TransactionWrite,
    response: Command::TransactionWriteCompleted,
};
const COMMIT_TRANSACTION: OperationKind = OperationKind {
    name: "CommitTransaction",
    request: Command::TransactionCommit,
    response: Command::TransactionCommitCompleted,
};

/// Prefix of the stream holding another stream's metadata.
pub const METASTREAM_PREFIX: &str = "$$";
/// Event type of a stream metadata event.
pub const METADATA_EVENT_TYPE: &str = "$metadata";

/// One request the client can send and await a single answer for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    AppendToStream {
        stream: String,
        expected_version: ExpectedVersion,
        events: Vec<EventData>,
        require_master: bool,
    },
    SetStreamMetadata {
        stream: String,
        expected_metastream_version: ExpectedVersion,
        metadata: EventData,
        require_master: bool,
    },
    DeleteStream {
        stream: String,
        expected_version: ExpectedVersion,
        hard_delete: bool,
        require_master: bool,
    },
    ReadEvent {
        stream: String,
        event_number: i64,
        resolve_link_tos: bool,
        require_master: bool,
    },
    ReadStreamEvents {
        direction: ReadDirection,
        stream: String,
        start: i64,
        max_count: i32,
        resolve_link_tos: bool,
        require_master: bool,
    },
    ReadAllEvents {
        direction: ReadDirection,
        position: Position,
        max_count: i32,
        resolve_link_tos: bool,
        require_master: bool,
    },
    StartTransaction {
        stream: String,
        expected_version: ExpectedVersion,
        require_master: bool,
    },
    TransactionalWrite {
        transaction_id: i64,
        events: Vec<EventData>,
        require_master: bool,
    },
    CommitTransaction {
        transaction_id: i64,
        /// Stream and expected version, when the transaction was started
        /// through this client. Only used to describe a version conflict.
        stream: Option<String>,
        expected_version: Option<ExpectedVersion>,
        require_master: bool,
    },
}

/// Value an operation resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    Write(WriteResult),
    Delete(DeleteResult),
    Event(EventReadResult),
    StreamSlice(StreamEventsSlice),
    AllSlice(AllEventsSlice),
    TransactionStarted(i64),
    TransactionWritten,
    TransactionCommitted(WriteResult),
}

/// What to do with an operation after inspecting a response.
#[derive(Debug)]
pub enum Decision {
    /// Resolve the caller with this result.
    EndOperation(Result<OperationOutput, ClientError>),
    /// Send the request again.
    Retry(String),
    /// Send the request again to another node.
    Reconnect(NodeEndpoints),
    /// The response made no sense for this operation.
    NotHandled(String),
}

impl OperationRequest {
    pub fn kind(&self) -> &'static OperationKind {
        match self {
            OperationRequest::AppendToStream { .. } => &APPEND_TO_STREAM,
            OperationRequest::SetStreamMetadata { .. } => &SET_STREAM_METADATA,
            OperationRequest::DeleteStream { .. } => &DELETE_STREAM,
            OperationRequest::ReadEvent { .. } => &READ_EVENT,
            OperationRequest::ReadStreamEvents {
                direction: ReadDirection::Forward,
                ..
            } => &READ_STREAM_FORWARD,
            OperationRequest::ReadStreamEvents {
                direction: ReadDirection::Backward,
                ..
            } => &READ_STREAM_BACKWARD,
            OperationRequest::ReadAllEvents {
                direction: ReadDirection::Forward,
                ..
            } => &READ_ALL_FORWARD,
            OperationRequest::ReadAllEvents {
                direction: ReadDirection::Backward,
                ..
            } => &READ_ALL_BACKWARD,
            OperationRequest::StartTransaction { .. } => &START_TRANSACTION,
            OperationRequest::TransactionalWrite { .. } => &TRANSACTIONAL_WRITE,
            OperationRequest::CommitTransaction { .. } => &COMMIT_TRANSACTION,
        }
    }

    /// Serializes the request body.
    pub fn build_body(&self) -> Result<Bytes, ClientError> {
        let body = match self {
            OperationRequest::AppendToStream {
                stream,
                expected_version,
                events,
                require_master,
            } => serde_json::to_vec(&WriteEvents {
                event_stream_id: stream.clone(),
                expected_version: expected_version.value(),
                events: new_events(events),
                require_master: *require_master,
            })?,
            OperationRequest::SetStreamMetadata {
                stream,
                expected_metastream_version,
                metadata,
                require_master,
            } => serde_json::to_vec(&WriteEvents {
                event_stream_id: metastream_of(stream),
                expected_version: expected_metastream_version.value(),
                events: vec![metadata.to_new_event()],
                require_master: *require_master,
            })?,
            OperationRequest::DeleteStream {
                stream,
                expected_version,
                hard_delete,
                require_master,
            } => serde_json::to_vec(&DeleteStream {
                event_stream_id: stream.clone(),
                expected_version: expected_version.value(),
                require_master: *require_master,
                hard_delete: *hard_delete,
            })?,
            OperationRequest::ReadEvent {
                stream,
                event_number,
                resolve_link_tos,
                require_master,
            } => serde_json::to_vec(&ReadEvent {
                event_stream_id: stream.clone(),
                event_number: *event_number,
                resolve_link_tos: *resolve_link_tos,
                require_master: *require_master,
            })?,
            OperationRequest::ReadStreamEvents {
                stream,
                start,
                max_count,
                resolve_link_tos,
                require_master,
                ..
            } => serde_json::to_vec(&ReadStreamEvents {
                event_stream_id: stream.clone(),
                from_event_number: *start,
                max_count: *max_count,
                resolve_link_tos: *resolve_link_tos,
                require_master: *require_master,
            })?,
            OperationRequest::ReadAllEvents {
                position,
                max_count,
                resolve_link_tos,
                require_master,
                ..
            } => serde_json::to_vec(&ReadAllEvents {
                commit_position: position.commit,
                prepare_position: position.prepare,
                max_count: *max_count,
                resolve_link_tos: *resolve_link_tos,
                require_master: *require_master,
            })?,
            OperationRequest::StartTransaction {
                stream,
                expected_version,
                require_master,
            } => serde_json::to_vec(&TransactionStart {
                event_stream_id: stream.clone(),
                expected_version: expected_version.value(),
                require_master: *require_master,
            })?,
            OperationRequest::TransactionalWrite {
                transaction_id,
                events,
                require_master,
            } => serde_json::to_vec(&TransactionWrite {
                transaction_id: *transaction_id,
                events: new_events(events),
                require_master: *require_master,
            })?,
            OperationRequest::CommitTransaction {
                transaction_id,
                require_master,
                ..
            } => serde_json::to_vec(&TransactionCommit {
                transaction_id: *transaction_id,
                require_master: *require_master,
            })?,
        };
        Ok(Bytes::from(body))
    }

    /// Builds the request package for the given correlation id.
    pub fn build_package(&self, correlation_id: Uuid) -> Result<Package, ClientError> {
        Ok(Package::new(self.kind().request, correlation_id).with_body(self.build_body()?))
    }

    /// Decides what a response means for this operation.
    pub fn inspect(&self, package: &Package) -> Decision {
        let kind = self.kind();
        match package.command {
            command if command == kind.response => self.inspect_response(package),
            Command::NotAuthenticated => Decision::EndOperation(Err(
                ClientError::NotAuthenticated(package.body_text()),
            )),
            Command::BadRequest => {
                Decision::EndOperation(Err(ClientError::BadRequest(package.body_text())))
            }
            Command::NotHandled => inspect_not_handled(package),
            other => Decision::NotHandled(format!(
                "unexpected command {} in response to {}",
                other, kind.name
            )),
        }
    }

    fn inspect_response(&self, package: &Package) -> Decision {
        match self {
            OperationRequest::AppendToStream {
                stream,
                expected_version,
                ..
            } => decode(package, |body: WriteEventsCompleted| {
                write_decision(
                    body.result,
                    stream,
                    expected_version.value(),
                    body.current_version,
                    || {
                        OperationOutput::Write(WriteResult {
                            next_expected_version: body.last_event_number,
                            log_position: Position::from_optional(
                                body.commit_position,
                                body.prepare_position,
                            ),
                        })
                    },
                )
            }),
            OperationRequest::SetStreamMetadata {
                stream,
                expected_metastream_version,
                ..
            } => decode(package, |body: WriteEventsCompleted| {
                write_decision(
                    body.result,
                    &metastream_of(stream),
                    expected_metastream_version.value(),
                    body.current_version,
                    || {
                        OperationOutput::Write(WriteResult {
                            next_expected_version: body.last_event_number,
                            log_position: Position::from_optional(
                                body.commit_position,
                                body.prepare_position,
                            ),
                        })
                    },
                )
            }),
            OperationRequest::DeleteStream {
                stream,
                expected_version,
                ..
            } => decode(package, |body: DeleteStreamCompleted| {
                write_decision(body.result, stream, expected_version.value(), None, || {
                    OperationOutput::Delete(DeleteResult {
                        log_position: Position::from_optional(
                            body.commit_position,
                            body.prepare_position,
                        ),
                    })
                })
            }),
            OperationRequest::StartTransaction {
                stream,
                expected_version,
                ..
            } => decode(package, |body: TransactionStartCompleted| {
                write_decision(body.result, stream, expected_version.value(), None, || {
                    OperationOutput::TransactionStarted(body.transaction_id)
                })
            }),
            OperationRequest::TransactionalWrite { transaction_id, .. } => {
                decode(package, |body: TransactionWriteCompleted| {
                    write_decision(
                        body.result,
                        &transaction_label(*transaction_id),
                        ExpectedVersion::Any.value(),
                        None,
                        || OperationOutput::TransactionWritten,
                    )
                })
            }
            OperationRequest::CommitTransaction {
                transaction_id,
                stream,
                expected_version,
                ..
            } => decode(package, |body: TransactionCommitCompleted| {
                let stream = stream
                    .clone()
                    .unwrap_or_else(|| transaction_label(*transaction_id));
                let expected = expected_version.unwrap_or(ExpectedVersion::Any).value();
                write_decision(body.result, &stream, expected, None, || {
                    OperationOutput::TransactionCommitted(WriteResult {
                        next_expected_version: body.last_event_number,
                        log_position: Position::from_optional(
                            body.commit_position,
                            body.prepare_position,
                        ),
                    })
                })
            }),
            OperationRequest::ReadEvent {
                stream,
                event_number,
                ..
            } => decode(package, |body: ReadEventCompleted| {
                let status = match body.result {
                    ReadEventResult::Success => EventReadStatus::Success,
                    ReadEventResult::NotFound => EventReadStatus::NotFound,
                    ReadEventResult::NoStream => EventReadStatus::NoStream,
                    ReadEventResult::StreamDeleted => EventReadStatus::StreamDeleted,
                    ReadEventResult::Error => {
                        return end_err(ClientError::ServerError(server_message(body.error)))
                    }
                    ReadEventResult::AccessDenied => {
                        return end_err(read_access_denied(stream));
                    }
                };
                let event = match status {
                    EventReadStatus::Success => body.event.map(ResolvedEvent::from),
                    _ => None,
                };
                Decision::EndOperation(Ok(OperationOutput::Event(EventReadResult {
                    status,
                    stream: stream.clone(),
                    event_number: *event_number,
                    event,
                })))
            }),
            OperationRequest::ReadStreamEvents {
                direction,
                stream,
                start,
                ..
            } => decode(package, |body: ReadStreamEventsCompleted| {
                let status = match body.result {
                    ReadStreamResult::Success | ReadStreamResult::NotModified => {
                        SliceReadStatus::Success
                    }
                    ReadStreamResult::NoStream => SliceReadStatus::StreamNotFound,
                    ReadStreamResult::StreamDeleted => SliceReadStatus::StreamDeleted,
                    ReadStreamResult::Error => {
                        return end_err(ClientError::ServerError(server_message(body.error)))
                    }
                    ReadStreamResult::AccessDenied => return end_err(read_access_denied(stream)),
                };
                let events = match status {
                    SliceReadStatus::Success => {
                        body.events.into_iter().map(ResolvedEvent::from).collect()
                    }
                    _ => Vec::new(),
                };
                Decision::EndOperation(Ok(OperationOutput::StreamSlice(StreamEventsSlice {
                    status,
                    stream: stream.clone(),
                    from_event_number: *start,
                    read_direction: *direction,
                    events,
                    next_event_number: body.next_event_number,
                    last_event_number: body.last_event_number,
                    is_end_of_stream: body.is_end_of_stream,
                })))
            }),
            OperationRequest::ReadAllEvents { direction, .. } => {
                decode(package, |body: ReadAllEventsCompleted| match body.result {
                    ReadAllResult::Success | ReadAllResult::NotModified => {
                        Decision::EndOperation(Ok(OperationOutput::AllSlice(AllEventsSlice {
                            read_direction: *direction,
                            from_position: Position::new(
                                body.commit_position,
                                body.prepare_position,
                            ),
                            next_position: Position::new(
                                body.next_commit_position,
                                body.next_prepare_position,
                            ),
                            events: body.events.into_iter().map(ResolvedEvent::from).collect(),
                        })))
                    }
                    ReadAllResult::Error => {
                        end_err(ClientError::ServerError(server_message(body.error)))
                    }
                    ReadAllResult::AccessDenied => end_err(ClientError::AccessDenied(
                        "read access denied for $all".to_string(),
                    )),
                })
            }
        }
    }
}

/// Returns the metadata stream of `stream`.
pub fn metastream_of(stream: &str) -> String {
    format!("{}{}", METASTREAM_PREFIX, stream)
}

fn new_events(events: &[EventData]) -> Vec<NewEvent> {
    events.iter().map(EventData::to_new_event).collect()
}

fn transaction_label(transaction_id: i64) -> String {
    format!("transaction {}", transaction_id)
}

fn server_message(error: Option<String>) -> String {
    error.unwrap_or_else(|| "unspecified server error".to_string())
}

fn read_access_denied(stream: &str) -> ClientError {
    ClientError::AccessDenied(format!("read access denied for stream '{}'", stream))
}

fn end_err(error: ClientError) -> Decision {
    Decision::EndOperation(Err(error))
}

fn decode<T: DeserializeOwned>(package: &Package, f: impl FnOnce(T) -> Decision) -> Decision {
    match package.body_json::<T>() {
        Ok(body) => f(body),
        Err(e) => Decision::NotHandled(format!("malformed {} body: {}", package.command, e)),
    }
}

/// Maps a write-class result code.
fn write_decision(
    result: OperationResult,
    stream: &str,
    expected: i64,
    current: Option<i64>,
    on_success: impl FnOnce() -> OperationOutput,
) -> Decision {
    match result {
        OperationResult::Success => Decision::EndOperation(Ok(on_success())),
        OperationResult::PrepareTimeout
        | OperationResult::CommitTimeout
        | OperationResult::ForwardTimeout => Decision::Retry(result.to_string()),
        OperationResult::WrongExpectedVersion => end_err(ClientError::WrongExpectedVersion {
            stream: stream.to_string(),
            expected,
            current,
        }),
        OperationResult::StreamDeleted => end_err(ClientError::StreamDeleted {
            stream: stream.to_string(),
        }),
        OperationResult::InvalidTransaction => end_err(ClientError::InvalidTransaction),
        OperationResult::AccessDenied => end_err(ClientError::AccessDenied(format!(
            "write access denied for stream '{}'",
            stream
        ))),
    }
}

fn inspect_not_handled(package: &Package) -> Decision {
    let body: NotHandled = match package.body_json() {
        Ok(body) => body,
        Err(e) => return Decision::NotHandled(format!("malformed NotHandled body: {}", e)),
    };
    match body.reason {
        NotHandledReason::NotReady => Decision::Retry("server not ready".to_string()),
        NotHandledReason::TooBusy => Decision::Retry("server too busy".to_string()),
        NotHandledReason::NotMaster => match body.additional_info {
            Some(info) => match NodeEndpoints::from_master_info(&info) {
                Ok(endpoints) => Decision::Reconnect(endpoints),
                Err(e) => Decision::NotHandled(e.to_string()),
            },
            None => Decision::Retry("not master, no master info".to_string()),
        },
    }
}
