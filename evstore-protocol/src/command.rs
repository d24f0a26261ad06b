//! Command tags.
//!
//! The command set is closed and defined by the server. Every frame carries
//! exactly one tag in its first content byte.

use crate::error::ProtocolError;
use std::fmt;

/// Protocol command carried by a [`Package`](crate::Package).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    // Liveness
    HeartbeatRequest = 0x01,
    HeartbeatResponse = 0x02,
    Ping = 0x03,
    Pong = 0x04,

    // Writes
    WriteEvents = 0x82,
    WriteEventsCompleted = 0x83,
    TransactionStart = 0x84,
    TransactionStartCompleted = 0x85,
    TransactionWrite = 0x86,
    TransactionWriteCompleted = 0x87,
    TransactionCommit = 0x88,
    TransactionCommitCompleted = 0x89,
    DeleteStream = 0x8A,
    DeleteStreamCompleted = 0x8B,

    // Reads
    ReadEvent = 0xB0,
    ReadEventCompleted = 0xB1,
    ReadStreamEventsForward = 0xB2,
    ReadStreamEventsForwardCompleted = 0xB3,
    ReadStreamEventsBackward = 0xB4,
    ReadStreamEventsBackwardCompleted = 0xB5,
    ReadAllEventsForward = 0xB6,
    ReadAllEventsForwardCompleted = 0xB7,
    ReadAllEventsBackward = 0xB8,
    ReadAllEventsBackwardCompleted = 0xB9,

    // Subscriptions
    SubscribeToStream = 0xC0,
    SubscriptionConfirmation = 0xC1,
    StreamEventAppeared = 0xC2,
    UnsubscribeFromStream = 0xC3,
    SubscriptionDropped = 0xC4,

    // Control
    BadRequest = 0xF0,
    NotHandled = 0xF1,
    Authenticate = 0xF2,
    Authenticated = 0xF3,
    NotAuthenticated = 0xF4,
}

impl Command {
    /// Every command, in tag order.
    pub const ALL: [Command; 34] = [
        Command::HeartbeatRequest,
        Command::HeartbeatResponse,
        Command::Ping,
        Command::Pong,
        Command::WriteEvents,
        Command::WriteEventsCompleted,
        Command::TransactionStart,
        Command::TransactionStartCompleted,
        Command::TransactionWrite,
        Command::TransactionWriteCompleted,
        Command::TransactionCommit,
        Command::TransactionCommitCompleted,
        Command::DeleteStream,
        Command::DeleteStreamCompleted,
        Command::ReadEvent,
        Command::ReadEventCompleted,
        Command::ReadStreamEventsForward,
        Command::ReadStreamEventsForwardCompleted,
        Command::ReadStreamEventsBackward,
        Command::ReadStreamEventsBackwardCompleted,
        Command::ReadAllEventsForward,
        Command::ReadAllEventsForwardCompleted,
        Command::ReadAllEventsBackward,
        Command::ReadAllEventsBackwardCompleted,
        Command::SubscribeToStream,
        Command::SubscriptionConfirmation,
        Command::StreamEventAppeared,
        Command::UnsubscribeFromStream,
        Command::SubscriptionDropped,
        Command::BadRequest,
        Command::NotHandled,
        Command::Authenticate,
        Command::Authenticated,
        Command::NotAuthenticated,
    ];

    /// Returns the wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Looks up a command by its wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.tag() == tag)
    }

    /// Returns whether this command belongs to the heartbeat exchange.
    pub fn is_heartbeat(self) -> bool {
        matches!(self, Command::HeartbeatRequest | Command::HeartbeatResponse)
    }

    /// Returns whether this command is the server's answer to `Authenticate`.
    pub fn is_authentication_result(self) -> bool {
        matches!(self, Command::Authenticated | Command::NotAuthenticated)
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Command::from_tag(tag).ok_or(ProtocolError::UnknownCommand(tag))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
